//! Watch command implementation.

use fieldsync_engine::{FsWatcher, LogNotifier, SyncConfig, SyncEngine};
use std::sync::Arc;
use tracing::{info, warn};

/// Syncs the configured roots until interrupted.
///
/// Start-up downloads run before the watch comes up.
pub async fn run(config: SyncConfig, resync: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (watcher, events) = FsWatcher::channel(&config)?;
    let remotes = super::remotes(&config)?;
    let engine = Arc::new(SyncEngine::new(
        config,
        remotes,
        Arc::new(watcher),
        Arc::new(LogNotifier),
    ));

    let results = if resync {
        engine.resync_all().await?
    } else {
        engine.preload_from_config().await
    };
    let failed = results
        .iter()
        .filter(|(_, outcome)| !outcome.is_success())
        .count();
    if failed > 0 {
        warn!(failed, total = results.len(), "some start-up downloads failed");
    } else if !results.is_empty() {
        info!(total = results.len(), "start-up downloads complete");
    }

    engine.start()?;
    for root in engine.config().roots.keys() {
        info!(root = %root.display(), "watching for changes");
    }
    let runner = tokio::spawn(Arc::clone(&engine).run(events));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    engine.shutdown();
    runner.abort();
    Ok(())
}
