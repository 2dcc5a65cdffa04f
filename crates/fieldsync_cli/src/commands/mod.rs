//! CLI command implementations.

pub mod pull;
pub mod push;
pub mod status;
pub mod watch;

use crate::client::ReqwestClient;
use fieldsync_engine::{
    FsWatcher, HttpTableService, LogNotifier, RemoteRegistry, RemoteTable, SyncConfig, SyncEngine,
    TransferOutcome,
};
use std::path::Path;
use std::sync::Arc;

/// One HTTP table service per configured root.
pub fn remotes(config: &SyncConfig) -> Result<RemoteRegistry, Box<dyn std::error::Error>> {
    let mut registry = RemoteRegistry::new();
    for (root, root_config) in &config.roots {
        let client = ReqwestClient::new(root_config)?;
        let service = HttpTableService::new(root_config.base_url(), client);
        registry = registry.with_root(root, Arc::new(service) as Arc<dyn RemoteTable>);
    }
    Ok(registry)
}

/// Builds an engine whose watch is never started, for one-shot commands.
pub fn one_shot_engine(config: SyncConfig) -> Result<SyncEngine, Box<dyn std::error::Error>> {
    let remotes = remotes(&config)?;
    let (watcher, _events) = FsWatcher::channel(&config)?;
    Ok(SyncEngine::new(
        config,
        remotes,
        Arc::new(watcher),
        Arc::new(LogNotifier),
    ))
}

/// Turns a transfer outcome into the command's exit status.
pub fn finish(path: &Path, outcome: TransferOutcome) -> Result<(), Box<dyn std::error::Error>> {
    match outcome {
        TransferOutcome::Downloaded => println!("Downloaded {}", path.display()),
        TransferOutcome::Uploaded => println!("Uploaded {}", path.display()),
        TransferOutcome::AlreadyInSync => println!("{} is already in sync", path.display()),
        TransferOutcome::Refused => {
            return Err(format!(
                "{}: instance changed since last sync; not pushing",
                path.display()
            )
            .into())
        }
        TransferOutcome::Failed(reason) => {
            return Err(format!("{}: {}", path.display(), reason).into())
        }
    }
    Ok(())
}
