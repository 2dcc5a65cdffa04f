//! Push command implementation.

use fieldsync_engine::SyncConfig;
use std::path::Path;

/// Uploads one file.
pub async fn run(config: SyncConfig, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let engine = super::one_shot_engine(config)?;
    let outcome = engine.push(path).await?;
    super::finish(path, outcome)
}
