//! Status command implementation.

use fieldsync_engine::{FileStatus, SyncConfig};
use serde::Serialize;
use std::path::Path;

/// Sync state of one file.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// File path.
    pub path: String,
    /// Remote table.
    pub table: String,
    /// Remote field.
    pub field: String,
    /// Natural key value.
    pub key: String,
    /// Remote record identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    /// Hash stored at the last sync.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_hash: Option<String>,
    /// Hash of the file on disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_hash: Option<String>,
    /// Whether the file changed since the last sync.
    pub modified: bool,
    /// Errors blocking the file.
    pub errors: Vec<String>,
}

impl From<FileStatus> for StatusReport {
    fn from(status: FileStatus) -> Self {
        Self {
            modified: status.locally_modified(),
            path: status.path.display().to_string(),
            table: status.table,
            field: status.field,
            key: status.key_value,
            record_id: status.record_id,
            stored_hash: status.stored_hash.map(|h| h.to_string()),
            local_hash: status.local_hash.map(|h| h.to_string()),
            errors: status.errors,
        }
    }
}

/// Runs the status command.
pub async fn run(
    config: SyncConfig,
    path: &Path,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = super::one_shot_engine(config)?;
    let report = StatusReport::from(engine.status(path).await?);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text(&report),
    }
    Ok(())
}

fn print_text(report: &StatusReport) {
    println!("File:        {}", report.path);
    println!("Maps to:     {}.{} [{}]", report.table, report.field, report.key);
    println!(
        "Record:      {}",
        report.record_id.as_deref().unwrap_or("(never synced)")
    );
    println!(
        "Stored hash: {}",
        report.stored_hash.as_deref().unwrap_or("-")
    );
    println!(
        "Local hash:  {}",
        report.local_hash.as_deref().unwrap_or("(missing)")
    );
    println!("Modified:    {}", if report.modified { "yes" } else { "no" });
    for error in &report.errors {
        println!("Error:       {error}");
    }
}
