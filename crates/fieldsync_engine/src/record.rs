//! Per-file synchronization records.

use fieldsync_protocol::{RecordQuery, SyncMeta};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// Hidden per-root directory holding sidecar metadata.
pub const SYNC_DIR: &str = ".sync_data";

/// Normalizes a path to forward slashes without a trailing slash.
pub fn normalize_path(path: &Path) -> PathBuf {
    let s = path.to_string_lossy().replace('\\', "/");
    let trimmed = s.trim_end_matches('/');
    if trimmed.is_empty() && s.starts_with('/') {
        PathBuf::from("/")
    } else {
        PathBuf::from(trimmed)
    }
}

/// Remote location of a file's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldTarget {
    /// Remote table.
    pub table: String,
    /// Natural key field.
    pub key_field: String,
    /// Field holding the content.
    pub field: String,
    /// File name with the mapped suffix stripped.
    pub key_value: String,
}

impl FieldTarget {
    /// Builds the lookup query, preferring a known record identifier.
    pub fn query(&self, record_id: Option<&str>) -> RecordQuery {
        match record_id {
            Some(id) => RecordQuery::by_id(&self.table, &self.field, id),
            None => RecordQuery::by_key(&self.table, &self.field, &self.key_field, &self.key_value),
        }
    }
}

#[derive(Debug, Default)]
struct RecordState {
    /// `None` until the sidecar has been read once.
    meta: Option<SyncMeta>,
    newly_discovered: bool,
    errors: Vec<String>,
}

/// Synchronization state of one tracked file.
///
/// Created once per path by the record store and shared between every
/// transfer touching the file.
#[derive(Debug)]
pub struct SyncRecord {
    file_path: PathBuf,
    root_dir: PathBuf,
    folder: String,
    target: FieldTarget,
    meta_path: PathBuf,
    state: Mutex<RecordState>,
    transfer: tokio::sync::Mutex<()>,
}

impl SyncRecord {
    pub(crate) fn new(
        file_path: PathBuf,
        root_dir: PathBuf,
        folder: String,
        target: FieldTarget,
    ) -> Self {
        let relative = file_path
            .strip_prefix(&root_dir)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(file_path.file_name().unwrap_or_default()));
        let meta_path = root_dir.join(SYNC_DIR).join(relative);

        Self {
            file_path,
            root_dir,
            folder,
            target,
            meta_path,
            state: Mutex::new(RecordState::default()),
            transfer: tokio::sync::Mutex::new(()),
        }
    }

    /// Normalized absolute path of the file.
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Configured root the file lives under.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// First path segment under the root.
    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Remote table and field for this file.
    pub fn target(&self) -> &FieldTarget {
        &self.target
    }

    /// Path of the sidecar metadata file.
    pub fn meta_path(&self) -> &Path {
        &self.meta_path
    }

    /// Marks the file as just created by the user.
    pub fn set_newly_discovered(&self, is_new: bool) {
        self.state.lock().newly_discovered = is_new;
    }

    /// Returns true if the file was reported as just created.
    pub fn is_newly_discovered(&self) -> bool {
        self.state.lock().newly_discovered
    }

    /// Clears the newly-discovered flag, returning its previous value.
    pub fn take_newly_discovered(&self) -> bool {
        std::mem::take(&mut self.state.lock().newly_discovered)
    }

    /// Records a permanent error. The file is skipped from now on.
    pub fn add_error(&self, message: impl Into<String>) {
        self.state.lock().errors.push(message.into());
    }

    /// Returns the recorded errors.
    pub fn errors(&self) -> Vec<String> {
        self.state.lock().errors.clone()
    }

    /// Returns true if any error was recorded.
    pub fn has_errors(&self) -> bool {
        !self.state.lock().errors.is_empty()
    }

    /// Waits until no other transfer is using this file.
    pub(crate) async fn lock_transfer(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.transfer.lock().await
    }

    pub(crate) fn cached_meta(&self) -> Option<SyncMeta> {
        self.state.lock().meta.clone()
    }

    pub(crate) fn set_cached_meta(&self, meta: SyncMeta) {
        self.state.lock().meta = Some(meta);
    }

    pub(crate) fn clear_cached_meta(&self) {
        self.state.lock().meta = None;
    }
}
