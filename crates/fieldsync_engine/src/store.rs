//! Sync record store.
//!
//! Single source of truth for per-file identity, sidecar metadata and the
//! remote field a file maps to. Sidecar files live under a hidden
//! directory in each root, mirroring the tracked file's relative path:
//!
//! ```text
//! <root>/
//! ├─ .sync_data/
//! │  └─ script_includes/Util.js     # {"recordId":…,"contentHash":…}
//! └─ script_includes/
//!    └─ Util.js                     # tracked content
//! ```

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::record::{normalize_path, FieldTarget, SyncRecord};
use fieldsync_protocol::{ContentHash, RemoteIdentity, SyncMeta};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Maps file paths to their synchronization records.
pub struct SyncRecordStore {
    config: Arc<SyncConfig>,
    records: RwLock<HashMap<PathBuf, Arc<SyncRecord>>>,
}

impl SyncRecordStore {
    /// Creates an empty store.
    pub fn new(config: Arc<SyncConfig>) -> Self {
        Self {
            config,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the configuration the store resolves against.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Walks up from the file's directory until a configured root matches.
    pub fn find_root(&self, path: &Path) -> SyncResult<PathBuf> {
        let mut dir = path.parent();
        while let Some(candidate) = dir {
            let normalized = normalize_path(candidate);
            if self.config.roots.contains_key(&normalized) {
                return Ok(normalized);
            }
            dir = candidate.parent();
        }
        Err(SyncError::RootNotFound(path.to_path_buf()))
    }

    /// Resolves a path to its record, creating it on first sight.
    ///
    /// Returns `Ok(None)` for paths that are never tracked: hidden files and
    /// files without a folder or suffix mapping. Repeated calls for the same
    /// path return the same record.
    ///
    /// # Errors
    ///
    /// Returns `RootNotFound` if no configured root contains the path.
    pub fn resolve(&self, path: &Path) -> SyncResult<Option<Arc<SyncRecord>>> {
        let file_path = normalize_path(path);
        if let Some(existing) = self.records.read().get(&file_path) {
            return Ok(Some(Arc::clone(existing)));
        }

        let Some(file_name) = file_path.file_name().map(|n| n.to_string_lossy().into_owned())
        else {
            return Ok(None);
        };
        if file_name.starts_with('.') {
            debug!(path = %file_path.display(), "ignoring hidden file");
            return Ok(None);
        }

        let root_dir = self.find_root(&file_path)?;
        let Some(target) = self.map_file(&root_dir, &file_path, &file_name) else {
            return Ok(None);
        };
        let folder = first_segment(&root_dir, &file_path).unwrap_or_default();

        let mut records = self.records.write();
        let record = records
            .entry(file_path.clone())
            .or_insert_with(|| Arc::new(SyncRecord::new(file_path, root_dir, folder, target)));
        Ok(Some(Arc::clone(record)))
    }

    /// Returns an already tracked record.
    pub fn get(&self, path: &Path) -> Option<Arc<SyncRecord>> {
        self.records.read().get(&normalize_path(path)).cloned()
    }

    /// Number of tracked files.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no file is tracked.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn map_file(&self, root_dir: &Path, file_path: &Path, file_name: &str) -> Option<FieldTarget> {
        let folder = first_segment(root_dir, file_path)?;
        let Some(mapping) = self.config.folder(&folder) else {
            warn!(path = %file_path.display(), folder = %folder, "no folder mapping");
            return None;
        };
        let Some(found) = mapping.match_file(file_name) else {
            warn!(path = %file_path.display(), "no field mapping for file suffix");
            return None;
        };
        Some(FieldTarget {
            table: mapping.table.clone(),
            key_field: mapping.key.clone(),
            field: found.field,
            key_value: found.key_value,
        })
    }

    /// Reads the persisted metadata.
    ///
    /// A missing sidecar is the normal state of a never-synced file and
    /// yields `Ok(None)`. A sidecar that exists but cannot be read or
    /// decoded is an error.
    pub async fn get_meta(&self, record: &SyncRecord) -> SyncResult<Option<SyncMeta>> {
        if let Some(meta) = record.cached_meta() {
            return Ok(Some(meta));
        }

        let path = record.meta_path();
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "sync metadata not yet existing");
                return Ok(None);
            }
            Err(e) => return Err(SyncError::io(path, e)),
        };

        let meta = SyncMeta::decode(&data).map_err(|e| SyncError::MetaCorrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        record.set_cached_meta(meta.clone());
        Ok(Some(meta))
    }

    /// Returns the content hash recorded at the last successful sync.
    pub async fn local_hash(&self, record: &SyncRecord) -> SyncResult<Option<ContentHash>> {
        Ok(self
            .get_meta(record)
            .await?
            .and_then(|meta| meta.content_hash))
    }

    /// Merges remote record identity into the metadata.
    ///
    /// The content hash is left untouched. The merge is persisted by the
    /// next [`save_hash`](Self::save_hash).
    pub async fn update_meta(&self, record: &SyncRecord, identity: &RemoteIdentity) {
        let mut meta = self.load_or_default(record).await;
        meta.merge_identity(identity);
        debug!(path = %record.file_path().display(), ?meta, "updated meta");
        record.set_cached_meta(meta);
    }

    /// Hashes `content` and persists it as the new baseline, keeping any
    /// previously stored remote identity.
    ///
    /// # Errors
    ///
    /// Returns `MetaPersist` if the sidecar cannot be written. Callers must
    /// surface this: future conflict detection cannot trust the baseline.
    pub async fn save_hash(&self, record: &SyncRecord, content: &[u8]) -> SyncResult<ContentHash> {
        let hash = ContentHash::of(content);
        let mut meta = self.load_or_default(record).await;
        meta.content_hash = Some(hash.clone());

        debug!(path = %record.file_path().display(), hash = %hash, "saving sync metadata");
        write_meta(record.meta_path(), &meta).await?;
        record.set_cached_meta(meta);
        Ok(hash)
    }

    /// Removes the sidecar metadata of a file.
    pub async fn clear_meta(&self, record: &SyncRecord) -> SyncResult<()> {
        record.clear_cached_meta();
        match tokio::fs::remove_file(record.meta_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::io(record.meta_path(), e)),
        }
    }

    /// Loads metadata for a write. A corrupt sidecar is replaced, since the
    /// caller is about to store fresh remote truth.
    async fn load_or_default(&self, record: &SyncRecord) -> SyncMeta {
        match self.get_meta(record).await {
            Ok(meta) => meta.unwrap_or_default(),
            Err(e) => {
                warn!(path = %record.file_path().display(), error = %e, "replacing unreadable sync metadata");
                SyncMeta::default()
            }
        }
    }
}

fn first_segment(root_dir: &Path, file_path: &Path) -> Option<String> {
    let relative = file_path.strip_prefix(root_dir).ok()?;
    let mut components = relative.components();
    let first = components.next()?;
    // The file itself must sit below the folder.
    components.next()?;
    match first {
        Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
        _ => None,
    }
}

/// Writes metadata using write-then-rename so a crash never leaves a
/// truncated sidecar.
async fn write_meta(path: &Path, meta: &SyncMeta) -> SyncResult<()> {
    let persist = |source| SyncError::MetaPersist {
        path: path.to_path_buf(),
        source,
    };

    let data = meta
        .encode()
        .map_err(|e| persist(std::io::Error::new(ErrorKind::InvalidData, e.to_string())))?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(persist)?;
    }
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    tokio::fs::write(&temp, &data).await.map_err(persist)?;
    tokio::fs::rename(&temp, path).await.map_err(persist)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FolderMapping, RootConfig};
    use tempfile::tempdir;

    fn store_for(root: &Path) -> SyncRecordStore {
        let config = SyncConfig::new()
            .with_root(root, RootConfig::new("dev.example.com"))
            .with_folder(
                "business_rules",
                FolderMapping::new("sys_script", "name")
                    .with_field("js", "script")
                    .with_field("condition.js", "condition"),
            );
        SyncRecordStore::new(Arc::new(config))
    }

    #[test]
    fn resolve_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = store_for(dir.path());
        let path = dir.path().join("business_rules/check.js");

        let a = store.resolve(&path).unwrap().unwrap();
        let b = store.resolve(&path).unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);
        assert_eq!(a.folder(), "business_rules");
        assert_eq!(a.root_dir(), normalize_path(dir.path()));
    }

    #[test]
    fn resolve_uses_longest_suffix() {
        let dir = tempdir().unwrap();
        let store = store_for(dir.path());
        let record = store
            .resolve(&dir.path().join("business_rules/script.condition.js"))
            .unwrap()
            .unwrap();
        assert_eq!(record.target().field, "condition");
        assert_eq!(record.target().key_value, "script");
    }

    #[test]
    fn resolve_rejects_untrackable_paths() {
        let dir = tempdir().unwrap();
        let store = store_for(dir.path());

        assert!(store.resolve(&dir.path().join("business_rules/.hidden.js")).unwrap().is_none());
        assert!(store.resolve(&dir.path().join("unmapped/check.js")).unwrap().is_none());
        assert!(store.resolve(&dir.path().join("business_rules/check.txt")).unwrap().is_none());
        assert!(store.resolve(&dir.path().join("check.js")).unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn resolve_outside_roots_fails() {
        let dir = tempdir().unwrap();
        let store = store_for(&dir.path().join("root"));
        let err = store.resolve(&dir.path().join("elsewhere/business_rules/a.js"));
        assert!(matches!(err, Err(SyncError::RootNotFound(_))));
    }

    #[tokio::test]
    async fn missing_meta_is_absent_not_error() {
        let dir = tempdir().unwrap();
        let store = store_for(dir.path());
        let record = store.resolve(&dir.path().join("business_rules/a.js")).unwrap().unwrap();

        assert_eq!(store.get_meta(&record).await.unwrap(), None);
        assert_eq!(store.local_hash(&record).await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_meta_is_an_error() {
        let dir = tempdir().unwrap();
        let store = store_for(dir.path());
        let record = store.resolve(&dir.path().join("business_rules/a.js")).unwrap().unwrap();

        std::fs::create_dir_all(record.meta_path().parent().unwrap()).unwrap();
        std::fs::write(record.meta_path(), b"{not json").unwrap();

        let err = store.get_meta(&record).await.unwrap_err();
        assert!(matches!(err, SyncError::MetaCorrupt { .. }));

        // A fresh save replaces the corrupt sidecar.
        store.save_hash(&record, b"abc").await.unwrap();
        record.clear_cached_meta();
        let meta = store.get_meta(&record).await.unwrap().unwrap();
        assert_eq!(meta.content_hash, Some(ContentHash::of(b"abc")));
    }

    #[tokio::test]
    async fn save_hash_preserves_identity() {
        let dir = tempdir().unwrap();
        let store = store_for(dir.path());
        let record = store.resolve(&dir.path().join("business_rules/a.js")).unwrap().unwrap();

        store
            .update_meta(
                &record,
                &RemoteIdentity {
                    record_id: Some("0a1b".into()),
                    updated_at: Some("2024-03-01 12:00:00".into()),
                    updated_by: Some("admin".into()),
                },
            )
            .await;
        store.save_hash(&record, b"first").await.unwrap();
        let first = std::fs::read(record.meta_path()).unwrap();

        store.save_hash(&record, b"first").await.unwrap();
        let second = std::fs::read(record.meta_path()).unwrap();
        assert_eq!(first, second);

        record.clear_cached_meta();
        let meta = store.get_meta(&record).await.unwrap().unwrap();
        assert_eq!(meta.record_id.as_deref(), Some("0a1b"));
        assert_eq!(meta.remote_updated_by.as_deref(), Some("admin"));
        assert_eq!(meta.content_hash, Some(ContentHash::of(b"first")));
    }

    #[tokio::test]
    async fn update_meta_leaves_hash() {
        let dir = tempdir().unwrap();
        let store = store_for(dir.path());
        let record = store.resolve(&dir.path().join("business_rules/a.js")).unwrap().unwrap();

        store.save_hash(&record, b"body").await.unwrap();
        store
            .update_meta(
                &record,
                &RemoteIdentity {
                    record_id: Some("ff".into()),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(
            store.local_hash(&record).await.unwrap(),
            Some(ContentHash::of(b"body"))
        );
    }

    #[tokio::test]
    async fn clear_meta_removes_sidecar() {
        let dir = tempdir().unwrap();
        let store = store_for(dir.path());
        let record = store.resolve(&dir.path().join("business_rules/a.js")).unwrap().unwrap();

        store.save_hash(&record, b"body").await.unwrap();
        assert!(record.meta_path().exists());
        store.clear_meta(&record).await.unwrap();
        assert!(!record.meta_path().exists());
        assert_eq!(store.get_meta(&record).await.unwrap(), None);
        store.clear_meta(&record).await.unwrap();
    }

    #[tokio::test]
    async fn unwritable_meta_is_persist_error() {
        let dir = tempdir().unwrap();
        let store = store_for(dir.path());
        let record = store.resolve(&dir.path().join("business_rules/a.js")).unwrap().unwrap();

        // A regular file where the sidecar directory must go.
        std::fs::write(dir.path().join(".sync_data"), b"").unwrap();
        let err = store.save_hash(&record, b"body").await.unwrap_err();
        assert!(matches!(err, SyncError::MetaPersist { .. }));
        assert!(err.is_serious());
    }
}
