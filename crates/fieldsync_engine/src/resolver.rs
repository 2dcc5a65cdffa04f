//! Conflict resolution against the remote record.
//!
//! Runs before every remote mutation. The verdict itself is computed by
//! [`fieldsync_protocol::classify`]; this module gathers its three inputs
//! (new local digest, stored baseline, current remote value) and applies
//! the baseline move when the remote already matches.

use crate::error::{SyncError, SyncResult};
use crate::record::SyncRecord;
use crate::remote::RemoteRegistry;
use crate::store::SyncRecordStore;
use fieldsync_protocol::{classify, ContentHash, RemoteIdentity, SyncVerdict};
use std::sync::Arc;
use tracing::debug;

/// Result of an in-sync check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InSyncStatus {
    /// Classification of the change.
    pub verdict: SyncVerdict,
    /// Identity of the remote record, if it was fetched.
    pub remote: Option<RemoteIdentity>,
}

impl InSyncStatus {
    /// Local and remote are reconcilable without data loss.
    pub fn in_sync(&self) -> bool {
        self.verdict.in_sync()
    }

    /// The local content must be written to the remote.
    pub fn push_needed(&self) -> bool {
        self.verdict.push_needed()
    }
}

/// Decides whether a local change is safe to push.
pub struct ConflictResolver {
    store: Arc<SyncRecordStore>,
    remotes: RemoteRegistry,
}

impl ConflictResolver {
    /// Creates a resolver.
    pub fn new(store: Arc<SyncRecordStore>, remotes: RemoteRegistry) -> Self {
        Self { store, remotes }
    }

    /// Checks new local content against the stored baseline and the remote.
    ///
    /// No remote call is made when the content equals the stored baseline.
    ///
    /// # Errors
    ///
    /// A failed fetch, zero matching records or a record without the mapped
    /// field abort the check. No push may follow an error.
    pub async fn check_in_sync(
        &self,
        record: &SyncRecord,
        content: &[u8],
    ) -> SyncResult<InSyncStatus> {
        let new_hash = ContentHash::of(content);
        let meta = self.store.get_meta(record).await?.unwrap_or_default();
        let stored = meta.content_hash.as_ref();

        if let Some(verdict) = SyncVerdict::local_only(&new_hash, stored) {
            debug!(path = %record.file_path().display(), "local content unchanged since last sync");
            return Ok(InSyncStatus {
                verdict,
                remote: None,
            });
        }

        let target = record.target();
        let query = target.query(meta.record_id.as_deref());
        let remote = self.remotes.get(record.root_dir())?;
        let row = remote
            .fetch(&query, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::RecordNotFound {
                table: target.table.clone(),
                field: target.field.clone(),
                key: query.selector.to_string(),
            })?;
        let remote_hash = row
            .field_hash(&target.field)
            .ok_or_else(|| SyncError::MissingField {
                table: target.table.clone(),
                field: target.field.clone(),
            })?;

        let verdict = classify(&new_hash, stored, &remote_hash);
        debug!(
            path = %record.file_path().display(),
            ?verdict,
            local = %new_hash,
            remote = %remote_hash,
            "compared with instance"
        );

        if verdict.adopts_local_baseline() {
            self.store.save_hash(record, content).await?;
        }

        Ok(InSyncStatus {
            verdict,
            remote: Some(row.identity),
        })
    }
}
