//! Transfer orchestration.
//!
//! Receive (remote to local) is a small state machine:
//!
//! ```text
//! Requested ──▶ Validated ──▶ Written ──▶ Persisted
//!     │             │            │  │          │
//!     └─────────────┴─────┬──────┘  │          │
//!                         ▼         ▼          ▼
//!                       Failed   (send)      Failed
//! ```
//!
//! A write into a newly discovered file that already holds content is not
//! performed; the transfer continues as a send of that content instead.
//!
//! Send (local to remote) consults the conflict resolver before any remote
//! mutation and never enqueues, since it writes nothing the watch can see.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::notifier::{NotifyCode, NotifyContext};
use crate::queue::{QueueTicket, TransferQueue};
use crate::record::SyncRecord;
use crate::remote::RemoteRegistry;
use crate::resolver::ConflictResolver;
use crate::store::SyncRecordStore;
use fieldsync_protocol::{FieldPayload, RemoteRecord};
use std::io::ErrorKind;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Progress of a receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    /// The remote record is being fetched.
    Requested,
    /// The field value was fetched and checked.
    Validated,
    /// The content is on disk.
    Written,
    /// Identity and hash are persisted. Terminal.
    Persisted,
    /// The receive failed. Terminal.
    Failed,
}

impl ReceiveState {
    /// Returns true for states a receive ends in.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReceiveState::Persisted | ReceiveState::Failed)
    }

    fn advance(&mut self, next: ReceiveState) {
        debug!(from = ?*self, to = ?next, "receive state");
        *self = next;
    }
}

/// Result of a guarded local write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The content was written.
    Written,
    /// The newly discovered file already had content; nothing was written.
    DeferredToSend,
}

/// Terminal result of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Remote content was written locally and persisted.
    Downloaded,
    /// Local content was written to the remote.
    Uploaded,
    /// Nothing needed to be transferred.
    AlreadyInSync,
    /// Local and remote diverged; nothing was pushed.
    Refused,
    /// The transfer failed.
    Failed(String),
}

impl TransferOutcome {
    /// Returns true if the file is in sync afterwards.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            TransferOutcome::Downloaded | TransferOutcome::Uploaded | TransferOutcome::AlreadyInSync
        )
    }

    fn failed(error: &SyncError) -> Self {
        TransferOutcome::Failed(error.to_string())
    }
}

/// Drives receives and sends for single records.
pub struct TransferOrchestrator {
    store: Arc<SyncRecordStore>,
    remotes: RemoteRegistry,
    resolver: ConflictResolver,
    queue: TransferQueue,
}

impl TransferOrchestrator {
    /// Creates an orchestrator.
    pub fn new(store: Arc<SyncRecordStore>, remotes: RemoteRegistry, queue: TransferQueue) -> Self {
        let resolver = ConflictResolver::new(Arc::clone(&store), remotes.clone());
        Self {
            store,
            remotes,
            resolver,
            queue,
        }
    }

    /// Downloads the remote field into the file.
    ///
    /// The transfer is queued for its whole duration, including a send it
    /// defers to.
    pub async fn receive(&self, record: &SyncRecord) -> TransferOutcome {
        let ticket = self.queue.enqueue();
        self.receive_queued(record, ticket).await
    }

    /// Downloads the remote field into the file under an existing ticket.
    pub async fn receive_queued(&self, record: &SyncRecord, ticket: QueueTicket) -> TransferOutcome {
        let outcome = {
            let _guard = record.lock_transfer().await;
            self.receive_locked(record).await
        };
        ticket.finish(outcome.is_success());
        outcome
    }

    /// Uploads the file's content if it is safe to do so.
    pub async fn send(&self, record: &SyncRecord) -> TransferOutcome {
        let _guard = record.lock_transfer().await;
        self.send_locked(record).await
    }

    async fn receive_locked(&self, record: &SyncRecord) -> TransferOutcome {
        let target = record.target();
        let mut state = ReceiveState::Requested;
        info!(path = %record.file_path().display(), table = %target.table, field = %target.field, "receiving");

        let row = match self.fetch_record(record).await {
            Ok(row) => row,
            Err(e) => {
                state.advance(ReceiveState::Failed);
                return self.fail_lookup(record, e);
            }
        };
        let context = self.context(record, row.identity.record_id.as_deref());

        let Some(value) = row.field(&target.field) else {
            state.advance(ReceiveState::Failed);
            let e = SyncError::MissingField {
                table: target.table.clone(),
                field: target.field.clone(),
            };
            record.add_error(e.to_string());
            self.queue.notify(NotifyCode::ReceivedFileError, &context);
            return TransferOutcome::failed(&e);
        };

        if value.is_empty() {
            let e = SyncError::EmptyRemoteField {
                table: target.table.clone(),
                field: target.field.clone(),
                key: target.key_value.clone(),
            };
            record.add_error(e.to_string());
            self.queue.notify(NotifyCode::ReceivedFileZeroBytes, &context);
            if self.config().reject_empty_writes {
                state.advance(ReceiveState::Failed);
                return TransferOutcome::failed(&e);
            }
            warn!(
                path = %record.file_path().display(),
                "remote field is empty; writing it but later local edits will not be synced"
            );
        }
        state.advance(ReceiveState::Validated);

        match write_guarded(record, value.as_bytes()).await {
            Ok(WriteOutcome::Written) => state.advance(ReceiveState::Written),
            Ok(WriteOutcome::DeferredToSend) => {
                info!(
                    path = %record.file_path().display(),
                    "newly discovered file already has content; sending instead"
                );
                self.store.update_meta(record, &row.identity).await;
                return self.send_locked(record).await;
            }
            Err(e) => {
                state.advance(ReceiveState::Failed);
                error!(path = %record.file_path().display(), error = %e, "failed to write received file");
                self.queue.notify(NotifyCode::ReceivedFileError, &context);
                return TransferOutcome::failed(&e);
            }
        }

        self.store.update_meta(record, &row.identity).await;
        if let Err(e) = self.store.save_hash(record, value.as_bytes()).await {
            state.advance(ReceiveState::Failed);
            self.report_unsaved(record, &e, &context);
            return TransferOutcome::failed(&e);
        }
        state.advance(ReceiveState::Persisted);

        info!(path = %record.file_path().display(), "received file");
        self.queue.notify(NotifyCode::ReceivedFile, &context);
        TransferOutcome::Downloaded
    }

    async fn send_locked(&self, record: &SyncRecord) -> TransferOutcome {
        let path = record.file_path();
        let target = record.target();

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let e = SyncError::io(path, e);
                error!(error = %e, "failed to read file for upload");
                self.queue.notify(NotifyCode::UploadError, &self.context(record, None));
                return TransferOutcome::failed(&e);
            }
        };
        let Ok(content) = String::from_utf8(bytes) else {
            let e = SyncError::InvalidContent(path.to_path_buf());
            record.add_error(e.to_string());
            self.queue.notify(NotifyCode::UploadError, &self.context(record, None));
            return TransferOutcome::failed(&e);
        };

        let status = match self.resolver.check_in_sync(record, content.as_bytes()).await {
            Ok(status) => status,
            Err(e) => return self.fail_lookup(record, e),
        };
        let record_id = match status.remote.as_ref() {
            Some(identity) => identity.record_id.clone(),
            None => self.known_record_id(record).await,
        };
        let context = self.context(record, record_id.as_deref());

        if !status.in_sync() {
            warn!(
                path = %path.display(),
                table = %target.table,
                field = %target.field,
                "instance changed since last sync; not pushing"
            );
            self.queue.notify(NotifyCode::NotInSync, &context);
            return TransferOutcome::Refused;
        }
        if !status.push_needed() {
            debug!(path = %path.display(), "no push needed");
            return TransferOutcome::AlreadyInSync;
        }

        let remote = match self.remotes.get(record.root_dir()) {
            Ok(remote) => remote,
            Err(e) => {
                self.queue.notify(NotifyCode::ComplexError, &context);
                return TransferOutcome::failed(&e);
            }
        };
        let query = target.query(record_id.as_deref());
        let payload = FieldPayload::from([(target.field.clone(), content.clone())]);
        if let Err(e) = remote.update(&query, &payload).await {
            error!(path = %path.display(), error = %e, "upload failed");
            self.queue.notify(NotifyCode::UploadError, &context);
            return TransferOutcome::failed(&e);
        }

        if let Some(identity) = &status.remote {
            self.store.update_meta(record, identity).await;
        }
        match self.store.save_hash(record, content.as_bytes()).await {
            Ok(_) => {
                info!(path = %path.display(), query = %query, "updated instance version");
                self.queue.notify(NotifyCode::UploadComplete, &context);
            }
            Err(e) => self.report_unsaved(record, &e, &context),
        }
        TransferOutcome::Uploaded
    }

    fn config(&self) -> &SyncConfig {
        self.store.config()
    }

    async fn fetch_record(&self, record: &SyncRecord) -> SyncResult<RemoteRecord> {
        let target = record.target();
        let record_id = self.known_record_id(record).await;
        let query = target.query(record_id.as_deref());
        let remote = self.remotes.get(record.root_dir())?;
        remote
            .fetch(&query, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::RecordNotFound {
                table: target.table.clone(),
                field: target.field.clone(),
                key: query.selector.to_string(),
            })
    }

    /// Reports a transfer whose remote side went through but whose baseline
    /// was not stored.
    fn report_unsaved(&self, record: &SyncRecord, e: &SyncError, context: &NotifyContext) {
        let path = record.file_path().display();
        if e.is_serious() {
            error!(%path, error = %e, "SERIOUS ERROR: sync metadata not saved, conflict detection is unreliable");
        } else {
            error!(%path, error = %e, "sync metadata not saved");
        }
        self.queue.notify(NotifyCode::ComplexError, context);
    }

    /// Reports a failed lookup or conflict check.
    fn fail_lookup(&self, record: &SyncRecord, e: SyncError) -> TransferOutcome {
        let context = self.context(record, None);
        if e.is_validation() {
            record.add_error(e.to_string());
        }
        let code = match &e {
            SyncError::RecordNotFound { .. } => NotifyCode::RecordNotFound,
            SyncError::MissingField { .. } => NotifyCode::ReceivedFileError,
            _ => NotifyCode::ComplexError,
        };
        if e.is_retryable() {
            warn!(path = %record.file_path().display(), error = %e, "remote lookup failed, next change retries");
        } else {
            error!(path = %record.file_path().display(), error = %e, "remote lookup failed");
        }
        self.queue.notify(code, &context);
        TransferOutcome::failed(&e)
    }

    async fn known_record_id(&self, record: &SyncRecord) -> Option<String> {
        match self.store.get_meta(record).await {
            Ok(meta) => meta.and_then(|m| m.record_id),
            Err(e) => {
                warn!(path = %record.file_path().display(), error = %e, "ignoring unreadable sync metadata");
                None
            }
        }
    }

    fn context(&self, record: &SyncRecord, record_id: Option<&str>) -> NotifyContext {
        let target = record.target();
        let record_url = record_id.and_then(|id| {
            self.config()
                .root(record.root_dir())
                .map(|root| root.record_url(&target.table, id))
        });
        NotifyContext {
            table: Some(target.table.clone()),
            field: Some(target.field.clone()),
            key: Some(target.key_value.clone()),
            record_url,
        }
    }
}

/// Writes received content, unless the file was newly discovered and has
/// since been given content by the user.
///
/// Clears the newly-discovered flag.
pub async fn write_guarded(record: &SyncRecord, content: &[u8]) -> SyncResult<WriteOutcome> {
    let path = record.file_path();
    if record.take_newly_discovered() {
        match tokio::fs::read(path).await {
            Ok(existing) if !existing.is_empty() => return Ok(WriteOutcome::DeferredToSend),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(SyncError::io(path, e)),
        }
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SyncError::io(parent, e))?;
    }
    tokio::fs::write(path, content)
        .await
        .map_err(|e| SyncError::io(path, e))?;
    Ok(WriteOutcome::Written)
}
