//! Remote table service abstraction.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use fieldsync_protocol::{FieldPayload, RecordQuery, RecordSelector, RemoteRecord};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A remote table service holds the records files are synchronized with.
///
/// This trait abstracts the network layer so the engine can run against
/// HTTP, an in-memory table for testing, or anything else that supports
/// equality lookups and single-field updates. Timeouts and retries are the
/// implementation's business; the engine treats every error as terminal
/// for the transfer at hand.
#[async_trait]
pub trait RemoteTable: Send + Sync {
    /// Fetches at most `max_rows` records matching the query.
    async fn fetch(&self, query: &RecordQuery, max_rows: u32) -> SyncResult<Vec<RemoteRecord>>;

    /// Writes the payload fields of the record selected by the query.
    async fn update(&self, query: &RecordQuery, payload: &FieldPayload) -> SyncResult<()>;
}

/// Remote services keyed by the root directory they serve.
#[derive(Clone, Default)]
pub struct RemoteRegistry {
    by_root: HashMap<PathBuf, Arc<dyn RemoteTable>>,
}

impl RemoteRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the service for a root.
    pub fn with_root(mut self, root: impl AsRef<Path>, remote: Arc<dyn RemoteTable>) -> Self {
        self.by_root
            .insert(crate::record::normalize_path(root.as_ref()), remote);
        self
    }

    /// Returns the service for a root.
    pub fn get(&self, root: &Path) -> SyncResult<Arc<dyn RemoteTable>> {
        self.by_root
            .get(root)
            .cloned()
            .ok_or_else(|| SyncError::Config(format!("no remote configured for {}", root.display())))
    }
}

/// A request observed by [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteRequest {
    /// A lookup.
    Fetch {
        /// Query issued.
        query: RecordQuery,
        /// Row limit.
        max_rows: u32,
    },
    /// A field update.
    Update {
        /// Query issued.
        query: RecordQuery,
        /// Fields written.
        payload: FieldPayload,
    },
}

/// An in-memory remote table for testing.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    tables: Mutex<HashMap<String, Vec<RemoteRecord>>>,
    requests: Mutex<Vec<RemoteRequest>>,
    fetch_failure: Mutex<Option<String>>,
    update_failure: Mutex<Option<String>>,
}

impl MemoryRemote {
    /// Creates an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record to a table.
    pub fn insert(&self, table: impl Into<String>, record: RemoteRecord) {
        self.tables.lock().entry(table.into()).or_default().push(record);
    }

    /// Overwrites one field of a stored record.
    pub fn set_field(&self, table: &str, record_id: &str, field: &str, value: impl Into<String>) {
        let mut tables = self.tables.lock();
        if let Some(record) = tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|r| has_id(r, record_id)))
        {
            record.fields.insert(field.to_string(), value.into());
        }
    }

    /// Returns one field of a stored record.
    pub fn field(&self, table: &str, record_id: &str, field: &str) -> Option<String> {
        self.tables
            .lock()
            .get(table)?
            .iter()
            .find(|r| has_id(r, record_id))?
            .field(field)
            .map(str::to_string)
    }

    /// Makes every fetch fail with a retryable transport error.
    pub fn fail_fetches(&self, message: Option<&str>) {
        *self.fetch_failure.lock() = message.map(str::to_string);
    }

    /// Makes every update fail with a retryable transport error.
    pub fn fail_updates(&self, message: Option<&str>) {
        *self.update_failure.lock() = message.map(str::to_string);
    }

    /// Returns the requests seen so far.
    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.requests.lock().clone()
    }

    /// Number of fetches seen so far.
    pub fn fetch_count(&self) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| matches!(r, RemoteRequest::Fetch { .. }))
            .count()
    }

    /// Returns the update payloads seen so far.
    pub fn updates(&self) -> Vec<FieldPayload> {
        self.requests
            .lock()
            .iter()
            .filter_map(|r| match r {
                RemoteRequest::Update { payload, .. } => Some(payload.clone()),
                RemoteRequest::Fetch { .. } => None,
            })
            .collect()
    }
}

fn has_id(record: &RemoteRecord, record_id: &str) -> bool {
    record.identity.record_id.as_deref() == Some(record_id)
}

fn selects(record: &RemoteRecord, selector: &RecordSelector) -> bool {
    match selector {
        RecordSelector::Key { field, value } => record.field(field) == Some(value.as_str()),
        RecordSelector::Id(id) => has_id(record, id),
    }
}

#[async_trait]
impl RemoteTable for MemoryRemote {
    async fn fetch(&self, query: &RecordQuery, max_rows: u32) -> SyncResult<Vec<RemoteRecord>> {
        self.requests.lock().push(RemoteRequest::Fetch {
            query: query.clone(),
            max_rows,
        });
        if let Some(message) = self.fetch_failure.lock().clone() {
            return Err(SyncError::transport_retryable(message));
        }

        let tables = self.tables.lock();
        let rows = tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| selects(r, &query.selector))
                    .take(max_rows as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    async fn update(&self, query: &RecordQuery, payload: &FieldPayload) -> SyncResult<()> {
        self.requests.lock().push(RemoteRequest::Update {
            query: query.clone(),
            payload: payload.clone(),
        });
        if let Some(message) = self.update_failure.lock().clone() {
            return Err(SyncError::transport_retryable(message));
        }

        let mut tables = self.tables.lock();
        let record = tables
            .get_mut(&query.table)
            .and_then(|rows| rows.iter_mut().find(|r| selects(r, &query.selector)))
            .ok_or_else(|| SyncError::RemoteRejected(format!("no record matches {query}")))?;
        for (field, value) in payload {
            record.fields.insert(field.clone(), value.clone());
        }
        Ok(())
    }
}
