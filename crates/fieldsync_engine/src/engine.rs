//! Top-level sync engine.
//!
//! Routes watch events to transfers:
//!
//! | event                  | before `Ready` | after `Ready`                     |
//! |------------------------|----------------|-----------------------------------|
//! | `Added`, size 0, new   | track          | mark newly discovered, receive    |
//! | `Added`, already known | track          | ignore                            |
//! | `Added`, size > 0      | track          | ignore                            |
//! | `Changed`, size 0      | receive        | receive                           |
//! | `Changed`, size > 0    | send           | send                              |
//!
//! Files carrying an error are dropped before routing. Every watch session
//! rescans the tree; files the store already knows are not received again,
//! so a failed receive waits for the next real change.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::notifier::Notifier;
use crate::queue::{QueueTicket, TransferQueue};
use crate::record::{normalize_path, SyncRecord};
use crate::remote::RemoteRegistry;
use crate::store::SyncRecordStore;
use crate::transfer::{TransferOrchestrator, TransferOutcome};
use crate::watcher::{WatchEvent, WatchFilter, WatchService};
use fieldsync_protocol::ContentHash;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// What an event asks the engine to do.
pub enum Route {
    /// Download into the file. The transfer is already queued.
    Receive(Arc<SyncRecord>, QueueTicket),
    /// Upload the file.
    Send(Arc<SyncRecord>),
}

/// Snapshot of a file's synchronization state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    /// Normalized file path.
    pub path: PathBuf,
    /// Remote table.
    pub table: String,
    /// Remote field.
    pub field: String,
    /// Natural key value.
    pub key_value: String,
    /// Remote record identifier, once known.
    pub record_id: Option<String>,
    /// Hash stored at the last sync.
    pub stored_hash: Option<ContentHash>,
    /// Hash of the file as it is now.
    pub local_hash: Option<ContentHash>,
    /// Errors blocking the file.
    pub errors: Vec<String>,
}

impl FileStatus {
    /// Returns true if the file changed since the last sync.
    pub fn locally_modified(&self) -> bool {
        self.local_hash.is_some() && self.local_hash != self.stored_hash
    }
}

/// Keeps a local tree and a remote table service consistent.
pub struct SyncEngine {
    config: Arc<SyncConfig>,
    store: Arc<SyncRecordStore>,
    transfers: TransferOrchestrator,
    queue: TransferQueue,
    ready: AtomicBool,
    preloaded: Mutex<HashSet<PathBuf>>,
}

impl SyncEngine {
    /// Creates an engine. Nothing is watched until [`start`](Self::start).
    pub fn new(
        config: SyncConfig,
        remotes: RemoteRegistry,
        watch: Arc<dyn WatchService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let config = Arc::new(config);
        let queue = TransferQueue::new(
            watch,
            notifier,
            config.settle_delay(),
            config.notify_burst_threshold,
        );
        let store = Arc::new(SyncRecordStore::new(Arc::clone(&config)));
        let transfers = TransferOrchestrator::new(Arc::clone(&store), remotes, queue.clone());
        Self {
            config,
            store,
            transfers,
            queue,
            ready: AtomicBool::new(false),
            preloaded: Mutex::new(HashSet::new()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the record store.
    pub fn store(&self) -> &Arc<SyncRecordStore> {
        &self.store
    }

    /// Returns the transfer queue.
    pub fn queue(&self) -> &TransferQueue {
        &self.queue
    }

    /// Returns true once the initial scan of the watch has completed.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Starts watching, now or when queued transfers drain.
    pub fn start(&self) -> SyncResult<()> {
        self.queue.start_watch_if_idle()
    }

    /// Stops watching.
    pub fn shutdown(&self) {
        self.queue.stop_watch();
    }

    /// Resolves a path to a record that may be transferred.
    ///
    /// Returns `None` for unmapped files and files blocked by an error.
    pub fn track(&self, path: &Path) -> Option<Arc<SyncRecord>> {
        match self.store.resolve(path) {
            Ok(Some(record)) if record.has_errors() => {
                warn!(path = %path.display(), errors = ?record.errors(), "file has errors, skipping");
                None
            }
            Ok(record) => record,
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to resolve file");
                None
            }
        }
    }

    /// Tracks a file and downloads it.
    pub async fn add_file(&self, path: &Path) -> Option<TransferOutcome> {
        let record = self.track(path)?;
        info!(path = %path.display(), "syncing record from instance to file");
        let outcome = self.transfers.receive(&record).await;
        if !outcome.is_success() {
            info!(path = %path.display(), "could not add file");
        }
        Some(outcome)
    }

    /// Decides what an event asks for.
    ///
    /// Must be called in event order; the returned route may then run
    /// concurrently with others.
    pub fn route(&self, event: WatchEvent) -> Option<Route> {
        match event {
            WatchEvent::Ready => {
                self.ready.store(true, Ordering::SeqCst);
                info!(tracked = self.store.len(), "initial scan complete");
                None
            }
            WatchEvent::Error(message) => {
                error!(%message, "error watching files");
                None
            }
            WatchEvent::Added { path, size } => {
                let known = self.store.get(&path).is_some();
                let record = self.track(&path)?;
                if !self.is_ready() || known || size > 0 {
                    debug!(path = %path.display(), known, size, "tracking only");
                    return None;
                }
                record.set_newly_discovered(true);
                Some(Route::Receive(record, self.queue.enqueue()))
            }
            WatchEvent::Changed { path, size } => {
                let record = self.track(&path)?;
                if size > 0 {
                    Some(Route::Send(record))
                } else {
                    Some(Route::Receive(record, self.queue.enqueue()))
                }
            }
        }
    }

    /// Runs a routed transfer.
    pub async fn execute(&self, route: Route) -> TransferOutcome {
        match route {
            Route::Receive(record, ticket) => self.transfers.receive_queued(&record, ticket).await,
            Route::Send(record) => self.transfers.send(&record).await,
        }
    }

    /// Routes and runs one event.
    pub async fn handle_event(&self, event: WatchEvent) -> Option<TransferOutcome> {
        let route = self.route(event)?;
        Some(self.execute(route).await)
    }

    /// Consumes watch events until the channel closes, running each transfer
    /// on its own task.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<WatchEvent>) {
        while let Some(event) = events.recv().await {
            if let Some(route) = self.route(event) {
                let engine = Arc::clone(&self);
                tokio::spawn(async move {
                    engine.execute(route).await;
                });
            }
        }
        info!("watch event stream closed");
    }

    /// Downloads each path not downloaded by an earlier preload.
    ///
    /// All transfers are queued before the first one runs, so the watch
    /// stays down and notifications are batched for the whole set.
    pub async fn preload(self: &Arc<Self>, paths: Vec<PathBuf>) -> Vec<(PathBuf, TransferOutcome)> {
        let mut jobs = JoinSet::new();
        for path in paths {
            if !self.preloaded.lock().insert(normalize_path(&path)) {
                continue;
            }
            let Some(record) = self.track(&path) else {
                continue;
            };
            let ticket = self.queue.enqueue();
            let engine = Arc::clone(self);
            jobs.spawn(async move {
                let outcome = engine.transfers.receive_queued(&record, ticket).await;
                (record.file_path().to_path_buf(), outcome)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(error = %e, "preload task failed"),
            }
        }
        results
    }

    /// Downloads every file listed for preloading in the configuration.
    pub async fn preload_from_config(self: &Arc<Self>) -> Vec<(PathBuf, TransferOutcome)> {
        if !self.config.pre_load {
            return Vec::new();
        }
        let paths = self
            .config
            .roots
            .iter()
            .flat_map(|(root, root_config)| {
                root_config.pre_load_list.iter().flat_map(move |(folder, files)| {
                    files.iter().map(move |file| root.join(folder).join(file))
                })
            })
            .collect();
        self.preload(paths).await
    }

    /// Downloads every non-hidden file under every root.
    pub async fn resync_all(self: &Arc<Self>) -> SyncResult<Vec<(PathBuf, TransferOutcome)>> {
        let filter = WatchFilter::new(&self.config)?;
        let paths = tokio::task::spawn_blocking(move || {
            let mut files: Vec<PathBuf> = filter.files().map(|(path, _)| path).collect();
            files.sort();
            files
        })
        .await
            .map_err(|e| SyncError::Watch(format!("scan task failed: {e}")))?;
        info!(files = paths.len(), "resyncing all files");
        Ok(self.preload(paths).await)
    }

    /// Downloads one file given relative to the first root.
    pub async fn pull(&self, relative: &Path) -> SyncResult<TransferOutcome> {
        let record = self.record_for(relative)?;
        Ok(self.transfers.receive(&record).await)
    }

    /// Uploads one file given relative to the first root.
    pub async fn push(&self, relative: &Path) -> SyncResult<TransferOutcome> {
        let record = self.record_for(relative)?;
        Ok(self.transfers.send(&record).await)
    }

    /// Reports the state of one file given relative to the first root.
    pub async fn status(&self, relative: &Path) -> SyncResult<FileStatus> {
        let record = self.record_for(relative)?;
        let meta = self.store.get_meta(&record).await?.unwrap_or_default();
        let local_hash = match tokio::fs::read(record.file_path()).await {
            Ok(bytes) => Some(ContentHash::of(&bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(SyncError::io(record.file_path(), e)),
        };
        let target = record.target();
        Ok(FileStatus {
            path: record.file_path().to_path_buf(),
            table: target.table.clone(),
            field: target.field.clone(),
            key_value: target.key_value.clone(),
            record_id: meta.record_id,
            stored_hash: meta.content_hash,
            local_hash,
            errors: record.errors(),
        })
    }

    fn record_for(&self, relative: &Path) -> SyncResult<Arc<SyncRecord>> {
        let root = self
            .config
            .first_root()
            .ok_or_else(|| SyncError::Config("no root configured".into()))?;
        let path = if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            root.join(relative)
        };
        self.store
            .resolve(&path)?
            .ok_or(SyncError::Unmapped(path))
    }
}
