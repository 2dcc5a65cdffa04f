//! File system watch service.
//!
//! The watch is torn down entirely while transfers run and installed again
//! afterwards, so a service must support any number of start/stop cycles.
//! Every session rescans the tree, emitting `Added` for existing files and
//! then `Ready`.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::event::{CreateKind, ModifyKind};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// An event reported by a watch service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A file appeared, or was found by the initial scan.
    Added {
        /// File path.
        path: PathBuf,
        /// Size when discovered.
        size: u64,
    },
    /// A file's content changed.
    Changed {
        /// File path.
        path: PathBuf,
        /// Size at the time of the event.
        size: u64,
    },
    /// The initial scan of a session completed.
    Ready,
    /// The watch reported an error.
    Error(String),
}

/// Something that can watch the configured roots.
pub trait WatchService: Send + Sync {
    /// Installs the watch. Starting a running service is a no-op.
    fn start(&self) -> SyncResult<()>;

    /// Tears the watch down. Events already queued may still arrive.
    fn stop(&self);
}

/// Decides which paths are never reported.
#[derive(Debug, Clone)]
pub struct WatchFilter {
    roots: Vec<PathBuf>,
    ignore: GlobSet,
}

impl WatchFilter {
    /// Builds the filter from the configured roots and ignore globs.
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.ignore_files {
            let glob = Glob::new(pattern)
                .map_err(|e| SyncError::Config(format!("invalid ignore pattern {pattern}: {e}")))?;
            builder.add(glob);
        }
        let ignore = builder
            .build()
            .map_err(|e| SyncError::Config(format!("invalid ignore patterns: {e}")))?;
        Ok(Self {
            roots: config.roots.keys().cloned().collect(),
            ignore,
        })
    }

    /// Returns true for hidden paths and paths matching an ignore glob.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let relative = self
            .roots
            .iter()
            .find_map(|root| path.strip_prefix(root).ok())
            .unwrap_or_else(|| Path::new(path.file_name().unwrap_or_default()));

        let hidden = relative
            .components()
            .any(|c| c.as_os_str().to_string_lossy().starts_with('.'));
        hidden || self.ignore.is_match(relative) || self.ignore.is_match(path)
    }

    /// Walks every root, yielding each file that is not ignored with its
    /// size. Ignored directories are not descended into.
    pub fn files(&self) -> impl Iterator<Item = (PathBuf, u64)> + '_ {
        self.roots.iter().flat_map(move |root| {
            WalkDir::new(root)
                .into_iter()
                .filter_entry(move |entry| entry.depth() == 0 || !self.is_ignored(entry.path()))
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!(error = %e, "failed to scan directory");
                        None
                    }
                })
                .filter(|entry| entry.file_type().is_file())
                .filter_map(|entry| {
                    let size = entry.metadata().ok()?.len();
                    Some((entry.into_path(), size))
                })
        })
    }
}

struct WatchSession {
    _watcher: RecommendedWatcher,
    cancelled: Arc<AtomicBool>,
}

/// Watches the configured roots with the platform's native backend.
pub struct FsWatcher {
    filter: Arc<WatchFilter>,
    events: mpsc::UnboundedSender<WatchEvent>,
    session: Mutex<Option<WatchSession>>,
}

impl FsWatcher {
    /// Creates a stopped watcher sending to `events`.
    pub fn new(config: &SyncConfig, events: mpsc::UnboundedSender<WatchEvent>) -> SyncResult<Self> {
        Ok(Self {
            filter: Arc::new(WatchFilter::new(config)?),
            events,
            session: Mutex::new(None),
        })
    }

    /// Creates a stopped watcher together with its event channel.
    pub fn channel(config: &SyncConfig) -> SyncResult<(Self, mpsc::UnboundedReceiver<WatchEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        Ok((Self::new(config, tx)?, rx))
    }

    /// Returns true while a session is installed.
    pub fn is_running(&self) -> bool {
        self.session.lock().is_some()
    }
}

impl WatchService for FsWatcher {
    fn start(&self) -> SyncResult<()> {
        let mut session = self.session.lock();
        if session.is_some() {
            return Ok(());
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let mut watcher = {
            let tx = self.events.clone();
            let filter = Arc::clone(&self.filter);
            let cancelled = Arc::clone(&cancelled);
            RecommendedWatcher::new(
                move |result: notify::Result<Event>| {
                    if cancelled.load(Ordering::SeqCst) {
                        return;
                    }
                    match result {
                        Ok(event) => {
                            for event in translate(&filter, event) {
                                let _ = tx.send(event);
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(WatchEvent::Error(e.to_string()));
                        }
                    }
                },
                Config::default(),
            )
            .map_err(|e| SyncError::Watch(e.to_string()))?
        };

        for root in &self.filter.roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .map_err(|e| SyncError::Watch(format!("{}: {e}", root.display())))?;
        }

        let tx = self.events.clone();
        let filter = Arc::clone(&self.filter);
        let scan_cancelled = Arc::clone(&cancelled);
        std::thread::Builder::new()
            .name("fieldsync-scan".into())
            .spawn(move || scan(&filter, &tx, &scan_cancelled))
            .map_err(|e| SyncError::Watch(format!("failed to spawn scan: {e}")))?;

        info!("watching for changes");
        *session = Some(WatchSession {
            _watcher: watcher,
            cancelled,
        });
        Ok(())
    }

    fn stop(&self) {
        if let Some(session) = self.session.lock().take() {
            session.cancelled.store(true, Ordering::SeqCst);
            debug!("watch stopped");
        }
    }
}

fn translate(filter: &WatchFilter, event: Event) -> Vec<WatchEvent> {
    let added = match event.kind {
        EventKind::Create(CreateKind::File | CreateKind::Any) => true,
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => false,
        _ => return Vec::new(),
    };

    event
        .paths
        .into_iter()
        .filter(|path| !filter.is_ignored(path))
        .filter_map(|path| {
            let meta = std::fs::metadata(&path).ok().filter(|m| m.is_file())?;
            let size = meta.len();
            Some(if added {
                WatchEvent::Added { path, size }
            } else {
                WatchEvent::Changed { path, size }
            })
        })
        .collect()
}

fn scan(filter: &WatchFilter, tx: &mpsc::UnboundedSender<WatchEvent>, cancelled: &AtomicBool) {
    for (path, size) in filter.files() {
        if cancelled.load(Ordering::SeqCst) {
            return;
        }
        if tx.send(WatchEvent::Added { path, size }).is_err() {
            return;
        }
    }
    if !cancelled.load(Ordering::SeqCst) {
        let _ = tx.send(WatchEvent::Ready);
    }
}

/// A watch service that only counts calls, for testing.
#[derive(Debug, Default)]
pub struct MockWatcher {
    starts: AtomicUsize,
    stops: AtomicUsize,
    running: AtomicBool,
}

impl MockWatcher {
    /// Creates a stopped mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `start` calls.
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Number of `stop` calls.
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Returns true between a start and the next stop.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl WatchService for MockWatcher {
    fn start(&self) -> SyncResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }
}
