//! # fieldsync engine
//!
//! Keeps a local file tree and a remote record store consistent. Each file
//! holds one field of one remote record.
//!
//! This crate provides:
//! - Sync record store (path resolution, sidecar metadata)
//! - Three-way conflict resolution before every push
//! - Receive / send transfer orchestration
//! - Queue and watch coordination (no self-triggered events)
//! - File system watch service and HTTP remote table adapter
//!
//! ## Architecture
//!
//! ```text
//! watch events ──▶ SyncEngine::route ──▶ TransferOrchestrator
//!                        │                 │        │
//!                        ▼                 ▼        ▼
//!                 SyncRecordStore   ConflictResolver  RemoteTable
//!                        ▲                 │
//!                        └─────────────────┘
//! ```
//!
//! ## Key Invariants
//!
//! - One record per path; at most one transfer per record at a time
//! - Divergent edits on both sides are refused, never merged
//! - The watch is down while any download is in flight
//! - The watch restarts once per drain, after a settle delay
//! - A missing sidecar means "never synced", a corrupt one is an error

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Engine version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

mod config;
mod engine;
mod error;
mod http;
mod notifier;
mod queue;
mod record;
mod remote;
mod resolver;
mod store;
mod transfer;
mod watcher;

pub use config::{FieldMatch, FolderMapping, ProxyConfig, RootConfig, SyncConfig};
pub use engine::{FileStatus, Route, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use http::{parse_response, ConnectError, HttpClient, HttpResponse, HttpTableService};
pub use notifier::{LogNotifier, Notifier, NotifyCode, NotifyContext, RecordingNotifier};
pub use queue::{QueueTicket, TransferQueue};
pub use record::{normalize_path, FieldTarget, SyncRecord, SYNC_DIR};
pub use remote::{MemoryRemote, RemoteRegistry, RemoteRequest, RemoteTable};
pub use resolver::{ConflictResolver, InSyncStatus};
pub use store::SyncRecordStore;
pub use transfer::{write_guarded, ReceiveState, TransferOrchestrator, TransferOutcome, WriteOutcome};
pub use watcher::{FsWatcher, MockWatcher, WatchEvent, WatchFilter, WatchService};
