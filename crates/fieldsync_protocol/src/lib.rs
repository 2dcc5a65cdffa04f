//! # fieldsync protocol
//!
//! Shared types for keeping a local file tree consistent with a remote
//! record store, where each file holds one field of one remote record.
//!
//! This crate provides:
//! - `ContentHash` for byte-exact comparison of local and remote content
//! - `SyncMeta` / `RemoteIdentity`, the persisted per-file sidecar state
//! - `RecordQuery` / `RemoteRecord` / `FieldPayload` for talking to a
//!   remote table service
//! - `SyncVerdict`, the three-way in-sync classification
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod error;
mod hash;
mod meta;
mod query;

pub use conflict::{classify, SyncVerdict};
pub use error::{ProtocolError, ProtocolResult};
pub use hash::ContentHash;
pub use meta::{RemoteIdentity, SyncMeta};
pub use query::{FieldPayload, RecordQuery, RecordSelector, RemoteRecord};
