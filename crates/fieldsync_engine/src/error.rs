//! Error types for the sync engine.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Local file system error.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// No configured root contains the path.
    #[error("failed to find root folder for {0}")]
    RootNotFound(PathBuf),

    /// The path is not mapped to a remote field.
    #[error("{0} is not mapped to a remote field")]
    Unmapped(PathBuf),

    /// Network or transport error talking to the remote store.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether a later attempt could succeed.
        retryable: bool,
    },

    /// The remote store answered but refused the request.
    #[error("remote rejected request: {0}")]
    RemoteRejected(String),

    /// The remote response could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The lookup matched zero records.
    #[error("no records found in {table}.{field} for {key}")]
    RecordNotFound {
        /// Remote table.
        table: String,
        /// Synchronized field.
        field: String,
        /// Lookup key (natural key value or record id).
        key: String,
    },

    /// The record was found but does not carry the mapped field.
    #[error("record in {table} has no field {field}")]
    MissingField {
        /// Remote table.
        table: String,
        /// Missing field.
        field: String,
    },

    /// The remote field was empty and empty writes are rejected.
    #[error("remote field {table}.{field} for {key} is empty")]
    EmptyRemoteField {
        /// Remote table.
        table: String,
        /// Synchronized field.
        field: String,
        /// Lookup key.
        key: String,
    },

    /// Local content cannot be represented as a remote field value.
    #[error("content of {0} is not valid UTF-8")]
    InvalidContent(PathBuf),

    /// Sidecar metadata exists but cannot be decoded.
    #[error("corrupt sync metadata at {path}: {message}")]
    MetaCorrupt {
        /// Metadata file.
        path: PathBuf,
        /// Decode error.
        message: String,
    },

    /// Sidecar metadata could not be written.
    #[error("failed to persist sync metadata at {path}: {source}")]
    MetaPersist {
        /// Metadata file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The file system watch could not be installed.
    #[error("watch error: {0}")]
    Watch(String),
}

impl SyncError {
    /// Wraps an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if a later attempt could succeed.
    ///
    /// The engine never retries on its own; the next watch event is the retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Returns true if this error is recorded permanently on the file.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SyncError::RecordNotFound { .. }
                | SyncError::MissingField { .. }
                | SyncError::EmptyRemoteField { .. }
                | SyncError::InvalidContent(_)
        )
    }

    /// Returns true if this error breaks future conflict detection.
    pub fn is_serious(&self) -> bool {
        matches!(
            self,
            SyncError::MetaPersist { .. } | SyncError::MetaCorrupt { .. }
        )
    }
}
