//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors produced while decoding protocol values.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A content hash string was not in the `sha256:<hex>` form.
    #[error("invalid content hash: {0}")]
    InvalidHash(String),

    /// Sidecar metadata could not be decoded.
    #[error("invalid sync metadata: {0}")]
    InvalidMeta(#[from] serde_json::Error),
}
