//! Error types for the vault sync engine.

use std::path::PathBuf;

use ons_core::ChunkFormatError;
use ons_types::EnvelopeError;
use thiserror::Error;

/// Result alias for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Errors that can occur while syncing a vault.
#[derive(Debug, Error)]
pub enum VaultError {
    /// A filesystem operation failed.
    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        /// Path the operation touched.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A chunk header or payload was malformed.
    #[error("chunk error: {0}")]
    Chunk(#[from] ChunkFormatError),

    /// A message could not be decoded or encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] EnvelopeError),

    /// A content payload was not valid base64.
    #[error("invalid content encoding for {0}")]
    Encoding(String),

    /// A path pointed outside the vault or at reserved files.
    #[error("path not allowed: {0}")]
    PathNotAllowed(String),

    /// Scanning the vault tree failed.
    #[error("scan failed: {0}")]
    Scan(String),

    /// The outbound channel rejected a message.
    #[error("channel error: {0}")]
    Channel(String),
}

impl VaultError {
    /// Wrap an I/O error with the path it concerned.
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VaultError::Filesystem {
            path: path.into(),
            source,
        }
    }
}
