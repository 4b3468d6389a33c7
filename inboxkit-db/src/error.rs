//! Error types for the encrypted store.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for store operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors raised by the encrypted store.
#[derive(Debug, Error)]
pub enum DbError {
    /// An I/O operation on the store directory failed.
    #[error("i/o error during {context}: {source}")]
    Io {
        /// Operation that failed.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// CBOR encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Stored data could not be authenticated with the supplied key.
    ///
    /// The key differs from the one the store was created with, or the store
    /// files were modified or truncated on disk.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Encryption or key derivation failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Another live handle holds the store.
    #[error("store at {} is already open", path.display())]
    AlreadyOpen {
        /// Directory of the store.
        path: PathBuf,
    },

    /// A deletion was started but did not finish.
    #[error("store at {} is partially deleted: {reason}", path.display())]
    PartialDeletion {
        /// Directory of the store.
        path: PathBuf,
        /// What stopped the deletion.
        reason: String,
    },

    /// On-disk data does not follow the store format.
    #[error("invalid store format: {0}")]
    InvalidFormat(String),

    /// The store was written by an unknown format version.
    #[error("unsupported store format version: {0}")]
    UnsupportedVersion(u32),

    /// Key material has the wrong length.
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    /// The handle has been closed.
    #[error("store handle is closed")]
    Closed,
}

impl DbError {
    /// Creates an I/O error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates a decryption error.
    pub fn decryption(context: impl Into<String>) -> Self {
        Self::Decryption(context.into())
    }

    /// Returns `true` if the error means the supplied key cannot read the store.
    #[must_use]
    pub const fn is_decryption(&self) -> bool {
        matches!(self, Self::Decryption(_))
    }
}
