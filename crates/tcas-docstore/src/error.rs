use std::io;

/// Errors produced by journaled document collections.
#[derive(Debug, thiserror::Error)]
pub enum DocStoreError {
    /// I/O error during journal or file operations.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A collection lock was poisoned by a panicking writer.
    #[error("collection {0} lock poisoned")]
    LockPoisoned(String),
}

/// Convenience alias used throughout the docstore crate.
pub type DocStoreResult<T> = std::result::Result<T, DocStoreError>;
