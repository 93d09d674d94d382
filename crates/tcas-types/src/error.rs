use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("unknown digest algorithm: {0}")]
    UnknownDigestType(String),

    #[error("invalid storage id: {0}")]
    InvalidStorageId(String),
}
