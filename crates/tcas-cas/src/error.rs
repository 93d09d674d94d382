use std::io;

use tcas_digest::DigestError;
use tcas_queue::QueueError;
use tcas_referential::ReferentialError;
use thiserror::Error;

/// Errors of the cold storage engine.
#[derive(Debug, Error)]
pub enum CasError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Lookup miss. Often benign.
    #[error("not found: {0}")]
    NotFound(String),

    /// State already advanced past the requested transition. Skip, never retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The object's bytes only exist on tape.
    #[error("object {0} is no longer on disk")]
    NotOnDisk(String),

    /// Tar construction failed; the batch is abandoned and its inputs stay staged.
    #[error("failed to build archive {archive_id}: {source}")]
    FatalBuild {
        archive_id: String,
        #[source]
        source: std::io::Error,
    },

    /// Referential store failure. Fatal for recovery and creator runs.
    #[error("referential error: {0}")]
    Referential(ReferentialError),

    #[error("queue error: {0}")]
    Queue(QueueError),

    #[error("digest error: {0}")]
    Digest(#[from] DigestError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("tar creator for {0} is stopped")]
    CreatorStopped(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Another process owns the referential directory.
    #[error("{0} is locked by another process")]
    Locked(String),
}

impl From<ReferentialError> for CasError {
    fn from(e: ReferentialError) -> Self {
        match e {
            ReferentialError::NotFound(id) => Self::NotFound(id),
            ReferentialError::Conflict { id, reason } => Self::Conflict(format!("{id}: {reason}")),
            other => Self::Referential(other),
        }
    }
}

impl From<QueueError> for CasError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::NotFound(id) => Self::NotFound(format!("write order {id}")),
            other => Self::Queue(other),
        }
    }
}

impl CasError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::NotOnDisk(_))
    }

    /// Bytes did not match the digest the caller (or tape read-back) declared.
    pub fn is_digest_mismatch(&self) -> bool {
        matches!(
            self,
            Self::Digest(DigestError::Mismatch { .. })
                | Self::Referential(ReferentialError::DigestMismatch { .. })
        )
    }

    /// The caller sent something unusable: a bad name or an upload shorter
    /// than its declared size.
    pub fn is_invalid_request(&self) -> bool {
        match self {
            Self::InvalidRequest(_) => true,
            Self::Io(e) => e.kind() == io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }

    /// Failures a caller may safely retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(e) | Self::FatalBuild { source: e, .. } | Self::Digest(DigestError::Io(e)) => {
                is_transient_io(e)
            }
            Self::CreatorStopped(_) | Self::Locked(_) => true,
            _ => false,
        }
    }
}

/// I/O failures that may clear up on their own. Permission, naming and
/// data errors are permanent.
pub fn is_transient_io(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::OutOfMemory
    )
}

pub type CasResult<T> = Result<T, CasError>;
