use tcas_docstore::DocStoreError;

/// Errors produced by the write-order queue.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue message not found: {0}")]
    NotFound(String),

    #[error("queue store error: {0}")]
    Store(#[from] DocStoreError),

    #[error("queue lease table lock poisoned")]
    LockPoisoned,
}

pub type QueueResult<T> = Result<T, QueueError>;
