use tcas_docstore::DocStoreError;

/// Errors produced by referential operations.
#[derive(Debug, thiserror::Error)]
pub enum ReferentialError {
    /// The referenced entry does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The stored state already moved past (or away from) the requested
    /// transition. Always a signal to skip, never to retry.
    #[error("conflict on {id}: {reason}")]
    Conflict { id: String, reason: String },

    /// A tape write was reported with a digest that does not match the
    /// archive's on-disk digest.
    #[error("digest mismatch for archive {id}: expected {expected}, reported {reported}")]
    DigestMismatch {
        id: String,
        expected: String,
        reported: String,
    },

    /// The underlying document store failed. Fatal for the caller's run.
    #[error("referential store error: {0}")]
    Store(#[from] DocStoreError),
}

impl ReferentialError {
    pub(crate) fn conflict(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conflict {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type ReferentialResult<T> = Result<T, ReferentialError>;
