use tcas_types::DigestType;

/// Errors from digest computation and verification.
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("{digest_type} digest mismatch: expected {expected}, computed {computed}")]
    Mismatch {
        digest_type: DigestType,
        expected: String,
        computed: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DigestResult<T> = Result<T, DigestError>;
