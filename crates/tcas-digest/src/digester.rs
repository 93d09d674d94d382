use sha2::{Digest, Sha256, Sha384, Sha512};
use tcas_types::DigestType;

use crate::error::{DigestError, DigestResult};

/// Incremental hasher for any supported [`DigestType`].
#[derive(Clone)]
pub enum Digester {
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Digester {
    pub fn new(digest_type: DigestType) -> Self {
        match digest_type {
            DigestType::Sha256 => Self::Sha256(Sha256::new()),
            DigestType::Sha384 => Self::Sha384(Sha384::new()),
            DigestType::Sha512 => Self::Sha512(Sha512::new()),
        }
    }

    pub fn digest_type(&self) -> DigestType {
        match self {
            Self::Sha256(_) => DigestType::Sha256,
            Self::Sha384(_) => DigestType::Sha384,
            Self::Sha512(_) => DigestType::Sha512,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    /// Consume the hasher and return the lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha384(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
        }
    }

    /// One-shot digest of an in-memory buffer.
    pub fn digest_hex(digest_type: DigestType, data: &[u8]) -> String {
        let mut digester = Self::new(digest_type);
        digester.update(data);
        digester.finalize_hex()
    }

    /// Compare a computed digest against an expected one (case-insensitive hex).
    pub fn verify(digest_type: DigestType, expected: &str, computed: &str) -> DigestResult<()> {
        if expected.eq_ignore_ascii_case(computed) {
            Ok(())
        } else {
            Err(DigestError::Mismatch {
                digest_type,
                expected: expected.to_string(),
                computed: computed.to_string(),
            })
        }
    }
}

impl std::fmt::Debug for Digester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Digester").field(&self.digest_type()).finish()
    }
}
