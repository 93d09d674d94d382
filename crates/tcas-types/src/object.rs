use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::DigestType;
use crate::location::ObjectStorageLocation;

/// Unique key of an object referential entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectReferentialId {
    pub container_name: String,
    pub object_name: String,
}

impl ObjectReferentialId {
    pub fn new(container_name: impl Into<String>, object_name: impl Into<String>) -> Self {
        Self {
            container_name: container_name.into(),
            object_name: object_name.into(),
        }
    }

    /// Flat document key. Container names never contain `/`.
    pub fn document_key(&self) -> String {
        format!("{}/{}", self.container_name, self.object_name)
    }
}

impl fmt::Display for ObjectReferentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container_name, self.object_name)
    }
}

/// Physical state of one stored object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectReferentialEntry {
    pub id: ObjectReferentialId,
    pub size: u64,
    pub digest_type: DigestType,
    /// Lowercase hex digest of the object content.
    pub digest: String,
    /// Staged file name in basic file storage.
    pub storage_id: String,
    pub location: ObjectStorageLocation,
    pub last_update: DateTime<Utc>,
}

impl ObjectReferentialEntry {
    /// Entry for a freshly staged object.
    pub fn staged(
        id: ObjectReferentialId,
        size: u64,
        digest_type: DigestType,
        digest: impl Into<String>,
        storage_id: impl Into<String>,
    ) -> Self {
        Self {
            id,
            size,
            digest_type,
            digest: digest.into(),
            storage_id: storage_id.into(),
            location: ObjectStorageLocation::InputFile,
            last_update: Utc::now(),
        }
    }

    pub fn container_name(&self) -> &str {
        &self.id.container_name
    }

    pub fn object_name(&self) -> &str {
        &self.id.object_name
    }
}
