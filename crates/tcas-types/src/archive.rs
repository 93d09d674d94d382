use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::DigestType;
use crate::location::ArchiveStorageLocation;

/// Lifecycle record of an archive file: a packed tar or an eagerly written
/// backup file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveReferentialEntity {
    pub archive_id: String,
    pub file_bucket_id: String,
    pub location: ArchiveStorageLocation,
    /// Known once the archive is complete.
    pub size: Option<u64>,
    pub digest_type: DigestType,
    /// Known once the archive is complete.
    pub digest: Option<String>,
    pub last_update: DateTime<Utc>,
}

impl ArchiveReferentialEntity {
    /// A new archive, exclusively owned by the writer building it.
    pub fn building(
        archive_id: impl Into<String>,
        file_bucket_id: impl Into<String>,
        digest_type: DigestType,
    ) -> Self {
        Self {
            archive_id: archive_id.into(),
            file_bucket_id: file_bucket_id.into(),
            location: ArchiveStorageLocation::BuildingOnDisk,
            size: None,
            digest_type,
            digest: None,
            last_update: Utc::now(),
        }
    }

    pub fn is_ready_on_disk(&self) -> bool {
        self.location == ArchiveStorageLocation::ReadyOnDisk
    }
}
