use std::fmt;

use serde::{Deserialize, Serialize};

use crate::digest::DigestType;

/// Discriminator for persisted queue messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueMessageType {
    /// A packed tar archive built by a file bucket tar creator.
    TarWriteOrder,
    /// A backup file written eagerly through the admin surface.
    BackupWriteOrder,
}

impl fmt::Display for QueueMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TarWriteOrder => write!(f, "tar-write-order"),
            Self::BackupWriteOrder => write!(f, "backup-write-order"),
        }
    }
}

/// "This archive is ready to be committed to tape."
///
/// Carries enough routing metadata for the tape driver to pick the right
/// tape pool (`bucket`) and locate the file on disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOrder {
    pub message_type: QueueMessageType,
    pub archive_id: String,
    /// Tape pool routing key.
    pub bucket: String,
    pub file_bucket_id: String,
    /// Archive path relative to the staging root.
    pub file_path: String,
    pub size: u64,
    pub digest_type: DigestType,
    pub digest: String,
}
