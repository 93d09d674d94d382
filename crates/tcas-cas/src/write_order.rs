//! Hands finished archives to the library through the persistent queue.

use std::sync::Arc;

use tcas_queue::QueueRepository;
use tcas_referential::ArchiveReferential;
use tcas_types::{QueueMessageType, WriteOrder};
use tracing::{debug, info};

use crate::error::{CasError, CasResult};
use crate::layout;

/// Turns ready archives into queued write orders.
pub struct WriteOrderCreator {
    archives: Arc<dyn ArchiveReferential>,
    queue: Arc<dyn QueueRepository>,
}

impl WriteOrderCreator {
    pub fn new(archives: Arc<dyn ArchiveReferential>, queue: Arc<dyn QueueRepository>) -> Self {
        Self { archives, queue }
    }

    /// Enqueue the write order of a `ReadyOnDisk` archive.
    ///
    /// Idempotent per archive: returns `false` if an order for it is already
    /// queued. Fails with `Conflict` if the archive is not ready on disk.
    pub fn create_write_order(
        &self,
        archive_id: &str,
        bucket: &str,
        message_type: QueueMessageType,
    ) -> CasResult<bool> {
        let archive = self
            .archives
            .find(archive_id)?
            .ok_or_else(|| CasError::NotFound(format!("archive {archive_id}")))?;
        if !archive.is_ready_on_disk() {
            return Err(CasError::Conflict(format!(
                "archive {archive_id} is {}, not ready-on-disk",
                archive.location
            )));
        }
        let (Some(size), Some(digest)) = (archive.size, archive.digest) else {
            return Err(CasError::Conflict(format!(
                "archive {archive_id} has no recorded size or digest"
            )));
        };

        let order = WriteOrder {
            message_type,
            archive_id: archive_id.to_string(),
            bucket: bucket.to_string(),
            file_path: layout::relative_archive_path(&archive.file_bucket_id, archive_id),
            file_bucket_id: archive.file_bucket_id,
            size,
            digest_type: archive.digest_type,
            digest,
        };
        let added = self.queue.add(&order)?;
        if added {
            info!(archive_id, bucket, kind = %message_type, size, "write order created");
        } else {
            debug!(archive_id, "write order already queued");
        }
        Ok(added)
    }

    /// Acknowledge an archive's write order. Returns `false` if none was queued.
    pub fn discard_write_order(&self, archive_id: &str) -> CasResult<bool> {
        Ok(self.queue.remove(archive_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcas_queue::PersistentQueueRepository;
    use tcas_referential::ArchiveReferentialRepository;
    use tcas_types::{ArchiveReferentialEntity, DigestType};

    fn creator() -> (WriteOrderCreator, Arc<ArchiveReferentialRepository>, Arc<PersistentQueueRepository>) {
        let archives = Arc::new(ArchiveReferentialRepository::in_memory());
        let queue = Arc::new(PersistentQueueRepository::in_memory());
        (
            WriteOrderCreator::new(archives.clone(), queue.clone()),
            archives,
            queue,
        )
    }

    #[test]
    fn ready_archive_is_enqueued_once() {
        let (creator, archives, queue) = creator();
        archives
            .insert(&ArchiveReferentialEntity::building("t1.tar", "test-metadata", DigestType::Sha512))
            .unwrap();
        archives.mark_ready_on_disk("t1.tar", 4096, "abcd").unwrap();

        assert!(creator
            .create_write_order("t1.tar", "test", QueueMessageType::TarWriteOrder)
            .unwrap());
        assert!(!creator
            .create_write_order("t1.tar", "test", QueueMessageType::TarWriteOrder)
            .unwrap());

        let messages = queue.list().unwrap();
        assert_eq!(messages.len(), 1);
        let order = &messages[0].order;
        assert_eq!(order.file_path, "test-metadata/tar/t1.tar");
        assert_eq!(order.size, 4096);
        assert_eq!(order.digest, "abcd");
        assert_eq!(order.bucket, "test");

        assert!(creator.discard_write_order("t1.tar").unwrap());
        assert!(!creator.discard_write_order("t1.tar").unwrap());
    }

    #[test]
    fn building_archive_is_refused() {
        let (creator, archives, queue) = creator();
        archives
            .insert(&ArchiveReferentialEntity::building("t1.tar", "test-metadata", DigestType::Sha512))
            .unwrap();
        let err = creator
            .create_write_order("t1.tar", "test", QueueMessageType::TarWriteOrder)
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn unknown_archive() {
        let (creator, _, _) = creator();
        let err = creator
            .create_write_order("nope", "test", QueueMessageType::BackupWriteOrder)
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
