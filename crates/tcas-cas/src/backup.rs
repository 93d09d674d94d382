//! Backup container storage.

use std::fs::{self, OpenOptions};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use tcas_referential::ArchiveReferential;
use tcas_types::{ArchiveReferentialEntity, DigestType, QueueMessageType};
use tracing::{info, warn};

use crate::error::{CasError, CasResult};
use crate::file_storage::write_exact;
use crate::layout;
use crate::topology::{BACKUP_BUCKET, BACKUP_FILE_BUCKET};
use crate::write_order::WriteOrderCreator;

/// Backup uploads: each file becomes its own archive, written eagerly and
/// queued for tape without going through the tar creator.
pub struct BackupFileStorage {
    root: PathBuf,
    archives: Arc<dyn ArchiveReferential>,
    write_orders: Arc<WriteOrderCreator>,
    digest_type: DigestType,
}

impl BackupFileStorage {
    pub fn new(
        root: impl Into<PathBuf>,
        archives: Arc<dyn ArchiveReferential>,
        write_orders: Arc<WriteOrderCreator>,
        digest_type: DigestType,
    ) -> Self {
        Self {
            root: root.into(),
            archives,
            write_orders,
            digest_type,
        }
    }

    /// Write `object_id` and enqueue its backup write order.
    ///
    /// Fails with `Conflict` if an archive with this id already exists; the
    /// first writer owns the id. Exactly `declared_size` bytes must be read.
    pub fn write_file(
        &self,
        object_id: &str,
        reader: impl Read,
        declared_size: u64,
    ) -> CasResult<ArchiveReferentialEntity> {
        if !layout::is_safe_component(object_id) || layout::is_tmp_file(object_id) {
            return Err(CasError::InvalidRequest(format!("invalid backup id {object_id:?}")));
        }
        self.archives.insert(&ArchiveReferentialEntity::building(
            object_id,
            BACKUP_FILE_BUCKET,
            self.digest_type,
        ))?;

        let digest = match self.write_to_disk(object_id, reader, declared_size) {
            Ok(digest) => digest,
            Err(e) => {
                if let Err(cleanup) = self.archives.remove_building(object_id) {
                    warn!(object_id, error = %cleanup, "cannot drop failed backup entry");
                }
                return Err(e);
            }
        };

        let entity = self
            .archives
            .mark_ready_on_disk(object_id, declared_size, &digest)?;
        self.write_orders
            .create_write_order(object_id, BACKUP_BUCKET, QueueMessageType::BackupWriteOrder)?;
        info!(object_id, size = declared_size, "backup file stored");
        Ok(entity)
    }

    fn write_to_disk(&self, object_id: &str, reader: impl Read, declared_size: u64) -> CasResult<String> {
        let dir = layout::tar_dir(&self.root, BACKUP_FILE_BUCKET);
        fs::create_dir_all(&dir)?;
        let tmp_path = layout::archive_tmp_path(&self.root, BACKUP_FILE_BUCKET, object_id);
        let final_path = layout::archive_path(&self.root, BACKUP_FILE_BUCKET, object_id);

        let result = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .and_then(|file| write_exact(file, reader, declared_size, self.digest_type))
            .and_then(|digest| {
                fs::rename(&tmp_path, &final_path)?;
                layout::sync_dir(&dir)?;
                Ok(digest)
            });
        if result.is_err() {
            for path in [&tmp_path, &final_path] {
                if let Err(e) = layout::remove_if_exists(path) {
                    warn!(path = %path.display(), error = %e, "cannot remove failed backup file");
                }
            }
        }
        Ok(result?)
    }
}
