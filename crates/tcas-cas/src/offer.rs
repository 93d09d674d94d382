//! The tape offer facade wiring storage, referentials and workers together.
//!
//! One [`TapeOffer`] owns a referential tree; a second opener gets
//! [`CasError::Locked`](crate::error::CasError::Locked).

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tcas_digest::Digester;
use tcas_queue::{PersistentQueueRepository, QueueMessage, QueueRepository};
use tcas_referential::{
    ArchiveReferential, ArchiveReferentialRepository, ObjectReferential,
    ObjectReferentialRepository,
};
use tcas_types::{
    ArchiveReferentialEntity, ObjectReferentialEntry, ObjectReferentialId, ObjectStorageLocation,
    QueueMessageType,
};
use tracing::{debug, info, warn};

use crate::backup::BackupFileStorage;
use crate::config::OfferConfig;
use crate::error::{CasError, CasResult};
use crate::file_storage::BasicFileStorage;
use crate::layout;
use crate::lock::OfferLock;
use crate::recovery::{
    mark_members_on_tape, ArchiveBootstrapRecovery, ArchiveRecoveryReport,
    FileBucketTarCreatorBootstrapRecovery, RecoveryReport,
};
use crate::tar_creator::{
    FileBucketTarCreator, InputFileToProcessMessage, TarCreatorConfig, TarCreatorMessage,
    TarCreatorQueue, TarCreatorWorker,
};
use crate::tar_writer::open_entry;
use crate::topology::{BucketTopologyHelper, BACKUP_BUCKET, BACKUP_FILE_BUCKET};
use crate::write_order::WriteOrderCreator;

/// Startup reconciliation outcome of one file bucket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub file_bucket_id: String,
    pub archives: ArchiveRecoveryReport,
    pub inputs: RecoveryReport,
}

/// An object's bytes, wherever they currently live on disk.
pub struct ObjectContent {
    pub entry: ObjectReferentialEntry,
    pub reader: Box<dyn Read + Send>,
}

impl std::fmt::Debug for ObjectContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectContent")
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}

/// Process-wide tape offer: referentials, queue, staging and one tar creator
/// per file bucket.
pub struct TapeOffer {
    config: OfferConfig,
    topology: Arc<BucketTopologyHelper>,
    storage: Arc<BasicFileStorage>,
    objects: Arc<ObjectReferentialRepository>,
    archives: Arc<ArchiveReferentialRepository>,
    queue: Arc<PersistentQueueRepository>,
    write_orders: Arc<WriteOrderCreator>,
    backup: BackupFileStorage,
    creators: BTreeMap<String, FileBucketTarCreator>,
    bootstrap: Vec<BootstrapReport>,
    _lock: OfferLock,
}

impl TapeOffer {
    /// Open the journals, reconcile every file bucket and start its tar
    /// creator. Returns only once all buckets are ready for traffic.
    ///
    /// Fails with [`CasError::Locked`] while another offer owns the same
    /// referential directory.
    pub async fn open(config: OfferConfig) -> CasResult<Self> {
        config.validate()?;
        fs::create_dir_all(&config.input_root)?;
        let lock = OfferLock::acquire(&config.referential_dir)?;

        let journal = config.journal_config();
        let objects = Arc::new(ObjectReferentialRepository::open(&config.referential_dir, journal.clone())?);
        let archives = Arc::new(ArchiveReferentialRepository::open(&config.referential_dir, journal.clone())?);
        let queue = Arc::new(PersistentQueueRepository::open(&config.referential_dir, journal)?);
        objects.compact()?;
        archives.compact()?;
        queue.compact()?;

        let topology = Arc::new(BucketTopologyHelper::new(&config.topology)?);
        let storage = Arc::new(BasicFileStorage::new(
            &config.input_root,
            topology.clone(),
            config.digest_type,
        ));
        let write_orders = Arc::new(WriteOrderCreator::new(archives.clone(), queue.clone()));
        let backup = BackupFileStorage::new(
            &config.input_root,
            archives.clone(),
            write_orders.clone(),
            config.digest_type,
        );

        let archive_recovery = ArchiveBootstrapRecovery::new(
            &config.input_root,
            objects.clone(),
            archives.clone(),
            write_orders.clone(),
        );
        let input_recovery = FileBucketTarCreatorBootstrapRecovery::new(storage.clone(), objects.clone());

        let mut bootstrap = vec![BootstrapReport {
            file_bucket_id: BACKUP_FILE_BUCKET.to_string(),
            archives: archive_recovery.recover(
                BACKUP_FILE_BUCKET,
                BACKUP_BUCKET,
                QueueMessageType::BackupWriteOrder,
            )?,
            inputs: RecoveryReport::default(),
        }];

        let mut creators = BTreeMap::new();
        for file_bucket_id in topology.list_file_bucket_ids() {
            let bucket = topology
                .bucket_for_file_bucket(file_bucket_id)
                .ok_or_else(|| CasError::Config(format!("no bucket for {file_bucket_id}")))?;
            let archives_report =
                archive_recovery.recover(file_bucket_id, bucket, QueueMessageType::TarWriteOrder)?;

            let creator = FileBucketTarCreator::start(TarCreatorWorker::new(
                file_bucket_id,
                bucket,
                storage.clone(),
                objects.clone(),
                archives.clone(),
                write_orders.clone(),
                TarCreatorConfig {
                    max_size: config.tar_max_size,
                    max_age: config.tar_max_age(),
                    digest_type: config.digest_type,
                },
            ));
            let inputs_report =
                input_recovery.initialize_on_bootstrap(file_bucket_id, creator.handle(), &topology)?;

            creators.insert(file_bucket_id.to_string(), creator);
            bootstrap.push(BootstrapReport {
                file_bucket_id: file_bucket_id.to_string(),
                archives: archives_report,
                inputs: inputs_report,
            });
        }

        info!(
            file_buckets = creators.len(),
            pending_orders = queue.len()?,
            "tape offer ready"
        );
        Ok(Self {
            config,
            topology,
            storage,
            objects,
            archives,
            queue,
            write_orders,
            backup,
            creators,
            bootstrap,
            _lock: lock,
        })
    }

    /// Pending write orders, read without opening the offer.
    ///
    /// Takes no lock and writes nothing, so it is safe next to a running
    /// offer on the same configuration.
    pub fn pending_write_orders(config: &OfferConfig) -> CasResult<Vec<QueueMessage>> {
        Ok(PersistentQueueRepository::snapshot(&config.referential_dir)?)
    }

    pub fn config(&self) -> &OfferConfig {
        &self.config
    }

    pub fn topology(&self) -> &BucketTopologyHelper {
        &self.topology
    }

    pub fn bootstrap_reports(&self) -> &[BootstrapReport] {
        &self.bootstrap
    }

    /// Stage an object and hand it to its bucket's tar creator.
    ///
    /// If `declared_digest` is given the staged bytes must match it. A newer
    /// write of the same name replaces the older one.
    pub fn put_object(
        &self,
        container_name: &str,
        object_name: &str,
        reader: impl Read,
        size: u64,
        declared_digest: Option<&str>,
    ) -> CasResult<ObjectReferentialEntry> {
        let file_bucket_id = self
            .topology
            .file_bucket_id_for_container(container_name)
            .ok_or_else(|| CasError::InvalidRequest(format!("unknown container {container_name}")))?;
        let creator = self
            .creators
            .get(file_bucket_id)
            .ok_or_else(|| CasError::CreatorStopped(file_bucket_id.to_string()))?;

        let staged = self
            .storage
            .write_file(container_name, object_name, reader, size)?;
        if let Some(expected) = declared_digest {
            if let Err(e) = Digester::verify(staged.digest_type, expected, &staged.digest) {
                self.storage.delete_file(container_name, &staged.storage_id)?;
                return Err(e.into());
            }
        }

        let entry = ObjectReferentialEntry::staged(
            ObjectReferentialId::new(container_name, object_name),
            staged.size,
            staged.digest_type,
            staged.digest.clone(),
            staged.storage_id.clone(),
        );
        let previous = match self.objects.insert_or_update(&entry) {
            Ok(previous) => previous,
            Err(e) => {
                if let Err(cleanup) = self.storage.delete_file(container_name, &staged.storage_id) {
                    warn!(container = container_name, storage_id = %staged.storage_id, error = %cleanup, "cannot delete unindexed input file");
                }
                return Err(e.into());
            }
        };
        if let Some(previous) = previous.filter(|p| {
            p.location == ObjectStorageLocation::InputFile && p.storage_id != staged.storage_id
        }) {
            debug!(id = %entry.id, superseded = %previous.storage_id, "object rewritten before packing");
            self.storage
                .delete_file(container_name, &previous.storage_id)?;
        }

        creator.handle().add_to_queue(TarCreatorMessage::InputFile(InputFileToProcessMessage {
            container_name: container_name.to_string(),
            storage_id: staged.storage_id,
            object_name: object_name.to_string(),
            digest_type: staged.digest_type,
            digest: staged.digest,
            size: staged.size,
        }))?;
        Ok(entry)
    }

    /// Open an object's content from staging or from its archive on disk.
    pub fn get_object(&self, container_name: &str, object_name: &str) -> CasResult<ObjectContent> {
        let id = ObjectReferentialId::new(container_name, object_name);
        // Two attempts: the object may be packed between the lookup and the
        // staged file open.
        for _ in 0..2 {
            let entry = self
                .objects
                .find(&id)?
                .ok_or_else(|| CasError::NotFound(id.to_string()))?;
            match &entry.location {
                ObjectStorageLocation::InputFile => {
                    match self.storage.read_file(container_name, &entry.storage_id) {
                        Ok(file) => {
                            return Ok(ObjectContent {
                                entry,
                                reader: Box::new(file),
                            })
                        }
                        Err(e) if e.is_not_found() => continue,
                        Err(e) => return Err(e),
                    }
                }
                ObjectStorageLocation::TarFile { tar_id, offset } => {
                    let reader = self.open_packed(&id, tar_id, *offset)?;
                    return Ok(ObjectContent { entry, reader });
                }
                ObjectStorageLocation::OnTape { .. } => {
                    return Err(CasError::NotOnDisk(id.to_string()));
                }
            }
        }
        Err(CasError::NotFound(id.to_string()))
    }

    fn open_packed(
        &self,
        id: &ObjectReferentialId,
        tar_id: &str,
        offset: Option<u64>,
    ) -> CasResult<Box<dyn Read + Send>> {
        let archive = self
            .archives
            .find(tar_id)?
            .filter(|a| a.location.is_on_disk())
            .ok_or_else(|| CasError::NotOnDisk(id.to_string()))?;
        let offset = offset.ok_or_else(|| CasError::NotOnDisk(id.to_string()))?;
        let path = layout::archive_path(&self.config.input_root, &archive.file_bucket_id, tar_id);
        let (name, reader) = match open_entry(&path, offset) {
            Ok(opened) => opened,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CasError::NotOnDisk(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if name != id.object_name {
            return Err(CasError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("archive {tar_id} holds {name} at offset {offset}, expected {}", id.object_name),
            )));
        }
        Ok(Box::new(reader))
    }

    /// Store a backup file as its own archive and queue it for tape.
    pub fn write_backup(
        &self,
        object_id: &str,
        reader: impl Read,
        size: u64,
    ) -> CasResult<ArchiveReferentialEntity> {
        self.backup.write_file(object_id, reader, size)
    }

    /// Record that the tape driver wrote an archive.
    ///
    /// The archive moves to `OnTape` only if `read_back_digest` matches the
    /// digest recorded when it was ready on disk. Its objects then move to
    /// `OnTape`, the local file is deleted and the write order acknowledged.
    /// Redelivered completions are accepted.
    pub fn complete_write_order(
        &self,
        archive_id: &str,
        tape_code: &str,
        tape_position: u32,
        read_back_digest: &str,
    ) -> CasResult<ArchiveReferentialEntity> {
        let archive = self
            .archives
            .mark_on_tape(archive_id, tape_code, tape_position, read_back_digest)?;
        let marked = mark_members_on_tape(self.objects.as_ref(), archive_id)?;

        let path = layout::archive_path(&self.config.input_root, &archive.file_bucket_id, archive_id);
        if let Err(e) = layout::remove_if_exists(&path) {
            warn!(archive_id, error = %e, "cannot delete archive written to tape; recovery will retry");
        }
        self.write_orders.discard_write_order(archive_id)?;
        info!(archive_id, tape_code, tape_position, objects = marked, "write order completed");
        Ok(archive)
    }

    pub fn find_archive(&self, archive_id: &str) -> CasResult<Option<ArchiveReferentialEntity>> {
        Ok(self.archives.find(archive_id)?)
    }

    pub fn find_object(&self, container_name: &str, object_name: &str) -> CasResult<Option<ObjectReferentialEntry>> {
        Ok(self
            .objects
            .find(&ObjectReferentialId::new(container_name, object_name))?)
    }

    /// Lease the oldest pending write order.
    pub fn poll_write_order(&self) -> CasResult<Option<QueueMessage>> {
        Ok(self.queue.poll()?)
    }

    /// Like [`poll_write_order`](Self::poll_write_order), waiting up to
    /// `timeout` for an order to arrive.
    pub async fn wait_write_order(&self, timeout: Duration) -> CasResult<Option<QueueMessage>> {
        Ok(self.queue.wait_poll(timeout).await?)
    }

    pub fn release_write_order(&self, archive_id: &str) -> CasResult<()> {
        Ok(self.queue.release(archive_id)?)
    }

    pub fn list_write_orders(&self) -> CasResult<Vec<QueueMessage>> {
        Ok(self.queue.list()?)
    }

    /// Ask a file bucket's creator to close its current archive.
    pub fn flush(&self, file_bucket_id: &str) -> CasResult<()> {
        self.creators
            .get(file_bucket_id)
            .ok_or_else(|| CasError::NotFound(format!("file bucket {file_bucket_id}")))?
            .handle()
            .add_to_queue(TarCreatorMessage::Flush)
    }

    pub fn flush_all(&self) -> CasResult<()> {
        for creator in self.creators.values() {
            creator.handle().add_to_queue(TarCreatorMessage::Flush)?;
        }
        Ok(())
    }

    /// Flush every pending archive and stop the tar creators.
    pub async fn shutdown(self) {
        for (file_bucket_id, creator) in self.creators {
            debug!(file_bucket = %file_bucket_id, "stopping tar creator");
            creator.shutdown().await;
        }
        info!("tape offer stopped");
    }
}
