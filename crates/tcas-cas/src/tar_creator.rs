//! Per-file-bucket worker packing staged objects into tar archives.

use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tcas_referential::{ArchiveReferential, ObjectReferential};
use tcas_types::{
    new_tar_id, ArchiveReferentialEntity, DigestType, ObjectReferentialId, ObjectStorageLocation,
    QueueMessageType,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{CasError, CasResult};
use crate::file_storage::BasicFileStorage;
use crate::layout;
use crate::tar_writer::TarArchiveBuilder;
use crate::write_order::WriteOrderCreator;

/// A staged object waiting to be packed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputFileToProcessMessage {
    pub container_name: String,
    pub storage_id: String,
    pub object_name: String,
    pub digest_type: DigestType,
    pub digest: String,
    pub size: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TarCreatorMessage {
    InputFile(InputFileToProcessMessage),
    /// Close the current archive now.
    Flush,
    /// Close the current archive, then stop the worker.
    Shutdown,
}

/// Intake of a file bucket's tar creator.
pub trait TarCreatorQueue: Send + Sync {
    fn add_to_queue(&self, message: TarCreatorMessage) -> CasResult<()>;
}

#[derive(Clone, Debug)]
pub struct TarCreatorConfig {
    /// Flush once the archive holds at least this many bytes.
    pub max_size: u64,
    /// Flush this long after the archive's first object.
    pub max_age: Duration,
    pub digest_type: DigestType,
}

/// Cloneable sender side of a running tar creator.
#[derive(Clone, Debug)]
pub struct TarCreatorHandle {
    file_bucket_id: String,
    tx: mpsc::UnboundedSender<TarCreatorMessage>,
}

impl TarCreatorHandle {
    pub fn file_bucket_id(&self) -> &str {
        &self.file_bucket_id
    }
}

impl TarCreatorQueue for TarCreatorHandle {
    fn add_to_queue(&self, message: TarCreatorMessage) -> CasResult<()> {
        self.tx
            .send(message)
            .map_err(|_| CasError::CreatorStopped(self.file_bucket_id.clone()))
    }
}

struct PackedObject {
    message: InputFileToProcessMessage,
    offset: u64,
}

struct PendingArchive {
    builder: TarArchiveBuilder,
    members: Vec<PackedObject>,
    storage_ids: HashSet<String>,
    opened_at: Instant,
}

/// Packing state of one file bucket. Single consumer: all calls happen on
/// the creator's worker, one message at a time.
///
/// Flush order: archive `ReadyOnDisk`, write order enqueued, objects moved to
/// `TarFile`, input files deleted. A crash anywhere in between leaves every
/// object either `InputFile` with its staged file present, or `TarFile` in a
/// ready archive.
pub struct TarCreatorWorker {
    file_bucket_id: String,
    bucket: String,
    storage: Arc<BasicFileStorage>,
    objects: Arc<dyn ObjectReferential>,
    archives: Arc<dyn ArchiveReferential>,
    write_orders: Arc<WriteOrderCreator>,
    config: TarCreatorConfig,
    current: Option<PendingArchive>,
}

impl TarCreatorWorker {
    pub fn new(
        file_bucket_id: impl Into<String>,
        bucket: impl Into<String>,
        storage: Arc<BasicFileStorage>,
        objects: Arc<dyn ObjectReferential>,
        archives: Arc<dyn ArchiveReferential>,
        write_orders: Arc<WriteOrderCreator>,
        config: TarCreatorConfig,
    ) -> Self {
        Self {
            file_bucket_id: file_bucket_id.into(),
            bucket: bucket.into(),
            storage,
            objects,
            archives,
            write_orders,
            config,
            current: None,
        }
    }

    pub fn file_bucket_id(&self) -> &str {
        &self.file_bucket_id
    }

    /// Id of the archive being accumulated, if any.
    pub fn current_archive_id(&self) -> Option<&str> {
        self.current.as_ref().map(|p| p.builder.archive_id())
    }

    /// When the current archive must be flushed by age.
    pub fn deadline(&self) -> Option<Instant> {
        self.current
            .as_ref()
            .map(|p| p.opened_at + self.config.max_age)
    }

    pub fn handle(&mut self, message: TarCreatorMessage) {
        match message {
            TarCreatorMessage::InputFile(input) => self.process(input),
            TarCreatorMessage::Flush | TarCreatorMessage::Shutdown => self.flush(),
        }
    }

    /// Append one staged object to the current archive. A missing input file
    /// is skipped; an archive write failure abandons the whole batch.
    pub fn process(&mut self, message: InputFileToProcessMessage) {
        if self
            .current
            .as_ref()
            .is_some_and(|p| p.storage_ids.contains(&message.storage_id))
        {
            debug!(storage_id = %message.storage_id, "input file already in current archive");
            return;
        }

        let mut file = match self
            .storage
            .input_file_path(&message.container_name, &message.storage_id)
            .and_then(|path| File::open(path).map_err(CasError::from))
        {
            Ok(file) => file,
            Err(CasError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                warn!(
                    container = %message.container_name,
                    storage_id = %message.storage_id,
                    "input file disappeared before packing; skipping"
                );
                return;
            }
            Err(e) => {
                warn!(
                    container = %message.container_name,
                    storage_id = %message.storage_id,
                    error = %e,
                    "cannot open input file; skipping"
                );
                return;
            }
        };

        if self.current.is_none() {
            match self.open_archive() {
                Ok(pending) => self.current = Some(pending),
                Err(e) => {
                    error!(file_bucket = %self.file_bucket_id, error = %e, "cannot open a new archive");
                    return;
                }
            }
        }
        let Some(pending) = self.current.as_mut() else {
            return;
        };

        match pending
            .builder
            .append(&message.object_name, message.size, &mut file)
        {
            Ok(offset) => {
                debug!(
                    archive_id = %pending.builder.archive_id(),
                    object = %message.object_name,
                    offset,
                    "object appended"
                );
                pending.storage_ids.insert(message.storage_id.clone());
                pending.members.push(PackedObject { message, offset });
            }
            Err(source) => {
                if let Some(pending) = self.current.take() {
                    let archive_id = pending.builder.archive_id().to_string();
                    self.abandon(pending, CasError::FatalBuild { archive_id, source });
                }
                return;
            }
        }

        if pending_size(&self.current) >= self.config.max_size {
            self.flush();
        }
    }

    /// Close the current archive and hand it to the write queue.
    pub fn flush(&mut self) {
        let Some(PendingArchive {
            builder, members, ..
        }) = self.current.take()
        else {
            return;
        };
        let archive_id = builder.archive_id().to_string();
        let root = self.storage.root().to_path_buf();

        let finished = match builder.finish() {
            Ok(finished) => finished,
            Err(source) => {
                error!(%archive_id, error = %source, "archive finalization failed; inputs stay staged");
                for path in [
                    layout::archive_tmp_path(&root, &self.file_bucket_id, &archive_id),
                    layout::archive_path(&root, &self.file_bucket_id, &archive_id),
                ] {
                    if let Err(e) = layout::remove_if_exists(&path) {
                        warn!(path = %path.display(), error = %e, "cannot remove failed archive");
                    }
                }
                self.discard_building(&archive_id);
                return;
            }
        };

        if let Err(e) = self
            .archives
            .mark_ready_on_disk(&archive_id, finished.size, &finished.digest)
        {
            error!(%archive_id, error = %e, "cannot mark archive ready; recovery will discard it");
            return;
        }
        info!(
            file_bucket = %self.file_bucket_id,
            %archive_id,
            objects = members.len(),
            size = finished.size,
            "archive ready on disk"
        );

        if let Err(e) = self.write_orders.create_write_order(
            &archive_id,
            &self.bucket,
            QueueMessageType::TarWriteOrder,
        ) {
            error!(%archive_id, error = %e, "write order not enqueued; recovery will retry");
        }

        for member in members {
            self.commit(&archive_id, member);
        }
    }

    fn commit(&self, archive_id: &str, member: PackedObject) {
        let message = &member.message;
        let id = ObjectReferentialId::new(&message.container_name, &message.object_name);
        let location = ObjectStorageLocation::TarFile {
            tar_id: archive_id.to_string(),
            offset: Some(member.offset),
        };
        match self
            .objects
            .update_location(&id, &message.storage_id, location)
        {
            Ok(_) => {}
            Err(e) if e.is_conflict() || e.is_not_found() => {
                debug!(%id, storage_id = %message.storage_id, reason = %e, "object moved on; packed copy left unreferenced");
            }
            Err(e) => {
                error!(%id, error = %e, "cannot record tar location; input file kept");
                return;
            }
        }
        if let Err(e) = self
            .storage
            .delete_file(&message.container_name, &message.storage_id)
        {
            warn!(%id, storage_id = %message.storage_id, error = %e, "cannot delete packed input file");
        }
    }

    fn open_archive(&self) -> CasResult<PendingArchive> {
        let archive_id = new_tar_id();
        self.archives.insert(&ArchiveReferentialEntity::building(
            &archive_id,
            &self.file_bucket_id,
            self.config.digest_type,
        ))?;

        let root = self.storage.root();
        let builder = TarArchiveBuilder::create(
            &archive_id,
            layout::archive_tmp_path(root, &self.file_bucket_id, &archive_id),
            layout::archive_path(root, &self.file_bucket_id, &archive_id),
            self.config.digest_type,
        );
        match builder {
            Ok(builder) => {
                debug!(file_bucket = %self.file_bucket_id, %archive_id, "archive opened");
                Ok(PendingArchive {
                    builder,
                    members: Vec::new(),
                    storage_ids: HashSet::new(),
                    opened_at: Instant::now(),
                })
            }
            Err(source) => {
                self.discard_building(&archive_id);
                Err(CasError::FatalBuild { archive_id, source })
            }
        }
    }

    fn abandon(&self, pending: PendingArchive, reason: CasError) {
        let archive_id = pending.builder.archive_id().to_string();
        error!(
            file_bucket = %self.file_bucket_id,
            %archive_id,
            objects = pending.members.len(),
            error = %reason,
            "archive abandoned; inputs stay staged for the next recovery"
        );
        if let Err(e) = pending.builder.abort() {
            warn!(%archive_id, error = %e, "cannot remove partial archive");
        }
        self.discard_building(&archive_id);
    }

    fn discard_building(&self, archive_id: &str) {
        if let Err(e) = self.archives.remove_building(archive_id) {
            warn!(%archive_id, error = %e, "cannot remove abandoned archive entry");
        }
    }
}

fn pending_size(current: &Option<PendingArchive>) -> u64 {
    current.as_ref().map_or(0, |p| p.builder.bytes_written())
}

/// Per-bucket packing worker running on the tokio runtime.
pub struct FileBucketTarCreator {
    handle: TarCreatorHandle,
    task: JoinHandle<()>,
}

impl FileBucketTarCreator {
    /// Spawn the worker. Messages are queued immediately, even before the
    /// worker first runs.
    pub fn start(worker: TarCreatorWorker) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = TarCreatorHandle {
            file_bucket_id: worker.file_bucket_id.clone(),
            tx,
        };
        let task = tokio::spawn(run(worker, rx));
        Self { handle, task }
    }

    pub fn handle(&self) -> &TarCreatorHandle {
        &self.handle
    }

    /// Flush pending objects and wait for the worker to stop.
    pub async fn shutdown(self) {
        let file_bucket_id = self.handle.file_bucket_id.clone();
        if self.handle.add_to_queue(TarCreatorMessage::Shutdown).is_err() {
            debug!(file_bucket = %file_bucket_id, "tar creator already stopped");
        }
        if let Err(e) = self.task.await {
            error!(file_bucket = %file_bucket_id, error = %e, "tar creator task failed");
        }
    }
}

async fn run(mut worker: TarCreatorWorker, mut rx: mpsc::UnboundedReceiver<TarCreatorMessage>) {
    let file_bucket_id = worker.file_bucket_id.clone();
    info!(file_bucket = %file_bucket_id, "tar creator started");

    loop {
        let next = match worker.deadline() {
            Some(deadline) => {
                match tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), rx.recv()).await {
                    Ok(message) => message,
                    Err(_) => Some(TarCreatorMessage::Flush),
                }
            }
            None => rx.recv().await,
        };

        // Every handle dropped: behave as a shutdown.
        let message = next.unwrap_or(TarCreatorMessage::Shutdown);
        let stop = message == TarCreatorMessage::Shutdown;

        // Packing is blocking file I/O; the worker moves onto the blocking pool
        // for each message and comes back.
        let result = tokio::task::spawn_blocking(move || {
            worker.handle(message);
            worker
        })
        .await;
        worker = match result {
            Ok(worker) => worker,
            Err(e) => {
                error!(file_bucket = %file_bucket_id, error = %e, "tar creator worker panicked");
                return;
            }
        };

        if stop {
            break;
        }
    }
    info!(file_bucket = %file_bucket_id, "tar creator stopped");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::TopologyConfig;
    use crate::tar_writer::open_entry;
    use crate::topology::BucketTopologyHelper;
    use std::io::Read;
    use std::path::Path;
    use tcas_queue::{PersistentQueueRepository, QueueRepository};
    use tcas_referential::{ArchiveReferentialRepository, ObjectReferentialRepository};
    use tcas_types::{ArchiveStorageLocation, ObjectReferentialEntry};
    use tempfile::TempDir;

    pub(crate) struct Fixture {
        pub dir: TempDir,
        pub storage: Arc<BasicFileStorage>,
        pub objects: Arc<ObjectReferentialRepository>,
        pub archives: Arc<ArchiveReferentialRepository>,
        pub queue: Arc<PersistentQueueRepository>,
        pub write_orders: Arc<WriteOrderCreator>,
    }

    impl Fixture {
        pub fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let topology = Arc::new(BucketTopologyHelper::new(&TopologyConfig::default()).unwrap());
            let storage = Arc::new(BasicFileStorage::new(dir.path(), topology, DigestType::Sha256));
            let objects = Arc::new(ObjectReferentialRepository::in_memory());
            let archives = Arc::new(ArchiveReferentialRepository::in_memory());
            let queue = Arc::new(PersistentQueueRepository::in_memory());
            let write_orders = Arc::new(WriteOrderCreator::new(archives.clone(), queue.clone()));
            Self {
                dir,
                storage,
                objects,
                archives,
                queue,
                write_orders,
            }
        }

        pub fn root(&self) -> &Path {
            self.dir.path()
        }

        /// Stage an object and index it as `InputFile`.
        pub fn stage(&self, container: &str, name: &str, content: &[u8]) -> InputFileToProcessMessage {
            let staged = self
                .storage
                .write_file(container, name, content, content.len() as u64)
                .unwrap();
            self.objects
                .insert_or_update(&ObjectReferentialEntry::staged(
                    ObjectReferentialId::new(container, name),
                    staged.size,
                    staged.digest_type,
                    staged.digest.clone(),
                    staged.storage_id.clone(),
                ))
                .unwrap();
            InputFileToProcessMessage {
                container_name: container.into(),
                storage_id: staged.storage_id,
                object_name: name.into(),
                digest_type: staged.digest_type,
                digest: staged.digest,
                size: staged.size,
            }
        }

        pub fn worker(&self, max_size: u64, max_age: Duration) -> TarCreatorWorker {
            TarCreatorWorker::new(
                "default-metadata",
                "default",
                self.storage.clone(),
                self.objects.clone(),
                self.archives.clone(),
                self.write_orders.clone(),
                TarCreatorConfig {
                    max_size,
                    max_age,
                    digest_type: DigestType::Sha256,
                },
            )
        }

        pub fn entry(&self, container: &str, name: &str) -> ObjectReferentialEntry {
            self.objects
                .find(&ObjectReferentialId::new(container, name))
                .unwrap()
                .unwrap()
        }

        pub fn read_packed(&self, entry: &ObjectReferentialEntry) -> String {
            let path = layout::archive_path(
                self.root(),
                "default-metadata",
                entry.location.tar_id().unwrap(),
            );
            let (name, mut reader) = open_entry(&path, entry.location.offset().unwrap()).unwrap();
            assert_eq!(name, entry.object_name());
            let mut content = String::new();
            reader.read_to_string(&mut content).unwrap();
            content
        }
    }

    const LARGE: u64 = 1 << 30;
    const LONG: Duration = Duration::from_secs(3600);

    #[test]
    fn flush_packs_in_order_and_cleans_staging() {
        let f = Fixture::new();
        let mut worker = f.worker(LARGE, LONG);
        let m1 = f.stage("0_unit", "a", b"alpha");
        let m2 = f.stage("0_objectGroup", "b", b"bravo");

        worker.process(m1.clone());
        worker.process(m2.clone());
        let archive_id = worker.current_archive_id().unwrap().to_string();
        assert_eq!(
            f.archives.find(&archive_id).unwrap().unwrap().location,
            ArchiveStorageLocation::BuildingOnDisk
        );
        // Nothing is visible to the tape writer while building.
        assert!(f.queue.is_empty().unwrap());

        worker.flush();
        assert!(worker.current_archive_id().is_none());

        let archive = f.archives.find(&archive_id).unwrap().unwrap();
        assert!(archive.is_ready_on_disk());
        let orders = f.queue.list().unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].id, archive_id);
        assert_eq!(orders[0].order.size, archive.size.unwrap());

        let a = f.entry("0_unit", "a");
        let b = f.entry("0_objectGroup", "b");
        assert_eq!(a.location.tar_id(), Some(archive_id.as_str()));
        assert!(a.location.offset().unwrap() < b.location.offset().unwrap());
        assert_eq!(f.read_packed(&a), "alpha");
        assert_eq!(f.read_packed(&b), "bravo");

        assert!(f.storage.list_storage_ids_by_container_name("0_unit").unwrap().is_empty());
        assert!(f
            .storage
            .list_storage_ids_by_container_name("0_objectGroup")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn size_threshold_flushes() {
        let f = Fixture::new();
        let mut worker = f.worker(1, LONG);
        worker.process(f.stage("0_unit", "a", b"1"));
        worker.process(f.stage("0_unit", "b", b"2"));
        assert!(worker.current_archive_id().is_none());
        assert_eq!(f.queue.len().unwrap(), 2);
        assert_ne!(
            f.entry("0_unit", "a").location.tar_id(),
            f.entry("0_unit", "b").location.tar_id()
        );
    }

    #[test]
    fn missing_input_file_is_skipped() {
        let f = Fixture::new();
        let mut worker = f.worker(LARGE, LONG);
        let gone = f.stage("0_unit", "gone", b"x");
        f.storage.delete_file("0_unit", &gone.storage_id).unwrap();

        worker.process(gone);
        assert!(worker.current_archive_id().is_none(), "no archive for a missing file");

        worker.process(f.stage("0_unit", "kept", b"y"));
        worker.flush();

        assert_eq!(f.entry("0_unit", "gone").location, ObjectStorageLocation::InputFile);
        assert!(f.entry("0_unit", "kept").location.is_beyond_input_file());
        assert_eq!(f.queue.len().unwrap(), 1);
    }

    #[test]
    fn duplicate_message_is_packed_once() {
        let f = Fixture::new();
        let mut worker = f.worker(LARGE, LONG);
        let m = f.stage("0_unit", "a", b"abc");
        worker.process(m.clone());
        worker.process(m.clone());
        worker.flush();
        // Redelivered after packing: the input file is gone.
        worker.process(m);
        assert!(worker.current_archive_id().is_none());

        let archive_id = f.entry("0_unit", "a").location.tar_id().unwrap().to_string();
        let path = layout::archive_path(f.root(), "default-metadata", &archive_id);
        let mut archive = tar::Archive::new(File::open(path).unwrap());
        assert_eq!(archive.entries().unwrap().count(), 1);
    }

    #[test]
    fn rewritten_object_keeps_its_new_version() {
        let f = Fixture::new();
        let mut worker = f.worker(LARGE, LONG);
        let old = f.stage("0_unit", "a", b"old");
        worker.process(old.clone());
        let new = f.stage("0_unit", "a", b"new");
        worker.flush();

        let entry = f.entry("0_unit", "a");
        assert_eq!(entry.storage_id, new.storage_id);
        assert_eq!(entry.location, ObjectStorageLocation::InputFile);
        let staged = f.storage.list_storage_ids_by_container_name("0_unit").unwrap();
        assert!(!staged.contains(&old.storage_id));
        assert!(staged.contains(&new.storage_id));
    }

    #[test]
    fn empty_flush_is_a_no_op() {
        let f = Fixture::new();
        let mut worker = f.worker(LARGE, LONG);
        worker.flush();
        assert!(f.queue.is_empty().unwrap());
        assert!(worker.deadline().is_none());
    }

    #[tokio::test]
    async fn age_threshold_flushes() {
        let f = Fixture::new();
        let creator = FileBucketTarCreator::start(f.worker(LARGE, Duration::from_millis(50)));
        creator
            .handle()
            .add_to_queue(TarCreatorMessage::InputFile(f.stage("0_unit", "a", b"1")))
            .unwrap();
        creator
            .handle()
            .add_to_queue(TarCreatorMessage::InputFile(f.stage("0_unit", "b", b"2")))
            .unwrap();

        let order = f.queue.wait_poll(Duration::from_secs(10)).await.unwrap().unwrap();
        assert_eq!(
            f.entry("0_unit", "a").location.tar_id(),
            Some(order.id.as_str())
        );
        creator.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_flushes_pending_objects() {
        let f = Fixture::new();
        let creator = FileBucketTarCreator::start(f.worker(LARGE, LONG));
        let handle = creator.handle().clone();
        handle
            .add_to_queue(TarCreatorMessage::InputFile(f.stage("0_unit", "a", b"1")))
            .unwrap();
        creator.shutdown().await;

        assert_eq!(f.queue.len().unwrap(), 1);
        assert!(f.entry("0_unit", "a").location.is_beyond_input_file());
        assert!(matches!(
            handle.add_to_queue(TarCreatorMessage::Flush),
            Err(CasError::CreatorStopped(_))
        ));
    }
}
