//! Startup reconciliation of the staging area with the referentials.
//!
//! Runs once per file bucket before it accepts traffic. Archives are
//! reconciled first so that no half-built archive survives, then every
//! staged input file is either deleted or handed back to the tar creator.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tcas_referential::{ArchiveReferential, ObjectReferential};
use tcas_types::{
    object_name_from_storage_id, ArchiveStorageLocation, ObjectReferentialEntry,
    ObjectStorageLocation, QueueMessageType,
};
use tracing::{debug, error, info, warn};

use crate::error::CasResult;
use crate::file_storage::BasicFileStorage;
use crate::layout;
use crate::tar_creator::{InputFileToProcessMessage, TarCreatorMessage, TarCreatorQueue};
use crate::topology::BucketTopologyHelper;
use crate::write_order::WriteOrderCreator;

/// Outcome of input file recovery for one file bucket.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Files with no referential entry, deleted.
    pub orphans: usize,
    /// Files superseded by a newer write of the same object, deleted.
    pub stale: usize,
    /// Files already packed into an archive, deleted.
    pub already_processed: usize,
    /// Files handed back to the tar creator.
    pub resubmitted: usize,
}

/// Re-drives staged input files after a restart.
pub struct FileBucketTarCreatorBootstrapRecovery {
    storage: Arc<BasicFileStorage>,
    objects: Arc<dyn ObjectReferential>,
}

impl FileBucketTarCreatorBootstrapRecovery {
    pub fn new(storage: Arc<BasicFileStorage>, objects: Arc<dyn ObjectReferential>) -> Self {
        Self { storage, objects }
    }

    /// Classify every staged file of `file_bucket_id`'s containers.
    ///
    /// Idempotent. Referential failures abort the recovery; a failed delete
    /// only leaves the file for the next run.
    pub fn initialize_on_bootstrap(
        &self,
        file_bucket_id: &str,
        queue: &dyn TarCreatorQueue,
        topology: &BucketTopologyHelper,
    ) -> CasResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        for container in topology.list_container_names(file_bucket_id) {
            self.recover_container(&container, queue, &mut report)?;
        }
        info!(
            file_bucket = file_bucket_id,
            orphans = report.orphans,
            stale = report.stale,
            already_processed = report.already_processed,
            resubmitted = report.resubmitted,
            "input files recovered"
        );
        Ok(report)
    }

    fn recover_container(
        &self,
        container: &str,
        queue: &dyn TarCreatorQueue,
        report: &mut RecoveryReport,
    ) -> CasResult<()> {
        let storage_ids = self.storage.list_storage_ids_by_container_name(container)?;
        if storage_ids.is_empty() {
            return Ok(());
        }

        let mut by_name: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for storage_id in storage_ids {
            match object_name_from_storage_id(&storage_id) {
                Ok(name) => by_name.entry(name.to_string()).or_default().push(storage_id),
                Err(e) => {
                    warn!(container, %storage_id, error = %e, "unparseable input file name");
                    self.delete(container, &storage_id);
                    report.orphans += 1;
                }
            }
        }

        let names: BTreeSet<String> = by_name.keys().cloned().collect();
        let entries: BTreeMap<String, ObjectReferentialEntry> = self
            .objects
            .bulk_find(container, &names)?
            .into_iter()
            .map(|e| (e.object_name().to_string(), e))
            .collect();

        for (name, storage_ids) in by_name {
            let entry = entries.get(&name);
            for storage_id in storage_ids {
                match entry {
                    None => {
                        debug!(container, %storage_id, "orphan input file");
                        self.delete(container, &storage_id);
                        report.orphans += 1;
                    }
                    Some(entry) if entry.storage_id != storage_id => {
                        debug!(container, %storage_id, current = %entry.storage_id, "stale input file");
                        self.delete(container, &storage_id);
                        report.stale += 1;
                    }
                    Some(entry) if entry.location.is_beyond_input_file() => {
                        debug!(container, %storage_id, location = %entry.location, "input file already packed");
                        self.delete(container, &storage_id);
                        report.already_processed += 1;
                    }
                    Some(entry) => {
                        queue.add_to_queue(TarCreatorMessage::InputFile(InputFileToProcessMessage {
                            container_name: container.to_string(),
                            storage_id,
                            object_name: name.clone(),
                            digest_type: entry.digest_type,
                            digest: entry.digest.clone(),
                            size: entry.size,
                        }))?;
                        report.resubmitted += 1;
                    }
                }
            }
        }
        Ok(())
    }

    fn delete(&self, container: &str, storage_id: &str) {
        if let Err(e) = self.storage.delete_file(container, storage_id) {
            warn!(container, %storage_id, error = %e, "cannot delete input file; left for next recovery");
        }
    }
}

/// Outcome of archive recovery for one file bucket.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveRecoveryReport {
    /// Half-built archives dropped.
    pub discarded: usize,
    /// Ready archives whose write order was missing and got re-enqueued.
    pub requeued: usize,
    /// Ready archives whose file is gone. Left untouched for an operator.
    pub missing: usize,
    /// Archives already on tape whose local copy was cleaned up.
    pub completed: usize,
    /// Unreferenced or temporary files removed from the tar directory.
    pub swept: usize,
}

/// Reconciles a file bucket's archive directory with the archive referential.
pub struct ArchiveBootstrapRecovery {
    root: PathBuf,
    objects: Arc<dyn ObjectReferential>,
    archives: Arc<dyn ArchiveReferential>,
    write_orders: Arc<WriteOrderCreator>,
}

impl ArchiveBootstrapRecovery {
    pub fn new(
        root: impl Into<PathBuf>,
        objects: Arc<dyn ObjectReferential>,
        archives: Arc<dyn ArchiveReferential>,
        write_orders: Arc<WriteOrderCreator>,
    ) -> Self {
        Self {
            root: root.into(),
            objects,
            archives,
            write_orders,
        }
    }

    /// - `BuildingOnDisk`: files removed, entry dropped.
    /// - `ReadyOnDisk`: write order re-enqueued if missing.
    /// - `OnTape`: members marked on tape, local file and write order dropped.
    ///
    /// Finally any file in the tar directory without an on-disk archive
    /// entry is removed.
    pub fn recover(
        &self,
        file_bucket_id: &str,
        bucket: &str,
        message_type: QueueMessageType,
    ) -> CasResult<ArchiveRecoveryReport> {
        let mut report = ArchiveRecoveryReport::default();

        for archive in self
            .archives
            .list_by_stage(file_bucket_id, &ArchiveStorageLocation::BuildingOnDisk)?
        {
            let id = &archive.archive_id;
            self.remove_file(layout::archive_tmp_path(&self.root, file_bucket_id, id));
            self.remove_file(layout::archive_path(&self.root, file_bucket_id, id));
            if self.archives.remove_building(id)? {
                warn!(file_bucket = file_bucket_id, archive_id = %id, "half-built archive discarded");
                report.discarded += 1;
            }
        }

        for archive in self
            .archives
            .list_by_stage(file_bucket_id, &ArchiveStorageLocation::ReadyOnDisk)?
        {
            let id = &archive.archive_id;
            if !layout::archive_path(&self.root, file_bucket_id, id).is_file() {
                error!(file_bucket = file_bucket_id, archive_id = %id, "ready archive missing from disk");
                report.missing += 1;
                continue;
            }
            if self.write_orders.create_write_order(id, bucket, message_type)? {
                report.requeued += 1;
            }
        }

        let on_tape = ArchiveStorageLocation::OnTape {
            tape_code: String::new(),
            tape_position: 0,
        };
        for archive in self.archives.list_by_stage(file_bucket_id, &on_tape)? {
            let id = &archive.archive_id;
            mark_members_on_tape(self.objects.as_ref(), id)?;
            let removed = self.remove_file(layout::archive_path(&self.root, file_bucket_id, id));
            let discarded = self.write_orders.discard_write_order(id)?;
            if removed || discarded {
                info!(file_bucket = file_bucket_id, archive_id = %id, "archive completion replayed");
                report.completed += 1;
            }
        }

        report.swept = self.sweep(file_bucket_id)?;
        info!(
            file_bucket = file_bucket_id,
            discarded = report.discarded,
            requeued = report.requeued,
            missing = report.missing,
            completed = report.completed,
            swept = report.swept,
            "archives recovered"
        );
        Ok(report)
    }

    fn sweep(&self, file_bucket_id: &str) -> CasResult<usize> {
        let dir = layout::tar_dir(&self.root, file_bucket_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut swept = 0;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let keep = !layout::is_tmp_file(&name)
                && self
                    .archives
                    .find(&name)?
                    .is_some_and(|a| a.file_bucket_id == file_bucket_id && a.location.is_on_disk());
            if !keep && self.remove_file(entry.path()) {
                debug!(file_bucket = file_bucket_id, file = %name, "stray archive file removed");
                swept += 1;
            }
        }
        Ok(swept)
    }

    fn remove_file(&self, path: PathBuf) -> bool {
        match layout::remove_if_exists(&path) {
            Ok(removed) => removed,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot remove archive file");
                false
            }
        }
    }
}

/// Move every object packed in `archive_id` from `TarFile` to `OnTape`.
/// Objects rewritten or already moved are skipped.
pub(crate) fn mark_members_on_tape(objects: &dyn ObjectReferential, archive_id: &str) -> CasResult<usize> {
    let mut marked = 0;
    for entry in objects.find_by_tar_id(archive_id)? {
        let ObjectStorageLocation::TarFile { tar_id, offset } = &entry.location else {
            continue;
        };
        let location = ObjectStorageLocation::OnTape {
            tar_id: tar_id.clone(),
            offset: *offset,
        };
        match objects.update_location(&entry.id, &entry.storage_id, location) {
            Ok(_) => marked += 1,
            Err(e) if e.is_conflict() || e.is_not_found() => {
                debug!(id = %entry.id, reason = %e, "object not marked on tape");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(marked)
}
