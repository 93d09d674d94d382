use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tcas_docstore::{Document, DocumentCollection, JournalConfig};
use tcas_types::{ArchiveReferentialEntity, ArchiveStorageLocation};
use tracing::{debug, info};

use crate::error::{ReferentialError, ReferentialResult};

/// Catalog of archive files and their lifecycle.
pub trait ArchiveReferential: Send + Sync {
    /// Register a new archive. Fails with `Conflict` if the id is taken, which
    /// makes the inserting writer the archive's only owner.
    fn insert(&self, entity: &ArchiveReferentialEntity) -> ReferentialResult<()>;

    fn find(&self, archive_id: &str) -> ReferentialResult<Option<ArchiveReferentialEntity>>;

    /// `BuildingOnDisk → ReadyOnDisk`, recording the final size and digest.
    fn mark_ready_on_disk(
        &self,
        archive_id: &str,
        size: u64,
        digest: &str,
    ) -> ReferentialResult<ArchiveReferentialEntity>;

    /// `ReadyOnDisk → OnTape`, accepted only if `verified_digest` (read back
    /// from tape) equals the recorded digest. Re-reporting the same tape
    /// position is a no-op.
    fn mark_on_tape(
        &self,
        archive_id: &str,
        tape_code: &str,
        tape_position: u32,
        verified_digest: &str,
    ) -> ReferentialResult<ArchiveReferentialEntity>;

    /// Drop an abandoned `BuildingOnDisk` archive.
    fn remove_building(&self, archive_id: &str) -> ReferentialResult<bool>;

    /// Archives of a file bucket currently at `location`'s stage.
    fn list_by_stage(
        &self,
        file_bucket_id: &str,
        location: &ArchiveStorageLocation,
    ) -> ReferentialResult<Vec<ArchiveReferentialEntity>>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(transparent)]
struct ArchiveDocument(ArchiveReferentialEntity);

impl Document for ArchiveDocument {
    fn key(&self) -> String {
        self.0.archive_id.clone()
    }
}

/// [`ArchiveReferential`] backed by a journaled document collection.
pub struct ArchiveReferentialRepository {
    collection: DocumentCollection<ArchiveDocument>,
}

impl ArchiveReferentialRepository {
    pub const COLLECTION_NAME: &'static str = "tape_archive_referential";

    pub fn open(dir: &Path, config: JournalConfig) -> ReferentialResult<Self> {
        Ok(Self {
            collection: DocumentCollection::open(Self::COLLECTION_NAME, dir, config)?,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            collection: DocumentCollection::in_memory(Self::COLLECTION_NAME),
        }
    }

    pub fn compact(&self) -> ReferentialResult<()> {
        Ok(self.collection.compact()?)
    }

    fn transition<F>(&self, archive_id: &str, f: F) -> ReferentialResult<ArchiveReferentialEntity>
    where
        F: FnOnce(&ArchiveReferentialEntity) -> ReferentialResult<Option<ArchiveReferentialEntity>>,
    {
        let updated = self
            .collection
            .update_with::<ReferentialError, _>(archive_id, |current| {
                Ok(match f(&current.0)? {
                    Some(next) => ArchiveDocument(next),
                    None => current.clone(),
                })
            })?
            .ok_or_else(|| ReferentialError::NotFound(archive_id.to_string()))?;
        Ok(updated.0)
    }
}

impl ArchiveReferential for ArchiveReferentialRepository {
    fn insert(&self, entity: &ArchiveReferentialEntity) -> ReferentialResult<()> {
        if !self.collection.insert(ArchiveDocument(entity.clone()))? {
            return Err(ReferentialError::conflict(
                &entity.archive_id,
                "archive already registered",
            ));
        }
        debug!(archive_id = %entity.archive_id, location = %entity.location, "archive registered");
        Ok(())
    }

    fn find(&self, archive_id: &str) -> ReferentialResult<Option<ArchiveReferentialEntity>> {
        Ok(self.collection.get(archive_id)?.map(|d| d.0))
    }

    fn mark_ready_on_disk(
        &self,
        archive_id: &str,
        size: u64,
        digest: &str,
    ) -> ReferentialResult<ArchiveReferentialEntity> {
        let entity = self.transition(archive_id, |current| {
            if current.location != ArchiveStorageLocation::BuildingOnDisk {
                return Err(ReferentialError::conflict(
                    archive_id,
                    format!("archive is {}, not building-on-disk", current.location),
                ));
            }
            let mut next = current.clone();
            next.location = ArchiveStorageLocation::ReadyOnDisk;
            next.size = Some(size);
            next.digest = Some(digest.to_string());
            next.last_update = Utc::now();
            Ok(Some(next))
        })?;
        info!(archive_id, size, "archive ready on disk");
        Ok(entity)
    }

    fn mark_on_tape(
        &self,
        archive_id: &str,
        tape_code: &str,
        tape_position: u32,
        verified_digest: &str,
    ) -> ReferentialResult<ArchiveReferentialEntity> {
        let target = ArchiveStorageLocation::OnTape {
            tape_code: tape_code.to_string(),
            tape_position,
        };
        let entity = self.transition(archive_id, |current| {
            if current.location == target {
                return Ok(None);
            }
            if current.location != ArchiveStorageLocation::ReadyOnDisk {
                return Err(ReferentialError::conflict(
                    archive_id,
                    format!("archive is {}, not ready-on-disk", current.location),
                ));
            }
            let expected = current.digest.clone().unwrap_or_default();
            if !expected.eq_ignore_ascii_case(verified_digest) {
                return Err(ReferentialError::DigestMismatch {
                    id: archive_id.to_string(),
                    expected,
                    reported: verified_digest.to_string(),
                });
            }
            let mut next = current.clone();
            next.location = target.clone();
            next.last_update = Utc::now();
            Ok(Some(next))
        })?;
        info!(archive_id, tape_code, tape_position, "archive on tape");
        Ok(entity)
    }

    fn remove_building(&self, archive_id: &str) -> ReferentialResult<bool> {
        let removed = self.collection.remove_if(archive_id, |d| {
            d.0.location == ArchiveStorageLocation::BuildingOnDisk
        })?;
        match removed {
            None => Ok(false),
            Some(true) => {
                debug!(archive_id, "abandoned archive removed");
                Ok(true)
            }
            Some(false) => Err(ReferentialError::conflict(
                archive_id,
                "refusing to remove an archive past building-on-disk",
            )),
        }
    }

    fn list_by_stage(
        &self,
        file_bucket_id: &str,
        location: &ArchiveStorageLocation,
    ) -> ReferentialResult<Vec<ArchiveReferentialEntity>> {
        let stage = location.stage();
        let docs = self
            .collection
            .find(|d| d.0.file_bucket_id == file_bucket_id && d.0.location.stage() == stage)?;
        Ok(docs.into_iter().map(|d| d.0).collect())
    }
}
