use std::collections::BTreeSet;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tcas_docstore::{Document, DocumentCollection, JournalConfig};
use tcas_types::{ObjectReferentialEntry, ObjectReferentialId, ObjectStorageLocation};
use tracing::debug;

use crate::error::{ReferentialError, ReferentialResult};

/// Catalog of (container, object name) → physical state.
pub trait ObjectReferential: Send + Sync {
    /// Record a completed object write, replacing any previous version.
    /// Returns the replaced entry.
    fn insert_or_update(
        &self,
        entry: &ObjectReferentialEntry,
    ) -> ReferentialResult<Option<ObjectReferentialEntry>>;

    fn find(&self, id: &ObjectReferentialId) -> ReferentialResult<Option<ObjectReferentialEntry>>;

    /// At most one entry per requested name.
    fn bulk_find(
        &self,
        container_name: &str,
        object_names: &BTreeSet<String>,
    ) -> ReferentialResult<Vec<ObjectReferentialEntry>>;

    /// Move an entry forward in its lifecycle.
    ///
    /// Fails with `Conflict` if the stored storage id is not
    /// `expected_storage_id` (the object was rewritten meanwhile) or if the
    /// stored location is already at or past `new_location`. Re-applying the
    /// exact stored location is accepted as a no-op.
    fn update_location(
        &self,
        id: &ObjectReferentialId,
        expected_storage_id: &str,
        new_location: ObjectStorageLocation,
    ) -> ReferentialResult<ObjectReferentialEntry>;

    /// Entries still packed in the given archive, i.e. at `TarFile`.
    /// Entries already on tape are not returned.
    fn find_by_tar_id(&self, tar_id: &str) -> ReferentialResult<Vec<ObjectReferentialEntry>>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(transparent)]
struct ObjectDocument(ObjectReferentialEntry);

impl Document for ObjectDocument {
    fn key(&self) -> String {
        self.0.id.document_key()
    }
}

/// [`ObjectReferential`] backed by a journaled document collection.
pub struct ObjectReferentialRepository {
    collection: DocumentCollection<ObjectDocument>,
}

impl ObjectReferentialRepository {
    pub const COLLECTION_NAME: &'static str = "tape_object_referential";

    pub fn open(dir: &Path, config: JournalConfig) -> ReferentialResult<Self> {
        Ok(Self {
            collection: DocumentCollection::open(Self::COLLECTION_NAME, dir, config)?
                .indexed_by(packed_in),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            collection: DocumentCollection::in_memory(Self::COLLECTION_NAME).indexed_by(packed_in),
        }
    }

    pub fn len(&self) -> ReferentialResult<usize> {
        Ok(self.collection.len()?)
    }

    pub fn is_empty(&self) -> ReferentialResult<bool> {
        Ok(self.collection.is_empty()?)
    }

    pub fn compact(&self) -> ReferentialResult<()> {
        Ok(self.collection.compact()?)
    }
}

impl ObjectReferential for ObjectReferentialRepository {
    fn insert_or_update(
        &self,
        entry: &ObjectReferentialEntry,
    ) -> ReferentialResult<Option<ObjectReferentialEntry>> {
        let previous = self.collection.upsert(ObjectDocument(entry.clone()))?;
        debug!(id = %entry.id, storage_id = %entry.storage_id, "object referential upsert");
        Ok(previous.map(|d| d.0))
    }

    fn find(&self, id: &ObjectReferentialId) -> ReferentialResult<Option<ObjectReferentialEntry>> {
        Ok(self.collection.get(&id.document_key())?.map(|d| d.0))
    }

    fn bulk_find(
        &self,
        container_name: &str,
        object_names: &BTreeSet<String>,
    ) -> ReferentialResult<Vec<ObjectReferentialEntry>> {
        let keys: Vec<String> = object_names
            .iter()
            .map(|name| ObjectReferentialId::new(container_name, name.as_str()).document_key())
            .collect();
        let docs = self.collection.get_many(keys.iter().map(String::as_str))?;
        Ok(docs.into_iter().map(|d| d.0).collect())
    }

    fn update_location(
        &self,
        id: &ObjectReferentialId,
        expected_storage_id: &str,
        new_location: ObjectStorageLocation,
    ) -> ReferentialResult<ObjectReferentialEntry> {
        let key = id.document_key();
        let updated = self
            .collection
            .update_with::<ReferentialError, _>(&key, |current| {
                let stored = &current.0;
                if stored.storage_id != expected_storage_id {
                    return Err(ReferentialError::conflict(
                        &key,
                        format!(
                            "storage id is {}, expected {expected_storage_id}",
                            stored.storage_id
                        ),
                    ));
                }
                if stored.location == new_location {
                    return Ok(current.clone());
                }
                if stored.location.stage() >= new_location.stage() {
                    return Err(ReferentialError::conflict(
                        &key,
                        format!("location already {}, refusing {new_location}", stored.location),
                    ));
                }
                let mut next = stored.clone();
                next.location = new_location.clone();
                next.last_update = Utc::now();
                Ok(ObjectDocument(next))
            })?
            .ok_or_else(|| ReferentialError::NotFound(key.clone()))?;
        debug!(id = %id, location = %updated.0.location, "object location updated");
        Ok(updated.0)
    }

    fn find_by_tar_id(&self, tar_id: &str) -> ReferentialResult<Vec<ObjectReferentialEntry>> {
        Ok(self
            .collection
            .find_indexed(tar_id)?
            .into_iter()
            .map(|d| d.0)
            .collect())
    }
}

/// Archive index: only objects still waiting in an archive on disk.
fn packed_in(doc: &ObjectDocument) -> Option<String> {
    match &doc.0.location {
        ObjectStorageLocation::TarFile { tar_id, .. } => Some(tar_id.clone()),
        _ => None,
    }
}
