use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{DocStoreError, DocStoreResult};
use crate::journal::{Journal, JournalConfig};

/// A document stored in a [`DocumentCollection`].
pub trait Document: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique key of the document within its collection.
    fn key(&self) -> String;
}

#[derive(Serialize, Deserialize)]
enum JournalRecord<D> {
    Upsert(D),
    Remove(String),
}

/// Extracts the secondary-index value of a document, if it has one.
pub type IndexFn<D> = fn(&D) -> Option<String>;

/// Ordered, optionally journaled key → document map.
///
/// An optional secondary index maps a derived value to the keys of the
/// documents carrying it. It is only touched while the document write lock
/// is held, so it always matches the documents.
pub struct DocumentCollection<D> {
    name: String,
    docs: RwLock<BTreeMap<String, D>>,
    journal: Option<Journal>,
    indexer: Option<IndexFn<D>>,
    index: Mutex<BTreeMap<String, BTreeSet<String>>>,
}

impl<D: Document> DocumentCollection<D> {
    /// A volatile collection (tests, embedding).
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            docs: RwLock::new(BTreeMap::new()),
            journal: None,
            indexer: None,
            index: Mutex::new(BTreeMap::new()),
        }
    }

    /// Open (or create) a durable collection stored as `<dir>/<name>.journal`.
    pub fn open(name: impl Into<String>, dir: &Path, config: JournalConfig) -> DocStoreResult<Self> {
        let name = name.into();
        let journal = Journal::open(&journal_path(dir, &name), config)?;
        let recovered = journal.recover::<JournalRecord<D>>()?;
        journal.discard_tail(recovered.valid_len)?;

        let docs = fold(recovered.records);
        info!(collection = %name, documents = docs.len(), "collection opened");

        Ok(Self {
            name,
            docs: RwLock::new(docs),
            journal: Some(journal),
            indexer: None,
            index: Mutex::new(BTreeMap::new()),
        })
    }

    /// Maintain a secondary index over `indexer`, built from the current
    /// documents. Query it with [`find_indexed`](Self::find_indexed).
    pub fn indexed_by(mut self, indexer: IndexFn<D>) -> Self {
        let mut index: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let docs = self.docs.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (key, doc) in docs.iter() {
            if let Some(value) = indexer(doc) {
                index.entry(value).or_default().insert(key.clone());
            }
        }
        self.indexer = Some(indexer);
        self.index = Mutex::new(index);
        self
    }

    /// Replay the documents of `<dir>/<name>.journal` without taking
    /// ownership of the journal. Nothing is written.
    pub fn snapshot(name: &str, dir: &Path) -> DocStoreResult<Vec<D>> {
        let recovered = Journal::replay::<JournalRecord<D>>(&journal_path(dir, name))?;
        Ok(fold(recovered.records).into_values().collect())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> DocStoreResult<Option<D>> {
        Ok(self.read()?.get(key).cloned())
    }

    /// Fetch every existing document among `keys`, at most one per key.
    pub fn get_many<'a, I>(&self, keys: I) -> DocStoreResult<Vec<D>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let docs = self.read()?;
        let mut found: BTreeMap<&str, &D> = BTreeMap::new();
        for key in keys {
            if let Some(doc) = docs.get(key) {
                found.insert(key, doc);
            }
        }
        Ok(found.into_values().cloned().collect())
    }

    /// Insert a document unless its key already exists. Returns `false` on
    /// duplicate, leaving the stored document untouched.
    pub fn insert(&self, doc: D) -> DocStoreResult<bool> {
        let key = doc.key();
        let mut docs = self.write()?;
        if docs.contains_key(&key) {
            return Ok(false);
        }
        self.log(&JournalRecord::Upsert(doc.clone()))?;
        self.reindex(&key, None, Some(&doc))?;
        docs.insert(key, doc);
        Ok(true)
    }

    /// Insert or replace a document. Returns the replaced document.
    pub fn upsert(&self, doc: D) -> DocStoreResult<Option<D>> {
        let key = doc.key();
        let mut docs = self.write()?;
        self.log(&JournalRecord::Upsert(doc.clone()))?;
        self.reindex(&key, docs.get(&key), Some(&doc))?;
        Ok(docs.insert(key, doc))
    }

    /// Atomic conditional update of one document.
    ///
    /// `f` sees the current document and returns its replacement, or an error
    /// that aborts the update. Returns `Ok(None)` if the key does not exist.
    pub fn update_with<E, F>(&self, key: &str, f: F) -> Result<Option<D>, E>
    where
        E: From<DocStoreError>,
        F: FnOnce(&D) -> Result<D, E>,
    {
        let mut docs = self.write()?;
        let Some(current) = docs.get(key) else {
            return Ok(None);
        };
        let updated = f(current)?;
        debug_assert_eq!(updated.key(), key);
        self.log(&JournalRecord::Upsert(updated.clone()))?;
        self.reindex(key, Some(current), Some(&updated))?;
        docs.insert(key.to_string(), updated.clone());
        Ok(Some(updated))
    }

    /// Remove a document. Returns it if it existed.
    pub fn remove(&self, key: &str) -> DocStoreResult<Option<D>> {
        let mut docs = self.write()?;
        let Some(current) = docs.get(key) else {
            return Ok(None);
        };
        self.log(&JournalRecord::<D>::Remove(key.to_string()))?;
        self.reindex(key, Some(current), None)?;
        Ok(docs.remove(key))
    }

    /// Remove a document only if `predicate` accepts its current state.
    /// Returns `Ok(None)` if the key is missing, `Ok(Some(false))` if the
    /// predicate refused.
    pub fn remove_if<P>(&self, key: &str, predicate: P) -> DocStoreResult<Option<bool>>
    where
        P: FnOnce(&D) -> bool,
    {
        let mut docs = self.write()?;
        let Some(doc) = docs.get(key) else {
            return Ok(None);
        };
        if !predicate(doc) {
            return Ok(Some(false));
        }
        self.log(&JournalRecord::<D>::Remove(key.to_string()))?;
        self.reindex(key, Some(doc), None)?;
        docs.remove(key);
        Ok(Some(true))
    }

    /// All documents matching `predicate`, in key order.
    pub fn find<P>(&self, predicate: P) -> DocStoreResult<Vec<D>>
    where
        P: Fn(&D) -> bool,
    {
        Ok(self.read()?.values().filter(|d| predicate(d)).cloned().collect())
    }

    /// Documents whose index value is `value`, in key order. Empty if the
    /// collection has no index.
    pub fn find_indexed(&self, value: &str) -> DocStoreResult<Vec<D>> {
        let docs = self.read()?;
        let index = self.lock_index()?;
        let Some(keys) = index.get(value) else {
            return Ok(Vec::new());
        };
        Ok(keys.iter().filter_map(|k| docs.get(k)).cloned().collect())
    }

    pub fn len(&self) -> DocStoreResult<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> DocStoreResult<bool> {
        Ok(self.read()?.is_empty())
    }

    /// Rewrite the journal from live documents, dropping superseded records.
    pub fn compact(&self) -> DocStoreResult<()> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        let docs = self.write()?;
        let records: Vec<JournalRecord<D>> =
            docs.values().cloned().map(JournalRecord::Upsert).collect();
        journal.rewrite(&records)?;
        debug!(collection = %self.name, documents = records.len(), "collection compacted");
        Ok(())
    }

    fn log(&self, record: &JournalRecord<D>) -> DocStoreResult<()> {
        if let Some(journal) = &self.journal {
            journal.append(record)?;
        }
        Ok(())
    }

    /// Caller holds the document write lock.
    fn reindex(&self, key: &str, old: Option<&D>, new: Option<&D>) -> DocStoreResult<()> {
        let Some(indexer) = self.indexer else {
            return Ok(());
        };
        let old_value = old.and_then(indexer);
        let new_value = new.and_then(indexer);
        if old_value == new_value {
            return Ok(());
        }
        let mut index = self.lock_index()?;
        if let Some(value) = old_value {
            if let Some(keys) = index.get_mut(&value) {
                keys.remove(key);
                if keys.is_empty() {
                    index.remove(&value);
                }
            }
        }
        if let Some(value) = new_value {
            index.entry(value).or_default().insert(key.to_string());
        }
        Ok(())
    }

    fn lock_index(&self) -> DocStoreResult<MutexGuard<'_, BTreeMap<String, BTreeSet<String>>>> {
        self.index
            .lock()
            .map_err(|_| DocStoreError::LockPoisoned(self.name.clone()))
    }

    fn read(&self) -> DocStoreResult<RwLockReadGuard<'_, BTreeMap<String, D>>> {
        self.docs
            .read()
            .map_err(|_| DocStoreError::LockPoisoned(self.name.clone()))
    }

    fn write(&self) -> DocStoreResult<RwLockWriteGuard<'_, BTreeMap<String, D>>> {
        self.docs
            .write()
            .map_err(|_| DocStoreError::LockPoisoned(self.name.clone()))
    }
}

fn journal_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.journal"))
}

fn fold<D: Document>(records: Vec<JournalRecord<D>>) -> BTreeMap<String, D> {
    let mut docs = BTreeMap::new();
    for record in records {
        match record {
            JournalRecord::Upsert(doc) => {
                docs.insert(doc.key(), doc);
            }
            JournalRecord::Remove(key) => {
                docs.remove(&key);
            }
        }
    }
    docs
}
