//! Basic file storage: the per-container input area where uploads are staged
//! under a unique storage id until the tar creator packs them.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tcas_digest::DigestWriter;
use tcas_types::{new_storage_id, DigestType};
use tracing::{debug, warn};

use crate::error::{CasError, CasResult};
use crate::layout;
use crate::topology::BucketTopologyHelper;

/// Result of staging one object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedFile {
    pub storage_id: String,
    pub size: u64,
    pub digest_type: DigestType,
    pub digest: String,
}

/// Local staging area for incoming object bytes.
pub struct BasicFileStorage {
    root: PathBuf,
    topology: Arc<BucketTopologyHelper>,
    digest_type: DigestType,
}

impl BasicFileStorage {
    pub fn new(root: impl Into<PathBuf>, topology: Arc<BucketTopologyHelper>, digest_type: DigestType) -> Self {
        Self {
            root: root.into(),
            topology,
            digest_type,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stage `reader` as a new file of `container_name`.
    ///
    /// Exactly `declared_size` bytes must be read; anything else is an I/O
    /// error and nothing is left on disk. The file is fsynced before this
    /// returns.
    pub fn write_file(
        &self,
        container_name: &str,
        object_name: &str,
        reader: impl Read,
        declared_size: u64,
    ) -> CasResult<StagedFile> {
        if !layout::is_safe_component(object_name) {
            return Err(CasError::InvalidRequest(format!("invalid object name {object_name:?}")));
        }
        let dir = self.container_dir(container_name)?;
        fs::create_dir_all(&dir)?;

        let storage_id = new_storage_id(object_name);
        let path = dir.join(&storage_id);
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;

        match write_exact(file, reader, declared_size, self.digest_type) {
            Ok(digest) => {
                layout::sync_dir(&dir)?;
                debug!(container = container_name, storage_id = %storage_id, size = declared_size, "input file staged");
                Ok(StagedFile {
                    storage_id,
                    size: declared_size,
                    digest_type: self.digest_type,
                    digest,
                })
            }
            Err(e) => {
                if let Err(cleanup) = layout::remove_if_exists(&path) {
                    warn!(path = %path.display(), error = %cleanup, "failed to remove partial input file");
                }
                Err(e.into())
            }
        }
    }

    /// Storage ids currently staged for a container.
    pub fn list_storage_ids_by_container_name(&self, container_name: &str) -> CasResult<BTreeSet<String>> {
        let dir = self.container_dir(container_name)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = BTreeSet::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => {
                    ids.insert(name);
                }
                Err(name) => warn!(?name, "ignoring non UTF-8 input file name"),
            }
        }
        Ok(ids)
    }

    /// Idempotent. Returns whether a file was removed.
    pub fn delete_file(&self, container_name: &str, storage_id: &str) -> CasResult<bool> {
        let removed = layout::remove_if_exists(&self.input_file_path(container_name, storage_id)?)?;
        if removed {
            debug!(container = container_name, storage_id, "input file deleted");
        }
        Ok(removed)
    }

    pub fn read_file(&self, container_name: &str, storage_id: &str) -> CasResult<File> {
        let path = self.input_file_path(container_name, storage_id)?;
        File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => CasError::NotFound(format!("{container_name}/{storage_id}")),
            _ => CasError::Io(e),
        })
    }

    pub fn input_file_path(&self, container_name: &str, storage_id: &str) -> CasResult<PathBuf> {
        if !layout::is_safe_component(storage_id) {
            return Err(CasError::InvalidRequest(format!("invalid storage id {storage_id:?}")));
        }
        Ok(self.container_dir(container_name)?.join(storage_id))
    }

    fn container_dir(&self, container_name: &str) -> CasResult<PathBuf> {
        let file_bucket_id = self
            .topology
            .file_bucket_id_for_container(container_name)
            .ok_or_else(|| CasError::InvalidRequest(format!("unknown container {container_name}")))?;
        Ok(layout::container_input_dir(&self.root, file_bucket_id, container_name))
    }
}

/// Copy exactly `expected` bytes into `file`, fsync it, return the digest.
pub(crate) fn write_exact(
    file: File,
    reader: impl Read,
    expected: u64,
    digest_type: DigestType,
) -> io::Result<String> {
    let mut writer = DigestWriter::new(BufWriter::new(file), digest_type);
    // One extra byte detects oversized input without reading it all.
    let copied = io::copy(&mut reader.take(expected.saturating_add(1)), &mut writer)?;
    if copied < expected {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("declared {expected} bytes, received {copied}"),
        ));
    }
    if copied > expected {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("received more than the declared {expected} bytes"),
        ));
    }
    writer.flush()?;
    let (buffered, digest, _) = writer.finish();
    let file = buffered.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(digest)
}
