//! Single-owner guard over a referential directory.
//!
//! Journals are appended in place and compacted by rename, so two processes
//! sharing them silently lose writes. [`OfferLock`] holds an exclusive
//! `flock` on `<dir>/LOCK` for as long as it lives.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs4::FileExt;
use tracing::debug;

use crate::error::{CasError, CasResult};

pub const LOCK_FILE_NAME: &str = "LOCK";

/// Exclusive ownership of a referential directory. Released on drop.
#[derive(Debug)]
pub struct OfferLock {
    path: PathBuf,
    _file: File,
}

impl OfferLock {
    /// Take the lock, failing with [`CasError::Locked`] if it is held.
    pub fn acquire(dir: &Path) -> CasResult<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                return Err(CasError::Locked(dir.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        debug!(path = %path.display(), "referential lock taken");
        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
