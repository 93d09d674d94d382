//! On-disk staging layout.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

const INPUT_DIR: &str = "input";
const TAR_DIR: &str = "tar";
const TMP_SUFFIX: &str = ".tmp";

pub fn container_input_dir(root: &Path, file_bucket_id: &str, container_name: &str) -> PathBuf {
    root.join(file_bucket_id).join(INPUT_DIR).join(container_name)
}

pub fn input_file_path(
    root: &Path,
    file_bucket_id: &str,
    container_name: &str,
    storage_id: &str,
) -> PathBuf {
    container_input_dir(root, file_bucket_id, container_name).join(storage_id)
}

pub fn tar_dir(root: &Path, file_bucket_id: &str) -> PathBuf {
    root.join(file_bucket_id).join(TAR_DIR)
}

pub fn archive_path(root: &Path, file_bucket_id: &str, archive_id: &str) -> PathBuf {
    tar_dir(root, file_bucket_id).join(archive_id)
}

/// Where an archive is written before it is complete.
pub fn archive_tmp_path(root: &Path, file_bucket_id: &str, archive_id: &str) -> PathBuf {
    tar_dir(root, file_bucket_id).join(format!("{archive_id}{TMP_SUFFIX}"))
}

pub fn is_tmp_file(name: &str) -> bool {
    name.ends_with(TMP_SUFFIX)
}

/// Archive path relative to the staging root, as carried by write orders.
pub fn relative_archive_path(file_bucket_id: &str, archive_id: &str) -> String {
    format!("{file_bucket_id}/{TAR_DIR}/{archive_id}")
}

/// Persist a rename or creation inside `dir`.
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

/// Remove a file, treating "already gone" as success. Returns whether a file
/// was removed.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// A plain name usable as a single path component.
pub fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
