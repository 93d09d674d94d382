//! Storage and archive identifier generation.
//!
//! A storage id is `<objectName>-<uuid>` where the uuid is rendered without
//! dashes, so the object name can always be recovered by splitting on the
//! last `-`.

use chrono::Utc;
use uuid::Uuid;

use crate::error::TypeError;

/// Generate a fresh, unique staging identifier for `object_name`.
pub fn new_storage_id(object_name: &str) -> String {
    format!("{object_name}-{}", Uuid::now_v7().simple())
}

/// Recover the object name a storage id was generated for.
pub fn object_name_from_storage_id(storage_id: &str) -> Result<&str, TypeError> {
    match storage_id.rsplit_once('-') {
        Some((name, suffix))
            if !name.is_empty()
                && suffix.len() == 32
                && suffix.bytes().all(|b| b.is_ascii_hexdigit()) =>
        {
            Ok(name)
        }
        _ => Err(TypeError::InvalidStorageId(storage_id.to_string())),
    }
}

/// Generate a tar archive identifier. Ids sort by creation time.
pub fn new_tar_id() -> String {
    format!(
        "{}-{}.tar",
        Utc::now().format("%Y%m%d%H%M%S%3f"),
        Uuid::now_v7().simple()
    )
}
