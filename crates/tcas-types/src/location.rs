use std::fmt;

use serde::{Deserialize, Serialize};

/// Physical location of an object's bytes.
///
/// Locations only move forward: `InputFile → TarFile → OnTape`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectStorageLocation {
    /// Staged file in basic file storage, not yet packed.
    InputFile,
    /// Packed into a tar archive; `offset` is the byte offset of the entry header.
    TarFile { tar_id: String, offset: Option<u64> },
    /// The containing archive has been written to tape.
    OnTape { tar_id: String, offset: Option<u64> },
}

impl ObjectStorageLocation {
    /// Lifecycle rank used to reject backward transitions.
    pub fn stage(&self) -> u8 {
        match self {
            Self::InputFile => 0,
            Self::TarFile { .. } => 1,
            Self::OnTape { .. } => 2,
        }
    }

    /// Returns `true` once the object is no longer a staged input file.
    pub fn is_beyond_input_file(&self) -> bool {
        self.stage() > 0
    }

    /// The archive holding this object, if it has been packed.
    pub fn tar_id(&self) -> Option<&str> {
        match self {
            Self::InputFile => None,
            Self::TarFile { tar_id, .. } | Self::OnTape { tar_id, .. } => Some(tar_id),
        }
    }

    /// Tar entry offset, if known.
    pub fn offset(&self) -> Option<u64> {
        match self {
            Self::InputFile => None,
            Self::TarFile { offset, .. } | Self::OnTape { offset, .. } => *offset,
        }
    }
}

impl fmt::Display for ObjectStorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InputFile => write!(f, "input-file"),
            Self::TarFile { tar_id, .. } => write!(f, "tar-file:{tar_id}"),
            Self::OnTape { tar_id, .. } => write!(f, "on-tape:{tar_id}"),
        }
    }
}

/// Lifecycle of an archive file (tar or backup).
///
/// Locations only move forward: `BuildingOnDisk → ReadyOnDisk → OnTape`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveStorageLocation {
    /// Still being appended to by its single owning writer.
    BuildingOnDisk,
    /// Complete on disk, eligible for a write order.
    ReadyOnDisk,
    /// Written to the cartridge `tape_code` at file position `tape_position`.
    OnTape { tape_code: String, tape_position: u32 },
}

impl ArchiveStorageLocation {
    /// Lifecycle rank used to reject backward transitions.
    pub fn stage(&self) -> u8 {
        match self {
            Self::BuildingOnDisk => 0,
            Self::ReadyOnDisk => 1,
            Self::OnTape { .. } => 2,
        }
    }

    pub fn is_on_disk(&self) -> bool {
        !matches!(self, Self::OnTape { .. })
    }
}

impl fmt::Display for ArchiveStorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuildingOnDisk => write!(f, "building-on-disk"),
            Self::ReadyOnDisk => write!(f, "ready-on-disk"),
            Self::OnTape { tape_code, tape_position } => {
                write!(f, "on-tape:{tape_code}@{tape_position}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_stages_are_ordered() {
        let tar = ObjectStorageLocation::TarFile { tar_id: "t".into(), offset: Some(0) };
        let tape = ObjectStorageLocation::OnTape { tar_id: "t".into(), offset: Some(0) };
        assert!(ObjectStorageLocation::InputFile.stage() < tar.stage());
        assert!(tar.stage() < tape.stage());
        assert!(!ObjectStorageLocation::InputFile.is_beyond_input_file());
        assert!(tar.is_beyond_input_file());
    }

    #[test]
    fn tar_id_and_offset_accessors() {
        let tar = ObjectStorageLocation::TarFile { tar_id: "abc.tar".into(), offset: Some(1024) };
        assert_eq!(tar.tar_id(), Some("abc.tar"));
        assert_eq!(tar.offset(), Some(1024));
        assert_eq!(ObjectStorageLocation::InputFile.tar_id(), None);
    }

    #[test]
    fn archive_on_disk() {
        assert!(ArchiveStorageLocation::BuildingOnDisk.is_on_disk());
        assert!(ArchiveStorageLocation::ReadyOnDisk.is_on_disk());
        let on_tape = ArchiveStorageLocation::OnTape { tape_code: "VOL001".into(), tape_position: 3 };
        assert!(!on_tape.is_on_disk());
        assert_eq!(on_tape.to_string(), "on-tape:VOL001@3");
    }
}
