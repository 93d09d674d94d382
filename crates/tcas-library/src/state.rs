use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TapeSlotType {
    Slot,
    ImportExport,
}

/// A physical tape medium as reported by the changer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapeCartridge {
    /// Barcode label. Absent for unlabeled media.
    pub volume_tag: Option<String>,
    pub alternate_volume_tag: Option<String>,
    /// Storage slot the cartridge was taken from, for cartridges in a drive.
    pub origin_slot_index: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapeSlot {
    pub index: u32,
    pub slot_type: TapeSlotType,
    pub cartridge: Option<TapeCartridge>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapeDrive {
    pub index: u32,
    pub cartridge: Option<TapeCartridge>,
}

/// A segment that could not be interpreted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedSegment {
    /// Position of the segment in the raw output.
    pub position: usize,
    pub segment: String,
    pub reason: String,
}

/// Snapshot of a tape library, rebuilt on every status query.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapeLibraryState {
    pub device: Option<String>,
    pub drive_count: Option<u32>,
    pub slots_count: Option<u32>,
    pub mailbox_count: Option<u32>,
    pub slots: Vec<TapeSlot>,
    pub drives: Vec<TapeDrive>,
    pub skipped: Vec<SkippedSegment>,
}

impl TapeLibraryState {
    /// Storage slots (not mailboxes) with no cartridge.
    pub fn empty_slots(&self) -> impl Iterator<Item = &TapeSlot> {
        self.slots
            .iter()
            .filter(|s| s.slot_type == TapeSlotType::Slot && s.cartridge.is_none())
    }

    /// Where a labeled cartridge currently sits: `(is_drive, index)`.
    pub fn locate(&self, volume_tag: &str) -> Option<(bool, u32)> {
        let tagged = |c: &Option<TapeCartridge>| {
            c.as_ref()
                .and_then(|c| c.volume_tag.as_deref())
                .is_some_and(|t| t == volume_tag)
        };
        if let Some(drive) = self.drives.iter().find(|d| tagged(&d.cartridge)) {
            return Some((true, drive.index));
        }
        self.slots
            .iter()
            .find(|s| tagged(&s.cartridge))
            .map(|s| (false, s.index))
    }

    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && self.drive_count.is_some()
    }
}
