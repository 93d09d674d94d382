use crate::error::ParseError;
use crate::state::{TapeCartridge, TapeDrive, TapeSlot, TapeSlotType};

const STORAGE_CHANGER: &str = "Storage Changer";
const STORAGE_ELEMENT: &str = "Storage Element";
const DATA_TRANSFER_ELEMENT: &str = "Data Transfer Element";

const SEPARATOR: &str = ":";
const DRIVES: &str = "Drives,";
const SLOTS: &str = "Slots ( ";
const IMPORT_EXPORT: &str = "Import/Export";
const IMPORT_EXPORT_TAG: &str = " IMPORT/EXPORT";
const EMPTY: &str = ":Empty";
const LOADED: &str = "Loaded";
const UNKNOWN_ORIGIN: &str = "Full (Unknown Storage Element Loaded)";

// Slots and drives spell the tag markers differently.
const SLOT_VOLUME_TAG: &str = ":VolumeTag=";
const SLOT_ALTERNATE_VOLUME_TAG: &str = ":AlternateVolumeTag=";
const DRIVE_VOLUME_TAG: &str = ":VolumeTag = ";
const DRIVE_ALTERNATE_VOLUME_TAG: &str = ":AlternateVolumeTag = ";

/// `Storage Changer <device>:<n> Drives, <n> Slots ( <n> Import/Export )`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderRecord {
    pub device: String,
    pub drive_count: u32,
    pub slots_count: u32,
    pub mailbox_count: u32,
}

/// One classified status segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusRecord {
    Header(HeaderRecord),
    Slot(TapeSlot),
    Drive(TapeDrive),
    /// Anything without a known leading marker (blank lines, banners).
    Unknown(String),
}

/// Split raw output into segments and classify each one independently.
///
/// Yields `(position, segment, result)`; blank segments are dropped.
pub fn tokenize(
    output: &str,
) -> impl Iterator<Item = (usize, &str, Result<StatusRecord, ParseError>)> + '_ {
    output
        .split(['|', '\n'])
        .enumerate()
        .filter(|(_, s)| !s.trim().is_empty())
        .map(|(position, segment)| (position, segment, classify(segment)))
}

/// Classify a single segment by its leading marker.
pub fn classify(segment: &str) -> Result<StatusRecord, ParseError> {
    let trimmed = segment.trim();
    if trimmed.starts_with(STORAGE_ELEMENT) {
        parse_slot(trimmed).map(StatusRecord::Slot)
    } else if trimmed.starts_with(DATA_TRANSFER_ELEMENT) {
        parse_drive(trimmed).map(StatusRecord::Drive)
    } else if trimmed.starts_with(STORAGE_CHANGER) {
        parse_header(trimmed).map(StatusRecord::Header)
    } else {
        Ok(StatusRecord::Unknown(trimmed.to_string()))
    }
}

fn parse_header(s: &str) -> Result<HeaderRecord, ParseError> {
    const RECORD: &str = "header";
    let device = between(s, STORAGE_CHANGER, SEPARATOR).ok_or(ParseError::MissingField {
        record: RECORD,
        field: "device",
    })?;
    Ok(HeaderRecord {
        device: device.trim().to_string(),
        drive_count: number(RECORD, "drive count", between(s, SEPARATOR, DRIVES))?,
        slots_count: number(RECORD, "slot count", between(s, DRIVES, SLOTS))?,
        mailbox_count: number(RECORD, "mailbox count", between(s, SLOTS, IMPORT_EXPORT))?,
    })
}

fn parse_slot(s: &str) -> Result<TapeSlot, ParseError> {
    const RECORD: &str = "slot";
    let (index, slot_type) = if s.contains(IMPORT_EXPORT_TAG) {
        (between(s, STORAGE_ELEMENT, IMPORT_EXPORT_TAG), TapeSlotType::ImportExport)
    } else {
        (between(s, STORAGE_ELEMENT, SEPARATOR), TapeSlotType::Slot)
    };
    let index = number(RECORD, "index", index)?;

    let cartridge = (!s.contains(EMPTY)).then(|| TapeCartridge {
        origin_slot_index: None,
        ..volume_tags(s, SLOT_VOLUME_TAG, SLOT_ALTERNATE_VOLUME_TAG)
    });
    Ok(TapeSlot {
        index,
        slot_type,
        cartridge,
    })
}

fn parse_drive(s: &str) -> Result<TapeDrive, ParseError> {
    const RECORD: &str = "drive";
    let index = number(RECORD, "index", between(s, DATA_TRANSFER_ELEMENT, SEPARATOR))?;
    if s.contains(EMPTY) {
        return Ok(TapeDrive {
            index,
            cartridge: None,
        });
    }

    let origin_slot_index = if s.contains(UNKNOWN_ORIGIN) {
        None
    } else {
        Some(number(RECORD, "origin slot", between(s, STORAGE_ELEMENT, LOADED))?)
    };
    Ok(TapeDrive {
        index,
        cartridge: Some(TapeCartridge {
            origin_slot_index,
            ..volume_tags(s, DRIVE_VOLUME_TAG, DRIVE_ALTERNATE_VOLUME_TAG)
        }),
    })
}

/// Extract the tag pair; either marker may appear alone.
fn volume_tags(s: &str, tag: &str, alternate: &str) -> TapeCartridge {
    let non_empty = |v: &str| {
        let v = v.trim();
        (!v.is_empty()).then(|| v.to_string())
    };
    let volume_tag = match (s.find(tag), s.find(alternate)) {
        (Some(_), Some(_)) => between(s, tag, alternate).and_then(non_empty),
        (Some(_), None) => after_last(s, tag).and_then(non_empty),
        (None, _) => None,
    };
    TapeCartridge {
        volume_tag,
        alternate_volume_tag: after_last(s, alternate).and_then(non_empty),
        origin_slot_index: None,
    }
}

fn number(
    record: &'static str,
    field: &'static str,
    raw: Option<&str>,
) -> Result<u32, ParseError> {
    let raw = raw.ok_or(ParseError::MissingField { record, field })?.trim();
    raw.parse().map_err(|_| ParseError::InvalidNumber {
        record,
        field,
        value: raw.to_string(),
    })
}

/// Text between the first `open` and the next `close` after it.
fn between<'a>(s: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = s.find(open)? + open.len();
    let len = s[start..].find(close)?;
    Some(&s[start..start + len])
}

fn after_last<'a>(s: &'a str, marker: &str) -> Option<&'a str> {
    s.rfind(marker).map(|i| &s[i + marker.len()..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_counts() {
        let record =
            classify("  Storage Changer S/N 0000078AC0240401:3 Drives, 15 Slots ( 2 Import/Export )")
                .unwrap();
        assert_eq!(
            record,
            StatusRecord::Header(HeaderRecord {
                device: "S/N 0000078AC0240401".into(),
                drive_count: 3,
                slots_count: 15,
                mailbox_count: 2,
            })
        );
    }

    #[test]
    fn header_with_bad_count_is_an_error() {
        let err = classify("Storage Changer /dev/sg0:x Drives, 15 Slots ( 2 Import/Export )")
            .unwrap_err();
        assert!(matches!(err, ParseError::InvalidNumber { field: "drive count", .. }));
    }

    #[test]
    fn slot_with_volume_tag_only() {
        let StatusRecord::Slot(slot) = classify("Storage Element 1:Full :VolumeTag=ABC123").unwrap()
        else {
            panic!("expected slot");
        };
        assert_eq!(slot.index, 1);
        assert_eq!(slot.slot_type, TapeSlotType::Slot);
        let cartridge = slot.cartridge.unwrap();
        assert_eq!(cartridge.volume_tag.as_deref(), Some("ABC123"));
        assert_eq!(cartridge.alternate_volume_tag, None);
    }

    #[test]
    fn slot_with_both_tags() {
        let StatusRecord::Slot(slot) =
            classify("Storage Element 4:Full :VolumeTag=VOL004L6:AlternateVolumeTag=ALT004").unwrap()
        else {
            panic!("expected slot");
        };
        let cartridge = slot.cartridge.unwrap();
        assert_eq!(cartridge.volume_tag.as_deref(), Some("VOL004L6"));
        assert_eq!(cartridge.alternate_volume_tag.as_deref(), Some("ALT004"));
    }

    #[test]
    fn slot_with_alternate_tag_only() {
        let StatusRecord::Slot(slot) =
            classify("Storage Element 5:Full :AlternateVolumeTag=ALT005").unwrap()
        else {
            panic!("expected slot");
        };
        let cartridge = slot.cartridge.unwrap();
        assert_eq!(cartridge.volume_tag, None);
        assert_eq!(cartridge.alternate_volume_tag.as_deref(), Some("ALT005"));
    }

    #[test]
    fn mailbox_and_empty_slots() {
        let StatusRecord::Slot(mailbox) =
            classify("Storage Element 31 IMPORT/EXPORT:Full :VolumeTag=IMP001").unwrap()
        else {
            panic!("expected slot");
        };
        assert_eq!(mailbox.index, 31);
        assert_eq!(mailbox.slot_type, TapeSlotType::ImportExport);
        assert!(mailbox.cartridge.is_some());

        let StatusRecord::Slot(empty) = classify("Storage Element 32 IMPORT/EXPORT:Empty").unwrap()
        else {
            panic!("expected slot");
        };
        assert!(empty.cartridge.is_none());
    }

    #[test]
    fn loaded_drive_records_origin_slot() {
        let StatusRecord::Drive(drive) = classify(
            "Data Transfer Element 0:Full (Storage Element 3 Loaded):VolumeTag = TAPE03L6",
        )
        .unwrap() else {
            panic!("expected drive");
        };
        assert_eq!(drive.index, 0);
        let cartridge = drive.cartridge.unwrap();
        assert_eq!(cartridge.origin_slot_index, Some(3));
        assert_eq!(cartridge.volume_tag.as_deref(), Some("TAPE03L6"));
    }

    #[test]
    fn drive_with_unknown_origin_and_alternate_tag() {
        let StatusRecord::Drive(drive) = classify(
            "Data Transfer Element 2:Full (Unknown Storage Element Loaded):VolumeTag = T1 :AlternateVolumeTag = A1",
        )
        .unwrap() else {
            panic!("expected drive");
        };
        let cartridge = drive.cartridge.unwrap();
        assert_eq!(cartridge.origin_slot_index, None);
        assert_eq!(cartridge.volume_tag.as_deref(), Some("T1"));
        assert_eq!(cartridge.alternate_volume_tag.as_deref(), Some("A1"));
    }

    #[test]
    fn empty_drive() {
        let StatusRecord::Drive(drive) = classify("Data Transfer Element 1:Empty").unwrap() else {
            panic!("expected drive");
        };
        assert_eq!(drive.index, 1);
        assert!(drive.cartridge.is_none());
    }

    #[test]
    fn malformed_slot_index() {
        let err = classify("Storage Element abc:Full :VolumeTag=X").unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidNumber {
                record: "slot",
                field: "index",
                value: "abc".into()
            }
        );
    }

    #[test]
    fn unknown_segment() {
        assert_eq!(
            classify("  mtx: something else").unwrap(),
            StatusRecord::Unknown("mtx: something else".into())
        );
    }

    #[test]
    fn tokenize_skips_blank_segments() {
        let records: Vec<_> = tokenize("Storage Element 1:Empty|| \nData Transfer Element 0:Empty|")
            .map(|(position, _, r)| (position, r.is_ok()))
            .collect();
        assert_eq!(records, vec![(0, true), (3, true)]);
    }
}
