use tracing::{debug, warn};

use crate::state::{SkippedSegment, TapeLibraryState};
use crate::tokenizer::{tokenize, StatusRecord};

/// Build a library snapshot from raw changer status output.
///
/// Never fails: malformed segments are logged and listed in
/// [`TapeLibraryState::skipped`], the rest of the output is still used.
pub fn parse(output: &str) -> TapeLibraryState {
    let mut state = TapeLibraryState::default();

    for (position, segment, record) in tokenize(output) {
        match record {
            Ok(StatusRecord::Header(header)) => {
                state.device = Some(header.device);
                state.drive_count = Some(header.drive_count);
                state.slots_count = Some(header.slots_count);
                state.mailbox_count = Some(header.mailbox_count);
            }
            Ok(StatusRecord::Slot(slot)) => state.slots.push(slot),
            Ok(StatusRecord::Drive(drive)) => state.drives.push(drive),
            Ok(StatusRecord::Unknown(text)) => {
                debug!(position, segment = %text, "ignoring unrecognized status segment");
            }
            Err(e) => {
                warn!(position, segment = %segment.trim(), error = %e, "skipping malformed status segment");
                state.skipped.push(SkippedSegment {
                    position,
                    segment: segment.trim().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    state
}
