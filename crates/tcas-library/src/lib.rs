//! Tape library status parsing.
//!
//! The changer control utility reports its state as `|`-delimited (or
//! newline-delimited) segments. [`tokenize`] turns each segment into a
//! [`StatusRecord`]; [`parse`] folds the records into a [`TapeLibraryState`],
//! skipping malformed segments so one damaged element never hides the rest
//! of the library.

pub mod error;
pub mod parser;
pub mod state;
pub mod tokenizer;

pub use error::ParseError;
pub use parser::parse;
pub use state::{SkippedSegment, TapeCartridge, TapeDrive, TapeLibraryState, TapeSlot, TapeSlotType};
pub use tokenizer::{tokenize, HeaderRecord, StatusRecord};
