//! Foundation types for the tape CAS offer.
//!
//! Every other `tcas` crate depends on `tcas-types`. The types here describe
//! the three sources of truth the offer reconciles: staged files on disk,
//! the object and archive referentials, and the write-order queue feeding
//! the tape library.
//!
//! # Key Types
//!
//! - [`ObjectReferentialEntry`]: physical state of one stored object
//! - [`ObjectStorageLocation`]: `InputFile → TarFile → OnTape` lifecycle
//! - [`ArchiveReferentialEntity`]: lifecycle of a tar or backup archive
//! - [`ArchiveStorageLocation`]: `BuildingOnDisk → ReadyOnDisk → OnTape`
//! - [`WriteOrder`]: durable "archive is ready for tape" hand-off
//! - [`DigestType`]: digest algorithm tag

pub mod archive;
pub mod digest;
pub mod error;
pub mod location;
pub mod naming;
pub mod object;
pub mod order;

pub use archive::ArchiveReferentialEntity;
pub use digest::DigestType;
pub use error::TypeError;
pub use location::{ArchiveStorageLocation, ObjectStorageLocation};
pub use naming::{new_storage_id, new_tar_id, object_name_from_storage_id};
pub use object::{ObjectReferentialEntry, ObjectReferentialId};
pub use order::{QueueMessageType, WriteOrder};
