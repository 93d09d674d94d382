//! Tape-backed cold storage engine.
//!
//! Objects are staged on local disk, packed per file bucket into tar
//! archives, and handed to an external tape writer through a durable queue
//! of write orders. On startup every file bucket is reconciled against the
//! referentials before it accepts new traffic.
//!
//! Staging layout, shared by [`BasicFileStorage`] and recovery:
//!
//! ```text
//! <root>/<fileBucketId>/input/<container>/<storageId>
//! <root>/<fileBucketId>/tar/<archiveId>
//! ```
//!
//! # Modules
//!
//! - [`file_storage`]: staging area for incoming object bytes
//! - [`topology`]: file bucket ⇄ container mapping
//! - [`tar_writer`]: sequential tar builder recording entry offsets
//! - [`tar_creator`]: per-bucket packing worker
//! - [`write_order`]: ready archive → queued write order
//! - [`recovery`]: startup reconciliation of disk and referentials
//! - [`backup`]: one-file-per-archive backup uploads
//! - [`lock`]: single-owner guard over the referential directory
//! - [`offer`]: the process-wide [`TapeOffer`] context

pub mod backup;
pub mod config;
pub mod error;
pub mod file_storage;
pub mod layout;
pub mod lock;
pub mod offer;
pub mod recovery;
pub mod tar_creator;
pub mod tar_writer;
pub mod topology;
pub mod write_order;

pub use backup::BackupFileStorage;
pub use config::{OfferConfig, ServerSettings, TopologyConfig};
pub use error::{CasError, CasResult};
pub use file_storage::{BasicFileStorage, StagedFile};
pub use lock::OfferLock;
pub use offer::{BootstrapReport, ObjectContent, TapeOffer};
pub use recovery::{
    ArchiveBootstrapRecovery, ArchiveRecoveryReport, FileBucketTarCreatorBootstrapRecovery,
    RecoveryReport,
};
pub use tar_creator::{
    FileBucketTarCreator, InputFileToProcessMessage, TarCreatorConfig, TarCreatorHandle,
    TarCreatorMessage, TarCreatorQueue, TarCreatorWorker,
};
pub use tar_writer::{FinishedArchive, TarArchiveBuilder};
pub use topology::BucketTopologyHelper;
pub use write_order::WriteOrderCreator;
