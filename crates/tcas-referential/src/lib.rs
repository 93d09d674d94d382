//! Object and archive referentials.
//!
//! The object referential is the sole owner of per-object physical location
//! truth; the archive referential is the sole owner of archive lifecycle
//! truth. Both only move locations forward and reject stale transitions with
//! [`ReferentialError::Conflict`], which callers treat as "skip, don't retry".
//!
//! # Modules
//!
//! - [`object`]: [`ObjectReferential`] trait and its journaled repository
//! - [`archive`]: [`ArchiveReferential`] trait and its journaled repository

pub mod archive;
pub mod error;
pub mod object;

pub use archive::{ArchiveReferential, ArchiveReferentialRepository};
pub use error::{ReferentialError, ReferentialResult};
pub use object::{ObjectReferential, ObjectReferentialRepository};
