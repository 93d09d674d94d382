//! Durable document collections.
//!
//! A [`DocumentCollection`] is an ordered key → document map whose every
//! mutation is first appended to a crash-recoverable [`Journal`] and only then
//! applied in memory. Reopening a collection replays its journal.
//!
//! # Consistency
//!
//! - Single-document updates are atomic: the conditional closure passed to
//!   [`DocumentCollection::update_with`] runs under the collection write lock.
//! - There are no cross-document or cross-collection transactions. Callers
//!   order their writes and rely on reconciliation after a crash.
//! - Torn journal tails left by a crash are discarded on open.

pub mod collection;
pub mod error;
pub mod journal;

pub use collection::{Document, DocumentCollection, IndexFn};
pub use error::{DocStoreError, DocStoreResult};
pub use journal::{Journal, JournalConfig, SyncMode};
