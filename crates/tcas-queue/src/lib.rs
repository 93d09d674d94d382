//! Durable write-order queue.
//!
//! The queue is the single hand-off point between archive producers (tar
//! creators, backup uploads) and the external tape-writer driver.
//!
//! - Orders are deduplicated by archive id: an archive is enqueued at most once.
//! - Consumption is at-least-once. [`QueueRepository::poll`] leases the oldest
//!   unleased message; leases live in memory only, so a restart makes every
//!   unacknowledged message visible again.
//! - Delivery approximates insertion order (a per-process sequence number).

pub mod error;
pub mod repository;

pub use error::{QueueError, QueueResult};
pub use repository::{PersistentQueueRepository, QueueMessage, QueueRepository};
