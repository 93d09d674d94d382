use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tcas_docstore::{Document, DocumentCollection, JournalConfig};
use tcas_types::{QueueMessageType, WriteOrder};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{QueueError, QueueResult};

/// A persisted queue entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Equal to the order's archive id.
    pub id: String,
    /// Insertion rank; only ordered within one process lifetime plus replay.
    pub seq: u64,
    pub created_at: DateTime<Utc>,
    pub order: WriteOrder,
}

impl QueueMessage {
    pub fn message_type(&self) -> QueueMessageType {
        self.order.message_type
    }
}

impl Document for QueueMessage {
    fn key(&self) -> String {
        self.id.clone()
    }
}

/// Durable queue of write orders.
pub trait QueueRepository: Send + Sync {
    /// Enqueue an order. Returns `false` if an order for the same archive is
    /// already queued; the queue keeps the first one.
    fn add(&self, order: &WriteOrder) -> QueueResult<bool>;

    /// Lease the oldest unleased message, if any.
    fn poll(&self) -> QueueResult<Option<QueueMessage>>;

    /// Give a leased message back without consuming it.
    fn release(&self, message_id: &str) -> QueueResult<()>;

    /// Acknowledge (durably delete) a message. Returns `false` if absent.
    fn remove(&self, message_id: &str) -> QueueResult<bool>;

    /// All queued messages in delivery order.
    fn list(&self) -> QueueResult<Vec<QueueMessage>>;

    fn contains(&self, message_id: &str) -> QueueResult<bool>;

    fn len(&self) -> QueueResult<usize>;

    fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// [`QueueRepository`] over a journaled document collection.
pub struct PersistentQueueRepository {
    collection: DocumentCollection<QueueMessage>,
    next_seq: AtomicU64,
    leased: Mutex<HashSet<String>>,
    notify: Notify,
}

impl PersistentQueueRepository {
    pub const COLLECTION_NAME: &'static str = "tape_queue_message";

    pub fn open(dir: &Path, config: JournalConfig) -> QueueResult<Self> {
        Self::from_collection(DocumentCollection::open(Self::COLLECTION_NAME, dir, config)?)
    }

    /// Pending messages of the queue stored in `dir`, in delivery order.
    ///
    /// Read-only: the journal is replayed without being opened for writing,
    /// so this may run alongside the process that owns the queue.
    pub fn snapshot(dir: &Path) -> QueueResult<Vec<QueueMessage>> {
        let mut messages = DocumentCollection::<QueueMessage>::snapshot(Self::COLLECTION_NAME, dir)?;
        messages.sort_by_key(|m| m.seq);
        Ok(messages)
    }

    pub fn in_memory() -> Self {
        Self {
            collection: DocumentCollection::in_memory(Self::COLLECTION_NAME),
            next_seq: AtomicU64::new(0),
            leased: Mutex::new(HashSet::new()),
            notify: Notify::new(),
        }
    }

    fn from_collection(collection: DocumentCollection<QueueMessage>) -> QueueResult<Self> {
        let next_seq = collection
            .find(|_| true)?
            .iter()
            .map(|m| m.seq + 1)
            .max()
            .unwrap_or(0);
        let pending = collection.len()?;
        if pending > 0 {
            info!(pending, "write orders pending from previous run");
        }
        Ok(Self {
            collection,
            next_seq: AtomicU64::new(next_seq),
            leased: Mutex::new(HashSet::new()),
            notify: Notify::new(),
        })
    }

    /// Lease the oldest message, waiting up to `timeout` for one to arrive.
    pub async fn wait_poll(&self, timeout: Duration) -> QueueResult<Option<QueueMessage>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(message) = self.poll()? {
                return Ok(Some(message));
            }
            let notified = self.notify.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.poll();
            }
        }
    }

    pub fn compact(&self) -> QueueResult<()> {
        Ok(self.collection.compact()?)
    }

    fn leases(&self) -> QueueResult<std::sync::MutexGuard<'_, HashSet<String>>> {
        self.leased.lock().map_err(|_| QueueError::LockPoisoned)
    }
}

impl QueueRepository for PersistentQueueRepository {
    fn add(&self, order: &WriteOrder) -> QueueResult<bool> {
        let message = QueueMessage {
            id: order.archive_id.clone(),
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            created_at: Utc::now(),
            order: order.clone(),
        };
        let inserted = self.collection.insert(message)?;
        if inserted {
            debug!(archive_id = %order.archive_id, kind = %order.message_type, "write order enqueued");
            self.notify.notify_one();
        } else {
            debug!(archive_id = %order.archive_id, "duplicate write order ignored");
        }
        Ok(inserted)
    }

    fn poll(&self) -> QueueResult<Option<QueueMessage>> {
        let mut leased = self.leases()?;
        let next = self
            .collection
            .find(|m| !leased.contains(&m.id))?
            .into_iter()
            .min_by_key(|m| m.seq);
        if let Some(message) = &next {
            leased.insert(message.id.clone());
        }
        Ok(next)
    }

    fn release(&self, message_id: &str) -> QueueResult<()> {
        if !self.leases()?.remove(message_id) {
            return Err(QueueError::NotFound(message_id.to_string()));
        }
        self.notify.notify_one();
        Ok(())
    }

    fn remove(&self, message_id: &str) -> QueueResult<bool> {
        let removed = self.collection.remove(message_id)?.is_some();
        self.leases()?.remove(message_id);
        if removed {
            debug!(message_id, "write order acknowledged");
        }
        Ok(removed)
    }

    fn list(&self) -> QueueResult<Vec<QueueMessage>> {
        let mut messages = self.collection.find(|_| true)?;
        messages.sort_by_key(|m| m.seq);
        Ok(messages)
    }

    fn contains(&self, message_id: &str) -> QueueResult<bool> {
        Ok(self.collection.get(message_id)?.is_some())
    }

    fn len(&self) -> QueueResult<usize> {
        Ok(self.collection.len()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tcas_types::DigestType;

    fn order(archive_id: &str) -> WriteOrder {
        WriteOrder {
            message_type: QueueMessageType::TarWriteOrder,
            archive_id: archive_id.into(),
            bucket: "test".into(),
            file_bucket_id: "test-metadata".into(),
            file_path: format!("test-metadata/tar/{archive_id}"),
            size: 10,
            digest_type: DigestType::Sha512,
            digest: "d".into(),
        }
    }

    #[test]
    fn add_deduplicates_by_archive_id() {
        let queue = PersistentQueueRepository::in_memory();
        assert!(queue.add(&order("a")).unwrap());
        assert!(!queue.add(&order("a")).unwrap());
        assert_eq!(queue.len().unwrap(), 1);
    }

    #[test]
    fn poll_follows_insertion_order_and_leases() {
        let queue = PersistentQueueRepository::in_memory();
        queue.add(&order("b")).unwrap();
        queue.add(&order("a")).unwrap();

        assert_eq!(queue.poll().unwrap().unwrap().id, "b");
        assert_eq!(queue.poll().unwrap().unwrap().id, "a");
        assert!(queue.poll().unwrap().is_none());

        queue.release("b").unwrap();
        assert_eq!(queue.poll().unwrap().unwrap().id, "b");
        assert!(matches!(queue.release("zzz"), Err(QueueError::NotFound(_))));
    }

    #[test]
    fn remove_acknowledges() {
        let queue = PersistentQueueRepository::in_memory();
        queue.add(&order("a")).unwrap();
        let message = queue.poll().unwrap().unwrap();
        assert!(queue.remove(&message.id).unwrap());
        assert!(!queue.remove(&message.id).unwrap());
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn unacknowledged_messages_are_redelivered_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let queue = PersistentQueueRepository::open(dir.path(), JournalConfig::default()).unwrap();
            queue.add(&order("a")).unwrap();
            queue.add(&order("b")).unwrap();
            queue.poll().unwrap().unwrap();
            queue.remove("b").unwrap();
        }
        let queue = PersistentQueueRepository::open(dir.path(), JournalConfig::default()).unwrap();
        let message = queue.poll().unwrap().unwrap();
        assert_eq!(message.id, "a");
        assert_eq!(message.order, order("a"));

        // New messages sort after replayed ones.
        queue.add(&order("c")).unwrap();
        let ids: Vec<String> = queue.list().unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn snapshot_lists_pending_orders_without_leasing() {
        let dir = tempfile::tempdir().unwrap();
        let queue = PersistentQueueRepository::open(dir.path(), JournalConfig::default()).unwrap();
        queue.add(&order("b")).unwrap();
        queue.add(&order("a")).unwrap();
        queue.add(&order("c")).unwrap();
        queue.remove("c").unwrap();

        let ids: Vec<String> = PersistentQueueRepository::snapshot(dir.path())
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(queue.poll().unwrap().unwrap().id, "b");
    }

    #[tokio::test]
    async fn wait_poll_wakes_on_add() {
        let queue = Arc::new(PersistentQueueRepository::in_memory());
        let producer = queue.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.add(&order("late")).unwrap();
        });

        let message = queue.wait_poll(Duration::from_secs(5)).await.unwrap();
        assert_eq!(message.unwrap().id, "late");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn wait_poll_times_out_when_empty() {
        let queue = PersistentQueueRepository::in_memory();
        let message = queue.wait_poll(Duration::from_millis(10)).await.unwrap();
        assert!(message.is_none());
    }

    #[test]
    fn concurrent_duplicate_adds_enqueue_once() {
        let queue = Arc::new(PersistentQueueRepository::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let q = queue.clone();
                std::thread::spawn(move || q.add(&order("same")).unwrap())
            })
            .collect();
        let inserted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(inserted, 1);
        assert_eq!(queue.len().unwrap(), 1);
    }
}
