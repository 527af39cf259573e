//! Durable offline mutation queue on RocksDB
//!
//! # Column Families
//!
//! - `queue` - Items (key: big-endian local id, value: JSON item)
//! - `meta` - Counters (`next_local_id`)
//!
//! Big-endian keys make iteration order equal to enqueue order. Local ids are
//! never reused, so an item confirmed by the server cannot come back.
//!
//! The queue is small by construction (bounded by `max_queue_size` pending,
//! syncing and failed items plus dead letters), so counts and batch selection scan the whole
//! column family.

use crate::{
    config::QueueConfig,
    error::{Error, Result},
    types::{Enqueued, NewQueueItem, QueueStatus, SyncQueueItem},
};
use chrono::Utc;
use parking_lot::Mutex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};

const CF_QUEUE: &str = "queue";
const CF_META: &str = "meta";

const META_NEXT_LOCAL_ID: &[u8] = b"next_local_id";

/// Client-side queue of write intents awaiting sync
pub struct OfflineQueue {
    db: DB,
    config: QueueConfig,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("path", &self.db.path())
            .field("max_queue_size", &self.config.max_queue_size)
            .finish()
    }
}

impl OfflineQueue {
    /// Open or create the queue.
    ///
    /// Items left `syncing` by a pass that never finished are returned to
    /// `pending`; the server treats their replay as a no-op if it already
    /// applied them.
    pub fn open(config: QueueConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_QUEUE, Options::default()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, &config.data_dir, cf_descriptors)?;

        let queue = Self {
            db,
            config,
            write_lock: Mutex::new(()),
        };

        let recovered = queue.recover_interrupted()?;
        tracing::info!(
            path = ?queue.config.data_dir,
            recovered,
            waiting = queue.pending_count()?,
            "Opened offline queue"
        );

        Ok(queue)
    }

    /// Configuration in effect
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn item_key(local_id: u64) -> [u8; 8] {
        local_id.to_be_bytes()
    }

    // Reads

    /// Item by local id
    pub fn get(&self, local_id: u64) -> Result<Option<SyncQueueItem>> {
        let cf = self.cf_handle(CF_QUEUE)?;
        match self.db.get_cf(cf, Self::item_key(local_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Every item, in enqueue order
    pub fn items(&self) -> Result<Vec<SyncQueueItem>> {
        self.scan_after(None, |_| true, usize::MAX)
    }

    /// Pending + failed items (the advisory count shown to the user)
    pub fn pending_count(&self) -> Result<usize> {
        self.count_where(|status| status.is_waiting())
    }

    /// Pending, syncing and failed items (the count capacity is checked against)
    pub fn occupied_count(&self) -> Result<usize> {
        self.count_where(|status| status.holds_capacity())
    }

    fn count_where<F>(&self, keep: F) -> Result<usize>
    where
        F: Fn(QueueStatus) -> bool,
    {
        let cf = self.cf_handle(CF_QUEUE)?;
        let mut count = 0;
        for entry in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = entry?;
            let item: SyncQueueItem = serde_json::from_slice(&value)?;
            if keep(item.status) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Oldest pending or failed items, at most `limit`
    pub fn pending_batch(&self, limit: usize) -> Result<Vec<SyncQueueItem>> {
        self.pending_batch_after(None, limit)
    }

    /// Like [`pending_batch`](Self::pending_batch), starting after a local id.
    ///
    /// Lets one pass walk the queue once without picking up items it already
    /// tried.
    pub fn pending_batch_after(
        &self,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<SyncQueueItem>> {
        self.scan_after(after, |item| item.status.is_waiting(), limit)
    }

    /// Items that reached the retry ceiling
    pub fn dead_letters(&self) -> Result<Vec<SyncQueueItem>> {
        self.scan_after(None, |item| item.status == QueueStatus::DeadLetter, usize::MAX)
    }

    fn scan_after<F>(&self, after: Option<u64>, keep: F, limit: usize) -> Result<Vec<SyncQueueItem>>
    where
        F: Fn(&SyncQueueItem) -> bool,
    {
        let cf = self.cf_handle(CF_QUEUE)?;
        let start = after.map(|id| Self::item_key(id.saturating_add(1)));
        let mode = match &start {
            Some(key) => IteratorMode::From(key, Direction::Forward),
            None => IteratorMode::Start,
        };

        let mut items = Vec::new();
        for entry in self.db.iterator_cf(cf, mode) {
            if items.len() >= limit {
                break;
            }
            let (_, value) = entry?;
            let item: SyncQueueItem = serde_json::from_slice(&value)?;
            if after.map_or(false, |id| item.local_id <= id) {
                continue;
            }
            if keep(&item) {
                items.push(item);
            }
        }
        Ok(items)
    }

    // Writes

    /// Append an intent as `pending`.
    ///
    /// Refused once `max_queue_size` items are queued (syncing ones
    /// included). An item that brings the count to `warn_queue_size` or
    /// beyond is still accepted, but the receipt is flagged `near_capacity`.
    pub fn enqueue(&self, new: NewQueueItem) -> Result<Enqueued> {
        let _guard = self.write_lock.lock();

        let occupied = self.occupied_count()?;
        if occupied >= self.config.max_queue_size {
            tracing::warn!(
                occupied,
                capacity = self.config.max_queue_size,
                "Offline queue full, rejecting write"
            );
            return Err(Error::QueueFull {
                capacity: self.config.max_queue_size,
            });
        }

        let near_capacity = occupied + 1 >= self.config.warn_queue_size;
        if near_capacity {
            tracing::warn!(
                occupied = occupied + 1,
                capacity = self.config.max_queue_size,
                "Offline queue near capacity"
            );
        }

        let local_id = self.next_local_id()?;
        let now = Utc::now();
        let item = SyncQueueItem {
            local_id,
            temp_id: new.temp_id,
            operation: new.operation,
            entity_kind: new.entity_kind,
            entity_id: new.entity_id,
            group_id: new.group_id,
            payload: new.payload,
            status: QueueStatus::Pending,
            retries: 0,
            created_at: now,
            updated_at: now,
            error_message: None,
        };

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf_handle(CF_QUEUE)?, Self::item_key(local_id), serde_json::to_vec(&item)?);
        batch.put_cf(
            self.cf_handle(CF_META)?,
            META_NEXT_LOCAL_ID,
            (local_id + 1).to_be_bytes(),
        );
        self.db.write(batch)?;

        tracing::debug!(
            local_id,
            temp_id = %item.temp_id,
            operation = item.operation.as_str(),
            entity = item.entity_kind.as_str(),
            "Enqueued offline write"
        );

        Ok(Enqueued {
            local_id,
            temp_id: item.temp_id,
            near_capacity,
        })
    }

    /// Move a pending or failed item into the in-flight batch
    pub fn mark_syncing(&self, local_id: u64) -> Result<SyncQueueItem> {
        self.update(local_id, |item| {
            if !item.status.is_waiting() {
                return Err(Error::InvalidState {
                    local_id,
                    status: item.status.as_str(),
                    expected: "pending or failed",
                });
            }
            item.status = QueueStatus::Syncing;
            Ok(())
        })
    }

    /// Server confirmed the item; remove it for good
    pub fn mark_done(&self, local_id: u64) -> Result<()> {
        let _guard = self.write_lock.lock();
        if self.get(local_id)?.is_none() {
            return Err(Error::NotFound(local_id));
        }
        self.db.delete_cf(self.cf_handle(CF_QUEUE)?, Self::item_key(local_id))?;
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// Returns the new status: `failed` while retries remain, `dead_letter`
    /// once `max_retries` attempts have failed.
    pub fn mark_failed(&self, local_id: u64, error: &str) -> Result<QueueStatus> {
        let max_retries = self.config.max_retries;
        let item = self.update(local_id, |item| {
            item.retries += 1;
            item.error_message = Some(error.to_string());
            item.status = if item.retries >= max_retries {
                QueueStatus::DeadLetter
            } else {
                QueueStatus::Failed
            };
            Ok(())
        })?;

        if item.status == QueueStatus::DeadLetter {
            tracing::warn!(
                local_id,
                temp_id = %item.temp_id,
                retries = item.retries,
                error,
                "Queue item dead-lettered"
            );
        }

        Ok(item.status)
    }

    /// Give a dead-lettered item a fresh set of retries
    pub fn requeue_dead_letter(&self, local_id: u64) -> Result<SyncQueueItem> {
        let _guard = self.write_lock.lock();
        let capacity = self.config.max_queue_size;
        let occupied = self.occupied_count()?;

        self.update_locked(local_id, |item| {
            if item.status != QueueStatus::DeadLetter {
                return Err(Error::InvalidState {
                    local_id,
                    status: item.status.as_str(),
                    expected: "dead_letter",
                });
            }
            if occupied >= capacity {
                return Err(Error::QueueFull { capacity });
            }
            item.status = QueueStatus::Pending;
            item.retries = 0;
            item.error_message = None;
            Ok(())
        })
    }

    /// Drop every failed and dead-lettered item; returns how many were removed
    pub fn clear_failed(&self) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let cf = self.cf_handle(CF_QUEUE)?;

        let doomed = self.scan_after(
            None,
            |item| matches!(item.status, QueueStatus::Failed | QueueStatus::DeadLetter),
            usize::MAX,
        )?;

        let mut batch = WriteBatch::default();
        for item in &doomed {
            batch.delete_cf(cf, Self::item_key(item.local_id));
        }
        self.db.write(batch)?;

        tracing::info!(removed = doomed.len(), "Cleared failed queue items");
        Ok(doomed.len())
    }

    fn update<F>(&self, local_id: u64, mutate: F) -> Result<SyncQueueItem>
    where
        F: FnOnce(&mut SyncQueueItem) -> Result<()>,
    {
        let _guard = self.write_lock.lock();
        self.update_locked(local_id, mutate)
    }

    /// Caller holds `write_lock`
    fn update_locked<F>(&self, local_id: u64, mutate: F) -> Result<SyncQueueItem>
    where
        F: FnOnce(&mut SyncQueueItem) -> Result<()>,
    {
        let mut item = self.get(local_id)?.ok_or(Error::NotFound(local_id))?;
        mutate(&mut item)?;
        item.updated_at = Utc::now();
        self.db.put_cf(
            self.cf_handle(CF_QUEUE)?,
            Self::item_key(local_id),
            serde_json::to_vec(&item)?,
        )?;
        Ok(item)
    }

    fn next_local_id(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_META)?;
        match self.db.get_cf(cf, META_NEXT_LOCAL_ID)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage("Malformed local id counter".to_string()))?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(1),
        }
    }

    fn recover_interrupted(&self) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let cf = self.cf_handle(CF_QUEUE)?;
        let stuck = self.scan_after(None, |item| item.status == QueueStatus::Syncing, usize::MAX)?;

        let now = Utc::now();
        let mut batch = WriteBatch::default();
        for mut item in stuck.iter().cloned() {
            item.status = QueueStatus::Pending;
            item.updated_at = now;
            batch.put_cf(cf, Self::item_key(item.local_id), serde_json::to_vec(&item)?);
        }
        self.db.write(batch)?;

        if !stuck.is_empty() {
            tracing::warn!(count = stuck.len(), "Returned interrupted items to pending");
        }
        Ok(stuck.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use split_ledger::{ExpenseId, GroupId};
    use tempfile::TempDir;

    fn open(temp_dir: &TempDir, max: usize, warn: usize) -> OfflineQueue {
        let config = QueueConfig {
            data_dir: temp_dir.path().to_path_buf(),
            max_queue_size: max,
            warn_queue_size: warn,
            ..QueueConfig::default()
        };
        OfflineQueue::open(config).unwrap()
    }

    fn intent() -> NewQueueItem {
        NewQueueItem::delete_expense(ExpenseId::new(), GroupId::new())
    }

    #[test]
    fn test_enqueue_assigns_increasing_ids() {
        let temp_dir = TempDir::new().unwrap();
        let queue = open(&temp_dir, 500, 400);

        let first = queue.enqueue(intent()).unwrap();
        let second = queue.enqueue(intent()).unwrap();
        assert_eq!(first.local_id, 1);
        assert_eq!(second.local_id, 2);
        assert!(!first.near_capacity);

        let item = queue.get(first.local_id).unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.retries, 0);
        assert_eq!(item.temp_id, first.temp_id);
    }

    #[test]
    fn test_capacity_and_warning_threshold() {
        let temp_dir = TempDir::new().unwrap();
        let queue = open(&temp_dir, 500, 400);

        for i in 1..400 {
            assert!(!queue.enqueue(intent()).unwrap().near_capacity, "item {i}");
        }
        // 400th item onward warns but is accepted
        for i in 400..=500 {
            assert!(queue.enqueue(intent()).unwrap().near_capacity, "item {i}");
        }
        assert_eq!(queue.pending_count().unwrap(), 500);

        let err = queue.enqueue(intent()).unwrap_err();
        assert!(matches!(err, Error::QueueFull { capacity: 500 }));
    }

    #[test]
    fn test_syncing_items_hold_capacity() {
        let temp_dir = TempDir::new().unwrap();
        let queue = open(&temp_dir, 3, 2);
        for _ in 0..3 {
            queue.enqueue(intent()).unwrap();
        }
        queue.mark_syncing(1).unwrap();
        queue.mark_syncing(2).unwrap();

        assert_eq!(queue.pending_count().unwrap(), 1);
        assert_eq!(queue.occupied_count().unwrap(), 3);
        assert!(matches!(
            queue.enqueue(intent()).unwrap_err(),
            Error::QueueFull { capacity: 3 }
        ));

        // Failing the batch cannot push the queue past its bound
        queue.mark_failed(1, "offline").unwrap();
        queue.mark_failed(2, "offline").unwrap();
        assert_eq!(queue.pending_count().unwrap(), 3);
    }

    #[test]
    fn test_requeue_respects_capacity() {
        let temp_dir = TempDir::new().unwrap();
        let queue = open(&temp_dir, 2, 2);
        let id = queue.enqueue(intent()).unwrap().local_id;
        for _ in 0..5 {
            queue.mark_syncing(id).unwrap();
            queue.mark_failed(id, "rejected").unwrap();
        }
        queue.enqueue(intent()).unwrap();
        queue.enqueue(intent()).unwrap();

        assert!(matches!(
            queue.requeue_dead_letter(id).unwrap_err(),
            Error::QueueFull { capacity: 2 }
        ));
        assert_eq!(queue.get(id).unwrap().unwrap().status, QueueStatus::DeadLetter);

        queue.mark_syncing(2).unwrap();
        queue.mark_done(2).unwrap();
        assert_eq!(queue.requeue_dead_letter(id).unwrap().status, QueueStatus::Pending);
    }

    #[test]
    fn test_pending_batch_order_and_limit() {
        let temp_dir = TempDir::new().unwrap();
        let queue = open(&temp_dir, 500, 400);
        for _ in 0..5 {
            queue.enqueue(intent()).unwrap();
        }
        queue.mark_syncing(2).unwrap();
        queue.mark_syncing(3).unwrap();
        queue.mark_failed(3, "offline").unwrap();

        let ids: Vec<u64> = queue.pending_batch(3).unwrap().iter().map(|i| i.local_id).collect();
        assert_eq!(ids, vec![1, 3, 4]);

        let ids: Vec<u64> = queue
            .pending_batch_after(Some(3), 10)
            .unwrap()
            .iter()
            .map(|i| i.local_id)
            .collect();
        assert_eq!(ids, vec![4, 5]);
    }

    #[test]
    fn test_done_items_are_removed_and_ids_not_reused() {
        let temp_dir = TempDir::new().unwrap();
        let queue = open(&temp_dir, 500, 400);
        let receipt = queue.enqueue(intent()).unwrap();

        queue.mark_syncing(receipt.local_id).unwrap();
        queue.mark_done(receipt.local_id).unwrap();
        assert!(queue.get(receipt.local_id).unwrap().is_none());
        assert!(matches!(
            queue.mark_done(receipt.local_id).unwrap_err(),
            Error::NotFound(_)
        ));

        let next = queue.enqueue(intent()).unwrap();
        assert_eq!(next.local_id, receipt.local_id + 1);
    }

    #[test]
    fn test_retry_ceiling_moves_to_dead_letter() {
        let temp_dir = TempDir::new().unwrap();
        let queue = open(&temp_dir, 500, 400);
        let id = queue.enqueue(intent()).unwrap().local_id;

        for attempt in 1..=5 {
            queue.mark_syncing(id).unwrap();
            let status = queue.mark_failed(id, "Amount must be positive").unwrap();
            if attempt < 5 {
                assert_eq!(status, QueueStatus::Failed);
            } else {
                assert_eq!(status, QueueStatus::DeadLetter);
            }
        }

        let item = queue.get(id).unwrap().unwrap();
        assert_eq!(item.retries, 5);
        assert_eq!(item.error_message.as_deref(), Some("Amount must be positive"));

        // Dead letters leave the batch and the capacity count
        assert!(queue.pending_batch(50).unwrap().is_empty());
        assert_eq!(queue.pending_count().unwrap(), 0);
        assert_eq!(queue.dead_letters().unwrap().len(), 1);
        assert!(matches!(
            queue.mark_syncing(id).unwrap_err(),
            Error::InvalidState { .. }
        ));

        let requeued = queue.requeue_dead_letter(id).unwrap();
        assert_eq!(requeued.status, QueueStatus::Pending);
        assert_eq!(requeued.retries, 0);
        assert!(requeued.error_message.is_none());
    }

    #[test]
    fn test_requeue_only_dead_letters() {
        let temp_dir = TempDir::new().unwrap();
        let queue = open(&temp_dir, 500, 400);
        let id = queue.enqueue(intent()).unwrap().local_id;

        assert!(matches!(
            queue.requeue_dead_letter(id).unwrap_err(),
            Error::InvalidState { .. }
        ));
        assert!(matches!(
            queue.requeue_dead_letter(99).unwrap_err(),
            Error::NotFound(99)
        ));
    }

    #[test]
    fn test_clear_failed() {
        let temp_dir = TempDir::new().unwrap();
        let queue = open(&temp_dir, 500, 400);
        for _ in 0..3 {
            queue.enqueue(intent()).unwrap();
        }
        queue.mark_syncing(1).unwrap();
        queue.mark_failed(1, "boom").unwrap();

        assert_eq!(queue.clear_failed().unwrap(), 1);
        let ids: Vec<u64> = queue.items().unwrap().iter().map(|i| i.local_id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_reopen_recovers_interrupted_pass() {
        let temp_dir = TempDir::new().unwrap();
        {
            let queue = open(&temp_dir, 500, 400);
            queue.enqueue(intent()).unwrap();
            queue.enqueue(intent()).unwrap();
            queue.mark_syncing(1).unwrap();
        }

        let queue = open(&temp_dir, 500, 400);
        let item = queue.get(1).unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(queue.pending_count().unwrap(), 2);
        assert_eq!(queue.enqueue(intent()).unwrap().local_id, 3);
    }
}
