//! Sync coordinator: drains the offline queue through a transport
//!
//! At most one pass runs at a time. A pass walks the waiting items once in
//! queue order, one round trip per batch:
//!
//! 1. Mark the batch `syncing`
//! 2. Push it
//! 3. Remove applied items, record failures against the rest
//!
//! A push that fails outright marks every item of that batch `failed` and
//! ends the pass in the `error` state. So does a pass that is dropped or
//! errors out between steps 1 and 3: the batch is released as `failed`
//! rather than left `syncing`. Observers follow progress through
//! `watch` channels for the state and the advisory pending count.

use crate::{
    error::Result,
    queue::OfflineQueue,
    transport::SyncTransport,
    types::{Enqueued, NewQueueItem, QueueStatus, SyncQueueItem},
};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use split_ledger::{SyncRequest, SyncResponse};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Coordinator state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    /// No pass running; last pass (if any) reached the server
    Idle,
    /// Pass in flight
    Syncing,
    /// Last pass could not reach the server
    Error(String),
}

/// Totals for one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Round trips made
    pub batches: usize,
    /// Items confirmed and removed
    pub applied: usize,
    /// Items that failed and stay queued
    pub failed: usize,
    /// Items that hit the retry ceiling during this pass
    pub dead_lettered: usize,
    /// Server clock from the last response
    pub server_time: Option<DateTime<Utc>>,
}

/// Result of a sync trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Another pass was already running
    Skipped,
    /// Nothing was waiting
    Empty,
    /// Every batch got a response
    Completed(SyncReport),
    /// A push failed; the pass stopped there
    TransportFailed {
        /// Transport error
        error: String,
        /// Totals up to and including the failed batch
        report: SyncReport,
    },
}

/// Single-flight driver for the offline queue
pub struct SyncCoordinator {
    queue: Arc<OfflineQueue>,
    transport: Arc<dyn SyncTransport>,
    batch_size: usize,
    in_flight: AtomicBool,
    state: watch::Sender<SyncState>,
    pending: watch::Sender<usize>,
    clock_offset: Mutex<Option<Duration>>,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("queue", &self.queue)
            .field("batch_size", &self.batch_size)
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .field("state", &*self.state.borrow())
            .finish()
    }
}

const INTERRUPTED: &str = "Sync pass interrupted";

/// Owns the in-flight flag and the unsettled batch for one pass.
///
/// Dropping the guard before `finish` (the `sync_now` future was cancelled)
/// releases the batch and publishes the `error` state.
struct PassGuard<'a> {
    coordinator: &'a SyncCoordinator,
    /// Local ids marked `syncing` and not yet settled
    batch: Vec<u64>,
    finished: bool,
}

impl<'a> PassGuard<'a> {
    fn new(coordinator: &'a SyncCoordinator) -> Self {
        Self {
            coordinator,
            batch: Vec::new(),
            finished: false,
        }
    }

    /// Fail whatever is still `syncing` from the current batch
    fn release_batch(&mut self) {
        let queue = &self.coordinator.queue;
        for local_id in self.batch.drain(..) {
            match queue.get(local_id) {
                Ok(Some(item)) if item.status == QueueStatus::Syncing => {
                    if let Err(e) = queue.mark_failed(local_id, INTERRUPTED) {
                        warn!(local_id, "Could not release syncing item: {}", e);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(local_id, "Could not release syncing item: {}", e),
            }
        }
    }

    fn finish(&mut self, next: SyncState) {
        self.release_batch();
        self.coordinator.state.send_replace(next);
        if let Err(e) = self.coordinator.refresh_pending_count() {
            warn!("Pending count refresh failed: {}", e);
        }
        self.finished = true;
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(items = self.batch.len(), "Sync pass dropped before completion");
            self.finish(SyncState::Error(INTERRUPTED.to_string()));
        }
        self.coordinator.in_flight.store(false, Ordering::Release);
    }
}

impl SyncCoordinator {
    /// Create coordinator
    pub fn new(queue: Arc<OfflineQueue>, transport: Arc<dyn SyncTransport>) -> Result<Self> {
        let batch_size = queue.config().batch_size;
        let (state, _) = watch::channel(SyncState::Idle);
        let (pending, _) = watch::channel(queue.pending_count()?);

        Ok(Self {
            queue,
            transport,
            batch_size,
            in_flight: AtomicBool::new(false),
            state,
            pending,
            clock_offset: Mutex::new(None),
        })
    }

    /// Underlying queue
    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    /// Watch the coordinator state
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Watch the advisory pending count
    pub fn pending_count(&self) -> watch::Receiver<usize> {
        self.pending.subscribe()
    }

    /// Current state
    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Server clock minus local clock, from the last successful round trip
    pub fn clock_offset(&self) -> Option<Duration> {
        *self.clock_offset.lock()
    }

    /// Queue an offline write and refresh the pending count
    pub fn enqueue(&self, item: NewQueueItem) -> Result<Enqueued> {
        let receipt = self.queue.enqueue(item)?;
        self.refresh_pending_count()?;
        Ok(receipt)
    }

    /// Recount waiting items and publish the number
    pub fn refresh_pending_count(&self) -> Result<usize> {
        let count = self.queue.pending_count()?;
        self.pending.send_replace(count);
        Ok(count)
    }

    /// Refresh the pending count every `pending_refresh_secs` until aborted
    pub fn spawn_pending_counter(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let period = std::time::Duration::from_secs(self.queue.config().pending_refresh_secs.max(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let Err(e) = coordinator.refresh_pending_count() {
                    warn!("Pending count refresh failed: {}", e);
                }
            }
        })
    }

    /// Run one pass unless one is already running
    pub async fn sync_now(&self) -> Result<PassOutcome> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sync pass already running, skipping trigger");
            return Ok(PassOutcome::Skipped);
        }
        let mut guard = PassGuard::new(self);

        self.state.send_replace(SyncState::Syncing);
        let result = self.run_pass(&mut guard.batch).await;

        let next = match &result {
            Ok(PassOutcome::TransportFailed { error, .. }) => SyncState::Error(error.clone()),
            Ok(_) => SyncState::Idle,
            Err(e) => SyncState::Error(e.to_string()),
        };
        guard.finish(next);

        result
    }

    /// `in_flight` tracks the ids this pass has marked `syncing` but not settled
    async fn run_pass(&self, in_flight: &mut Vec<u64>) -> Result<PassOutcome> {
        let mut report = SyncReport::default();
        let mut cursor = None;

        loop {
            let batch = self.queue.pending_batch_after(cursor, self.batch_size)?;
            let Some(last) = batch.last() else {
                break;
            };
            cursor = Some(last.local_id);

            for item in &batch {
                self.queue.mark_syncing(item.local_id)?;
                in_flight.push(item.local_id);
            }

            let request = SyncRequest {
                operations: batch.iter().map(SyncQueueItem::to_operation).collect(),
            };
            report.batches += 1;

            match self.transport.push(request).await {
                Ok(response) => self.settle_batch(&batch, response, &mut report)?,
                Err(e) => {
                    let message = e.to_string();
                    error!(items = batch.len(), error = %message, "Sync push failed");
                    for item in &batch {
                        self.record_failure(item, &message, &mut report)?;
                    }
                    in_flight.clear();
                    return Ok(PassOutcome::TransportFailed {
                        error: message,
                        report,
                    });
                }
            }
            in_flight.clear();
        }

        if report.batches == 0 {
            return Ok(PassOutcome::Empty);
        }

        info!(
            batches = report.batches,
            applied = report.applied,
            failed = report.failed,
            dead_lettered = report.dead_lettered,
            "Sync pass completed"
        );
        Ok(PassOutcome::Completed(report))
    }

    fn settle_batch(
        &self,
        batch: &[SyncQueueItem],
        response: SyncResponse,
        report: &mut SyncReport,
    ) -> Result<()> {
        let offset = response.server_time - Utc::now();
        *self.clock_offset.lock() = Some(offset);
        report.server_time = Some(response.server_time);

        let applied: HashSet<&str> = response.applied.iter().map(String::as_str).collect();
        let failed: HashMap<&str, &str> = response
            .failed
            .iter()
            .map(|f| (f.temp_id.as_str(), f.error.as_str()))
            .collect();

        for item in batch {
            if applied.contains(item.temp_id.as_str()) {
                self.queue.mark_done(item.local_id)?;
                report.applied += 1;
            } else {
                let reason = failed
                    .get(item.temp_id.as_str())
                    .copied()
                    .unwrap_or("No outcome reported by server");
                debug!(local_id = item.local_id, temp_id = %item.temp_id, reason, "Sync item rejected");
                self.record_failure(item, reason, report)?;
            }
        }

        Ok(())
    }

    fn record_failure(&self, item: &SyncQueueItem, reason: &str, report: &mut SyncReport) -> Result<()> {
        match self.queue.mark_failed(item.local_id, reason)? {
            QueueStatus::DeadLetter => report.dead_lettered += 1,
            _ => report.failed += 1,
        }
        Ok(())
    }
}
