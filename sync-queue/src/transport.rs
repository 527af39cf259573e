//! Transport seam between the queue and the server's reconciler

use crate::error::{Error, Result};
use async_trait::async_trait;
use split_ledger::{Reconciler, SyncRequest, SyncResponse, UserId};

/// One round trip carrying a batch of queued intents
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Send a batch and wait for per-item outcomes.
    ///
    /// An `Err` means no outcome is known for any item in the batch.
    async fn push(&self, request: SyncRequest) -> Result<SyncResponse>;
}

/// Transport that applies batches against an in-process reconciler
#[derive(Debug, Clone)]
pub struct LocalTransport {
    reconciler: Reconciler,
    user: UserId,
}

impl LocalTransport {
    /// Push on behalf of `user`
    pub fn new(reconciler: Reconciler, user: UserId) -> Self {
        Self { reconciler, user }
    }
}

#[async_trait]
impl SyncTransport for LocalTransport {
    async fn push(&self, request: SyncRequest) -> Result<SyncResponse> {
        let reconciler = self.reconciler.clone();
        let user = self.user;

        // Reconciler does blocking RocksDB work
        let response = tokio::task::spawn_blocking(move || reconciler.apply_batch(user, request))
            .await
            .map_err(|e| Error::Transport(format!("Reconciler task failed: {}", e)))??;

        Ok(response)
    }
}
