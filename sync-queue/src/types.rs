//! Queue item types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use split_ledger::{
    EntityKind, ExpenseId, GroupId, NewExpense, NewSettlement, Operation, SettlementId,
    SyncOperation,
};
use std::fmt;
use uuid::Uuid;

/// Lifecycle of a queued intent.
///
/// `done` is not a status: a confirmed item is removed from the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting for its first attempt
    Pending,
    /// Part of an in-flight batch
    Syncing,
    /// Last attempt failed; retried on the next pass
    Failed,
    /// Retry ceiling reached; kept for inspection until requeued or cleared
    DeadLetter,
}

impl QueueStatus {
    /// Status name
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Syncing => "syncing",
            QueueStatus::Failed => "failed",
            QueueStatus::DeadLetter => "dead_letter",
        }
    }

    /// Counts against capacity and is picked up by the next pass
    pub fn is_waiting(&self) -> bool {
        matches!(self, QueueStatus::Pending | QueueStatus::Failed)
    }

    /// Occupies a slot against `max_queue_size`; everything but dead letters
    pub fn holds_capacity(&self) -> bool {
        !matches!(self, QueueStatus::DeadLetter)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable offline write intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    /// Monotonic local id (queue order)
    pub local_id: u64,
    /// Correlation id echoed back by the server
    pub temp_id: String,
    /// Intent
    pub operation: Operation,
    /// Target kind
    pub entity_kind: EntityKind,
    /// Client-generated entity id
    pub entity_id: String,
    /// Owning group
    pub group_id: String,
    /// Entity fields (CREATE only)
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Current status
    pub status: QueueStatus,
    /// Failed attempts so far
    pub retries: u32,
    /// Enqueue time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
    /// Reason for the last failure
    #[serde(default)]
    pub error_message: Option<String>,
}

impl SyncQueueItem {
    /// Wire form of this intent
    pub fn to_operation(&self) -> SyncOperation {
        SyncOperation {
            temp_id: self.temp_id.clone(),
            operation: self.operation.as_str().to_string(),
            entity: self.entity_kind.as_str().to_string(),
            entity_id: self.entity_id.clone(),
            group_id: self.group_id.clone(),
            payload: self.payload.clone(),
        }
    }
}

/// Intent about to be enqueued
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueItem {
    /// Correlation id
    pub temp_id: String,
    /// Intent
    pub operation: Operation,
    /// Target kind
    pub entity_kind: EntityKind,
    /// Client-generated entity id
    pub entity_id: String,
    /// Owning group
    pub group_id: String,
    /// Entity fields
    pub payload: serde_json::Value,
}

impl NewQueueItem {
    /// Queue an expense created offline
    pub fn create_expense(
        id: ExpenseId,
        group_id: GroupId,
        expense: &NewExpense,
    ) -> crate::Result<Self> {
        Ok(Self::new(
            Operation::Create,
            EntityKind::Expense,
            id.to_string(),
            group_id,
            serde_json::to_value(expense)?,
        ))
    }

    /// Queue a settlement recorded offline
    pub fn create_settlement(
        id: SettlementId,
        group_id: GroupId,
        settlement: &NewSettlement,
    ) -> crate::Result<Self> {
        Ok(Self::new(
            Operation::Create,
            EntityKind::Settlement,
            id.to_string(),
            group_id,
            serde_json::to_value(settlement)?,
        ))
    }

    /// Queue an expense deletion
    pub fn delete_expense(id: ExpenseId, group_id: GroupId) -> Self {
        Self::new(
            Operation::Delete,
            EntityKind::Expense,
            id.to_string(),
            group_id,
            serde_json::Value::Null,
        )
    }

    /// Queue a settlement deletion
    pub fn delete_settlement(id: SettlementId, group_id: GroupId) -> Self {
        Self::new(
            Operation::Delete,
            EntityKind::Settlement,
            id.to_string(),
            group_id,
            serde_json::Value::Null,
        )
    }

    fn new(
        operation: Operation,
        entity_kind: EntityKind,
        entity_id: String,
        group_id: GroupId,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            temp_id: Uuid::new_v4().to_string(),
            operation,
            entity_kind,
            entity_id,
            group_id: group_id.to_string(),
            payload,
        }
    }
}

/// Receipt for an accepted intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enqueued {
    /// Assigned local id
    pub local_id: u64,
    /// Correlation id
    pub temp_id: String,
    /// Queue crossed the warning threshold; caller should surface it
    pub near_capacity: bool,
}
