//! Sync reconciler: idempotent replay of queued offline intents
//!
//! Each item in a batch is applied independently. Outcomes are reported per
//! item, keyed by the client's `tempId`, so one bad item never blocks the
//! rest of the batch.
//!
//! - CREATE is keyed by the client-generated entity id. A replay of an id
//!   that is already stored is a no-op success.
//! - DELETE tombstones the entity only if it belongs to the named group, was
//!   authored by the caller, and the caller is still a member. A delete that
//!   matches nothing is reported as applied and listed in `ignored`.

use crate::{
    access,
    error::{Error, Result},
    metrics::Metrics,
    records,
    storage::{Authored, Document, Storage},
    types::{Expense, ExpenseId, GroupId, Settlement, SettlementId, UserId},
    validation::{parse_id, NewExpense, NewSettlement},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Replayable operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    /// Create with a client-generated id
    Create,
    /// Soft delete
    Delete,
}

impl Operation {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::Delete => "DELETE",
        }
    }

    /// Parse from wire name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATE" => Some(Operation::Create),
            "DELETE" => Some(Operation::Delete),
            _ => None,
        }
    }
}

/// Entity kinds that can be replayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Expense
    Expense,
    /// Settlement
    Settlement,
}

impl EntityKind {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Expense => "expense",
            EntityKind::Settlement => "settlement",
        }
    }

    /// Parse from wire name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "expense" => Some(EntityKind::Expense),
            "settlement" => Some(EntityKind::Settlement),
            _ => None,
        }
    }
}

/// One queued intent as sent over the wire.
///
/// `operation` and `entity` stay raw strings so that an unknown kind fails
/// only its own item instead of the whole request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
    /// Client correlation id
    pub temp_id: String,
    /// `CREATE` or `DELETE`
    pub operation: String,
    /// `expense` or `settlement`
    pub entity: String,
    /// Client-generated entity id
    pub entity_id: String,
    /// Owning group
    pub group_id: String,
    /// Entity fields for CREATE
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Batch of queued intents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Items in client queue order
    #[serde(default)]
    pub operations: Vec<SyncOperation>,
}

/// Item that could not be applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedOperation {
    /// Client correlation id
    pub temp_id: String,
    /// Human-readable reason
    pub error: String,
}

/// Per-item outcome of a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    /// Items applied, including idempotent replays and ignored deletes
    pub applied: Vec<String>,
    /// Items that failed, with reasons
    pub failed: Vec<FailedOperation>,
    /// Deletes that matched nothing (also present in `applied`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignored: Vec<String>,
    /// Server clock at the end of the batch
    pub server_time: DateTime<Utc>,
}

impl SyncResponse {
    fn empty() -> Self {
        Self {
            applied: Vec::new(),
            failed: Vec::new(),
            ignored: Vec::new(),
            server_time: Utc::now(),
        }
    }
}

/// Parsed, typed intent
#[derive(Debug, Clone)]
pub enum SyncIntent {
    /// Create an expense under a client id
    CreateExpense {
        /// Client-generated id
        id: ExpenseId,
        /// Owning group
        group_id: GroupId,
        /// Raw fields, validated on apply
        payload: NewExpense,
    },
    /// Create a settlement under a client id
    CreateSettlement {
        /// Client-generated id
        id: SettlementId,
        /// Owning group
        group_id: GroupId,
        /// Raw fields, validated on apply
        payload: NewSettlement,
    },
    /// Soft-delete an expense
    DeleteExpense {
        /// Target
        id: ExpenseId,
        /// Group the client believes it belongs to
        group_id: GroupId,
    },
    /// Soft-delete a settlement
    DeleteSettlement {
        /// Target
        id: SettlementId,
        /// Group the client believes it belongs to
        group_id: GroupId,
    },
}

impl SyncIntent {
    /// Parse a wire item; entity kind is checked before the operation
    pub fn parse(op: &SyncOperation) -> Result<Self> {
        let kind = EntityKind::parse(&op.entity)
            .ok_or_else(|| Error::UnsupportedEntity(op.entity.clone()))?;
        let operation = Operation::parse(&op.operation)
            .ok_or_else(|| Error::UnsupportedOperation(op.operation.clone()))?;
        let group_id: GroupId = parse_id("groupId", &op.group_id)?;

        let intent = match (kind, operation) {
            (EntityKind::Expense, Operation::Create) => SyncIntent::CreateExpense {
                id: parse_id("entityId", &op.entity_id)?,
                group_id,
                payload: serde_json::from_value(op.payload.clone())?,
            },
            (EntityKind::Settlement, Operation::Create) => SyncIntent::CreateSettlement {
                id: parse_id("entityId", &op.entity_id)?,
                group_id,
                payload: serde_json::from_value(op.payload.clone())?,
            },
            (EntityKind::Expense, Operation::Delete) => SyncIntent::DeleteExpense {
                id: parse_id("entityId", &op.entity_id)?,
                group_id,
            },
            (EntityKind::Settlement, Operation::Delete) => SyncIntent::DeleteSettlement {
                id: parse_id("entityId", &op.entity_id)?,
                group_id,
            },
        };

        Ok(intent)
    }
}

enum Outcome {
    Applied,
    Replayed,
    Ignored,
}

/// Server-side batch applier
#[derive(Debug, Clone)]
pub struct Reconciler {
    storage: Arc<Storage>,
    metrics: Metrics,
    max_batch_size: usize,
}

impl Reconciler {
    /// Create reconciler over a shared store
    pub fn new(storage: Arc<Storage>, metrics: Metrics, max_batch_size: usize) -> Self {
        Self {
            storage,
            metrics,
            max_batch_size,
        }
    }

    /// Largest batch accepted
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Apply a batch on behalf of `user`.
    ///
    /// Only an oversized batch fails as a whole; every other problem is
    /// reported in `failed` against its item.
    pub fn apply_batch(&self, user: UserId, request: SyncRequest) -> Result<SyncResponse> {
        if request.operations.len() > self.max_batch_size {
            return Err(Error::validation(
                "operations",
                format!(
                    "Batch of {} exceeds the limit of {}",
                    request.operations.len(),
                    self.max_batch_size
                ),
            ));
        }

        if request.operations.is_empty() {
            return Ok(SyncResponse::empty());
        }

        let mut response = SyncResponse::empty();
        let mut replayed = 0usize;

        for op in &request.operations {
            match self.apply_one(user, op) {
                Ok(outcome) => {
                    response.applied.push(op.temp_id.clone());
                    match outcome {
                        Outcome::Applied => {}
                        Outcome::Replayed => replayed += 1,
                        Outcome::Ignored => response.ignored.push(op.temp_id.clone()),
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        temp_id = %op.temp_id,
                        entity = %op.entity,
                        operation = %op.operation,
                        error = %e,
                        "Sync item failed"
                    );
                    response.failed.push(FailedOperation {
                        temp_id: op.temp_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        self.metrics.record_sync_batch(
            response.applied.len(),
            response.failed.len(),
            response.ignored.len(),
        );

        tracing::info!(
            user_id = %user,
            applied = response.applied.len(),
            replayed,
            ignored = response.ignored.len(),
            failed = response.failed.len(),
            "Sync batch applied"
        );

        response.server_time = Utc::now();
        Ok(response)
    }

    fn apply_one(&self, user: UserId, op: &SyncOperation) -> Result<Outcome> {
        let now = Utc::now();

        match SyncIntent::parse(op)? {
            SyncIntent::CreateExpense { id, group_id, payload } => {
                if self.storage.contains::<Expense>(id.key())? {
                    return Ok(Outcome::Replayed);
                }
                let membership = access::require_member(&self.storage, group_id, user)?;
                let draft = payload.validate()?;
                let expense =
                    records::build_expense(&membership, id, draft, now, Some(op.temp_id.clone()))?;
                self.insert(&expense)
            }
            SyncIntent::CreateSettlement { id, group_id, payload } => {
                if self.storage.contains::<Settlement>(id.key())? {
                    return Ok(Outcome::Replayed);
                }
                let membership = access::require_member(&self.storage, group_id, user)?;
                let draft = payload.validate()?;
                let settlement =
                    records::build_settlement(&membership, id, draft, now, Some(op.temp_id.clone()))?;
                self.insert(&settlement)
            }
            SyncIntent::DeleteExpense { id, group_id } => {
                self.delete_authored::<Expense>(id.key(), group_id, user, now, &op.temp_id)
            }
            SyncIntent::DeleteSettlement { id, group_id } => {
                self.delete_authored::<Settlement>(id.key(), group_id, user, now, &op.temp_id)
            }
        }
    }

    fn insert<D: Document>(&self, doc: &D) -> Result<Outcome> {
        if self.storage.insert_if_absent(doc)? {
            Ok(Outcome::Applied)
        } else {
            // Lost a race with a concurrent replay of the same item
            Ok(Outcome::Replayed)
        }
    }

    fn delete_authored<D: Document + Authored>(
        &self,
        key: [u8; 16],
        group_id: GroupId,
        user: UserId,
        now: DateTime<Utc>,
        temp_id: &str,
    ) -> Result<Outcome> {
        let deleted = access::is_member(&self.storage, group_id, user)?
            && self.storage.soft_delete_where::<D, _>(key, now, |doc| {
                doc.group_id() == group_id && doc.created_by() == user
            })?;

        if deleted {
            Ok(Outcome::Applied)
        } else {
            tracing::debug!(
                temp_id,
                kind = D::KIND,
                group_id = %group_id,
                "Sync delete matched nothing"
            );
            Ok(Outcome::Ignored)
        }
    }
}
