//! SplitFree Ledger
//!
//! Server of record for shared group expenses: derives every member's net
//! balance from an expense and settlement history, suggests transfers that
//! settle the group, and replays offline clients' queued writes.
//!
//! # Architecture
//!
//! - **Frozen splits**: participant order and shares are stored on the expense
//! - **Derived balances**: recomputed from history on every read, never stored
//! - **Optimistic concurrency**: direct edits compare-and-increment a version
//! - **Idempotent sync**: queued creates are keyed by client-generated ids
//!
//! # Invariants
//!
//! - Σ(shares) == amount for every expense, to the minor unit
//! - Σ(positions) == 0 for every group, removed members included
//! - Versions only grow; tombstones are never cleared

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod split;
pub mod balance;
pub mod optimizer;
pub mod storage;
pub mod access;
pub mod records;
pub mod validation;
pub mod ledger;
pub mod sync;
pub mod error;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, Result};
pub use types::{
    Amount, BalanceEntry, Currency, Expense, ExpenseCategory, ExpenseId, Group, GroupId, Member,
    MemberId, Role, Settlement, SettlementId, SplitShare, TransferSuggestion, User, UserId,
};
pub use validation::{
    NewExpense, NewGroup, NewMember, NewSettlement, UpdateExpense, UpdateGroup, UpdateMember,
    UpdateSettlement,
};
pub use sync::{
    EntityKind, FailedOperation, Operation, Reconciler, SyncOperation, SyncRequest, SyncResponse,
};
pub use ledger::{ExpensePage, Ledger, PageRequest};
pub use storage::Storage;
pub use metrics::Metrics;
pub use config::Config;
