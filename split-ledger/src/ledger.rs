//! Main ledger service
//!
//! Ties storage, access checks, validation, the balance engine and the sync
//! reconciler into the API the transport layer calls. Every method takes the
//! caller's identity first; authentication happens upstream.
//!
//! Direct edits carry the version the caller last observed and go through
//! [`Storage::compare_and_swap`], so two edits made from the same stale read
//! cannot both land.
//!
//! # Example
//!
//! ```no_run
//! use split_ledger::{Config, Ledger, NewGroup};
//!
//! fn main() -> split_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default())?;
//!     let ana = ledger.register_user("ana@example.com", "Ana")?;
//!
//!     let group = ledger.create_group(
//!         ana.id,
//!         NewGroup {
//!             name: "Flat".to_string(),
//!             description: None,
//!             currency: "EUR".to_string(),
//!         },
//!     )?;
//!
//!     for entry in ledger.balances(ana.id, group.id)? {
//!         println!("{}: {}", entry.name, entry.net_balance);
//!     }
//!     Ok(())
//! }
//! ```

use crate::{
    access::{self, Membership},
    balance, optimizer, records,
    storage::{Authored, Document, Storage},
    sync::{Reconciler, SyncRequest, SyncResponse},
    types::{
        BalanceEntry, Currency, Expense, ExpenseCategory, ExpenseId, Group, GroupId, Member,
        MemberId, Role, Settlement, SettlementId, TransferSuggestion, User, UserId,
    },
    validation::{
        normalize_email, required_text, NewExpense, NewGroup, NewMember, NewSettlement,
        UpdateExpense, UpdateGroup, UpdateMember, UpdateSettlement,
    },
    Config, Error, Metrics, Result,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Default expense page size
pub const DEFAULT_PAGE_SIZE: u32 = 20;
/// Largest expense page size
pub const MAX_PAGE_SIZE: u32 = 100;

/// Expense list paging (out-of-range values are clamped)
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PageRequest {
    /// 1-based page
    pub page: Option<u32>,
    /// Items per page
    pub limit: Option<u32>,
}

/// One page of expenses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpensePage {
    /// Expenses, newest date first
    pub expenses: Vec<Expense>,
    /// Alive expenses in the group
    pub total: usize,
    /// Page served
    pub page: u32,
    /// Page size served
    pub limit: u32,
}

/// Main ledger interface
#[derive(Debug)]
pub struct Ledger {
    storage: Arc<Storage>,
    reconciler: Reconciler,
    metrics: Metrics,
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration
    pub fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Metrics::new()?;
        let reconciler = Reconciler::new(storage.clone(), metrics.clone(), config.sync.max_batch_size);

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            "Ledger opened"
        );

        Ok(Self {
            storage,
            reconciler,
            metrics,
            config,
        })
    }

    /// Configuration in effect
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Reconciler sharing this ledger's store
    pub fn reconciler(&self) -> Reconciler {
        self.reconciler.clone()
    }

    /// Storage (for advanced use)
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Replay a batch of queued offline intents
    pub fn sync(&self, user: UserId, request: SyncRequest) -> Result<SyncResponse> {
        self.reconciler.apply_batch(user, request)
    }

    /// Record a version conflict before passing the error on
    fn track<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_conflict() {
                self.metrics.record_conflict();
                tracing::warn!(error = %e, "Rejected stale edit");
            }
        }
        result
    }

    // Identities

    /// Register an identity (normally done by the auth layer on first login)
    pub fn register_user(&self, email: &str, name: &str) -> Result<User> {
        let email = normalize_email("email", Some(email))?
            .ok_or_else(|| Error::validation("email", "Email is required"))?;
        let name = required_text("name", name, 100)?;

        if self.storage.find_user_by_email(&email)?.is_some() {
            return Err(Error::AlreadyExists(format!("User with email {}", email)));
        }

        let user = User {
            id: UserId::new(),
            email,
            name,
            created_at: Utc::now(),
        };
        self.storage.put_user(&user)?;

        tracing::info!(user_id = %user.id, "Registered user");
        Ok(user)
    }

    /// Get identity
    pub fn get_user(&self, user_id: UserId) -> Result<User> {
        self.storage.get_user(user_id)?.ok_or_else(|| Error::NotFound {
            kind: "user",
            id: user_id.to_string(),
        })
    }

    // Groups

    /// Create a group; the caller becomes its owner member
    pub fn create_group(&self, user: UserId, input: NewGroup) -> Result<Group> {
        let draft = input.validate()?;
        let owner = self.get_user(user)?;
        let now = Utc::now();

        let group = Group {
            id: GroupId::new(),
            name: draft.name,
            description: draft.description,
            currency: draft.currency,
            owner: user,
            created_at: now,
            updated_at: now,
            version: 1,
            deleted_at: None,
        };
        let member = Member {
            id: MemberId::new(),
            group_id: group.id,
            user_id: Some(user),
            name: owner.name,
            email: Some(owner.email),
            role: Role::Owner,
            is_virtual: false,
            created_at: now,
            updated_at: now,
            version: 1,
            deleted_at: None,
        };

        self.storage.insert_if_absent(&group)?;
        self.storage.insert_if_absent(&member)?;

        tracing::info!(group_id = %group.id, owner = %user, "Created group");
        Ok(group)
    }

    /// Get a group the caller belongs to
    pub fn get_group(&self, user: UserId, group_id: GroupId) -> Result<Group> {
        Ok(access::require_member(&self.storage, group_id, user)?.group)
    }

    /// Alive groups the caller belongs to, oldest first
    pub fn list_groups(&self, user: UserId) -> Result<Vec<Group>> {
        let mut groups = Vec::new();
        for member in self.storage.scan::<Member>()? {
            if member.user_id != Some(user) || member.deleted_at.is_some() {
                continue;
            }
            if let Some(group) = self.storage.get::<Group>(member.group_id.key())? {
                if group.deleted_at.is_none() {
                    groups.push(group);
                }
            }
        }
        groups.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        groups.dedup_by_key(|g| g.id);
        Ok(groups)
    }

    /// Update group settings (owner only)
    pub fn update_group(&self, user: UserId, group_id: GroupId, input: UpdateGroup) -> Result<Group> {
        let patch = input.validate()?;
        access::require_owner(&self.storage, group_id, user)?;

        self.track(self.storage.compare_and_swap(
            group_id.key(),
            patch.version,
            Utc::now(),
            |group: &mut Group| {
                if let Some(name) = &patch.name {
                    group.name = name.clone();
                }
                if let Some(description) = &patch.description {
                    group.description = description.clone();
                }
                if let Some(currency) = patch.currency {
                    group.currency = currency;
                }
                Ok(())
            },
        ))
    }

    /// Soft-delete a group (owner only)
    pub fn delete_group(&self, user: UserId, group_id: GroupId) -> Result<()> {
        access::require_owner(&self.storage, group_id, user)?;
        self.tombstone::<Group, _>(group_id.key(), |_| true)?;
        tracing::info!(group_id = %group_id, "Deleted group");
        Ok(())
    }

    // Members

    /// Add a member (owner only).
    ///
    /// An email matching a registered identity links the member to it;
    /// otherwise the member is virtual.
    pub fn add_member(&self, user: UserId, group_id: GroupId, input: NewMember) -> Result<Member> {
        let draft = input.validate()?;
        let membership = access::require_owner(&self.storage, group_id, user)?;

        let linked = match &draft.email {
            Some(email) => self.storage.find_user_by_email(email)?,
            None => None,
        };
        if let Some(linked) = &linked {
            ensure_not_linked(&membership, linked.id, None)?;
        }

        let now = Utc::now();
        let member = Member {
            id: MemberId::new(),
            group_id,
            user_id: linked.as_ref().map(|u| u.id),
            name: draft.name,
            email: draft.email,
            role: Role::Member,
            is_virtual: linked.is_none(),
            created_at: now,
            updated_at: now,
            version: 1,
            deleted_at: None,
        };
        self.storage.insert_if_absent(&member)?;

        tracing::info!(group_id = %group_id, member_id = %member.id, linked = !member.is_virtual, "Added member");
        Ok(member)
    }

    /// Alive members, in creation order
    pub fn list_members(&self, user: UserId, group_id: GroupId) -> Result<Vec<Member>> {
        Ok(access::require_member(&self.storage, group_id, user)?.members)
    }

    /// Update a member's name or email (owner only).
    ///
    /// Linked members keep their email. Giving a virtual member the email of
    /// a registered identity links it.
    pub fn update_member(
        &self,
        user: UserId,
        group_id: GroupId,
        member_id: MemberId,
        input: UpdateMember,
    ) -> Result<Member> {
        let patch = input.validate()?;
        let membership = access::require_owner(&self.storage, group_id, user)?;
        let current = membership.find_member(member_id).ok_or_else(|| Error::NotFound {
            kind: Member::KIND,
            id: member_id.to_string(),
        })?;

        if patch.email.is_some() && !current.is_virtual {
            return Err(Error::validation("email", "Cannot change email for a linked member"));
        }

        let linked = match &patch.email {
            Some(email) => self.storage.find_user_by_email(email)?,
            None => None,
        };
        if let Some(linked) = &linked {
            ensure_not_linked(&membership, linked.id, Some(member_id))?;
        }

        self.track(self.storage.compare_and_swap(
            member_id.key(),
            patch.version,
            Utc::now(),
            |member: &mut Member| {
                if let Some(name) = &patch.name {
                    member.name = name.clone();
                }
                if let Some(email) = &patch.email {
                    member.email = Some(email.clone());
                }
                if let Some(linked) = &linked {
                    member.user_id = Some(linked.id);
                    member.is_virtual = false;
                }
                Ok(())
            },
        ))
    }

    /// Remove a member (owner only; the owner cannot remove themselves).
    ///
    /// The member's past expense shares still count toward other members'
    /// balances; the member just stops being reported.
    pub fn remove_member(&self, user: UserId, group_id: GroupId, member_id: MemberId) -> Result<()> {
        let membership = access::require_owner(&self.storage, group_id, user)?;
        let member = membership.find_member(member_id).ok_or_else(|| Error::NotFound {
            kind: Member::KIND,
            id: member_id.to_string(),
        })?;

        if member.user_id == Some(user) {
            return Err(Error::Forbidden("Cannot remove yourself from the group".to_string()));
        }

        self.tombstone::<Member, _>(member_id.key(), |m| m.group_id == group_id)?;
        tracing::info!(group_id = %group_id, member_id = %member_id, "Removed member");
        Ok(())
    }

    // Expenses

    /// Record an expense; shares are computed and frozen now
    pub fn create_expense(&self, user: UserId, group_id: GroupId, input: NewExpense) -> Result<Expense> {
        let draft = input.validate()?;
        let membership = access::require_member(&self.storage, group_id, user)?;

        let expense = records::build_expense(&membership, ExpenseId::new(), draft, Utc::now(), None)?;
        self.storage.insert_if_absent(&expense)?;

        tracing::debug!(group_id = %group_id, expense_id = %expense.id, amount = expense.amount, "Created expense");
        Ok(expense)
    }

    /// Get an alive expense of the group
    pub fn get_expense(&self, user: UserId, group_id: GroupId, expense_id: ExpenseId) -> Result<Expense> {
        access::require_member(&self.storage, group_id, user)?;
        self.get_in_group::<Expense>(expense_id.key(), group_id)
    }

    /// Alive expenses, newest date first, paginated
    pub fn list_expenses(&self, user: UserId, group_id: GroupId, request: PageRequest) -> Result<ExpensePage> {
        access::require_member(&self.storage, group_id, user)?;

        let page = request.page.unwrap_or(1).max(1);
        let limit = request.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

        let mut expenses = self.alive::<Expense>(group_id)?;
        expenses.sort_by(|a, b| b.date.cmp(&a.date).then(b.created_at.cmp(&a.created_at)));

        let total = expenses.len();
        let skip = (page as usize - 1).saturating_mul(limit as usize);
        let expenses = expenses.into_iter().skip(skip).take(limit as usize).collect();

        Ok(ExpensePage {
            expenses,
            total,
            page,
            limit,
        })
    }

    /// Edit an expense (author only, version checked)
    pub fn update_expense(
        &self,
        user: UserId,
        group_id: GroupId,
        expense_id: ExpenseId,
        input: UpdateExpense,
    ) -> Result<Expense> {
        let patch = input.validate()?;
        let membership = access::require_member(&self.storage, group_id, user)?;
        let current = self.get_in_group::<Expense>(expense_id.key(), group_id)?;
        ensure_author(current.created_by, user)?;

        self.track(self.storage.compare_and_swap(
            expense_id.key(),
            patch.version,
            Utc::now(),
            |expense: &mut Expense| records::apply_expense_patch(expense, &patch, &membership.members),
        ))
    }

    /// Soft-delete an expense (author only)
    pub fn delete_expense(&self, user: UserId, group_id: GroupId, expense_id: ExpenseId) -> Result<()> {
        access::require_member(&self.storage, group_id, user)?;
        let current = self.get_in_group::<Expense>(expense_id.key(), group_id)?;
        ensure_author(current.created_by, user)?;

        self.tombstone::<Expense, _>(expense_id.key(), |e| e.created_by == user)
    }

    // Settlements

    /// Record a repayment
    pub fn create_settlement(
        &self,
        user: UserId,
        group_id: GroupId,
        input: NewSettlement,
    ) -> Result<Settlement> {
        let draft = input.validate()?;
        let membership = access::require_member(&self.storage, group_id, user)?;

        let settlement =
            records::build_settlement(&membership, SettlementId::new(), draft, Utc::now(), None)?;
        self.storage.insert_if_absent(&settlement)?;

        tracing::debug!(group_id = %group_id, settlement_id = %settlement.id, amount = settlement.amount, "Created settlement");
        Ok(settlement)
    }

    /// Alive settlements, newest date first
    pub fn list_settlements(&self, user: UserId, group_id: GroupId) -> Result<Vec<Settlement>> {
        access::require_member(&self.storage, group_id, user)?;
        let mut settlements = self.alive::<Settlement>(group_id)?;
        settlements.sort_by(|a, b| b.date.cmp(&a.date).then(b.created_at.cmp(&a.created_at)));
        Ok(settlements)
    }

    /// Edit a settlement's amount, note or date (author only, version checked)
    pub fn update_settlement(
        &self,
        user: UserId,
        group_id: GroupId,
        settlement_id: SettlementId,
        input: UpdateSettlement,
    ) -> Result<Settlement> {
        let patch = input.validate()?;
        access::require_member(&self.storage, group_id, user)?;
        let current = self.get_in_group::<Settlement>(settlement_id.key(), group_id)?;
        ensure_author(current.created_by, user)?;

        self.track(self.storage.compare_and_swap(
            settlement_id.key(),
            patch.version,
            Utc::now(),
            |settlement: &mut Settlement| {
                records::apply_settlement_patch(settlement, &patch);
                Ok(())
            },
        ))
    }

    /// Soft-delete a settlement (author only)
    pub fn delete_settlement(&self, user: UserId, group_id: GroupId, settlement_id: SettlementId) -> Result<()> {
        access::require_member(&self.storage, group_id, user)?;
        let current = self.get_in_group::<Settlement>(settlement_id.key(), group_id)?;
        ensure_author(current.created_by, user)?;

        self.tombstone::<Settlement, _>(settlement_id.key(), |s| s.created_by == user)
    }

    // Derived views

    /// Net balance of every alive member, in member order
    pub fn balances(&self, user: UserId, group_id: GroupId) -> Result<Vec<BalanceEntry>> {
        let membership = access::require_member(&self.storage, group_id, user)?;
        let start = Instant::now();

        let expenses = self.storage.list_by_group::<Expense>(group_id)?;
        let settlements = self.storage.list_by_group::<Settlement>(group_id)?;
        let balances = balance::compute_balances(&membership.members, &expenses, &settlements);

        self.metrics.record_balance_duration(start.elapsed().as_secs_f64());
        tracing::debug!(
            group_id = %group_id,
            expenses = expenses.len(),
            settlements = settlements.len(),
            "Computed balances"
        );

        Ok(balances)
    }

    /// Transfers that would settle the group
    pub fn suggested_transfers(&self, user: UserId, group_id: GroupId) -> Result<Vec<TransferSuggestion>> {
        let balances = self.balances(user, group_id)?;
        Ok(optimizer::suggest_transfers(&balances))
    }

    /// Check that the group's positions, removed members included, sum to zero
    pub fn verify_conservation(&self, user: UserId, group_id: GroupId) -> Result<()> {
        access::require_member(&self.storage, group_id, user)?;

        let expenses = self.storage.list_by_group::<Expense>(group_id)?;
        let settlements = self.storage.list_by_group::<Settlement>(group_id)?;
        let total = balance::total_position(&expenses, &settlements);

        if total != 0 {
            tracing::error!(group_id = %group_id, total, "Group positions do not sum to zero");
            return Err(Error::InvariantViolation(format!(
                "Positions in group {} sum to {}",
                group_id, total
            )));
        }
        Ok(())
    }

    /// Supported expense categories
    pub fn categories(&self) -> &'static [ExpenseCategory] {
        &ExpenseCategory::ALL
    }

    /// Supported currencies
    pub fn currencies(&self) -> &'static [Currency] {
        &Currency::ALL
    }

    // Helpers

    fn alive<D: Document>(&self, group_id: GroupId) -> Result<Vec<D>> {
        Ok(self
            .storage
            .list_by_group::<D>(group_id)?
            .into_iter()
            .filter(|d| d.deleted_at().is_none())
            .collect())
    }

    /// Alive document that belongs to `group_id`; anything else is not found
    fn get_in_group<D: Document + Authored>(&self, key: [u8; 16], group_id: GroupId) -> Result<D> {
        let doc = self.storage.get_alive::<D>(key)?;
        if doc.group_id() != group_id {
            return Err(Error::NotFound {
                kind: D::KIND,
                id: Uuid::from_bytes(key).to_string(),
            });
        }
        Ok(doc)
    }

    fn tombstone<D: Document, F: FnOnce(&D) -> bool>(&self, key: [u8; 16], filter: F) -> Result<()> {
        if self.storage.soft_delete_where::<D, F>(key, Utc::now(), filter)? {
            Ok(())
        } else {
            // Deleted (or changed hands) between the check and the write
            Err(Error::Deleted {
                kind: D::KIND,
                id: Uuid::from_bytes(key).to_string(),
            })
        }
    }
}

fn ensure_author(created_by: UserId, user: UserId) -> Result<()> {
    if created_by == user {
        Ok(())
    } else {
        Err(Error::Forbidden("Only the author can change this record".to_string()))
    }
}

fn ensure_not_linked(membership: &Membership, user_id: UserId, except: Option<MemberId>) -> Result<()> {
    let duplicate = membership
        .members
        .iter()
        .any(|m| m.user_id == Some(user_id) && Some(m.id) != except);
    if duplicate {
        Err(Error::AlreadyExists("User is already a member of this group".to_string()))
    } else {
        Ok(())
    }
}
