//! Ledger engine: net balances derived from expense and settlement history
//!
//! Pure aggregation; nothing here touches storage. Every read replays the
//! full history of a group, which costs O(expenses + settlements). That is
//! fine for household-sized groups and is the scaling ceiling tracked by the
//! `balances` benchmark.
//!
//! # Invariants
//!
//! - Each alive expense credits its payer by `amount` and debits its frozen
//!   shares, which sum to `amount`
//! - Each alive settlement credits the payer and debits the payee equally
//! - Therefore Σ(positions over every member ever referenced) == 0

use crate::types::{Amount, BalanceEntry, Expense, Member, MemberId, Settlement};
use std::collections::HashMap;

/// Signed positions for every member referenced by the history.
///
/// Removed members keep accumulating here; only the report filters them.
pub fn net_positions(expenses: &[Expense], settlements: &[Settlement]) -> HashMap<MemberId, Amount> {
    let mut positions: HashMap<MemberId, Amount> = HashMap::new();

    for expense in expenses.iter().filter(|e| e.deleted_at.is_none()) {
        *positions.entry(expense.paid_by).or_insert(0) += expense.amount;
        for share in &expense.split {
            *positions.entry(share.member_id).or_insert(0) -= share.amount;
        }
    }

    for settlement in settlements.iter().filter(|s| s.deleted_at.is_none()) {
        // Paying back reduces what the payer owes
        *positions.entry(settlement.payer).or_insert(0) += settlement.amount;
        *positions.entry(settlement.payee).or_insert(0) -= settlement.amount;
    }

    positions
}

/// Balance report for the alive members, in the order given.
pub fn compute_balances(
    members: &[Member],
    expenses: &[Expense],
    settlements: &[Settlement],
) -> Vec<BalanceEntry> {
    let positions = net_positions(expenses, settlements);

    members
        .iter()
        .filter(|m| m.deleted_at.is_none())
        .map(|m| BalanceEntry {
            member_id: m.id,
            name: m.display_name().to_string(),
            net_balance: positions.get(&m.id).copied().unwrap_or(0),
        })
        .collect()
}

/// Sum of all positions; zero for any well-formed history.
pub fn total_position(expenses: &[Expense], settlements: &[Settlement]) -> Amount {
    net_positions(expenses, settlements).values().sum()
}
