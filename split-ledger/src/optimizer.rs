//! Settlement optimizer: greedy largest-vs-largest debt netting
//!
//! Creditors and debtors are each sorted by magnitude (descending, ties in
//! input order) and matched pairwise; every step zeroes at least one party,
//! so a plan never exceeds `members - 1` transfers and runs in O(N log N).
//!
//! This is a heuristic. Finding the fewest transfers in general is a
//! partition-style problem (groups of debtors that exactly cancel groups of
//! creditors can be settled separately), and some balance distributions
//! admit shorter plans than the one produced here.

use crate::types::{Amount, BalanceEntry, MemberId, TransferSuggestion};

struct Party<'a> {
    member_id: MemberId,
    name: &'a str,
    remaining: Amount,
}

/// Compute suggested transfers that zero every balance.
///
/// When the input does not sum to zero, matching stops as soon as either
/// side is exhausted and the leftover stays unsettled.
pub fn suggest_transfers(balances: &[BalanceEntry]) -> Vec<TransferSuggestion> {
    let mut creditors: Vec<Party<'_>> = balances
        .iter()
        .filter(|b| b.net_balance > 0)
        .map(|b| Party {
            member_id: b.member_id,
            name: &b.name,
            remaining: b.net_balance,
        })
        .collect();

    let mut debtors: Vec<Party<'_>> = balances
        .iter()
        .filter(|b| b.net_balance < 0)
        .map(|b| Party {
            member_id: b.member_id,
            name: &b.name,
            remaining: -b.net_balance,
        })
        .collect();

    // Largest first; sort_by is stable so equal amounts keep member order
    creditors.sort_by(|a, b| b.remaining.cmp(&a.remaining));
    debtors.sort_by(|a, b| b.remaining.cmp(&a.remaining));

    let mut transfers = Vec::new();
    let mut ci = 0;
    let mut di = 0;

    while ci < creditors.len() && di < debtors.len() {
        let amount = creditors[ci].remaining.min(debtors[di].remaining);

        transfers.push(TransferSuggestion {
            from: debtors[di].member_id,
            from_name: debtors[di].name.to_string(),
            to: creditors[ci].member_id,
            to_name: creditors[ci].name.to_string(),
            amount,
        });

        creditors[ci].remaining -= amount;
        debtors[di].remaining -= amount;

        if creditors[ci].remaining == 0 {
            ci += 1;
        }
        if debtors[di].remaining == 0 {
            di += 1;
        }
    }

    tracing::debug!(
        parties = balances.len(),
        transfers = transfers.len(),
        "Computed settlement plan"
    );

    transfers
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn entry(name: &str, net_balance: Amount) -> BalanceEntry {
        BalanceEntry {
            member_id: MemberId::new(),
            name: name.to_string(),
            net_balance,
        }
    }

    #[test]
    fn test_single_creditor_two_debtors() {
        let balances = vec![entry("A", 500), entry("B", -300), entry("C", -200)];
        let transfers = suggest_transfers(&balances);

        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[0].from, balances[1].member_id);
        assert_eq!(transfers[0].to, balances[0].member_id);
        assert_eq!(transfers[0].amount, 300);
        assert_eq!(transfers[0].from_name, "B");
        assert_eq!(transfers[1].from, balances[2].member_id);
        assert_eq!(transfers[1].amount, 200);
    }

    #[test]
    fn test_settled_group_needs_no_transfers() {
        let balances = vec![entry("A", 0), entry("B", 0)];
        assert!(suggest_transfers(&balances).is_empty());
        assert!(suggest_transfers(&[]).is_empty());
    }

    #[test]
    fn test_totals_match_original_positions() {
        let balances = vec![
            entry("A", 1234),
            entry("B", -999),
            entry("C", 401),
            entry("D", -17),
            entry("E", -619),
        ];
        let transfers = suggest_transfers(&balances);
        assert!(transfers.len() <= balances.len() - 1);

        let mut received: HashMap<MemberId, Amount> = HashMap::new();
        let mut paid: HashMap<MemberId, Amount> = HashMap::new();
        for t in &transfers {
            assert!(t.amount > 0);
            *received.entry(t.to).or_default() += t.amount;
            *paid.entry(t.from).or_default() += t.amount;
        }

        for b in &balances {
            if b.net_balance > 0 {
                assert_eq!(received[&b.member_id], b.net_balance);
            } else {
                assert_eq!(paid[&b.member_id], -b.net_balance);
            }
        }
    }

    #[test]
    fn test_ties_resolve_in_input_order() {
        let balances = vec![entry("A", 100), entry("B", 100), entry("C", -100), entry("D", -100)];
        let transfers = suggest_transfers(&balances);
        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[0].to_name, "A");
        assert_eq!(transfers[0].from_name, "C");
        assert_eq!(transfers[1].to_name, "B");
        assert_eq!(transfers[1].from_name, "D");
    }

    #[test]
    fn test_heuristic_is_not_always_minimal() {
        // A can be paid by {C, E} and B by {D, F}: four transfers suffice,
        // greedy matching splits a debtor across creditors and needs five
        let balances = vec![
            entry("A", 500),
            entry("B", 500),
            entry("C", -300),
            entry("D", -300),
            entry("E", -200),
            entry("F", -200),
        ];
        let transfers = suggest_transfers(&balances);
        assert_eq!(transfers.len(), 5);
        assert!(transfers.len() <= balances.len() - 1);
        assert_eq!(transfers.iter().map(|t| t.amount).sum::<Amount>(), 1000);
    }
}
