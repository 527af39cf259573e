//! Equal-split calculator
//!
//! Divides an integer total across an ordered participant list. The first
//! `total % n` participants absorb one extra minor unit each, so the order
//! passed in decides who carries the remainder. Expenses store the result
//! instead of recomputing it from live membership.
//!
//! ```
//! use split_ledger::split::calculate_equal_split;
//! use split_ledger::types::MemberId;
//!
//! let members = vec![MemberId::new(), MemberId::new(), MemberId::new()];
//! let shares: Vec<i64> = calculate_equal_split(1000, &members)
//!     .iter()
//!     .map(|s| s.amount)
//!     .collect();
//! assert_eq!(shares, vec![334, 333, 333]);
//! ```

use crate::types::{Amount, MemberId, SplitShare};

/// Split `total` across `members` in order.
///
/// Returns an empty vector for an empty participant list; callers validate
/// that at least one participant is present.
pub fn calculate_equal_split(total: Amount, members: &[MemberId]) -> Vec<SplitShare> {
    if members.is_empty() {
        return Vec::new();
    }

    let n = members.len() as Amount;
    let base = total.div_euclid(n);
    let remainder = total - base * n;

    members
        .iter()
        .enumerate()
        .map(|(i, member_id)| SplitShare {
            member_id: *member_id,
            amount: if (i as Amount) < remainder { base + 1 } else { base },
        })
        .collect()
}

/// Per-person base amount, for display only.
pub fn base_split_amount(total: Amount, count: usize) -> Amount {
    if count == 0 {
        return 0;
    }
    total.div_euclid(count as Amount)
}
