//! Record construction shared by direct edits and sync replay
//!
//! Both paths must produce identical expenses and settlements for the same
//! input, so membership rules and share freezing live here once.

use crate::{
    access::Membership,
    error::{Error, Result},
    split::calculate_equal_split,
    types::{Expense, ExpenseId, Member, MemberId, Settlement, SettlementId},
    validation::{ExpenseDraft, ExpensePatch, SettlementDraft, SettlementPatch},
};
use chrono::{DateTime, Utc};

fn ensure_participant(members: &[Member], member_id: MemberId, field: &str, role: &str) -> Result<()> {
    if members.iter().any(|m| m.id == member_id) {
        Ok(())
    } else {
        Err(Error::validation(field, format!("{} {} is not a group member", role, member_id)))
    }
}

fn ensure_split_participants(members: &[Member], split_among: &[MemberId]) -> Result<()> {
    for member_id in split_among {
        ensure_participant(members, *member_id, "splitAmong", "Member")?;
    }
    Ok(())
}

/// Build a new expense with frozen shares.
///
/// Payer and participants must be alive members of the caller's group.
pub fn build_expense(
    membership: &Membership,
    id: ExpenseId,
    draft: ExpenseDraft,
    now: DateTime<Utc>,
    temp_id: Option<String>,
) -> Result<Expense> {
    ensure_participant(&membership.members, draft.paid_by, "paidBy", "Payer")?;
    ensure_split_participants(&membership.members, &draft.split_among)?;

    Ok(Expense {
        id,
        group_id: membership.group.id,
        description: draft.description,
        amount: draft.amount,
        currency: membership.group.currency,
        paid_by: draft.paid_by,
        split: calculate_equal_split(draft.amount, &draft.split_among),
        category: draft.category,
        date: draft.date,
        created_by: membership.user,
        created_at: now,
        updated_at: now,
        version: 1,
        deleted_at: None,
        temp_id,
    })
}

/// Apply a validated patch; shares are recomputed whenever the amount or
/// the participant list changes.
pub fn apply_expense_patch(expense: &mut Expense, patch: &ExpensePatch, members: &[Member]) -> Result<()> {
    if let Some(paid_by) = patch.paid_by {
        ensure_participant(members, paid_by, "paidBy", "Payer")?;
        expense.paid_by = paid_by;
    }

    if let Some(split_among) = &patch.split_among {
        ensure_split_participants(members, split_among)?;
    }

    if let Some(description) = &patch.description {
        expense.description = description.clone();
    }
    if let Some(category) = patch.category {
        expense.category = category;
    }
    if let Some(date) = patch.date {
        expense.date = date;
    }

    if patch.amount.is_some() || patch.split_among.is_some() {
        let amount = patch.amount.unwrap_or(expense.amount);
        let split_among = match &patch.split_among {
            Some(split_among) => split_among.clone(),
            None => expense.split_among(),
        };
        expense.amount = amount;
        expense.split = calculate_equal_split(amount, &split_among);
    }

    Ok(())
}

/// Build a new settlement.
///
/// A caller who does not own the group may only record their own payments.
pub fn build_settlement(
    membership: &Membership,
    id: SettlementId,
    draft: SettlementDraft,
    now: DateTime<Utc>,
    temp_id: Option<String>,
) -> Result<Settlement> {
    if !membership.is_owner() && draft.payer != membership.member.id {
        return Err(Error::Forbidden(
            "You can only record settlements where you are the payer".to_string(),
        ));
    }

    ensure_participant(&membership.members, draft.payer, "payer", "Payer")?;
    ensure_participant(&membership.members, draft.payee, "payee", "Payee")?;

    Ok(Settlement {
        id,
        group_id: membership.group.id,
        payer: draft.payer,
        payee: draft.payee,
        amount: draft.amount,
        note: draft.note,
        date: draft.date,
        created_by: membership.user,
        created_at: now,
        updated_at: now,
        version: 1,
        deleted_at: None,
        temp_id,
    })
}

/// Apply a validated settlement patch (payer and payee are fixed)
pub fn apply_settlement_patch(settlement: &mut Settlement, patch: &SettlementPatch) {
    if let Some(amount) = patch.amount {
        settlement.amount = amount;
    }
    if let Some(note) = &patch.note {
        settlement.note = note.clone();
    }
    if let Some(date) = patch.date {
        settlement.date = date;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Currency, Group, GroupId, Role, UserId};
    use chrono::NaiveDate;

    fn member(group_id: GroupId, user_id: Option<UserId>) -> Member {
        let now = Utc::now();
        Member {
            id: MemberId::new(),
            group_id,
            user_id,
            name: "M".to_string(),
            email: None,
            role: Role::Member,
            is_virtual: user_id.is_none(),
            created_at: now,
            updated_at: now,
            version: 1,
            deleted_at: None,
        }
    }

    /// Group of three: owner, a linked friend, a virtual member
    fn membership(as_owner: bool) -> Membership {
        let now = Utc::now();
        let owner = UserId::new();
        let friend = UserId::new();
        let group = Group {
            id: GroupId::new(),
            name: "Trip".to_string(),
            description: None,
            currency: Currency::JPY,
            owner,
            created_at: now,
            updated_at: now,
            version: 1,
            deleted_at: None,
        };
        let members = vec![
            member(group.id, Some(owner)),
            member(group.id, Some(friend)),
            member(group.id, None),
        ];
        let (user, caller) = if as_owner {
            (owner, members[0].clone())
        } else {
            (friend, members[1].clone())
        };
        Membership {
            group,
            user,
            member: caller,
            members,
        }
    }

    fn draft(membership: &Membership, amount: i64) -> ExpenseDraft {
        ExpenseDraft {
            description: "Ramen".to_string(),
            amount,
            paid_by: membership.members[0].id,
            split_among: membership.members.iter().map(|m| m.id).collect(),
            category: None,
            date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
        }
    }

    #[test]
    fn test_build_expense_freezes_shares() {
        let membership = membership(true);
        let expense = build_expense(&membership, ExpenseId::new(), draft(&membership, 1000), Utc::now(), None)
            .unwrap();

        assert_eq!(expense.currency, Currency::JPY);
        assert_eq!(expense.split.iter().map(|s| s.amount).collect::<Vec<_>>(), vec![334, 333, 333]);
        assert_eq!(expense.created_by, membership.group.owner);
        assert_eq!(expense.version, 1);
    }

    #[test]
    fn test_build_expense_rejects_outsiders() {
        let membership = membership(true);
        let mut input = draft(&membership, 1000);
        input.split_among.push(MemberId::new());
        let err = build_expense(&membership, ExpenseId::new(), input, Utc::now(), None).unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "splitAmong"));

        let mut input = draft(&membership, 1000);
        input.paid_by = MemberId::new();
        let err = build_expense(&membership, ExpenseId::new(), input, Utc::now(), None).unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "paidBy"));
    }

    #[test]
    fn test_patch_recomputes_shares() {
        let membership = membership(true);
        let mut expense =
            build_expense(&membership, ExpenseId::new(), draft(&membership, 900), Utc::now(), None).unwrap();

        let patch = ExpensePatch {
            version: 1,
            description: None,
            amount: Some(1001),
            paid_by: None,
            split_among: Some(vec![membership.members[2].id, membership.members[0].id]),
            category: None,
            date: None,
        };
        apply_expense_patch(&mut expense, &patch, &membership.members).unwrap();

        assert_eq!(expense.amount, 1001);
        assert_eq!(expense.split[0].member_id, membership.members[2].id);
        assert_eq!(expense.split[0].amount, 501);
        assert_eq!(expense.split[1].amount, 500);
    }

    #[test]
    fn test_patch_amount_keeps_frozen_order() {
        let membership = membership(true);
        let mut expense =
            build_expense(&membership, ExpenseId::new(), draft(&membership, 900), Utc::now(), None).unwrap();
        let order = expense.split_among();

        let patch = ExpensePatch {
            version: 1,
            description: Some("Sushi".to_string()),
            amount: Some(1000),
            paid_by: None,
            split_among: None,
            category: None,
            date: None,
        };
        apply_expense_patch(&mut expense, &patch, &membership.members).unwrap();
        assert_eq!(expense.split_among(), order);
        assert_eq!(expense.split.iter().map(|s| s.amount).sum::<i64>(), 1000);
        assert_eq!(expense.description, "Sushi");
    }

    #[test]
    fn test_non_owner_must_be_payer() {
        let membership = membership(false);
        let others_payment = SettlementDraft {
            payer: membership.members[2].id,
            payee: membership.members[0].id,
            amount: 500,
            note: None,
            date: NaiveDate::from_ymd_opt(2024, 4, 2).unwrap(),
        };
        let err =
            build_settlement(&membership, SettlementId::new(), others_payment.clone(), Utc::now(), None).unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        let own_payment = SettlementDraft {
            payer: membership.member.id,
            ..others_payment
        };
        let settlement =
            build_settlement(&membership, SettlementId::new(), own_payment, Utc::now(), Some("t-1".to_string()))
                .unwrap();
        assert_eq!(settlement.temp_id.as_deref(), Some("t-1"));
    }

    #[test]
    fn test_owner_records_any_payment() {
        let membership = membership(true);
        let draft = SettlementDraft {
            payer: membership.members[2].id,
            payee: membership.members[1].id,
            amount: 500,
            note: Some("cash".to_string()),
            date: NaiveDate::from_ymd_opt(2024, 4, 2).unwrap(),
        };
        assert!(build_settlement(&membership, SettlementId::new(), draft, Utc::now(), None).is_ok());
    }
}
