//! Input validation
//!
//! Wire inputs (`New*`, `Update*`) are plain serde structs holding whatever
//! the client sent. `validate()` turns them into typed drafts or patches, or
//! fails with a field-level [`Error::Validation`] before any state changes.

use crate::{
    error::{Error, Result},
    types::{Amount, Currency, ExpenseCategory, MemberId},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Largest accepted amount in minor units (one billion major units)
pub const MAX_AMOUNT: Amount = 100_000_000_000;

const MAX_NAME_LEN: usize = 100;
const MAX_DESCRIPTION_LEN: usize = 200;
const MAX_GROUP_DESCRIPTION_LEN: usize = 500;
const MAX_NOTE_LEN: usize = 500;

/// Positive integer amount within [`MAX_AMOUNT`]
pub fn validate_amount(field: &str, amount: Amount) -> Result<Amount> {
    if amount <= 0 {
        return Err(Error::validation(field, "Amount must be positive"));
    }
    if amount > MAX_AMOUNT {
        return Err(Error::validation(field, "Amount is too large"));
    }
    Ok(amount)
}

/// Strict `YYYY-MM-DD` calendar date
pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    let bytes = value.as_bytes();
    let shaped = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    if !shaped {
        return Err(Error::validation(field, "Date must be YYYY-MM-DD format"));
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| Error::validation(field, "Date is not a valid calendar day"))
}

/// Parse a UUID-valued field
pub fn parse_id<T: std::str::FromStr>(field: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::validation(field, format!("Invalid id: {:?}", value)))
}

/// Trim and bound a required text field
pub fn required_text(field: &str, value: &str, max: usize) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::validation(field, format!("{} is required", capitalize(field))));
    }
    if trimmed.chars().count() > max {
        return Err(Error::validation(
            field,
            format!("{} must be {} characters or less", capitalize(field), max),
        ));
    }
    Ok(trimmed.to_string())
}

/// Bound an optional text field; empty means absent
pub fn optional_text(field: &str, value: Option<&str>, max: usize) -> Result<Option<String>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) if text.chars().count() > max => Err(Error::validation(
            field,
            format!("{} must be {} characters or less", capitalize(field), max),
        )),
        Some(text) => Ok(Some(text.to_string())),
    }
}

/// Lower-cased email; empty means absent
pub fn normalize_email(field: &str, value: Option<&str>) -> Result<Option<String>> {
    let email = match value.map(str::trim) {
        None | Some("") => return Ok(None),
        Some(email) => email.to_lowercase(),
    };

    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };

    if valid {
        Ok(Some(email))
    } else {
        Err(Error::validation(field, "Invalid email address"))
    }
}

/// ISO 4217 code from the supported set (case-insensitive)
pub fn parse_currency(field: &str, value: &str) -> Result<Currency> {
    let code = value.trim().to_uppercase();
    if code.len() != 3 {
        return Err(Error::validation(field, "Currency must be a 3-letter ISO 4217 code"));
    }
    Currency::from_code(&code)
        .ok_or_else(|| Error::validation(field, format!("Unsupported currency: {}", code)))
}

/// Known category; empty means uncategorized
pub fn parse_category(field: &str, value: Option<&str>) -> Result<Option<ExpenseCategory>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(name) => ExpenseCategory::from_name(&name.to_lowercase())
            .map(Some)
            .ok_or_else(|| Error::validation(field, format!("Unknown category: {}", name))),
    }
}

/// Non-empty participant list without duplicates, order preserved
pub fn parse_split_among(field: &str, values: &[String]) -> Result<Vec<MemberId>> {
    if values.is_empty() {
        return Err(Error::validation(field, "Must split among at least one member"));
    }

    let mut seen = HashSet::with_capacity(values.len());
    let mut members = Vec::with_capacity(values.len());
    for value in values {
        let id: MemberId = parse_id(field, value)?;
        if !seen.insert(id) {
            return Err(Error::validation(field, format!("Member {} listed twice", id)));
        }
        members.push(id);
    }
    Ok(members)
}

fn capitalize(field: &str) -> String {
    let mut chars = field.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// Groups

/// Group creation input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGroup {
    /// Group name
    #[serde(default)]
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// ISO 4217 code
    #[serde(default)]
    pub currency: String,
}

/// Validated group creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDraft {
    /// Trimmed name
    pub name: String,
    /// Description, `None` when empty
    pub description: Option<String>,
    /// Currency
    pub currency: Currency,
}

impl NewGroup {
    /// Validate into a draft
    pub fn validate(&self) -> Result<GroupDraft> {
        Ok(GroupDraft {
            name: required_text("name", &self.name, MAX_NAME_LEN)?,
            description: optional_text(
                "description",
                self.description.as_deref(),
                MAX_GROUP_DESCRIPTION_LEN,
            )?,
            currency: parse_currency("currency", &self.currency)?,
        })
    }
}

/// Group update input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGroup {
    /// Last version the caller observed
    pub version: u64,
    /// New name
    pub name: Option<String>,
    /// New description (empty clears it)
    pub description: Option<String>,
    /// New currency
    pub currency: Option<String>,
}

/// Validated group update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPatch {
    /// Expected version
    pub version: u64,
    /// New name
    pub name: Option<String>,
    /// `Some(None)` clears the description
    pub description: Option<Option<String>>,
    /// New currency
    pub currency: Option<Currency>,
}

impl UpdateGroup {
    /// Validate into a patch
    pub fn validate(&self) -> Result<GroupPatch> {
        Ok(GroupPatch {
            version: self.version,
            name: self
                .name
                .as_deref()
                .map(|n| required_text("name", n, MAX_NAME_LEN))
                .transpose()?,
            description: self
                .description
                .as_deref()
                .map(|d| optional_text("description", Some(d), MAX_GROUP_DESCRIPTION_LEN))
                .transpose()?,
            currency: self
                .currency
                .as_deref()
                .map(|c| parse_currency("currency", c))
                .transpose()?,
        })
    }
}

// Members

/// Member creation input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMember {
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Optional email; links the member when it matches a registered user
    #[serde(default)]
    pub email: Option<String>,
}

/// Validated member creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDraft {
    /// Trimmed name
    pub name: String,
    /// Lower-cased email
    pub email: Option<String>,
}

impl NewMember {
    /// Validate into a draft
    pub fn validate(&self) -> Result<MemberDraft> {
        Ok(MemberDraft {
            name: required_text("name", &self.name, MAX_NAME_LEN)?,
            email: normalize_email("email", self.email.as_deref())?,
        })
    }
}

/// Member update input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMember {
    /// Last version the caller observed
    pub version: u64,
    /// New name
    pub name: Option<String>,
    /// New email (virtual members only; empty means unchanged)
    pub email: Option<String>,
}

/// Validated member update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberPatch {
    /// Expected version
    pub version: u64,
    /// New name
    pub name: Option<String>,
    /// New lower-cased email
    pub email: Option<String>,
}

impl UpdateMember {
    /// Validate into a patch
    pub fn validate(&self) -> Result<MemberPatch> {
        Ok(MemberPatch {
            version: self.version,
            name: self
                .name
                .as_deref()
                .map(|n| required_text("name", n, MAX_NAME_LEN))
                .transpose()?,
            email: normalize_email("email", self.email.as_deref())?,
        })
    }
}

// Expenses

/// Expense creation input (also the payload of a queued CREATE)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewExpense {
    /// What was bought
    #[serde(default)]
    pub description: String,
    /// Total in minor units
    #[serde(default)]
    pub amount: Amount,
    /// Paying member id
    #[serde(default)]
    pub paid_by: String,
    /// Participant member ids, in split order
    #[serde(default)]
    pub split_among: Vec<String>,
    /// Category name
    #[serde(default)]
    pub category: Option<String>,
    /// `YYYY-MM-DD`
    #[serde(default)]
    pub date: String,
}

/// Validated expense creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpenseDraft {
    /// Trimmed description
    pub description: String,
    /// Total in minor units
    pub amount: Amount,
    /// Paying member
    pub paid_by: MemberId,
    /// Participants in split order
    pub split_among: Vec<MemberId>,
    /// Category
    pub category: Option<ExpenseCategory>,
    /// Calendar date
    pub date: NaiveDate,
}

impl NewExpense {
    /// Validate into a draft
    pub fn validate(&self) -> Result<ExpenseDraft> {
        Ok(ExpenseDraft {
            description: required_text("description", &self.description, MAX_DESCRIPTION_LEN)?,
            amount: validate_amount("amount", self.amount)?,
            paid_by: parse_id("paidBy", &self.paid_by)?,
            split_among: parse_split_among("splitAmong", &self.split_among)?,
            category: parse_category("category", self.category.as_deref())?,
            date: parse_date("date", &self.date)?,
        })
    }
}

/// Expense update input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateExpense {
    /// Last version the caller observed
    pub version: u64,
    /// New description
    pub description: Option<String>,
    /// New total
    pub amount: Option<Amount>,
    /// New payer
    pub paid_by: Option<String>,
    /// New participants
    pub split_among: Option<Vec<String>>,
    /// New category (empty clears it)
    pub category: Option<String>,
    /// New date
    pub date: Option<String>,
}

/// Validated expense update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpensePatch {
    /// Expected version
    pub version: u64,
    /// New description
    pub description: Option<String>,
    /// New total
    pub amount: Option<Amount>,
    /// New payer
    pub paid_by: Option<MemberId>,
    /// New participants
    pub split_among: Option<Vec<MemberId>>,
    /// `Some(None)` clears the category
    pub category: Option<Option<ExpenseCategory>>,
    /// New date
    pub date: Option<NaiveDate>,
}

impl UpdateExpense {
    /// Validate into a patch
    pub fn validate(&self) -> Result<ExpensePatch> {
        Ok(ExpensePatch {
            version: self.version,
            description: self
                .description
                .as_deref()
                .map(|d| required_text("description", d, MAX_DESCRIPTION_LEN))
                .transpose()?,
            amount: self
                .amount
                .map(|a| validate_amount("amount", a))
                .transpose()?,
            paid_by: self
                .paid_by
                .as_deref()
                .map(|p| parse_id("paidBy", p))
                .transpose()?,
            split_among: self
                .split_among
                .as_deref()
                .map(|s| parse_split_among("splitAmong", s))
                .transpose()?,
            category: self
                .category
                .as_deref()
                .map(|c| parse_category("category", Some(c)))
                .transpose()?,
            date: self.date.as_deref().map(|d| parse_date("date", d)).transpose()?,
        })
    }
}

// Settlements

/// Settlement creation input (also the payload of a queued CREATE)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSettlement {
    /// Paying member id
    #[serde(default)]
    pub payer: String,
    /// Receiving member id
    #[serde(default)]
    pub payee: String,
    /// Amount in minor units
    #[serde(default)]
    pub amount: Amount,
    /// Optional note
    #[serde(default)]
    pub note: Option<String>,
    /// `YYYY-MM-DD`
    #[serde(default)]
    pub date: String,
}

/// Validated settlement creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementDraft {
    /// Paying member
    pub payer: MemberId,
    /// Receiving member
    pub payee: MemberId,
    /// Amount
    pub amount: Amount,
    /// Note, `None` when empty
    pub note: Option<String>,
    /// Calendar date
    pub date: NaiveDate,
}

impl NewSettlement {
    /// Validate into a draft
    pub fn validate(&self) -> Result<SettlementDraft> {
        let payer: MemberId = parse_id("payer", &self.payer)?;
        let payee: MemberId = parse_id("payee", &self.payee)?;
        if payer == payee {
            return Err(Error::validation("payee", "Payer and payee cannot be the same person"));
        }

        Ok(SettlementDraft {
            payer,
            payee,
            amount: validate_amount("amount", self.amount)?,
            note: optional_text("note", self.note.as_deref(), MAX_NOTE_LEN)?,
            date: parse_date("date", &self.date)?,
        })
    }
}

/// Settlement update input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettlement {
    /// Last version the caller observed
    pub version: u64,
    /// New amount
    pub amount: Option<Amount>,
    /// New note (empty clears it)
    pub note: Option<String>,
    /// New date
    pub date: Option<String>,
}

/// Validated settlement update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementPatch {
    /// Expected version
    pub version: u64,
    /// New amount
    pub amount: Option<Amount>,
    /// `Some(None)` clears the note
    pub note: Option<Option<String>>,
    /// New date
    pub date: Option<NaiveDate>,
}

impl UpdateSettlement {
    /// Validate into a patch
    pub fn validate(&self) -> Result<SettlementPatch> {
        Ok(SettlementPatch {
            version: self.version,
            amount: self
                .amount
                .map(|a| validate_amount("amount", a))
                .transpose()?,
            note: self
                .note
                .as_deref()
                .map(|n| optional_text("note", Some(n), MAX_NOTE_LEN))
                .transpose()?,
            date: self.date.as_deref().map(|d| parse_date("date", d)).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(err: Error) -> String {
        match err {
            Error::Validation { field, .. } => field,
            other => panic!("expected validation error, got {other}"),
        }
    }

    fn expense_input() -> NewExpense {
        NewExpense {
            description: "  Dinner  ".to_string(),
            amount: 4500,
            paid_by: MemberId::new().to_string(),
            split_among: vec![MemberId::new().to_string(), MemberId::new().to_string()],
            category: Some("Food".to_string()),
            date: "2024-02-29".to_string(),
        }
    }

    #[test]
    fn test_expense_draft() {
        let draft = expense_input().validate().unwrap();
        assert_eq!(draft.description, "Dinner");
        assert_eq!(draft.category, Some(ExpenseCategory::Food));
        assert_eq!(draft.split_among.len(), 2);
        assert_eq!(draft.date, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }

    #[test]
    fn test_amount_bounds() {
        let mut input = expense_input();
        input.amount = 0;
        assert_eq!(field_of(input.validate().unwrap_err()), "amount");

        input.amount = -5;
        assert_eq!(field_of(input.validate().unwrap_err()), "amount");

        input.amount = MAX_AMOUNT + 1;
        assert_eq!(field_of(input.validate().unwrap_err()), "amount");
    }

    #[test]
    fn test_date_format_is_strict() {
        assert!(parse_date("date", "2024-01-05").is_ok());
        for bad in ["2024-1-5", "05/01/2024", "2024-02-30", "2024-01-05T00:00:00", "abcd-ef-gh", ""] {
            assert!(parse_date("date", bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_description_limits() {
        let mut input = expense_input();
        input.description = "   ".to_string();
        assert_eq!(field_of(input.validate().unwrap_err()), "description");

        input.description = "x".repeat(201);
        assert_eq!(field_of(input.validate().unwrap_err()), "description");

        input.description = "x".repeat(200);
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_split_among_rejects_empty_and_duplicates() {
        let mut input = expense_input();
        input.split_among.clear();
        assert_eq!(field_of(input.validate().unwrap_err()), "splitAmong");

        let id = MemberId::new().to_string();
        input.split_among = vec![id.clone(), id];
        assert_eq!(field_of(input.validate().unwrap_err()), "splitAmong");

        input.split_among = vec!["not-an-id".to_string()];
        assert_eq!(field_of(input.validate().unwrap_err()), "splitAmong");
    }

    #[test]
    fn test_unknown_category_rejected() {
        let mut input = expense_input();
        input.category = Some("gambling".to_string());
        assert_eq!(field_of(input.validate().unwrap_err()), "category");

        input.category = Some(String::new());
        assert_eq!(input.validate().unwrap().category, None);
    }

    #[test]
    fn test_payload_ignores_unknown_fields() {
        let payload = serde_json::json!({
            "description": "Taxi",
            "amount": 1200,
            "paidBy": MemberId::new().to_string(),
            "splitAmong": [MemberId::new().to_string()],
            "date": "2024-06-01",
            "splitAmount": 1200,
            "currency": "USD"
        });
        let input: NewExpense = serde_json::from_value(payload).unwrap();
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_missing_payload_fields_are_validation_errors() {
        let input: NewExpense = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(field_of(input.validate().unwrap_err()), "description");
    }

    #[test]
    fn test_settlement_rules() {
        let member = MemberId::new().to_string();
        let input = NewSettlement {
            payer: member.clone(),
            payee: member,
            amount: 100,
            note: None,
            date: "2024-01-01".to_string(),
        };
        assert_eq!(field_of(input.validate().unwrap_err()), "payee");

        let input = NewSettlement {
            payer: MemberId::new().to_string(),
            payee: MemberId::new().to_string(),
            amount: 100,
            note: Some(String::new()),
            date: "2024-01-01".to_string(),
        };
        assert_eq!(input.validate().unwrap().note, None);

        let input = NewSettlement {
            note: Some("n".repeat(501)),
            ..input
        };
        assert_eq!(field_of(input.validate().unwrap_err()), "note");
    }

    #[test]
    fn test_group_currency() {
        let input = NewGroup {
            name: "Trip".to_string(),
            description: None,
            currency: "lkr".to_string(),
        };
        assert_eq!(input.validate().unwrap().currency, Currency::LKR);

        let input = NewGroup {
            currency: "DOGE".to_string(),
            ..input
        };
        assert_eq!(field_of(input.validate().unwrap_err()), "currency");
    }

    #[test]
    fn test_email_normalization() {
        assert_eq!(
            normalize_email("email", Some(" Ana@Example.COM ")).unwrap(),
            Some("ana@example.com".to_string())
        );
        assert_eq!(normalize_email("email", Some("")).unwrap(), None);
        for bad in ["ana", "ana@", "@example.com", "ana@example", "a b@example.com"] {
            assert!(normalize_email("email", Some(bad)).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_patch_clears_optional_fields() {
        let patch = UpdateExpense {
            version: 3,
            category: Some(String::new()),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(patch.category, Some(None));
        assert_eq!(patch.amount, None);

        let patch = UpdateGroup {
            version: 1,
            description: Some(String::new()),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(patch.description, Some(None));
    }
}
