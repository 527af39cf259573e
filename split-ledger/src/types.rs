//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode at rest, camelCase JSON on the wire)
//! - Exact arithmetic (integer minor units for money, never floats)
//! - Tombstones instead of physical deletion

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Money in minor currency units (cents)
pub type Amount = i64;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh time-ordered id
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Wrap an existing UUID (e.g. one generated by an offline client)
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Storage key
            pub fn key(&self) -> [u8; 16] {
                *self.0.as_bytes()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

entity_id!(
    /// Registered identity
    UserId
);
entity_id!(
    /// Expense-sharing group
    GroupId
);
entity_id!(
    /// Group-scoped participant
    MemberId
);
entity_id!(
    /// Expense record
    ExpenseId
);
entity_id!(
    /// Settlement record
    SettlementId
);

/// ISO 4217 currency code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Currency {
    /// US Dollar
    USD,
    /// Euro
    EUR,
    /// British Pound
    GBP,
    /// Canadian Dollar
    CAD,
    /// Australian Dollar
    AUD,
    /// Indian Rupee
    INR,
    /// Sri Lankan Rupee
    LKR,
    /// Japanese Yen
    JPY,
    /// Singapore Dollar
    SGD,
    /// Malaysian Ringgit
    MYR,
}

impl Currency {
    /// Supported currencies
    pub const ALL: [Currency; 10] = [
        Currency::USD,
        Currency::EUR,
        Currency::GBP,
        Currency::CAD,
        Currency::AUD,
        Currency::INR,
        Currency::LKR,
        Currency::JPY,
        Currency::SGD,
        Currency::MYR,
    ];

    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::CAD => "CAD",
            Currency::AUD => "AUD",
            Currency::INR => "INR",
            Currency::LKR => "LKR",
            Currency::JPY => "JPY",
            Currency::SGD => "SGD",
            Currency::MYR => "MYR",
        }
    }

    /// Parse from ISO code
    pub fn from_code(s: &str) -> Option<Self> {
        match s {
            "USD" => Some(Currency::USD),
            "EUR" => Some(Currency::EUR),
            "GBP" => Some(Currency::GBP),
            "CAD" => Some(Currency::CAD),
            "AUD" => Some(Currency::AUD),
            "INR" => Some(Currency::INR),
            "LKR" => Some(Currency::LKR),
            "JPY" => Some(Currency::JPY),
            "SGD" => Some(Currency::SGD),
            "MYR" => Some(Currency::MYR),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Expense category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpenseCategory {
    /// Food and drink
    Food,
    /// Transport
    Transport,
    /// Rent, lodging
    Housing,
    /// Entertainment
    Entertainment,
    /// Shopping
    Shopping,
    /// Utilities
    Utilities,
    /// Health
    Health,
    /// Travel
    Travel,
    /// Education
    Education,
    /// Anything else
    Other,
}

impl ExpenseCategory {
    /// All categories in display order
    pub const ALL: [ExpenseCategory; 10] = [
        ExpenseCategory::Food,
        ExpenseCategory::Transport,
        ExpenseCategory::Housing,
        ExpenseCategory::Entertainment,
        ExpenseCategory::Shopping,
        ExpenseCategory::Utilities,
        ExpenseCategory::Health,
        ExpenseCategory::Travel,
        ExpenseCategory::Education,
        ExpenseCategory::Other,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpenseCategory::Food => "food",
            ExpenseCategory::Transport => "transport",
            ExpenseCategory::Housing => "housing",
            ExpenseCategory::Entertainment => "entertainment",
            ExpenseCategory::Shopping => "shopping",
            ExpenseCategory::Utilities => "utilities",
            ExpenseCategory::Health => "health",
            ExpenseCategory::Travel => "travel",
            ExpenseCategory::Education => "education",
            ExpenseCategory::Other => "other",
        }
    }

    /// Parse from wire name
    pub fn from_name(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == s)
    }
}

/// Member role within a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Group creator; manages members and group settings
    Owner,
    /// Regular participant
    Member,
}

/// Registered identity (resolved by the external auth layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User ID
    pub id: UserId,
    /// Lower-cased email
    pub email: String,
    /// Display name
    pub name: String,
    /// Registration timestamp
    pub created_at: DateTime<Utc>,
}

/// Expense-sharing group
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    /// Group ID
    pub id: GroupId,
    /// Group name
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// Currency all amounts are denominated in
    pub currency: Currency,
    /// Creator identity
    pub owner: UserId,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency version
    pub version: u64,
    /// Tombstone
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Group-scoped participant, linked to an identity or virtual
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    /// Member ID
    pub id: MemberId,
    /// Owning group
    pub group_id: GroupId,
    /// Linked identity (None for virtual members)
    pub user_id: Option<UserId>,
    /// Display name
    pub name: String,
    /// Optional lower-cased email
    pub email: Option<String>,
    /// Role in the group
    pub role: Role,
    /// No linked identity
    pub is_virtual: bool,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency version
    pub version: u64,
    /// Tombstone
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Member {
    /// Name shown in balances and transfer suggestions
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "Member"
        } else {
            &self.name
        }
    }
}

/// One participant's frozen share of an expense
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitShare {
    /// Participant
    pub member_id: MemberId,
    /// Share in minor units
    pub amount: Amount,
}

/// Shared expense
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    /// Expense ID (client-generated when created offline)
    pub id: ExpenseId,
    /// Owning group
    pub group_id: GroupId,
    /// Description
    pub description: String,
    /// Total in minor units
    pub amount: Amount,
    /// Copied from the group at creation
    pub currency: Currency,
    /// Member who paid
    pub paid_by: MemberId,
    /// Ordered participants with their shares, frozen at write time
    pub split: Vec<SplitShare>,
    /// Optional category
    pub category: Option<ExpenseCategory>,
    /// Calendar date of the expense
    pub date: NaiveDate,
    /// Author identity
    pub created_by: UserId,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency version
    pub version: u64,
    /// Tombstone
    pub deleted_at: Option<DateTime<Utc>>,
    /// Correlation id of the sync item that created it
    pub temp_id: Option<String>,
}

impl Expense {
    /// Participants in their frozen order
    pub fn split_among(&self) -> Vec<MemberId> {
        self.split.iter().map(|s| s.member_id).collect()
    }
}

/// Recorded repayment between two members
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    /// Settlement ID (client-generated when created offline)
    pub id: SettlementId,
    /// Owning group
    pub group_id: GroupId,
    /// Member paying back
    pub payer: MemberId,
    /// Member receiving
    pub payee: MemberId,
    /// Amount in minor units
    pub amount: Amount,
    /// Optional note
    pub note: Option<String>,
    /// Calendar date
    pub date: NaiveDate,
    /// Author identity
    pub created_by: UserId,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency version
    pub version: u64,
    /// Tombstone
    pub deleted_at: Option<DateTime<Utc>>,
    /// Correlation id of the sync item that created it
    pub temp_id: Option<String>,
}

/// Member's derived net position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceEntry {
    /// Member
    pub member_id: MemberId,
    /// Display name
    pub name: String,
    /// Positive = owed money, negative = owes money
    pub net_balance: Amount,
}

/// Recommended payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSuggestion {
    /// Debtor
    pub from: MemberId,
    /// Debtor display name
    pub from_name: String,
    /// Creditor
    pub to: MemberId,
    /// Creditor display name
    pub to_name: String,
    /// Amount in minor units
    pub amount: Amount,
}
