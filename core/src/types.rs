//! Shared primitive types and domain enums used across the entire engine.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// A stable, unique identifier for any entity.
pub type EntityId = String;

/// The canonical triage-run identifier.
pub type RunId = String;

/// Money in minor units (cents). All thresholds compare in minor units.
pub type Cents = i64;

/// The caller's role, taken from the auth token by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Agent,
    Lead,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Lead => "lead",
        }
    }
}

/// Risk classification shared by alerts and triage decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    /// Map a composite risk score to a level: `>= 80 high, >= 50 medium`.
    pub fn for_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::High
        } else if score >= 50.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// KYC verification level on a customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KycLevel {
    Pending,
    Verified,
    Restricted,
}

impl KycLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Restricted => "restricted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "verified" => Some(Self::Verified),
            "restricted" => Some(Self::Restricted),
            _ => None,
        }
    }
}

/// Card lifecycle state. ACTIVE <-> FROZEN is the only reversible edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardStatus {
    Active,
    Frozen,
    Expired,
}

impl CardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Frozen => "FROZEN",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(Self::Active),
            "FROZEN" => Some(Self::Frozen),
            "EXPIRED" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// Alert status transitions:
/// `OPEN -> INVESTIGATING -> {RESOLVED | CLOSED_FALSE_POSITIVE | CONTACTED |
/// INVESTIGATING_DISPUTE_OPENED}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Open,
    Investigating,
    Resolved,
    ClosedFalsePositive,
    Contacted,
    InvestigatingDisputeOpened,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Investigating => "INVESTIGATING",
            Self::Resolved => "RESOLVED",
            Self::ClosedFalsePositive => "CLOSED_FALSE_POSITIVE",
            Self::Contacted => "CONTACTED",
            Self::InvestigatingDisputeOpened => "INVESTIGATING_DISPUTE_OPENED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(Self::Open),
            "INVESTIGATING" => Some(Self::Investigating),
            "RESOLVED" => Some(Self::Resolved),
            "CLOSED_FALSE_POSITIVE" => Some(Self::ClosedFalsePositive),
            "CONTACTED" => Some(Self::Contacted),
            "INVESTIGATING_DISPUTE_OPENED" => Some(Self::InvestigatingDisputeOpened),
            _ => None,
        }
    }
}

/// Case category, one per executor action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseType {
    CardFreeze,
    Dispute,
    ContactCustomer,
    FalsePositive,
}

impl CaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CardFreeze => "CARD_FREEZE",
            Self::Dispute => "DISPUTE",
            Self::ContactCustomer => "CONTACT_CUSTOMER",
            Self::FalsePositive => "FALSE_POSITIVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CARD_FREEZE" => Some(Self::CardFreeze),
            "DISPUTE" => Some(Self::Dispute),
            "CONTACT_CUSTOMER" => Some(Self::ContactCustomer),
            "FALSE_POSITIVE" => Some(Self::FalsePositive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    Open,
    Closed,
    ClosedFalsePositive,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
            Self::ClosedFalsePositive => "CLOSED_FALSE_POSITIVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(Self::Open),
            "CLOSED" => Some(Self::Closed),
            "CLOSED_FALSE_POSITIVE" => Some(Self::ClosedFalsePositive),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Open)
    }
}

/// The action the engine recommends for an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    FreezeCard,
    OpenDispute,
    ContactCustomer,
    MarkFalsePositive,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FreezeCard => "freeze_card",
            Self::OpenDispute => "open_dispute",
            Self::ContactCustomer => "contact_customer",
            Self::MarkFalsePositive => "mark_false_positive",
        }
    }
}

/// Raw suggestion from the risk-signal scorer, before policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSuggestion {
    FreezeCard,
    OpenDispute,
    Monitor,
}

macro_rules! sql_text_enum {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(self.as_str().into())
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                <$ty>::parse(s).ok_or_else(|| {
                    FromSqlError::Other(format!("unknown {}: {s}", stringify!($ty)).into())
                })
            }
        }
    };
}

sql_text_enum!(RiskLevel);
sql_text_enum!(KycLevel);
sql_text_enum!(CardStatus);
sql_text_enum!(AlertStatus);
sql_text_enum!(CaseType);
sql_text_enum!(CaseStatus);
