//! Shared primitive types used across the entire engine.

use serde::{Deserialize, Serialize};

/// A simulated calendar day. The clock moves one day per advance.
pub type SimDay = chrono::NaiveDate;

pub type LocationId = i64;
pub type MachineId = i64;
pub type ProductId = i64;
pub type IngredientId = i64;

/// Alert severity. Ordering matters: LOW < MEDIUM < HIGH < CRITICAL.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LOW" => Some(Self::Low),
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Lifecycle of a stored alert. At most one OPEN-or-SNOOZED alert may exist
/// per fingerprint at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertStatus {
    Open,
    Snoozed,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Snoozed => "SNOOZED",
            Self::Resolved => "RESOLVED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(Self::Open),
            "SNOOZED" => Some(Self::Snoozed),
            "RESOLVED" => Some(Self::Resolved),
            _ => None,
        }
    }
}

/// The closed set of action types a script may recommend and an accepted
/// alert may queue for the operations layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    RestockMachine,
    OrderIngredients,
    AdjustPrice,
    ScheduleService,
    CheckMachine,
    ProposeDiscontinue,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RestockMachine => "RESTOCK_MACHINE",
            Self::OrderIngredients => "ORDER_INGREDIENTS",
            Self::AdjustPrice => "ADJUST_PRICE",
            Self::ScheduleService => "SCHEDULE_SERVICE",
            Self::CheckMachine => "CHECK_MACHINE",
            Self::ProposeDiscontinue => "PROPOSE_DISCONTINUE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RESTOCK_MACHINE" => Some(Self::RestockMachine),
            "ORDER_INGREDIENTS" => Some(Self::OrderIngredients),
            "ADJUST_PRICE" => Some(Self::AdjustPrice),
            "SCHEDULE_SERVICE" => Some(Self::ScheduleService),
            "CHECK_MACHINE" => Some(Self::CheckMachine),
            "PROPOSE_DISCONTINUE" => Some(Self::ProposeDiscontinue),
            _ => None,
        }
    }

    /// Action types that queue a manager action when an alert is accepted.
    /// CHECK_MACHINE is advisory only.
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Self::CheckMachine)
    }
}

/// Lifecycle of a script revision. Exactly one revision per script name is
/// active at a time; superseded revisions are kept for rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionStatus {
    Draft,
    Active,
    Superseded,
}

impl RevisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Superseded => "superseded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "superseded" => Some(Self::Superseded),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn enum_round_trips() {
        for s in ["LOW", "MEDIUM", "HIGH", "CRITICAL"] {
            assert_eq!(Severity::parse(s).map(|v| v.as_str()), Some(s));
        }
        for s in ["OPEN", "SNOOZED", "RESOLVED"] {
            assert_eq!(AlertStatus::parse(s).map(|v| v.as_str()), Some(s));
        }
        assert_eq!(ActionType::parse("NOT_A_THING"), None);
    }
}
