use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LedgerError;

/// Unique identifier for one logical execution (call graph).
pub type ExecutionId = String;

/// Unique identifier for a notification channel.
pub type ChannelId = String;

/// Severity band derived from a bucket's spend fraction.
///
/// Bands are strictly ordered: `Green < Yellow < Orange < Red`. Green is implicit
/// below the lowest configured threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Band {
    Green = 0,
    Yellow = 1,
    Orange = 2,
    Red = 3,
}

impl Band {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Orange => "orange",
            Self::Red => "red",
        }
    }

    pub fn all() -> [Band; 4] {
        [Self::Green, Self::Yellow, Self::Orange, Self::Red]
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Band {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "green" => Ok(Self::Green),
            "yellow" => Ok(Self::Yellow),
            "orange" => Ok(Self::Orange),
            "red" => Ok(Self::Red),
            other => Err(LedgerError::Validation(format!("unknown band '{other}'"))),
        }
    }
}

/// Risk level reported by the execution-health collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

impl FromStr for RiskLevel {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(LedgerError::Validation(format!("unknown risk level '{other}'"))),
        }
    }
}

/// The dimension a bucket budgets for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Execution,
    Agent,
    Group,
    Global,
    Custom(String),
}

impl ScopeKind {
    /// Prefix used when building the store key for a bucket of this scope.
    pub fn prefix(&self) -> &str {
        match self {
            Self::Execution => "execution",
            Self::Agent => "agent",
            Self::Group => "group",
            Self::Global => "global",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// The caller-visible outcome class of a charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictKind {
    Proceed,
    Blocked,
    Halted,
    Rejected,
}

impl VerdictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proceed => "proceed",
            Self::Blocked => "blocked",
            Self::Halted => "halted",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for VerdictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerdictKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proceed" => Ok(Self::Proceed),
            "blocked" => Ok(Self::Blocked),
            "halted" => Ok(Self::Halted),
            "rejected" => Ok(Self::Rejected),
            other => Err(LedgerError::Validation(format!("unknown verdict '{other}'"))),
        }
    }
}
