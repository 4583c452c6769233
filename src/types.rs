//! Shared primitive ids, ledger enums, and condition parsing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Monotonic kit identifier.
pub type KitId = u64;
/// Monotonic transaction identifier.
pub type TxnId = u64;
/// Monotonic operation sequence number.
pub type OpSeq = u64;
/// Fine amount in plain currency units.
pub type Fine = u32;

/// Ledger action recorded on a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// A kit unit was checked out.
    Issued,
    /// A kit unit was checked in.
    Returned,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Issued => f.write_str("issued"),
            Action::Returned => f.write_str("returned"),
        }
    }
}

/// Condition reported when a kit unit is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    /// Unit goes back into the available pool.
    Good,
    /// Unit is retired as worn out.
    Wornout,
    /// Unit was lost by the borrower.
    Lost,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Good => f.write_str("good"),
            Condition::Wornout => f.write_str("wornout"),
            Condition::Lost => f.write_str("lost"),
        }
    }
}

/// Error raised when a condition string is not `good`, `wornout`, or `lost`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid condition `{raw}`, expected good, wornout, or lost")]
pub struct ParseConditionError {
    /// The rejected input.
    pub raw: String,
}

impl FromStr for Condition {
    type Err = ParseConditionError;

    /// Parses operator input case-insensitively. Front-ends hand raw text
    /// straight through; parsing must fail before any ledger mutation.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "good" => Ok(Condition::Good),
            "wornout" => Ok(Condition::Wornout),
            "lost" => Ok(Condition::Lost),
            _ => Err(ParseConditionError { raw: s.to_string() }),
        }
    }
}
