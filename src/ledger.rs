//! Kit and transaction domain records.

use serde::{Deserialize, Serialize};

use crate::types::{Action, Fine, KitId, TxnId};

/// Fully materialized, authoritative kit record.
///
/// `total` is fixed at definition time. `available` tracks units not
/// currently checked out; `lost` and `wornout` accumulate units retired by
/// returns in those conditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KitRecord {
    /// Stable kit identifier, assigned in definition order.
    pub id: KitId,
    /// Unique kit name (logical primary key).
    pub name: String,
    /// Units ever provisioned for this kit.
    pub total: u32,
    /// Units currently available for issue.
    pub available: u32,
    /// Cumulative units returned lost.
    pub lost: u32,
    /// Cumulative units returned worn out.
    pub wornout: u32,
}

/// Insert payload used to define a new [`KitRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KitDraft {
    /// Unique kit name.
    pub name: String,
    /// Units provisioned; also the initial available count.
    pub total: u32,
}

/// Immutable ledger event: one issue or return.
///
/// `kit_name` is a by-name reference, not a foreign-key constraint; a
/// transaction may outlive or predate the kit it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnRecord {
    /// Stable transaction identifier, assigned in append order.
    pub id: TxnId,
    /// Free-text identifier of the person acting.
    pub user: String,
    /// Name of the kit acted on.
    pub kit_name: String,
    /// Whether the unit was issued or returned.
    pub action: Action,
    /// Charge levied for this event; zero for issues and good returns.
    pub fine: Fine,
    /// Server-assigned creation time in milliseconds since epoch.
    pub ts_ms: u64,
}
