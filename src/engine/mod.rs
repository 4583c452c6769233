//! Inventory rules on top of the ledger store.

/// Engine API and caller-facing error taxonomy.
pub mod inventory;
/// Fixed fine schedule.
pub mod policy;

pub use inventory::{InventoryEngine, LedgerError};
