//! Inventory engine: validation, fine policy, and ledger operations.

use thiserror::Error;

use crate::{
    core::store::{LedgerStore, StoreError},
    engine::policy,
    ledger::{KitDraft, KitRecord, TxnRecord},
    op::StoredOp,
    types::{Condition, ParseConditionError},
};

/// Caller-facing error taxonomy for engine operations.
///
/// Every variant is recoverable and leaves the ledger unmutated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Kit name was empty or whitespace.
    #[error("kit name must not be empty")]
    EmptyKitName,
    /// Kit total was zero.
    #[error("kit total must be at least 1")]
    ZeroTotal,
    /// Kit name already registered.
    #[error("kit `{0}` is already defined")]
    DuplicateKit(String),
    /// No kit with the given name.
    #[error("no kit named `{0}`")]
    UnknownKit(String),
    /// Kit exists but every unit is checked out.
    #[error("kit `{0}` has no units available")]
    NoUnitsAvailable(String),
    /// Condition string failed to parse.
    #[error(transparent)]
    InvalidCondition(#[from] ParseConditionError),
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::DuplicateKit(name) => Self::DuplicateKit(name),
            StoreError::UnknownKit(name) => Self::UnknownKit(name),
            StoreError::NoUnitsAvailable(name) => Self::NoUnitsAvailable(name),
        }
    }
}

/// The only component holding decision logic. Owns its [`LedgerStore`];
/// construct with [`InventoryEngine::new`] or rehydrate a replayed store
/// via [`InventoryEngine::with_store`].
#[derive(Debug)]
pub struct InventoryEngine {
    store: LedgerStore,
}

impl Default for InventoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InventoryEngine {
    /// Creates an engine over an empty in-memory store.
    pub fn new() -> Self {
        Self {
            store: LedgerStore::new(),
        }
    }

    /// Wraps an existing store, e.g. one recovered from a journal.
    pub fn with_store(store: LedgerStore) -> Self {
        Self { store }
    }

    /// Read access to the underlying store.
    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    /// Defines a new kit. The name is trimmed; `total` becomes the initial
    /// available count.
    pub fn define_kit(&mut self, name: &str, total: u32) -> Result<KitRecord, LedgerError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::EmptyKitName);
        }
        if total == 0 {
            return Err(LedgerError::ZeroTotal);
        }

        let (kit, _stored) = self.store.define_kit(KitDraft {
            name: name.to_string(),
            total,
        })?;
        Ok(kit)
    }

    /// Issues one unit of `kit_name` to `user`, appending an `issued`
    /// transaction with no fine.
    pub fn issue(&mut self, user: &str, kit_name: &str) -> Result<TxnRecord, LedgerError> {
        let (txn, _stored) = self.store.issue(user.trim(), kit_name.trim())?;
        Ok(txn)
    }

    /// Records a return in the given condition, levying the fixed fine.
    ///
    /// Infallible once the condition is typed: a return against an unknown
    /// kit still logs its transaction, it just adjusts no counters.
    pub fn return_kit(&mut self, user: &str, kit_name: &str, condition: Condition) -> TxnRecord {
        let fine = policy::fine_for(condition);
        let (txn, _stored) = self
            .store
            .record_return(user.trim(), kit_name.trim(), condition, fine);
        txn
    }

    /// [`Self::return_kit`] for raw front-end input: parses the condition
    /// string first and mutates nothing when it is unrecognized.
    pub fn return_kit_raw(
        &mut self,
        user: &str,
        kit_name: &str,
        condition: &str,
    ) -> Result<TxnRecord, LedgerError> {
        let condition: Condition = condition.parse()?;
        Ok(self.return_kit(user, kit_name, condition))
    }

    /// Looks up one kit by name.
    pub fn get_kit(&self, name: &str) -> Option<&KitRecord> {
        self.store.get_kit(name.trim())
    }

    /// All kits in definition order.
    pub fn list_kits(&self) -> Vec<&KitRecord> {
        self.store.kits()
    }

    /// All transactions, newest first.
    pub fn list_transactions(&self) -> Vec<&TxnRecord> {
        self.store.transactions_desc()
    }

    /// Transactions touching one kit, oldest first.
    pub fn kit_history(&self, kit_name: &str) -> Vec<&TxnRecord> {
        self.store.transactions_for(kit_name.trim())
    }

    /// Drains ops accumulated since the last drain, for journaling.
    pub fn drain_pending_ops(&mut self) -> Vec<StoredOp> {
        self.store.drain_pending_ops()
    }
}
