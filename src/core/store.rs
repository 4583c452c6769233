use std::time::{SystemTime, UNIX_EPOCH};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    core::indices::PosIndex,
    ledger::{KitDraft, KitRecord, TxnRecord},
    op::{Op, StoredOp},
    types::{Action, Condition, Fine, KitId, OpSeq, TxnId},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("kit `{0}` is already defined")]
    DuplicateKit(String),
    #[error("no kit named `{0}`")]
    UnknownKit(String),
    #[error("kit `{0}` has no units available")]
    NoUnitsAvailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshotV1 {
    pub next_kit_id: KitId,
    pub next_txn_id: TxnId,
    pub next_op_seq: OpSeq,
    pub kits: Vec<KitRecord>,
    pub transactions: Vec<TxnRecord>,
}

#[derive(Debug, Default)]
pub struct LedgerStore {
    kits: HashMap<String, KitRecord>,
    kit_order: Vec<String>,
    txns: Vec<TxnRecord>,
    by_kit: PosIndex<String>,
    pending_ops: Vec<StoredOp>,
    next_kit_id: KitId,
    next_txn_id: TxnId,
    next_op_seq: OpSeq,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self {
            next_kit_id: 1,
            next_txn_id: 1,
            next_op_seq: 1,
            ..Self::default()
        }
    }

    pub fn from_snapshot(snapshot: StoreSnapshotV1) -> Result<Self, StoreError> {
        let mut store = Self {
            next_kit_id: snapshot.next_kit_id,
            next_txn_id: snapshot.next_txn_id,
            next_op_seq: snapshot.next_op_seq,
            ..Self::default()
        };

        for kit in snapshot.kits {
            if store.kits.contains_key(&kit.name) {
                return Err(StoreError::DuplicateKit(kit.name));
            }
            store.kit_order.push(kit.name.clone());
            store.kits.insert(kit.name.clone(), kit);
        }

        for (pos, txn) in snapshot.transactions.iter().enumerate() {
            store.by_kit.entry(txn.kit_name.clone()).or_default().push(pos);
        }
        store.txns = snapshot.transactions;

        Ok(store)
    }

    pub fn export_snapshot(&self) -> StoreSnapshotV1 {
        let kits = self
            .kit_order
            .iter()
            .filter_map(|name| self.kits.get(name).cloned())
            .collect();

        StoreSnapshotV1 {
            next_kit_id: self.next_kit_id,
            next_txn_id: self.next_txn_id,
            next_op_seq: self.next_op_seq,
            kits,
            transactions: self.txns.clone(),
        }
    }

    pub fn define_kit(&mut self, draft: KitDraft) -> Result<(KitRecord, StoredOp), StoreError> {
        if self.kits.contains_key(&draft.name) {
            return Err(StoreError::DuplicateKit(draft.name));
        }

        let kit = KitRecord {
            id: self.next_kit_id,
            name: draft.name,
            total: draft.total,
            available: draft.total,
            lost: 0,
            wornout: 0,
        };

        let stored = self.apply_define(kit.clone())?;
        self.pending_ops.push(stored.clone());
        Ok((kit, stored))
    }

    pub fn issue(&mut self, user: &str, kit_name: &str) -> Result<(TxnRecord, StoredOp), StoreError> {
        match self.kits.get(kit_name) {
            None => return Err(StoreError::UnknownKit(kit_name.to_string())),
            Some(kit) if kit.available == 0 => {
                return Err(StoreError::NoUnitsAvailable(kit_name.to_string()));
            }
            Some(_) => {}
        }

        let txn = TxnRecord {
            id: self.next_txn_id,
            user: user.to_string(),
            kit_name: kit_name.to_string(),
            action: Action::Issued,
            fine: 0,
            ts_ms: now_ms(),
        };

        let (txn, stored) = self.apply_issue(txn)?;
        self.pending_ops.push(stored.clone());
        Ok((txn, stored))
    }

    /// Records a return. Never fails: when `kit_name` is unknown the counter
    /// update is skipped but the transaction is still logged.
    pub fn record_return(
        &mut self,
        user: &str,
        kit_name: &str,
        condition: Condition,
        fine: Fine,
    ) -> (TxnRecord, StoredOp) {
        let txn = TxnRecord {
            id: self.next_txn_id,
            user: user.to_string(),
            kit_name: kit_name.to_string(),
            action: Action::Returned,
            fine,
            ts_ms: now_ms(),
        };

        let (txn, stored) = self.apply_return(txn, condition);
        self.pending_ops.push(stored.clone());
        (txn, stored)
    }

    pub fn apply_replayed_op(&mut self, stored: StoredOp) -> Result<(), StoreError> {
        let seq = stored.seq;
        match stored.op {
            Op::DefineKit { kit } => {
                self.apply_define_with_seq(kit, seq)?;
            }
            Op::Issue { txn } => {
                self.apply_issue_with_seq(txn, seq)?;
            }
            Op::Return { txn, condition } => {
                self.apply_return_with_seq(txn, condition, seq);
            }
        }
        Ok(())
    }

    pub fn get_kit(&self, name: &str) -> Option<&KitRecord> {
        self.kits.get(name)
    }

    pub fn get_kit_cloned(&self, name: &str) -> Option<KitRecord> {
        self.get_kit(name).cloned()
    }

    pub fn kits(&self) -> Vec<&KitRecord> {
        self.kit_order
            .iter()
            .filter_map(|name| self.kits.get(name))
            .collect()
    }

    pub fn kits_cloned(&self) -> Vec<KitRecord> {
        self.kits().into_iter().cloned().collect()
    }

    /// Transactions newest-first: timestamp descending, ties broken by
    /// append order descending.
    pub fn transactions_desc(&self) -> Vec<&TxnRecord> {
        let mut out: Vec<&TxnRecord> = self.txns.iter().collect();
        out.sort_by(|a, b| b.ts_ms.cmp(&a.ts_ms).then(b.id.cmp(&a.id)));
        out
    }

    pub fn transactions_desc_cloned(&self) -> Vec<TxnRecord> {
        self.transactions_desc().into_iter().cloned().collect()
    }

    pub fn transactions_for(&self, kit_name: &str) -> Vec<&TxnRecord> {
        self.by_kit
            .get(kit_name)
            .into_iter()
            .flat_map(|positions| positions.iter())
            .filter_map(|pos| self.txns.get(*pos))
            .collect()
    }

    pub fn transactions_for_cloned(&self, kit_name: &str) -> Vec<TxnRecord> {
        self.transactions_for(kit_name).into_iter().cloned().collect()
    }

    pub fn kit_count(&self) -> usize {
        self.kit_order.len()
    }

    pub fn txn_count(&self) -> usize {
        self.txns.len()
    }

    pub fn drain_pending_ops(&mut self) -> Vec<StoredOp> {
        std::mem::take(&mut self.pending_ops)
    }

    pub fn latest_op_seq(&self) -> OpSeq {
        self.next_op_seq.saturating_sub(1)
    }

    fn apply_define(&mut self, kit: KitRecord) -> Result<StoredOp, StoreError> {
        let seq = self.take_next_op_seq();
        self.apply_define_with_seq(kit, seq)
    }

    fn apply_define_with_seq(&mut self, kit: KitRecord, seq: OpSeq) -> Result<StoredOp, StoreError> {
        if self.kits.contains_key(&kit.name) {
            return Err(StoreError::DuplicateKit(kit.name));
        }

        self.next_kit_id = self.next_kit_id.max(kit.id.saturating_add(1));
        self.kit_order.push(kit.name.clone());
        self.kits.insert(kit.name.clone(), kit.clone());

        self.bump_next_seq_from(seq);
        Ok(StoredOp {
            seq,
            ts_ms: now_ms(),
            op: Op::DefineKit { kit },
        })
    }

    fn apply_issue(&mut self, txn: TxnRecord) -> Result<(TxnRecord, StoredOp), StoreError> {
        let seq = self.take_next_op_seq();
        self.apply_issue_with_seq(txn, seq)
    }

    fn apply_issue_with_seq(
        &mut self,
        txn: TxnRecord,
        seq: OpSeq,
    ) -> Result<(TxnRecord, StoredOp), StoreError> {
        let kit = self
            .kits
            .get_mut(&txn.kit_name)
            .ok_or_else(|| StoreError::UnknownKit(txn.kit_name.clone()))?;
        if kit.available == 0 {
            return Err(StoreError::NoUnitsAvailable(txn.kit_name.clone()));
        }
        kit.available -= 1;

        self.append_txn(txn.clone());
        self.bump_next_seq_from(seq);
        let stored = StoredOp {
            seq,
            ts_ms: now_ms(),
            op: Op::Issue { txn: txn.clone() },
        };
        Ok((txn, stored))
    }

    fn apply_return(&mut self, txn: TxnRecord, condition: Condition) -> (TxnRecord, StoredOp) {
        let seq = self.take_next_op_seq();
        self.apply_return_with_seq(txn, condition, seq)
    }

    fn apply_return_with_seq(
        &mut self,
        txn: TxnRecord,
        condition: Condition,
        seq: OpSeq,
    ) -> (TxnRecord, StoredOp) {
        // Unknown kit: counter update affects nothing, txn is still logged.
        if let Some(kit) = self.kits.get_mut(&txn.kit_name) {
            match condition {
                Condition::Good => kit.available += 1,
                Condition::Wornout => kit.wornout += 1,
                Condition::Lost => kit.lost += 1,
            }
        }

        self.append_txn(txn.clone());
        self.bump_next_seq_from(seq);
        let stored = StoredOp {
            seq,
            ts_ms: now_ms(),
            op: Op::Return {
                txn: txn.clone(),
                condition,
            },
        };
        (txn, stored)
    }

    fn append_txn(&mut self, txn: TxnRecord) {
        self.next_txn_id = self.next_txn_id.max(txn.id.saturating_add(1));
        self.by_kit
            .entry(txn.kit_name.clone())
            .or_default()
            .push(self.txns.len());
        self.txns.push(txn);
    }

    fn take_next_op_seq(&mut self) -> OpSeq {
        let seq = self.next_op_seq;
        self.next_op_seq += 1;
        seq
    }

    fn bump_next_seq_from(&mut self, seq: OpSeq) {
        self.next_op_seq = self.next_op_seq.max(seq.saturating_add(1));
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
