//! Runtime event stream payloads.

use crate::types::{Fine, KitId, OpSeq, TxnId};

/// Events emitted from the single-writer runtime loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    /// A new kit was defined.
    KitDefined {
        /// Assigned kit id.
        id: KitId,
        /// Kit name.
        name: String,
    },
    /// A unit was issued.
    Issued {
        /// Appended transaction id.
        txn_id: TxnId,
        /// Kit the unit came from.
        kit_name: String,
    },
    /// A unit was returned.
    Returned {
        /// Appended transaction id.
        txn_id: TxnId,
        /// Kit the unit was returned against.
        kit_name: String,
        /// Fine levied for the reported condition.
        fine: Fine,
    },
    /// Persistence has reached at least this op sequence.
    DurableUpTo {
        /// Highest sequence known durable.
        op_seq: OpSeq,
    },
}
