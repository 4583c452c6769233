//! Mutation operation model and persistence wrappers.
//!
//! One [`Op`] carries the complete effect of one engine operation: an issue
//! is the counter decrement plus its log entry, a return is the counter
//! adjustment plus its log entry. The journal never splits the two halves.

use serde::{Deserialize, Serialize};

use crate::{
    ledger::{KitRecord, TxnRecord},
    types::{Condition, OpSeq},
};

/// Version number for serialized [`StoredOpEnvelope`] payloads.
pub const OP_FORMAT_VERSION: u16 = 1;

/// Immutable operation appended to the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Define a new kit with its initial counters.
    DefineKit {
        /// Inserted record.
        kit: KitRecord,
    },
    /// Issue one unit: decrement `available`, append the transaction.
    Issue {
        /// Appended transaction.
        txn: TxnRecord,
    },
    /// Return one unit: adjust the counter chosen by `condition` (when the
    /// named kit exists), append the transaction.
    Return {
        /// Appended transaction.
        txn: TxnRecord,
        /// Reported condition driving the counter adjustment.
        condition: Condition,
    },
}

/// Journal row metadata plus operation payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOp {
    /// Monotonic operation sequence.
    pub seq: OpSeq,
    /// Operation timestamp in milliseconds.
    pub ts_ms: u64,
    /// Operation body.
    pub op: Op,
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOpEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped operation.
    pub stored: StoredOp,
}

impl StoredOpEnvelope {
    /// Constructs an envelope using [`OP_FORMAT_VERSION`].
    pub fn new(stored: StoredOp) -> Self {
        Self {
            format_version: OP_FORMAT_VERSION,
            stored,
        }
    }
}
