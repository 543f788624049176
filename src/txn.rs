//! Transaction descriptors: in-flight, completed and aborted.

use crate::types::{Offset, ProducerId};

/// Descriptor of one in-flight transaction. Keyed in the ongoing-transaction index
/// by `first_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnMetadata {
    pub producer_id: ProducerId,
    pub first_offset: Offset,
    pub last_offset: Offset,
}

impl TxnMetadata {
    /// A freshly-started transaction: no last offset yet.
    pub fn started(producer_id: ProducerId, first_offset: Offset) -> Self {
        Self {
            producer_id,
            first_offset,
            last_offset: -1,
        }
    }
}

/// Transient output of analysis: a transaction that an end-transaction marker has
/// just closed, consumed by `StateManager::complete_txn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedTxn {
    pub producer_id: ProducerId,
    pub first_offset: Offset,
    pub last_offset: Offset,
    pub is_aborted: bool,
}

/// Persisted descriptor of one aborted transaction, surfaced to `read_committed`
/// fetches so consumers can filter out its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbortedTxn {
    pub producer_id: ProducerId,
    pub first_offset: Offset,
    pub last_offset: Offset,
    pub last_stable_offset: Offset,
}

/// The fetch-response wire element: just enough for a consumer to filter records
/// by producer and start offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbortedTxnRef {
    pub producer_id: ProducerId,
    pub first_offset: Offset,
}

impl From<&AbortedTxn> for AbortedTxnRef {
    fn from(txn: &AbortedTxn) -> Self {
        Self {
            producer_id: txn.producer_id,
            first_offset: txn.first_offset,
        }
    }
}
