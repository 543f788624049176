//! The record-batch decoder: turns raw log entries into record batches. Owned by
//! the broker's Kafka wire-protocol layer; this crate only consumes its output.

use crate::error::StateError;
use crate::external::log_store::Entry;
use crate::types::{Offset, ProducerEpoch, ProducerId, Timestamp};

/// A single inner record of a control batch (end-transaction markers live here).
#[derive(Debug, Clone)]
pub struct Record {
    pub timestamp: Timestamp,
    pub value: bytes::Bytes,
}

/// Control-batch marker type: commits or aborts the open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlType {
    Commit,
    Abort,
}

/// The payload of a control-batch record: which way the transaction resolved, and
/// the coordinator epoch that issued the marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndTransactionMarker {
    pub control_type: ControlType,
    pub coordinator_epoch: i32,
}

impl EndTransactionMarker {
    /// Parses the marker from a control-batch record's value. The on-wire format
    /// (version(i16) + control_type(i16) + coordinator_epoch(i32)) is owned by the
    /// broker's protocol layer; this crate only needs this fixed-shape result.
    pub fn deserialize(record: &Record) -> Result<Self, StateError> {
        if record.value.len() < 8 {
            return Err(StateError::Collaborator(anyhow::anyhow!(
                "end transaction marker too short: {} bytes",
                record.value.len()
            )));
        }
        let control_type = i16::from_be_bytes([record.value[2], record.value[3]]);
        let coordinator_epoch =
            i32::from_be_bytes(record.value[4..8].try_into().expect("slice of length 4"));
        let control_type = match control_type {
            0 => ControlType::Commit,
            1 => ControlType::Abort,
            other => {
                return Err(StateError::Collaborator(anyhow::anyhow!(
                    "unknown control type: {other}"
                )))
            }
        };
        Ok(Self {
            control_type,
            coordinator_epoch,
        })
    }
}

/// A decoded record batch, as handed to the manager for analysis.
#[derive(Debug, Clone)]
pub struct RecordBatch {
    pub producer_id: ProducerId,
    pub producer_epoch: ProducerEpoch,
    pub base_sequence: i32,
    pub last_sequence: i32,
    pub base_offset: Offset,
    pub last_offset: Offset,
    pub max_timestamp: Timestamp,
    pub is_transactional: bool,
    pub is_control_batch: bool,
    /// Inner records; populated only for control batches (may be empty if the
    /// underlying entry was compacted away).
    pub records: Vec<Record>,
}

/// Result of decoding a set of raw log entries into record batches.
#[derive(Debug, Clone, Default)]
pub struct DecodeResult {
    batches: Vec<RecordBatch>,
}

impl DecodeResult {
    pub fn new(batches: Vec<RecordBatch>) -> Self {
        Self { batches }
    }

    pub fn batches(&self) -> impl Iterator<Item = &RecordBatch> {
        self.batches.iter()
    }

    pub fn into_batches(self) -> Vec<RecordBatch> {
        self.batches
    }
}

/// The broker's record-batch decoder.
pub trait RecordDecoder: Send + Sync {
    /// Decodes a slice of raw log entries into record batches, using `magic` to
    /// pick the on-wire record format version.
    fn decode(&self, entries: &[Entry], magic: i8) -> anyhow::Result<DecodeResult>;
}
