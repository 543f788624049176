//! Typed error hierarchy for the producer-state manager.
//!
//! Domain-level failures (validation, snapshot decode, illegal state) are
//! matchable `thiserror` variants, the way `common-kafka`'s `KafkaProduceError`
//! is. Failures from the external collaborator traits (`LogStore`,
//! `SnapshotWriter`, ...) are opaque and threaded through as `anyhow::Error`.

use thiserror::Error;

use crate::lifecycle::LifecycleState;
use crate::types::{Offset, ProducerEpoch, ProducerId};

#[derive(Error, Debug)]
pub enum StateError {
    #[error(
        "producer {producer_id} fenced: epoch {epoch} is less than the current epoch {current_epoch}"
    )]
    InvalidProducerEpoch {
        producer_id: ProducerId,
        epoch: ProducerEpoch,
        current_epoch: ProducerEpoch,
    },

    #[error(
        "out of order sequence for producer {producer_id}: expected sequence after {last_seq}, got {first_seq}"
    )]
    OutOfOrderSequence {
        producer_id: ProducerId,
        last_seq: i32,
        first_seq: i32,
    },

    #[error(
        "invalid transaction state for producer {producer_id}: non-transactional batch while transaction open at offset {current_txn_first_offset}"
    )]
    InvalidTxnState {
        producer_id: ProducerId,
        current_txn_first_offset: Offset,
    },

    #[error("snapshot corrupt: {0}")]
    SnapshotCorrupt(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("recovery failed after exhausting the error budget: {0}")]
    RecoveryFailed(String),

    #[error("operation requires lifecycle state Ready, but manager is {0:?}")]
    NotReady(LifecycleState),

    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StateError>;
