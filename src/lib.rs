//! Per-partition producer-state manager for a Kafka-protocol broker backed by a
//! log-structured storage system.
//!
//! Tracks, per producer identity, the last batches appended and the
//! transactions currently in flight so the broker can reject out-of-order or
//! duplicated idempotent/transactional writes, compute the last stable offset
//! (LSO) for `read_committed` consumers, maintain the aborted-transaction
//! index surfaced on fetch, and persist/restore this state across broker
//! restarts via periodic snapshots and log replay.
//!
//! Wire protocol parsing, the underlying log store, and topic/ACL management
//! are owned by the broker; this crate only depends on the trait boundaries in
//! [`external`].

pub mod append_info;
pub mod batch;
pub mod config;
pub mod entry;
pub mod error;
pub mod external;
pub mod lifecycle;
pub mod manager;
pub mod metrics;
pub mod recovery;
pub mod snapshot;
pub mod txn;
pub mod types;

pub use append_info::{AppendOrigin, ProducerAppendInfo};
pub use batch::BatchMetadata;
pub use config::ProducerStateConfig;
pub use entry::ProducerStateEntry;
pub use error::{Result, StateError};
pub use lifecycle::LifecycleState;
pub use manager::{AnalyzeResult, StateManager};
pub use recovery::LogRecovery;
pub use txn::{AbortedTxn, AbortedTxnRef, CompletedTxn, TxnMetadata};
pub use types::{
    Offset, ProducerEpoch, ProducerId, Timestamp, NO_PRODUCER_EPOCH, NO_PRODUCER_ID, NO_SEQUENCE, NO_TIMESTAMP,
};
