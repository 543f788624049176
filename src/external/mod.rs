//! Trait boundaries standing in for the broker's collaborators: the log/ledger
//! store, the record-batch decoder, and the snapshot-backed system topic client.
//!
//! None of these are implemented here — wire protocol parsing, the log-structured
//! storage engine, and the system-topic transport are all owned by the broker.
//! The manager only depends on the shapes below.

pub mod log_store;
pub mod record;
pub mod system_topic;

pub use log_store::{Cursor, CursorError, Entry, LogStore, Position};
pub use record::{ControlType, DecodeResult, EndTransactionMarker, Record, RecordBatch, RecordDecoder};
pub use system_topic::{Message, MessageId, SnapshotReader, SnapshotWriter};
