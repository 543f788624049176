//! The system topic client: an append-only writer and a "read last valid message"
//! reader, used to persist and restore snapshots. Owned by the broker.

use async_trait::async_trait;
use bytes::Bytes;

/// Opaque identifier for a message appended to the snapshot system topic.
pub type MessageId = String;

/// A single message read back from the snapshot system topic.
#[derive(Debug, Clone)]
pub struct Message {
    pub payload: Bytes,
}

/// Append-only writer for snapshot bytes.
#[async_trait]
pub trait SnapshotWriter: Send + Sync {
    async fn write_async(&self, bytes: Bytes) -> anyhow::Result<MessageId>;
}

/// Reader that can fetch the most recent snapshot written.
#[async_trait]
pub trait SnapshotReader: Send + Sync {
    async fn read_last_valid_message(&self) -> anyhow::Result<Option<Message>>;
}
