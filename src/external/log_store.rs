//! The opaque log/ledger storage engine: positions, non-durable cursors and entry
//! reads. Owned by the broker; this crate only consumes it during recovery.

use async_trait::async_trait;

use crate::types::Offset;

/// An opaque position in the underlying log, as returned by `LogStore::find_position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub ledger_id: i64,
    pub entry_id: i64,
}

/// A single raw log entry, prior to decoding into record batches.
#[derive(Debug, Clone)]
pub struct Entry {
    pub position: Position,
    pub payload: bytes::Bytes,
}

/// Sentinel failure a cursor raises when there is nothing left to read.
#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    #[error("no more entries to read")]
    NoMoreEntriesToRead,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A forward-only cursor over entries in the log, starting at some position.
#[async_trait]
pub trait Cursor: Send + Sync {
    /// Reads up to `n` entries, advancing the cursor past them. Raises
    /// `CursorError::NoMoreEntriesToRead` once the tail of the log is reached.
    async fn read_entries(&mut self, n: usize) -> Result<Vec<Entry>, CursorError>;
}

/// The broker's log/ledger storage for one partition.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Resolves a logical offset to a physical position in the log.
    async fn find_position(&self, offset: Offset) -> anyhow::Result<Position>;

    /// Opens a non-durable cursor (no persisted read position) starting at
    /// `position`, labeled `name` for diagnostics.
    fn new_non_durable_cursor(&self, position: Position, name: &str) -> Box<dyn Cursor>;
}
