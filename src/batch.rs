//! Immutable descriptor of one appended batch.

use crate::types::{first_seq, Offset, Timestamp};

/// Descriptor of a single record batch already folded into a producer's history.
///
/// Immutable once constructed: a batch that needs a different offset range (e.g.
/// after the log assigns offsets post-validation) is replaced, not mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchMetadata {
    pub last_seq: i32,
    pub last_offset: Offset,
    pub offset_delta: i32,
    pub timestamp: Timestamp,
}

impl BatchMetadata {
    pub fn new(last_seq: i32, last_offset: Offset, offset_delta: i32, timestamp: Timestamp) -> Self {
        Self {
            last_seq,
            last_offset,
            offset_delta,
            timestamp,
        }
    }

    /// The first sequence number covered by this batch, derived with wraparound.
    pub fn first_seq(&self) -> i32 {
        first_seq(self.last_seq, self.offset_delta)
    }

    /// The first offset covered by this batch.
    pub fn first_offset(&self) -> Offset {
        self.last_offset - self.offset_delta as i64
    }
}
