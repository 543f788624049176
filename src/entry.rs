//! Bounded per-producer batch history and current transaction/epoch state.

use std::collections::VecDeque;

use crate::batch::BatchMetadata;
use crate::types::{
    Offset, ProducerEpoch, ProducerId, Timestamp, NO_PRODUCER_EPOCH, NO_SEQUENCE, NO_TIMESTAMP,
    NUM_BATCHES_TO_RETAIN,
};

/// Per-producer state: the last few batches appended plus the producer's current
/// epoch and in-flight transaction, if any.
///
/// Invariants upheld by this type: `batches.len() <= NUM_BATCHES_TO_RETAIN`; batches
/// are kept in append order (ascending `last_seq` modulo wraparound within a single
/// epoch); `current_txn_first_offset.is_some()` iff a transaction is in-flight.
#[derive(Debug, Clone)]
pub struct ProducerStateEntry {
    pub producer_id: ProducerId,
    pub epoch: ProducerEpoch,
    pub coordinator_epoch: i32,
    pub last_timestamp: Timestamp,
    pub current_txn_first_offset: Option<Offset>,
    batches: VecDeque<BatchMetadata>,
}

impl ProducerStateEntry {
    /// A brand-new entry for a producer we have never seen before.
    pub fn empty(producer_id: ProducerId) -> Self {
        Self {
            producer_id,
            epoch: NO_PRODUCER_EPOCH,
            coordinator_epoch: -1,
            last_timestamp: NO_TIMESTAMP,
            current_txn_first_offset: None,
            batches: VecDeque::new(),
        }
    }

    pub fn batches(&self) -> impl Iterator<Item = &BatchMetadata> {
        self.batches.iter()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// The last sequence number seen, or `NO_SEQUENCE` if no batch has been recorded.
    pub fn last_seq(&self) -> i32 {
        self.batches.back().map(|b| b.last_seq).unwrap_or(NO_SEQUENCE)
    }

    /// The offset of the last record in the last recorded batch, or `-1` if empty.
    pub fn last_data_offset(&self) -> Offset {
        self.batches.back().map(|b| b.last_offset).unwrap_or(-1)
    }

    /// The offset delta of the last recorded batch, or `0` if empty.
    pub fn last_offset_delta(&self) -> i32 {
        self.batches.back().map(|b| b.offset_delta).unwrap_or(0)
    }

    /// Appends a batch, evicting the oldest entry if the history is already at
    /// capacity.
    pub fn add_batch(&mut self, batch: BatchMetadata) {
        if self.batches.len() >= NUM_BATCHES_TO_RETAIN {
            self.batches.pop_front();
        }
        self.batches.push_back(batch);
    }

    /// Drops the retained batch history. Used when the producer's epoch changes:
    /// sequence numbers start over under a new epoch.
    pub fn clear_batches(&mut self) {
        self.batches.clear();
    }

    /// Replaces the most recently appended batch in place, used when the log
    /// assigns the definitive offset range after validation already ran against a
    /// speculative one.
    pub fn replace_last_batch(&mut self, batch: BatchMetadata) {
        self.batches.pop_back();
        self.batches.push_back(batch);
    }

    /// A batch whose epoch matches `epoch` and whose `(first_seq, last_seq)` range
    /// exactly matches `(first_seq, last_seq)`, if one is recorded. Used to detect a
    /// client retry of an already-committed batch.
    pub fn find_duplicate_batch(
        &self,
        epoch: ProducerEpoch,
        first_seq: i32,
        last_seq: i32,
    ) -> Option<BatchMetadata> {
        if epoch != self.epoch {
            return None;
        }
        self.batches
            .iter()
            .find(|b| b.first_seq() == first_seq && b.last_seq == last_seq)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_entry_reports_sentinels() {
        let entry = ProducerStateEntry::empty(7);
        assert_eq!(entry.last_seq(), NO_SEQUENCE);
        assert_eq!(entry.last_data_offset(), -1);
        assert_eq!(entry.last_offset_delta(), 0);
        assert_eq!(entry.batch_count(), 0);
    }

    #[test]
    fn caps_history_at_five_batches() {
        let mut entry = ProducerStateEntry::empty(7);
        for i in 0..8 {
            entry.add_batch(BatchMetadata::new(i, i as i64 * 10, 0, 1_000 + i as i64));
        }
        assert_eq!(entry.batch_count(), NUM_BATCHES_TO_RETAIN);
        // The oldest three (seq 0,1,2) should have been evicted.
        assert_eq!(entry.batches().next().unwrap().last_seq, 3);
        assert_eq!(entry.last_seq(), 7);
    }

    #[test]
    fn epoch_change_clears_history() {
        let mut entry = ProducerStateEntry::empty(7);
        entry.epoch = 0;
        entry.add_batch(BatchMetadata::new(4, 104, 4, 1_000));
        assert_eq!(entry.batch_count(), 1);

        entry.epoch = 1;
        entry.clear_batches();
        assert_eq!(entry.batch_count(), 0);
        assert_eq!(entry.last_seq(), NO_SEQUENCE);
    }

    #[test]
    fn finds_duplicate_by_epoch_and_range() {
        let mut entry = ProducerStateEntry::empty(7);
        entry.epoch = 0;
        entry.add_batch(BatchMetadata::new(4, 104, 4, 1_000));
        entry.add_batch(BatchMetadata::new(9, 109, 4, 2_000));

        assert!(entry.find_duplicate_batch(0, 5, 9).is_some());
        assert!(entry.find_duplicate_batch(0, 0, 4).is_some());
        assert!(entry.find_duplicate_batch(0, 6, 9).is_none());
        assert!(entry.find_duplicate_batch(1, 5, 9).is_none());
    }
}
