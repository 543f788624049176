//! Staged delta computed from an incoming batch sequence, before it is committed
//! to the `StateManager`.

use crate::entry::ProducerStateEntry;
use crate::error::StateError;
use crate::external::record::{ControlType, EndTransactionMarker, RecordBatch};
use crate::txn::{CompletedTxn, TxnMetadata};
use crate::types::{in_sequence, Offset, ProducerEpoch, ProducerId, Timestamp, NO_PRODUCER_EPOCH, NO_SEQUENCE};

/// Who originated the batch being analyzed. Sequence validation only applies to
/// `Client`-originated batches; `Log` origin (replay) and `Coordinator` origin
/// trust the log/coordinator as the source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOrigin {
    Coordinator,
    Client,
    Log,
}

/// Staged per-producer delta for one batch sequence. Carries a mutable
/// `updated_entry` seeded from the producer's current entry (epoch, coordinator
/// epoch, last timestamp, open transaction) but with an empty batch history, plus
/// any transactions this sequence started.
#[derive(Debug, Clone)]
pub struct ProducerAppendInfo {
    pub topic_partition: String,
    pub producer_id: ProducerId,
    pub origin: AppendOrigin,
    current_entry: ProducerStateEntry,
    pub updated_entry: ProducerStateEntry,
    pub started_transactions: Vec<TxnMetadata>,
}

impl ProducerAppendInfo {
    pub fn new(
        topic_partition: impl Into<String>,
        producer_id: ProducerId,
        current_entry: ProducerStateEntry,
        origin: AppendOrigin,
    ) -> Self {
        let mut updated_entry = ProducerStateEntry::empty(producer_id);
        updated_entry.epoch = current_entry.epoch;
        updated_entry.coordinator_epoch = current_entry.coordinator_epoch;
        updated_entry.last_timestamp = current_entry.last_timestamp;
        updated_entry.current_txn_first_offset = current_entry.current_txn_first_offset;

        Self {
            topic_partition: topic_partition.into(),
            producer_id,
            origin,
            current_entry,
            updated_entry,
            started_transactions: Vec::new(),
        }
    }

    /// Folds one batch into the staged entry, returning a `CompletedTxn` if the
    /// batch was a control batch that closed an open transaction.
    pub fn append(
        &mut self,
        batch: &RecordBatch,
        first_offset: Option<Offset>,
    ) -> Result<Option<CompletedTxn>, StateError> {
        if batch.is_control_batch {
            let Some(record) = batch.records.first() else {
                // The control record was compacted away; nothing to do.
                return Ok(None);
            };
            let marker = EndTransactionMarker::deserialize(record)?;
            return self.append_end_txn_marker(
                marker,
                batch.producer_epoch,
                batch.base_offset,
                batch.max_timestamp,
            );
        }

        self.check_producer_epoch(batch.producer_epoch)?;
        if matches!(self.origin, AppendOrigin::Client) {
            self.check_sequence(batch.producer_epoch, batch.base_sequence)?;
        }

        if batch.producer_epoch != self.updated_entry.epoch {
            self.updated_entry.clear_batches();
            self.updated_entry.epoch = batch.producer_epoch;
        }

        let offset_delta = (batch.last_offset - batch.base_offset) as i32;
        self.updated_entry.add_batch(crate::batch::BatchMetadata::new(
            batch.last_sequence,
            batch.last_offset,
            offset_delta,
            batch.max_timestamp,
        ));
        self.updated_entry.last_timestamp = batch.max_timestamp;

        if self.updated_entry.current_txn_first_offset.is_none() {
            if batch.is_transactional {
                let txn_first_offset = first_offset.unwrap_or(batch.base_offset);
                self.updated_entry.current_txn_first_offset = Some(txn_first_offset);
                self.started_transactions
                    .push(TxnMetadata::started(self.producer_id, txn_first_offset));
            }
        } else if !batch.is_transactional {
            return Err(StateError::InvalidTxnState {
                producer_id: self.producer_id,
                current_txn_first_offset: self.updated_entry.current_txn_first_offset.unwrap(),
            });
        }
        // else: transactional batch folded silently into the already-open txn.

        Ok(None)
    }

    fn check_producer_epoch(&self, epoch: ProducerEpoch) -> Result<(), StateError> {
        if epoch < self.updated_entry.epoch {
            return Err(StateError::InvalidProducerEpoch {
                producer_id: self.producer_id,
                epoch,
                current_epoch: self.updated_entry.epoch,
            });
        }
        Ok(())
    }

    fn check_sequence(&self, epoch: ProducerEpoch, append_first_seq: i32) -> Result<(), StateError> {
        if epoch != self.updated_entry.epoch {
            // A cold producer (no state has ever been observed) accepts any first
            // sequence; otherwise only sequence 0 is acceptable under a new epoch.
            if append_first_seq != 0 && self.current_entry.epoch != NO_PRODUCER_EPOCH {
                return Err(StateError::OutOfOrderSequence {
                    producer_id: self.producer_id,
                    last_seq: NO_SEQUENCE,
                    first_seq: append_first_seq,
                });
            }
            return Ok(());
        }

        if self.current_entry.epoch == NO_PRODUCER_EPOCH {
            // Cold producer after state loss: any sequence is accepted.
            return Ok(());
        }

        let current_last = if self.updated_entry.batch_count() > 0 {
            self.updated_entry.last_seq()
        } else if self.current_entry.epoch == epoch {
            self.current_entry.last_seq()
        } else {
            NO_SEQUENCE
        };

        if !in_sequence(current_last, append_first_seq) {
            return Err(StateError::OutOfOrderSequence {
                producer_id: self.producer_id,
                last_seq: current_last,
                first_seq: append_first_seq,
            });
        }
        Ok(())
    }

    fn append_end_txn_marker(
        &mut self,
        marker: EndTransactionMarker,
        epoch: ProducerEpoch,
        marker_offset: Offset,
        timestamp: Timestamp,
    ) -> Result<Option<CompletedTxn>, StateError> {
        self.check_producer_epoch(epoch)?;

        let completed = self.updated_entry.current_txn_first_offset.map(|first_offset| CompletedTxn {
            producer_id: self.producer_id,
            first_offset,
            last_offset: marker_offset,
            is_aborted: marker.control_type == ControlType::Abort,
        });

        self.updated_entry.current_txn_first_offset = None;
        self.updated_entry.epoch = epoch;
        self.updated_entry.coordinator_epoch = marker.coordinator_epoch;
        self.updated_entry.last_timestamp = timestamp;

        Ok(completed)
    }

    /// Rewrites the single staged batch with a new offset range, used when the log
    /// assigns the definitive offsets after validation has already run against
    /// speculative ones. Clears and re-derives `started_transactions` against the
    /// new range.
    pub fn reset_offset(&mut self, base_offset: Offset, is_transactional: bool) {
        if let Some(last) = self.updated_entry.batches().last().copied() {
            let new_last_offset = base_offset + last.offset_delta as i64;
            let rewritten = crate::batch::BatchMetadata::new(
                last.last_seq,
                new_last_offset,
                last.offset_delta,
                last.timestamp,
            );
            self.updated_entry.replace_last_batch(rewritten);
        }

        self.started_transactions.clear();
        if is_transactional {
            if let Some(last) = self.updated_entry.batches().last().copied() {
                let first_offset = last.first_offset();
                self.updated_entry.current_txn_first_offset = Some(first_offset);
                self.started_transactions
                    .push(TxnMetadata::started(self.producer_id, first_offset));
            }
        }
    }
}
