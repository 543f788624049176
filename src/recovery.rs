//! Drives an asynchronous cursor over the underlying log, replaying batches into
//! the manager after the snapshot has been loaded.
//!
//! Replay uses `AppendOrigin::Log`, which skips client sequence validation — the
//! log itself is the durable source of truth by the time recovery runs. Commits
//! land via [`StateManager::update_internal`]/[`StateManager::complete_txn_internal`]
//! (the `READY`-gated public `update`/`complete_txn` would reject these calls,
//! since the manager is still `RECOVERING` while this runs).

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use crate::append_info::AppendOrigin;
use crate::error::StateError;
use crate::external::log_store::{Cursor, CursorError};
use crate::external::RecordDecoder;
use crate::manager::{StateManager, RECORD_MAGIC_CURRENT};
use crate::metrics::metrics_consts::RECOVERY_BATCHES_PROCESSED;
use crate::types::NO_PRODUCER_ID;

/// Defensive delay guarding against a cursor implementation that returns an empty
/// read without signalling completion, so the replay loop never busy-spins.
const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(5);

pub struct LogRecovery<'a> {
    manager: &'a StateManager,
    decoder: &'a dyn RecordDecoder,
    cache_queue_size: usize,
    max_error_count: u32,
}

impl<'a> LogRecovery<'a> {
    pub fn new(
        manager: &'a StateManager,
        decoder: &'a dyn RecordDecoder,
        cache_queue_size: usize,
        max_error_count: u32,
    ) -> Self {
        Self {
            manager,
            decoder,
            cache_queue_size,
            max_error_count,
        }
    }

    /// Replays `cursor` to the tail of the log, committing each drained slice of
    /// entries as one unit: all staged `ProducerAppendInfo`s, then all completed
    /// transactions.
    pub async fn run(&self, mut cursor: Box<dyn Cursor>) -> Result<(), StateError> {
        let mut error_count: u32 = 0;
        let mut read_complete = false;
        let mut batches_processed: u64 = 0;

        loop {
            let entries = match cursor.read_entries(self.cache_queue_size).await {
                Ok(entries) => entries,
                Err(CursorError::NoMoreEntriesToRead) => {
                    read_complete = true;
                    Vec::new()
                }
                Err(CursorError::Other(err)) => {
                    error_count += 1;
                    warn!(
                        topic_partition = %self.manager.topic_partition(),
                        error = %err,
                        error_count,
                        "transient error reading recovery cursor"
                    );
                    if error_count > self.max_error_count {
                        return Err(StateError::RecoveryFailed(format!(
                            "exceeded max_error_count ({}) reading recovery cursor: {err:#}",
                            self.max_error_count
                        )));
                    }
                    // No entries and no completion signal: back off briefly before
                    // retrying rather than busy-spinning on a misbehaving cursor.
                    tokio::time::sleep(EMPTY_READ_BACKOFF).await;
                    continue;
                }
            };

            if entries.is_empty() {
                if read_complete {
                    break;
                }
                // A well-behaved cursor signals completion via `NoMoreEntriesToRead`
                // rather than an empty-but-ok read; guard the same way regardless.
                tokio::time::sleep(EMPTY_READ_BACKOFF).await;
                continue;
            }

            let decoded = self
                .decoder
                .decode(&entries, RECORD_MAGIC_CURRENT)
                .map_err(|err| StateError::RecoveryFailed(format!("failed to decode recovery entries: {err:#}")))?;

            let mut local_map = HashMap::new();
            let mut completed_txns = Vec::new();
            for batch in decoded.batches() {
                if batch.producer_id == NO_PRODUCER_ID {
                    continue;
                }
                if let Some(completed) =
                    self.manager
                        .stage_batch_into(batch, None, AppendOrigin::Log, &mut local_map)?
                {
                    completed_txns.push(completed);
                }
            }

            for (_, info) in local_map {
                self.manager.update_internal(info)?;
            }
            for completed in completed_txns {
                self.manager.complete_txn_internal(completed)?;
            }

            batches_processed += entries.len() as u64;
            self.manager
                .metrics()
                .counter(RECOVERY_BATCHES_PROCESSED)
                .increment(entries.len() as u64);
            if let Some(last) = entries.last() {
                self.manager.update_map_end_offset(last.position.entry_id);
            }

            if read_complete {
                break;
            }
        }

        debug!(
            topic_partition = %self.manager.topic_partition(),
            batches_processed,
            "log recovery replay complete"
        );
        Ok(())
    }
}
