//! Owns the per-partition producer map, the ongoing-transaction index, the
//! aborted-transaction list and the recovery lifecycle.
//!
//! `producers` is a [`DashMap`] so that per-producer updates don't contend with
//! each other; everything that must be observed consistently across producers
//! (`ongoing_txns`, `aborted_index`, `last_map_offset`, lifecycle `state`) lives
//! behind a single [`std::sync::Mutex`]: a concurrent map for per-producer
//! state plus one manager-level monitor for everything with cross-producer
//! invariants. The mutex is never held across an `.await`, so a
//! `std::sync::Mutex` is sufficient — no `tokio::sync` needed here.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Instant;

use anyhow::Context;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::append_info::{AppendOrigin, ProducerAppendInfo};
use crate::batch::BatchMetadata;
use crate::config::ProducerStateConfig;
use crate::entry::ProducerStateEntry;
use crate::error::StateError;
use crate::external::{LogStore, RecordBatch, RecordDecoder, SnapshotReader, SnapshotWriter};
use crate::lifecycle::LifecycleState;
use crate::metrics::{metrics_consts::*, MetricsHelper};
use crate::recovery::LogRecovery;
use crate::snapshot;
use crate::txn::{AbortedTxn, AbortedTxnRef, CompletedTxn, TxnMetadata};
use crate::types::{Offset, ProducerId, Timestamp, NO_PRODUCER_ID};

/// Kafka record-batch magic byte this crate decodes recovery entries as. Fixed at
/// the current (v2) format; the broker negotiates the wire version elsewhere.
pub const RECORD_MAGIC_CURRENT: i8 = 2;

/// Result of analyzing a sequence of batches against the current producer state,
/// without mutating it. The caller commits `append_info_map`/`completed_txns`
/// only after its own log append succeeds.
#[derive(Debug, Default)]
pub struct AnalyzeResult {
    pub append_info_map: HashMap<ProducerId, ProducerAppendInfo>,
    pub completed_txns: Vec<CompletedTxn>,
    /// Set (and analysis short-circuited) if the first duplicate batch encountered
    /// was already recorded in a producer's history.
    pub duplicate: Option<BatchMetadata>,
}

struct ManagerState {
    ongoing_txns: BTreeMap<Offset, TxnMetadata>,
    aborted_index: Vec<AbortedTxn>,
    last_map_offset: Offset,
    lifecycle: LifecycleState,
}

/// Per-partition producer-state manager.
pub struct StateManager {
    topic_partition: String,
    config: ProducerStateConfig,
    producers: DashMap<ProducerId, ProducerStateEntry>,
    state: Mutex<ManagerState>,
    metrics: MetricsHelper,
}

impl StateManager {
    pub fn new(topic_partition: impl Into<String>, config: ProducerStateConfig) -> Self {
        let topic_partition = topic_partition.into();
        let metrics = MetricsHelper::new().with_label("topic_partition", &topic_partition);
        Self {
            topic_partition,
            config,
            producers: DashMap::new(),
            state: Mutex::new(ManagerState {
                ongoing_txns: BTreeMap::new(),
                aborted_index: Vec::new(),
                last_map_offset: -1,
                lifecycle: LifecycleState::Init,
            }),
            metrics,
        }
    }

    pub fn topic_partition(&self) -> &str {
        &self.topic_partition
    }

    pub fn config(&self) -> &ProducerStateConfig {
        &self.config
    }

    pub(crate) fn metrics(&self) -> &MetricsHelper {
        &self.metrics
    }

    pub fn state(&self) -> LifecycleState {
        self.state.lock().unwrap().lifecycle
    }

    fn require_ready(&self) -> Result<(), StateError> {
        let state = self.state();
        if !state.is_ready() {
            return Err(StateError::NotReady(state));
        }
        Ok(())
    }

    /// Current entry for a producer, if one has been observed.
    pub fn producer_entry(&self, producer_id: ProducerId) -> Option<ProducerStateEntry> {
        self.producers.get(&producer_id).map(|e| e.clone())
    }

    pub fn producer_count(&self) -> usize {
        self.producers.len()
    }

    fn get_or_create_append_info<'m>(
        &self,
        local_map: &'m mut HashMap<ProducerId, ProducerAppendInfo>,
        producer_id: ProducerId,
        origin: AppendOrigin,
    ) -> &'m mut ProducerAppendInfo {
        local_map.entry(producer_id).or_insert_with(|| {
            let current = self
                .producers
                .get(&producer_id)
                .map(|e| e.clone())
                .unwrap_or_else(|| ProducerStateEntry::empty(producer_id));
            ProducerAppendInfo::new(self.topic_partition.clone(), producer_id, current, origin)
        })
    }

    /// Stages one batch into `local_map` (creating a fresh [`ProducerAppendInfo`]
    /// from current state on first touch) without any duplicate-detection probe.
    /// Used by [`LogRecovery`], which replays `origin = Log` batches directly
    /// against the durable log and has no notion of a "duplicate" to short-circuit
    /// on.
    pub(crate) fn stage_batch_into(
        &self,
        batch: &RecordBatch,
        first_offset: Option<Offset>,
        origin: AppendOrigin,
        local_map: &mut HashMap<ProducerId, ProducerAppendInfo>,
    ) -> Result<Option<CompletedTxn>, StateError> {
        let info = self.get_or_create_append_info(local_map, batch.producer_id, origin);
        info.append(batch, first_offset)
    }

    /// Pure analysis of an incoming batch sequence: stages per-producer deltas
    /// without mutating `self`. Batches carrying `NO_PRODUCER_ID` are skipped, as
    /// they carry no idempotent/transactional state to track.
    pub fn analyze_and_validate_producer_state(
        &self,
        batches: &[RecordBatch],
        first_offset: Option<Offset>,
        origin: AppendOrigin,
    ) -> Result<AnalyzeResult, StateError> {
        self.require_ready()?;

        let mut append_info_map = HashMap::new();
        let mut completed_txns = Vec::new();
        let mut duplicate = None;

        for batch in batches {
            if batch.producer_id == NO_PRODUCER_ID {
                continue;
            }

            if let Some(entry) = self.producers.get(&batch.producer_id) {
                if let Some(dup) = entry.find_duplicate_batch(
                    batch.producer_epoch,
                    batch.base_sequence,
                    batch.last_sequence,
                ) {
                    self.metrics.counter(DUPLICATE_BATCHES).increment(1);
                    duplicate = Some(dup);
                    break;
                }
            }

            let info = self.get_or_create_append_info(&mut append_info_map, batch.producer_id, origin);
            match info.append(batch, first_offset) {
                Ok(Some(completed)) => completed_txns.push(completed),
                Ok(None) => {}
                Err(err) => {
                    self.metrics.counter(APPEND_VALIDATION_FAILURES).increment(1);
                    return Err(err);
                }
            }
        }

        Ok(AnalyzeResult {
            append_info_map,
            completed_txns,
            duplicate,
        })
    }

    fn merge_entry(existing: &mut ProducerStateEntry, updated: &ProducerStateEntry) {
        if updated.epoch != existing.epoch {
            existing.clear_batches();
            existing.epoch = updated.epoch;
        }
        for batch in updated.batches() {
            existing.add_batch(*batch);
        }
        existing.coordinator_epoch = updated.coordinator_epoch;
        existing.current_txn_first_offset = updated.current_txn_first_offset;
        existing.last_timestamp = updated.last_timestamp;
    }

    /// Installs or merges a staged delta into the producer map, gated on `READY`.
    /// Used by the broker after a successful log append.
    pub fn update(&self, append_info: ProducerAppendInfo) -> Result<(), StateError> {
        self.require_ready()?;
        self.update_internal(append_info)
    }

    /// Same as [`Self::update`] but without the `READY` gate, for use by recovery
    /// replay while the manager is still `RECOVERING`.
    pub(crate) fn update_internal(&self, append_info: ProducerAppendInfo) -> Result<(), StateError> {
        if append_info.producer_id == NO_PRODUCER_ID {
            return Err(StateError::IllegalState(
                "cannot install producer state for NO_PRODUCER_ID".to_string(),
            ));
        }

        let producer_id = append_info.producer_id;
        let updated_entry = append_info.updated_entry;
        self.producers
            .entry(producer_id)
            .and_modify(|existing| Self::merge_entry(existing, &updated_entry))
            .or_insert_with(|| updated_entry.clone());

        if !append_info.started_transactions.is_empty() {
            let mut state = self.state.lock().unwrap();
            for txn in append_info.started_transactions {
                state.ongoing_txns.insert(txn.first_offset, txn);
            }
            self.metrics
                .gauge(ONGOING_TXNS)
                .set(state.ongoing_txns.len() as f64);
        }

        Ok(())
    }

    fn last_stable_offset_locked(ongoing: &BTreeMap<Offset, TxnMetadata>, completed: &CompletedTxn) -> Offset {
        ongoing
            .values()
            .find(|t| t.producer_id != completed.producer_id)
            .map(|t| t.first_offset)
            .unwrap_or(completed.last_offset + 1)
    }

    /// The LSO that would result from completing `completed`, without mutating
    /// state. The broker calls this to preview the LSO before committing.
    pub fn last_stable_offset(&self, completed: &CompletedTxn) -> Offset {
        let state = self.state.lock().unwrap();
        Self::last_stable_offset_locked(&state.ongoing_txns, completed)
    }

    /// Completes a transaction, removing it from the ongoing-txn index and, if
    /// aborted, recording it in the aborted index. Gated on `READY`.
    pub fn complete_txn(&self, completed: CompletedTxn) -> Result<(), StateError> {
        self.require_ready()?;
        self.complete_txn_internal(completed)
    }

    /// Same as [`Self::complete_txn`] but without the `READY` gate, for recovery.
    pub(crate) fn complete_txn_internal(&self, completed: CompletedTxn) -> Result<(), StateError> {
        let mut state = self.state.lock().unwrap();
        let mut txn = state.ongoing_txns.remove(&completed.first_offset).ok_or_else(|| {
            StateError::IllegalState(format!(
                "completing unknown transaction for producer {} at first_offset {}",
                completed.producer_id, completed.first_offset
            ))
        })?;
        txn.last_offset = completed.last_offset;

        if completed.is_aborted {
            let lso = Self::last_stable_offset_locked(&state.ongoing_txns, &completed);
            state.aborted_index.push(AbortedTxn {
                producer_id: completed.producer_id,
                first_offset: completed.first_offset,
                last_offset: completed.last_offset,
                last_stable_offset: lso,
            });
        }
        self.metrics
            .gauge(ONGOING_TXNS)
            .set(state.ongoing_txns.len() as f64);
        Ok(())
    }

    /// The first offset of the earliest still-open transaction, if any.
    pub fn first_undecided_offset(&self) -> Option<Offset> {
        self.state.lock().unwrap().ongoing_txns.keys().next().copied()
    }

    /// Aborted transactions visible to a `read_committed` fetch starting at
    /// `fetch_offset`, in completion order.
    pub fn get_aborted_index_list(&self, fetch_offset: Offset) -> Vec<AbortedTxnRef> {
        self.state
            .lock()
            .unwrap()
            .aborted_index
            .iter()
            .filter(|txn| txn.last_offset >= fetch_offset)
            .map(AbortedTxnRef::from)
            .collect()
    }

    /// Drops producer entries idle for at least `max_producer_id_expiration_ms`
    /// with no in-flight transaction.
    pub fn remove_expired_producers(&self, now_ms: Timestamp) {
        let expiration_ms = self.config.max_producer_id_expiration_ms as i64;
        let expired: Vec<ProducerId> = self
            .producers
            .iter()
            .filter(|item| {
                let entry = item.value();
                entry.current_txn_first_offset.is_none() && now_ms - entry.last_timestamp >= expiration_ms
            })
            .map(|item| *item.key())
            .collect();

        if expired.is_empty() {
            return;
        }
        for producer_id in &expired {
            self.producers.remove(producer_id);
        }
        debug!(
            topic_partition = %self.topic_partition,
            count = expired.len(),
            "expired idle producers"
        );
        self.metrics
            .counter(EXPIRED_PRODUCERS)
            .increment(expired.len() as u64);
    }

    /// The highest log offset already reflected in `producers` (`-1` before the
    /// manager has ever recovered or loaded a snapshot). The checkpoint used as
    /// the basis for the next snapshot and the resume point on recovery.
    pub fn map_end_offset(&self) -> Offset {
        self.state.lock().unwrap().last_map_offset
    }

    pub fn update_map_end_offset(&self, offset: Offset) {
        self.state.lock().unwrap().last_map_offset = offset;
    }

    /// Wholly clears the manager's view of the partition: producers, ongoing
    /// transactions, the aborted index, and resets the checkpoint offset to 0.
    pub fn truncate(&self) {
        self.producers.clear();
        let mut state = self.state.lock().unwrap();
        state.ongoing_txns.clear();
        state.aborted_index.clear();
        state.last_map_offset = 0;
    }

    fn load_producer_entry(&self, entry: ProducerStateEntry, now_ms: Timestamp) {
        let expiration_ms = self.config.max_producer_id_expiration_ms as i64;
        if entry.current_txn_first_offset.is_none() && now_ms - entry.last_timestamp >= expiration_ms {
            return;
        }
        if let Some(first_offset) = entry.current_txn_first_offset {
            let mut state = self.state.lock().unwrap();
            state.ongoing_txns.insert(
                first_offset,
                TxnMetadata {
                    producer_id: entry.producer_id,
                    first_offset,
                    last_offset: -1,
                },
            );
        }
        self.producers.insert(entry.producer_id, entry);
    }

    /// Loads the most recent snapshot, if any, installing only non-idle-expired
    /// entries and re-registering any open transactions they carry.
    pub async fn load_from_snapshot(&self, reader: &dyn SnapshotReader, now_ms: Timestamp) -> anyhow::Result<()> {
        let start = Instant::now();
        let message = reader
            .read_last_valid_message()
            .await
            .context("failed to read producer-state snapshot")?;

        let Some(message) = message else {
            debug!(topic_partition = %self.topic_partition, "no prior producer-state snapshot found");
            return Ok(());
        };

        let decoded = snapshot::decode(&message.payload)?;
        let entry_count = decoded.entries.len();
        for entry in decoded.entries {
            self.load_producer_entry(entry, now_ms);
        }
        self.update_map_end_offset(decoded.snapshot_offset);

        info!(
            topic_partition = %self.topic_partition,
            snapshot_offset = decoded.snapshot_offset,
            entries = entry_count,
            "loaded producer-state snapshot"
        );
        self.metrics
            .histogram(SNAPSHOT_LOAD_DURATION)
            .record(start.elapsed().as_secs_f64());
        Ok(())
    }

    /// Encodes the current producer map and appends it via `writer`. At most one
    /// snapshot write should be in flight at a time; that serialization is the
    /// caller's responsibility. Gated on `READY`, same as `update`/`complete_txn`.
    pub async fn take_snapshot(
        &self,
        writer: &dyn SnapshotWriter,
    ) -> Result<crate::external::MessageId, StateError> {
        self.require_ready()?;

        let offset = self.map_end_offset();
        let bytes = snapshot::encode(&self.producers, offset);
        let start = Instant::now();
        let result = writer
            .write_async(bytes)
            .await
            .context("failed to write producer-state snapshot")
            .map_err(StateError::from);
        self.metrics
            .histogram(SNAPSHOT_WRITE_DURATION)
            .record(start.elapsed().as_secs_f64());
        if let Err(err) = &result {
            warn!(topic_partition = %self.topic_partition, error = %err, "snapshot write failed");
        }
        result
    }

    /// Drives the INIT/RECOVER_ERROR → RECOVERING → READY/RECOVER_ERROR lifecycle:
    /// loads the last snapshot, then replays the log from the snapshot's
    /// checkpoint to the tail. A no-op success if already `READY`; an immediate
    /// failure if previously `RECOVER_ERROR` (recovery is terminal until restart).
    pub async fn recover(
        &self,
        log_store: &dyn LogStore,
        decoder: &dyn RecordDecoder,
        snapshot_reader: &dyn SnapshotReader,
        now_ms: Timestamp,
    ) -> Result<(), StateError> {
        {
            let mut state = self.state.lock().unwrap();
            match state.lifecycle {
                LifecycleState::Ready => return Ok(()),
                LifecycleState::RecoverError => {
                    return Err(StateError::RecoveryFailed(
                        "manager previously failed recovery; restart required".to_string(),
                    ))
                }
                LifecycleState::Init | LifecycleState::Recovering => {
                    state.lifecycle = LifecycleState::Recovering;
                }
            }
        }

        let start = Instant::now();
        let result = self.recover_inner(log_store, decoder, snapshot_reader, now_ms).await;

        let mut state = self.state.lock().unwrap();
        state.lifecycle = match &result {
            Ok(()) => LifecycleState::Ready,
            Err(_) => LifecycleState::RecoverError,
        };
        drop(state);

        self.metrics
            .histogram(RECOVERY_DURATION)
            .record(start.elapsed().as_secs_f64());
        if let Err(err) = &result {
            self.metrics.counter(RECOVERY_ERRORS).increment(1);
            warn!(topic_partition = %self.topic_partition, error = %err, "recovery failed");
        } else {
            info!(topic_partition = %self.topic_partition, "recovery complete");
        }
        result
    }

    async fn recover_inner(
        &self,
        log_store: &dyn LogStore,
        decoder: &dyn RecordDecoder,
        snapshot_reader: &dyn SnapshotReader,
        now_ms: Timestamp,
    ) -> Result<(), StateError> {
        self.load_from_snapshot(snapshot_reader, now_ms)
            .await
            .map_err(|err| StateError::RecoveryFailed(format!("snapshot load failed: {err:#}")))?;

        let start_offset = self.map_end_offset();
        let position = log_store
            .find_position(start_offset)
            .await
            .map_err(|err| StateError::RecoveryFailed(format!("failed to locate recovery start: {err:#}")))?;

        let cursor_name = format!("{}-producer-state-recovery", self.topic_partition);
        let cursor = log_store.new_non_durable_cursor(position, &cursor_name);

        let recovery = LogRecovery::new(self, decoder, self.config.cache_queue_size, self.config.max_error_count);
        recovery.run(cursor).await
    }
}
