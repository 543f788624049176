//! End-to-end exercises of the recovery lifecycle and snapshot round trip
//! against hand-written in-memory fakes for the external collaborator traits
//! (`LogStore`, `RecordDecoder`, `SnapshotWriter`/`SnapshotReader`) — mirroring
//! the pack's `MockUploader`-style hand-rolled fakes rather than a mocking
//! framework.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use producer_state_manager::append_info::AppendOrigin;
use producer_state_manager::config::ProducerStateConfig;
use producer_state_manager::external::log_store::{Cursor, CursorError, Entry, LogStore, Position};
use producer_state_manager::external::record::{DecodeResult, Record, RecordBatch, RecordDecoder};
use producer_state_manager::external::system_topic::{Message, MessageId, SnapshotReader, SnapshotWriter};
use producer_state_manager::lifecycle::LifecycleState;
use producer_state_manager::manager::StateManager;
use producer_state_manager::Offset;

/// An in-memory log: a fixed sequence of pre-decoded batches, indexed by
/// position. Real entry payloads are opaque to this crate; the fake decoder
/// below looks batches up by position instead of actually parsing bytes.
#[derive(Clone)]
struct FakeLog {
    batches: Arc<Vec<RecordBatch>>,
}

struct FakeCursor {
    log: FakeLog,
    next_index: usize,
}

#[async_trait]
impl Cursor for FakeCursor {
    async fn read_entries(&mut self, n: usize) -> Result<Vec<Entry>, CursorError> {
        if self.next_index >= self.log.batches.len() {
            return Err(CursorError::NoMoreEntriesToRead);
        }
        let end = (self.next_index + n).min(self.log.batches.len());
        let entries = (self.next_index..end)
            .map(|i| Entry {
                position: Position {
                    ledger_id: 0,
                    entry_id: i as i64,
                },
                payload: Bytes::new(),
            })
            .collect();
        self.next_index = end;
        Ok(entries)
    }
}

struct FakeLogStore {
    log: FakeLog,
}

#[async_trait]
impl LogStore for FakeLogStore {
    async fn find_position(&self, offset: Offset) -> anyhow::Result<Position> {
        // The checkpoint offset has already been fully incorporated; resume just
        // past it. A checkpoint of -1 (nothing loaded yet) resumes at the start.
        let start_index = if offset < 0 { 0 } else { offset + 1 };
        Ok(Position {
            ledger_id: 0,
            entry_id: start_index,
        })
    }

    fn new_non_durable_cursor(&self, position: Position, _name: &str) -> Box<dyn Cursor> {
        Box::new(FakeCursor {
            log: self.log.clone(),
            next_index: position.entry_id as usize,
        })
    }
}

struct FakeDecoder {
    log: FakeLog,
}

impl RecordDecoder for FakeDecoder {
    fn decode(&self, entries: &[Entry], _magic: i8) -> anyhow::Result<DecodeResult> {
        let batches = entries
            .iter()
            .map(|entry| self.log.batches[entry.position.entry_id as usize].clone())
            .collect();
        Ok(DecodeResult::new(batches))
    }
}

/// Stands in for the system-topic-backed snapshot store: an append-only writer
/// paired with a "read the last valid message" reader over the same storage.
struct FakeSnapshotStore {
    last_message: Mutex<Option<Bytes>>,
}

impl FakeSnapshotStore {
    fn empty() -> Self {
        Self {
            last_message: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SnapshotWriter for FakeSnapshotStore {
    async fn write_async(&self, bytes: Bytes) -> anyhow::Result<MessageId> {
        *self.last_message.lock().unwrap() = Some(bytes);
        Ok("fake-message-1".to_string())
    }
}

#[async_trait]
impl SnapshotReader for FakeSnapshotStore {
    async fn read_last_valid_message(&self) -> anyhow::Result<Option<Message>> {
        Ok(self
            .last_message
            .lock()
            .unwrap()
            .clone()
            .map(|payload| Message { payload }))
    }
}

/// A cursor whose first `n` reads fail transiently before the log store ever
/// hands back real entries, to exercise the recovery error budget.
struct AlwaysFailingCursor;

#[async_trait]
impl Cursor for AlwaysFailingCursor {
    async fn read_entries(&mut self, _n: usize) -> Result<Vec<Entry>, CursorError> {
        Err(CursorError::Other(anyhow::anyhow!("storage unavailable")))
    }
}

struct AlwaysFailingLogStore;

#[async_trait]
impl LogStore for AlwaysFailingLogStore {
    async fn find_position(&self, _offset: Offset) -> anyhow::Result<Position> {
        Ok(Position {
            ledger_id: 0,
            entry_id: 0,
        })
    }

    fn new_non_durable_cursor(&self, _position: Position, _name: &str) -> Box<dyn Cursor> {
        Box::new(AlwaysFailingCursor)
    }
}

fn simple_batch(producer_id: i64, seq: i32, offset: i64) -> RecordBatch {
    RecordBatch {
        producer_id,
        producer_epoch: 0,
        base_sequence: seq,
        last_sequence: seq,
        base_offset: offset,
        last_offset: offset,
        max_timestamp: 1_000 + offset,
        is_transactional: false,
        is_control_batch: false,
        records: Vec::<Record>::new(),
    }
}

#[tokio::test]
async fn recovers_from_empty_log_and_becomes_ready() {
    let manager = StateManager::new("topic-0", ProducerStateConfig::default());
    let log_store = FakeLogStore {
        log: FakeLog {
            batches: Arc::new(Vec::new()),
        },
    };
    let decoder = FakeDecoder {
        log: FakeLog {
            batches: Arc::new(Vec::new()),
        },
    };
    let snapshots = FakeSnapshotStore::empty();

    manager.recover(&log_store, &decoder, &snapshots, 0).await.unwrap();
    assert_eq!(manager.state(), LifecycleState::Ready);
    assert_eq!(manager.producer_count(), 0);

    // recover() again is a no-op success once READY.
    manager.recover(&log_store, &decoder, &snapshots, 0).await.unwrap();
}

#[tokio::test]
async fn replays_full_log_into_producer_state() {
    let log = FakeLog {
        batches: Arc::new(vec![
            simple_batch(7, 0, 0),
            simple_batch(7, 1, 1),
            simple_batch(9, 0, 2),
        ]),
    };
    let manager = StateManager::new("topic-0", ProducerStateConfig::default());
    let log_store = FakeLogStore { log: log.clone() };
    let decoder = FakeDecoder { log };
    let snapshots = FakeSnapshotStore::empty();

    manager.recover(&log_store, &decoder, &snapshots, 0).await.unwrap();
    assert_eq!(manager.state(), LifecycleState::Ready);

    let entry7 = manager.producer_entry(7).unwrap();
    assert_eq!(entry7.last_seq(), 1);
    assert_eq!(entry7.last_data_offset(), 1);
    assert_eq!(entry7.batch_count(), 2);

    let entry9 = manager.producer_entry(9).unwrap();
    assert_eq!(entry9.last_data_offset(), 2);
    assert_eq!(manager.map_end_offset(), 2);
}

#[tokio::test]
async fn recovery_resumes_from_snapshot_checkpoint() {
    let log = FakeLog {
        batches: Arc::new(vec![
            simple_batch(7, 0, 0),
            simple_batch(7, 1, 1),
            simple_batch(7, 2, 2),
        ]),
    };
    let snapshots = FakeSnapshotStore::empty();

    // Prime the snapshot store with a checkpoint at offset 0, as if a prior
    // broker instance had taken it before crashing, without replaying the log
    // (the log store/decoder it recovers against here are both empty).
    let primer = StateManager::new("topic-0", ProducerStateConfig::default());
    let empty_log_store = FakeLogStore {
        log: FakeLog {
            batches: Arc::new(Vec::new()),
        },
    };
    let empty_decoder = FakeDecoder {
        log: FakeLog {
            batches: Arc::new(Vec::new()),
        },
    };
    primer
        .recover(&empty_log_store, &empty_decoder, &snapshots, 0)
        .await
        .unwrap();

    let result = primer
        .analyze_and_validate_producer_state(&[simple_batch(7, 0, 0)], None, AppendOrigin::Client)
        .unwrap();
    for (_, info) in result.append_info_map {
        primer.update(info).unwrap();
    }
    primer.update_map_end_offset(0);
    primer.take_snapshot(&snapshots).await.unwrap();

    let manager = StateManager::new("topic-0", ProducerStateConfig::default());
    let log_store = FakeLogStore { log: log.clone() };
    let decoder = FakeDecoder { log };
    manager.recover(&log_store, &decoder, &snapshots, 0).await.unwrap();

    // The snapshot restored the checkpoint at offset 0; the cursor resumed
    // just past it and replayed the remaining two batches.
    let entry7 = manager.producer_entry(7).unwrap();
    assert_eq!(entry7.last_seq(), 2);
    assert_eq!(manager.map_end_offset(), 2);
}

#[tokio::test]
async fn recovery_error_is_terminal_until_restart() {
    let log_store = AlwaysFailingLogStore;
    let decoder = FakeDecoder {
        log: FakeLog {
            batches: Arc::new(Vec::new()),
        },
    };
    let snapshots = FakeSnapshotStore::empty();
    let config = ProducerStateConfig {
        max_error_count: 2,
        ..ProducerStateConfig::default()
    };
    let manager = StateManager::new("topic-0", config);

    let err = manager
        .recover(&log_store, &decoder, &snapshots, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, producer_state_manager::StateError::RecoveryFailed(_)));
    assert_eq!(manager.state(), LifecycleState::RecoverError);

    // retrying recover() fails immediately without touching the log again.
    let err = manager
        .recover(&log_store, &decoder, &snapshots, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, producer_state_manager::StateError::RecoveryFailed(_)));
}

#[tokio::test]
async fn snapshot_round_trip_through_recover() {
    let manager = StateManager::new("topic-0", ProducerStateConfig::default());
    let log_store = FakeLogStore {
        log: FakeLog {
            batches: Arc::new(Vec::new()),
        },
    };
    let decoder = FakeDecoder {
        log: FakeLog {
            batches: Arc::new(Vec::new()),
        },
    };
    let snapshots = FakeSnapshotStore::empty();
    manager.recover(&log_store, &decoder, &snapshots, 0).await.unwrap();

    let batches = vec![simple_batch(7, 0, 100)];
    let result = manager
        .analyze_and_validate_producer_state(&batches, None, AppendOrigin::Client)
        .unwrap();
    for (_, info) in result.append_info_map {
        manager.update(info).unwrap();
    }
    manager.update_map_end_offset(100);
    manager.take_snapshot(&snapshots).await.unwrap();

    let restored = StateManager::new("topic-0", ProducerStateConfig::default());
    restored.load_from_snapshot(&snapshots, 0).await.unwrap();
    let entry = restored.producer_entry(7).unwrap();
    assert_eq!(entry.last_data_offset(), 100);
    assert_eq!(restored.map_end_offset(), 100);
}

#[tokio::test]
async fn expired_entries_are_not_restored_from_snapshot() {
    let manager = StateManager::new("topic-0", ProducerStateConfig::default());
    let log_store = FakeLogStore {
        log: FakeLog {
            batches: Arc::new(Vec::new()),
        },
    };
    let decoder = FakeDecoder {
        log: FakeLog {
            batches: Arc::new(Vec::new()),
        },
    };
    let snapshots = FakeSnapshotStore::empty();
    manager.recover(&log_store, &decoder, &snapshots, 0).await.unwrap();

    let batches = vec![simple_batch(7, 0, 100)];
    let result = manager
        .analyze_and_validate_producer_state(&batches, None, AppendOrigin::Client)
        .unwrap();
    for (_, info) in result.append_info_map {
        manager.update(info).unwrap();
    }
    manager.take_snapshot(&snapshots).await.unwrap();

    // Producer 7's last append was at timestamp 1_100; loading far enough in
    // the future that it has aged out of the expiration window should not
    // restore it.
    let restored = StateManager::new("topic-0", ProducerStateConfig::default());
    restored
        .load_from_snapshot(&snapshots, 1_100 + 900_000)
        .await
        .unwrap();
    assert!(restored.producer_entry(7).is_none());
}
