//! Binary snapshot codec: `[version:u16][crc32c:u32][body_length:u32][body]`.
//!
//! The CRC32C checksum covers the body only (bytes `[10..]`), not the framing that
//! precedes it — consistent with checksumming the payload rather than the
//! length-prefix, the same split the pack's other protocol encoders (e.g. the
//! Kafka record-batch CRC) use between framing and payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use dashmap::DashMap;

use crate::entry::ProducerStateEntry;
use crate::error::StateError;
use crate::types::{Offset, ProducerId};

const SNAPSHOT_VERSION: u16 = 1;
const HEADER_LEN: usize = 10;

/// Result of decoding a snapshot: the checkpointed log offset and the producer
/// entries it covers.
#[derive(Debug, Clone)]
pub struct DecodedSnapshot {
    pub snapshot_offset: Offset,
    pub entries: Vec<ProducerStateEntry>,
}

/// Encodes the current producer map into the snapshot wire format.
pub fn encode(producers: &DashMap<ProducerId, ProducerStateEntry>, snapshot_offset: Offset) -> Bytes {
    let mut body = BytesMut::new();
    body.put_i64(snapshot_offset);
    body.put_i32(producers.len() as i32);
    for item in producers.iter() {
        let entry = item.value();
        body.put_i64(*item.key());
        body.put_i16(entry.epoch);
        body.put_i32(entry.last_seq());
        body.put_i64(entry.last_data_offset());
        body.put_i32(entry.last_offset_delta());
        body.put_i64(entry.last_timestamp);
        body.put_i32(entry.coordinator_epoch);
        body.put_i64(entry.current_txn_first_offset.unwrap_or(-1));
    }
    let body = body.freeze();

    let crc = crc32c::crc32c(&body);

    let mut out = BytesMut::with_capacity(HEADER_LEN + body.len());
    out.put_u16(SNAPSHOT_VERSION);
    out.put_u32(crc);
    out.put_u32(body.len() as u32);
    out.extend_from_slice(&body);
    out.freeze()
}

/// Decodes a snapshot, verifying its version, length and CRC before parsing the
/// body. Each decoded entry carries at most one batch in its history (the last one
/// recorded), regardless of how deep its history was before the snapshot was
/// taken.
pub fn decode(bytes: &[u8]) -> Result<DecodedSnapshot, StateError> {
    if bytes.len() < HEADER_LEN {
        return Err(StateError::SnapshotCorrupt(format!(
            "snapshot shorter than header: {} bytes",
            bytes.len()
        )));
    }

    let mut header = &bytes[..HEADER_LEN];
    let version = header.get_u16();
    if version != SNAPSHOT_VERSION {
        return Err(StateError::SnapshotCorrupt(format!(
            "unsupported snapshot version: {version}"
        )));
    }
    let expected_crc = header.get_u32();
    let body_length = header.get_u32() as usize;

    let body = &bytes[HEADER_LEN..];
    if body.len() != body_length {
        return Err(StateError::SnapshotCorrupt(format!(
            "body length mismatch: header says {body_length}, found {}",
            body.len()
        )));
    }

    let actual_crc = crc32c::crc32c(body);
    if actual_crc != expected_crc {
        return Err(StateError::SnapshotCorrupt(format!(
            "crc mismatch: expected {expected_crc:#x}, computed {actual_crc:#x}"
        )));
    }

    let mut cursor = body;
    if cursor.remaining() < 12 {
        return Err(StateError::SnapshotCorrupt(
            "body too short for snapshot_offset/producer_count".to_string(),
        ));
    }
    let snapshot_offset = cursor.get_i64();
    let producer_count = cursor.get_i32();
    if producer_count < 0 {
        return Err(StateError::SnapshotCorrupt(format!(
            "negative producer count: {producer_count}"
        )));
    }

    let mut entries = Vec::with_capacity(producer_count as usize);
    for _ in 0..producer_count {
        if cursor.remaining() < 8 + 2 + 4 + 8 + 4 + 8 + 4 + 8 {
            return Err(StateError::SnapshotCorrupt(
                "body truncated mid-entry".to_string(),
            ));
        }
        let producer_id = cursor.get_i64();
        let epoch = cursor.get_i16();
        let last_sequence = cursor.get_i32();
        let last_offset = cursor.get_i64();
        let offset_delta = cursor.get_i32();
        let timestamp = cursor.get_i64();
        let coordinator_epoch = cursor.get_i32();
        let current_txn_first_offset = cursor.get_i64();

        let mut entry = ProducerStateEntry::empty(producer_id);
        entry.epoch = epoch;
        entry.coordinator_epoch = coordinator_epoch;
        entry.last_timestamp = timestamp;
        entry.current_txn_first_offset = if current_txn_first_offset < 0 {
            None
        } else {
            Some(current_txn_first_offset)
        };
        if last_offset >= 0 {
            entry.add_batch(crate::batch::BatchMetadata::new(
                last_sequence,
                last_offset,
                offset_delta,
                timestamp,
            ));
        }
        entries.push(entry);
    }

    Ok(DecodedSnapshot {
        snapshot_offset,
        entries,
    })
}
