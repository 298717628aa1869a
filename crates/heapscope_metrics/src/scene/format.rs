//! Record framing for scene files.

use crate::aggregator::{MemoryMetrics, MetricsSnapshot};
use crate::error::ImportError;
use crate::record::AllocationEvent;
use allocator_api2::alloc::Allocator;
use heapscope_core::memory::LinearArena;
use serde::{Deserialize, Serialize};

pub const HEADER_LEN: usize = 8;
pub const TRAILER_LEN: usize = 8;

/// Record as written: borrows the live metrics.
#[derive(Serialize)]
#[serde(bound = "")]
pub struct SnapshotFrameRef<'a, A: Allocator + Clone> {
    pub metrics: &'a MemoryMetrics<A>,
    pub time_us: f64,
    pub event: AllocationEvent,
    pub stacktrace: &'a str,
}

/// Record as read back.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SnapshotFrame {
    pub metrics: MetricsSnapshot,
    pub time_us: f64,
    pub event: AllocationEvent,
    pub stacktrace: String,
}

/// Encodes `frame` with its length prefix into `scratch`, growing the arena
/// when the record does not fit. The returned bytes live until the next
/// call.
pub fn encode_frame<'s, A: Allocator + Clone>(
    scratch: &'s mut LinearArena,
    frame: &SnapshotFrameRef<'_, A>,
) -> bincode::Result<&'s [u8]> {
    let payload_len = bincode::serialized_size(frame)?;
    let total = HEADER_LEN + payload_len as usize;

    scratch.reset();
    while scratch.capacity() < total {
        if !scratch.resize_buffer() {
            break;
        }
    }
    let Some(buf) = scratch.allocate_bytes(total) else {
        return Err(Box::new(bincode::ErrorKind::SizeLimit));
    };

    let (header, payload) = buf.split_at_mut(HEADER_LEN);
    bincode::serialize_into(header, &payload_len)?;
    bincode::serialize_into(payload, frame)?;
    Ok(buf)
}

pub fn encode_trailer(snapshot_count: u64) -> bincode::Result<Vec<u8>> {
    bincode::serialize(&snapshot_count)
}

/// Splits a scene file into its record stream and snapshot count.
pub fn split_trailer(bytes: &[u8]) -> Result<(&[u8], u64), ImportError> {
    if bytes.len() < TRAILER_LEN {
        return Err(ImportError::MissingTrailer { len: bytes.len() });
    }
    let (records, trailer) = bytes.split_at(bytes.len() - TRAILER_LEN);
    let count: u64 = bincode::deserialize(trailer).map_err(ImportError::Trailer)?;

    // Every record carries at least its header.
    if count > (records.len() / HEADER_LEN) as u64 {
        return Err(ImportError::ImplausibleCount {
            count,
            record_bytes: records.len(),
        });
    }
    Ok((records, count))
}

/// Walks a record stream, yielding each payload.
pub struct RecordReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> RecordReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }
}

impl<'a> Iterator for RecordReader<'a> {
    type Item = Result<&'a [u8], ImportError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining() == 0 {
            return None;
        }

        let start = self.offset;
        let truncated = ImportError::TruncatedRecord { offset: start };
        if self.remaining() < HEADER_LEN {
            self.offset = self.bytes.len();
            return Some(Err(truncated));
        }

        let header = &self.bytes[start..start + HEADER_LEN];
        let payload_len = match bincode::deserialize::<u64>(header) {
            Ok(len) => len,
            Err(_) => {
                self.offset = self.bytes.len();
                return Some(Err(truncated));
            }
        };

        let available = (self.remaining() - HEADER_LEN) as u64;
        if payload_len > available {
            self.offset = self.bytes.len();
            return Some(Err(truncated));
        }

        let payload_start = start + HEADER_LEN;
        let payload_end = payload_start + payload_len as usize;
        self.offset = payload_end;
        Some(Ok(&self.bytes[payload_start..payload_end]))
    }
}
