//! Aggregate buffers: the wire representation the threaded strategies use
//! to batch several small records into one send (§4.3).
//!
//! Layout: `[marker: u32 AGGREGATE_MARKER | record_count: u32 | (len: u32,
//! bytes)*]`. Each `(len, bytes)` entry is itself a whole record as the
//! driver would otherwise have received it standalone (channel-id prefix
//! included), so unpacking an aggregate is just replaying the single-record
//! path once per entry. `marker` never collides with a real record's own
//! channel-id prefix: a `ChannelId` encodes a small level count (tree depth
//! is never anywhere near `u32::MAX`), the same trick `gti_protocol::token`
//! uses to keep its reserved 64-bit tokens from colliding with real channel
//! indices.

use std::sync::{Arc, Mutex};

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const BUF_LENGTH_DEFAULT: usize = 100 * 1024;
pub const MAX_NUM_MSGS_DEFAULT: usize = 1000;
pub const MAX_NUM_MSGS_PARTIAL_DEFAULT: usize = 2;
pub const MAX_REQUESTS_DEFAULT: usize = 100;

/// No real `ChannelId` encoding starts with this level count, so a
/// receiver can tell an aggregate's header apart from a single record's
/// channel-id prefix by peeking at the buffer's first four bytes.
pub const AGGREGATE_MARKER: u32 = u32::MAX;

const MARKER_LEN: usize = 4;
const HEADER_LEN: usize = 4;
const PREFIX_LEN: usize = MARKER_LEN + HEADER_LEN;

/// Peeks at `buf`'s leading bytes to tell whether it is an aggregate
/// produced by `AggregateBuilder` rather than a single record (possibly
/// channel-id-prefixed).
pub fn is_aggregate(buf: &[u8]) -> bool {
    buf.len() >= MARKER_LEN && u32::from_ne_bytes(buf[..MARKER_LEN].try_into().expect("length checked above")) == AGGREGATE_MARKER
}

/// A pool of reusable aggregation buffers, avoiding a fresh allocation
/// for every flush.
pub struct BufferPool {
    free: Mutex<Vec<BytesMut>>,
    capacity: usize,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Arc<BufferPool> {
        Arc::new(BufferPool {
            free: Mutex::new(Vec::new()),
            capacity,
        })
    }

    pub fn acquire(self: &Arc<Self>) -> BytesMut {
        let mut free = self.free.lock().expect("buffer pool mutex poisoned");
        free.pop().unwrap_or_else(|| BytesMut::with_capacity(self.capacity))
    }

    fn recycle(&self, mut buf: BytesMut) {
        buf.clear();
        self.free.lock().expect("buffer pool mutex poisoned").push(buf);
    }
}

/// The write side: accumulates records up to `capacity` bytes or
/// `max_msgs` records, whichever comes first.
pub struct AggregateBuilder {
    buf: BytesMut,
    capacity: usize,
    max_msgs: usize,
    count: usize,
}

impl AggregateBuilder {
    pub fn new(pool: &Arc<BufferPool>, capacity: usize, max_msgs: usize) -> Self {
        let mut buf = pool.acquire();
        buf.put_u32_ne(AGGREGATE_MARKER);
        buf.put_u32_ne(0);
        AggregateBuilder {
            buf,
            capacity,
            max_msgs,
            count: 0,
        }
    }

    /// Attempts to append `record`. Returns `false` (without mutating the
    /// buffer) if it would exceed the capacity or message-count limit —
    /// the caller should flush and start a fresh builder.
    pub fn try_push(&mut self, record: &[u8]) -> bool {
        if self.count >= self.max_msgs {
            return false;
        }
        let needed = HEADER_LEN + record.len();
        if self.buf.len() + needed > self.capacity && self.count > 0 {
            return false;
        }
        self.buf.put_u32_ne(record.len() as u32);
        self.buf.put_slice(record);
        self.count += 1;
        true
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Freezes the buffer for sending, stamping the final record count
    /// into the header.
    pub fn finish(mut self) -> Bytes {
        let count = self.count as u32;
        self.buf[MARKER_LEN..PREFIX_LEN].copy_from_slice(&count.to_ne_bytes());
        self.buf.freeze()
    }
}

/// The read side of a received aggregate. Recycles its storage back to
/// `pool` on drop if this is the last outstanding reference to the
/// underlying allocation — the `bytes` crate's internal refcount (probed
/// via `try_into_mut`) stands in for a hand-rolled "free when last
/// consumer is done" counter.
pub struct AggregateBuffer {
    data: Bytes,
    pool: Option<Arc<BufferPool>>,
}

impl AggregateBuffer {
    pub fn from_bytes(data: Bytes) -> Self {
        AggregateBuffer { data, pool: None }
    }

    pub fn pooled(data: Bytes, pool: Arc<BufferPool>) -> Self {
        AggregateBuffer {
            data,
            pool: Some(pool),
        }
    }

    pub fn record_count(&self) -> u32 {
        u32::from_ne_bytes(self.data[MARKER_LEN..PREFIX_LEN].try_into().expect("aggregate header present"))
    }

    pub fn records(&self) -> RecordCursor<'_> {
        RecordCursor {
            remaining: &self.data[PREFIX_LEN..],
            left: self.record_count(),
        }
    }
}

impl Drop for AggregateBuffer {
    fn drop(&mut self) {
        let Some(pool) = self.pool.take() else {
            return;
        };
        let data = std::mem::replace(&mut self.data, Bytes::new());
        if let Ok(buf) = data.try_into_mut() {
            pool.recycle(buf);
        }
    }
}

pub struct RecordCursor<'a> {
    remaining: &'a [u8],
    left: u32,
}

impl<'a> Iterator for RecordCursor<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.left == 0 {
            return None;
        }
        let mut cursor = self.remaining;
        let len = cursor.get_u32_ne() as usize;
        let (record, rest) = cursor.split_at(len);
        self.remaining = rest;
        self.left -= 1;
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_round_trips_through_cursor() {
        let pool = BufferPool::new(BUF_LENGTH_DEFAULT);
        let mut builder = AggregateBuilder::new(&pool, BUF_LENGTH_DEFAULT, MAX_NUM_MSGS_DEFAULT);
        assert!(builder.try_push(b"one"));
        assert!(builder.try_push(b"two"));
        let frozen = builder.finish();

        assert!(is_aggregate(&frozen));
        let aggregate = AggregateBuffer::from_bytes(frozen);
        let records: Vec<&[u8]> = aggregate.records().collect();
        assert_eq!(records, vec![b"one".as_slice(), b"two".as_slice()]);
    }

    #[test]
    fn a_single_records_channel_id_prefix_is_not_mistaken_for_an_aggregate() {
        // A `ChannelId` with one level encodes as `[1u32, ...]` — nowhere
        // near the reserved marker value.
        let single_record_buf = 1u32.to_ne_bytes();
        assert!(!is_aggregate(&single_record_buf));
        assert!(!is_aggregate(&[]));
    }

    #[test]
    fn builder_refuses_past_message_limit() {
        let pool = BufferPool::new(BUF_LENGTH_DEFAULT);
        let mut builder = AggregateBuilder::new(&pool, BUF_LENGTH_DEFAULT, 1);
        assert!(builder.try_push(b"one"));
        assert!(!builder.try_push(b"two"));
    }

    #[test]
    fn builder_refuses_past_capacity_once_nonempty() {
        let pool = BufferPool::new(16);
        let mut builder = AggregateBuilder::new(&pool, 16, MAX_NUM_MSGS_DEFAULT);
        assert!(builder.try_push(b"0123456"));
        assert!(!builder.try_push(b"0123456789"));
    }
}
