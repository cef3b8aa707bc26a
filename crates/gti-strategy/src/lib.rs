//! Communication strategies (C4 queue, C5 strategies): the layer between
//! the placement driver and the raw [`gti_protocol::Protocol`], responsible
//! for batching, non-blocking pipelining, queueing sends issued before
//! connect, and propagating panic/shutdown handshakes.

pub mod buffer;
pub mod down;
pub mod error;
pub mod intra;
pub mod panic;
pub mod queue;
pub mod up;

pub use buffer::{is_aggregate, AggregateBuffer, AggregateBuilder, BufferPool, AGGREGATE_MARKER};
pub use down::{DownStrategy, IsendDown, SimpleDown, ThreadedDown};
pub use error::{Error, Result};
pub use intra::{IntraStrategy, IsendIntra, SimpleIntra};
pub use panic::PanicListener;
pub use queue::SendQueue;
pub use up::{IsendUp, SimpleUp, ThreadedUp, UpStrategy};

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use gti_protocol::shmem::Hub;
    use gti_protocol::{Protocol, WILDCARD};
    use std::sync::Arc;

    #[test]
    fn simple_up_delivers_to_parent_channel() {
        let hub = Hub::new(0);
        let child = hub.connect();
        let parent = hub.connect();

        let up: Arc<dyn Protocol> = Arc::new(child);
        let strategy = SimpleUp::new(up, 1);
        strategy.send(Bytes::from_static(b"hello")).unwrap();

        let mut buf = [0u8; 16];
        let (len, from) = parent.recv(&mut buf, WILDCARD).unwrap();
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(from, 0);
    }

    #[test]
    fn threaded_up_aggregates_small_messages_into_one_wire_send() {
        let hub = Hub::new(0);
        let child = hub.connect();
        let parent = hub.connect();

        let up: Arc<dyn Protocol> = Arc::new(child);
        let strategy = ThreadedUp::with_limits(up, 1, 4096, 10, 8);
        strategy.send(Bytes::from_static(b"one")).unwrap();
        strategy.send(Bytes::from_static(b"two")).unwrap();
        strategy.flush().unwrap();
        strategy.wait().unwrap();

        let mut buf = [0u8; 4096];
        let (len, _) = parent.recv(&mut buf, WILDCARD).unwrap();
        let aggregate = AggregateBuffer::from_bytes(bytes::Bytes::copy_from_slice(&buf[..len]));
        let records: Vec<&[u8]> = aggregate.records().collect();
        assert_eq!(records, vec![b"one".as_slice(), b"two".as_slice()]);
    }
}
