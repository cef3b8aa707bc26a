//! Queue (C4): buffers sends issued before the underlying protocol has
//! connected, flushing them in order once it has.

use std::collections::VecDeque;

use bytes::Bytes;
use gti_protocol::ChannelIndex;

/// A send that could not yet be issued to the protocol.
pub struct PendingSend {
    pub data: Bytes,
    /// `None` marks a broadcast (down strategies); `Some` targets one
    /// channel (up/intra strategies).
    pub channel: Option<ChannelIndex>,
}

#[derive(Default)]
pub struct SendQueue {
    pending: VecDeque<PendingSend>,
}

impl SendQueue {
    pub fn push(&mut self, data: Bytes, channel: Option<ChannelIndex>) {
        self.pending.push_back(PendingSend { data, channel });
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Drains every buffered send in FIFO order.
    pub fn drain(&mut self) -> std::collections::vec_deque::Drain<'_, PendingSend> {
        self.pending.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_fifo_order() {
        let mut queue = SendQueue::default();
        queue.push(Bytes::from_static(b"a"), Some(0));
        queue.push(Bytes::from_static(b"b"), Some(1));
        let drained: Vec<_> = queue.drain().map(|p| p.data).collect();
        assert_eq!(drained, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
    }
}
