//! Intra strategies (C5): peer-to-peer communication between places at
//! the same tree layer, addressed by place id rather than by parent/child
//! channel.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use gti_protocol::{ChannelIndex, Protocol, RequestId};

use crate::error::Result;
use crate::panic::PanicListener;
use crate::queue::SendQueue;

pub trait IntraStrategy: PanicListener {
    fn send(&self, to_place: ChannelIndex, data: Bytes) -> Result<()>;
    fn test(&self) -> Result<()>;
    fn wait(&self) -> Result<()>;
    /// True once every outstanding send has completed and the local send
    /// queue has drained — a local approximation of the source's
    /// `UPDATE`/`ACKNOWLEDGE` liveness query, which additionally confirms
    /// peers have nothing in flight toward *this* place; that half needs
    /// `gti-place`'s receive loop and is layered on top of this strategy.
    fn communication_finished(&self) -> bool;
    fn get_num_places(&self) -> usize;
    fn get_own_place_id(&self) -> ChannelIndex;
    fn shutdown(&self, flush: bool) -> Result<()>;
    fn flush(&self) -> Result<()>;
}

fn is_not_initialized(err: &gti_protocol::Error) -> bool {
    matches!(err, gti_protocol::Error::NotInitialized)
}

pub struct SimpleIntra {
    protocol: Arc<dyn Protocol>,
    own_place: ChannelIndex,
    queue: Mutex<SendQueue>,
}

impl SimpleIntra {
    pub fn new(protocol: Arc<dyn Protocol>, own_place: ChannelIndex) -> Self {
        SimpleIntra {
            protocol,
            own_place,
            queue: Mutex::new(SendQueue::default()),
        }
    }
}

impl IntraStrategy for SimpleIntra {
    fn send(&self, to_place: ChannelIndex, data: Bytes) -> Result<()> {
        match self.protocol.ssend(&data, to_place) {
            Ok(()) => Ok(()),
            Err(e) if is_not_initialized(&e) => {
                self.queue.lock().expect("queue mutex poisoned").push(data, Some(to_place));
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn test(&self) -> Result<()> {
        Ok(())
    }

    fn wait(&self) -> Result<()> {
        Ok(())
    }

    fn communication_finished(&self) -> bool {
        self.queue.lock().expect("queue mutex poisoned").is_empty()
    }

    fn get_num_places(&self) -> usize {
        self.protocol.num_clients()
    }

    fn get_own_place_id(&self) -> ChannelIndex {
        self.own_place
    }

    fn flush(&self) -> Result<()> {
        let mut queue = self.queue.lock().expect("queue mutex poisoned");
        let pending: Vec<_> = queue.drain().collect();
        drop(queue);
        let mut remaining = SendQueue::default();
        for item in pending {
            let channel = item.channel.expect("intra sends always target a place");
            match self.protocol.ssend(&item.data, channel) {
                Ok(()) => {}
                Err(e) if is_not_initialized(&e) => remaining.push(item.data, Some(channel)),
                Err(e) => return Err(e.into()),
            }
        }
        *self.queue.lock().expect("queue mutex poisoned") = remaining;
        Ok(())
    }

    fn shutdown(&self, flush: bool) -> Result<()> {
        if flush {
            self.flush()?;
        }
        self.protocol.shutdown()?;
        Ok(())
    }
}

impl PanicListener for SimpleIntra {
    fn on_panic(&self) {
        let _ = self.flush();
    }
}

/// Non-blocking intra sends, bounding outstanding requests to
/// `max_requests` total across all peers.
pub struct IsendIntra {
    protocol: Arc<dyn Protocol>,
    own_place: ChannelIndex,
    queue: Mutex<SendQueue>,
    outstanding: Mutex<VecDeque<RequestId>>,
    max_requests: usize,
}

impl IsendIntra {
    pub fn new(protocol: Arc<dyn Protocol>, own_place: ChannelIndex) -> Self {
        Self::with_max_requests(protocol, own_place, crate::buffer::MAX_REQUESTS_DEFAULT)
    }

    pub fn with_max_requests(protocol: Arc<dyn Protocol>, own_place: ChannelIndex, max_requests: usize) -> Self {
        IsendIntra {
            protocol,
            own_place,
            queue: Mutex::new(SendQueue::default()),
            outstanding: Mutex::new(VecDeque::new()),
            max_requests,
        }
    }
}

impl IntraStrategy for IsendIntra {
    fn send(&self, to_place: ChannelIndex, data: Bytes) -> Result<()> {
        match self.protocol.isend(data.clone(), to_place) {
            Ok(req) => {
                let mut outstanding = self.outstanding.lock().expect("outstanding mutex poisoned");
                if outstanding.len() >= self.max_requests {
                    if let Some(oldest) = outstanding.pop_front() {
                        self.protocol.wait(oldest)?;
                    }
                }
                outstanding.push_back(req);
                Ok(())
            }
            Err(e) if is_not_initialized(&e) => {
                self.queue.lock().expect("queue mutex poisoned").push(data, Some(to_place));
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn test(&self) -> Result<()> {
        let mut outstanding = self.outstanding.lock().expect("outstanding mutex poisoned");
        let mut still_pending = VecDeque::new();
        for req in outstanding.drain(..) {
            if self.protocol.test(req)?.is_none() {
                still_pending.push_back(req);
            }
        }
        *outstanding = still_pending;
        Ok(())
    }

    fn wait(&self) -> Result<()> {
        let mut outstanding = self.outstanding.lock().expect("outstanding mutex poisoned");
        for req in outstanding.drain(..) {
            self.protocol.wait(req)?;
        }
        Ok(())
    }

    fn communication_finished(&self) -> bool {
        self.queue.lock().expect("queue mutex poisoned").is_empty()
            && self.outstanding.lock().expect("outstanding mutex poisoned").is_empty()
    }

    fn get_num_places(&self) -> usize {
        self.protocol.num_clients()
    }

    fn get_own_place_id(&self) -> ChannelIndex {
        self.own_place
    }

    fn flush(&self) -> Result<()> {
        let mut queue = self.queue.lock().expect("queue mutex poisoned");
        let pending: Vec<_> = queue.drain().collect();
        drop(queue);
        let mut remaining = SendQueue::default();
        for item in pending {
            let channel = item.channel.expect("intra sends always target a place");
            match self.send(channel, item.data.clone()) {
                Ok(()) => {}
                Err(_) => remaining.push(item.data, Some(channel)),
            }
        }
        *self.queue.lock().expect("queue mutex poisoned") = remaining;
        Ok(())
    }

    fn shutdown(&self, flush: bool) -> Result<()> {
        if flush {
            self.flush()?;
            self.wait()?;
        }
        self.protocol.shutdown()?;
        Ok(())
    }
}

impl PanicListener for IsendIntra {
    fn on_panic(&self) {
        let _ = self.flush();
        let _ = self.wait();
    }
}
