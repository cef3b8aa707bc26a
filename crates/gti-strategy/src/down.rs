//! Down strategies (C5): one channel per child, reached by broadcast.
//! `acknowledge` is how a place confirms, to one specific child, that the
//! message most recently received from it has been fully processed —
//! the per-message `ACKNOWLEDGE` reply §4.3 describes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use gti_protocol::{ChannelIndex, NewClientCallback, Protocol, RequestId};

use crate::buffer::{AggregateBuilder, BufferPool, BUF_LENGTH_DEFAULT, MAX_NUM_MSGS_DEFAULT, MAX_REQUESTS_DEFAULT};
use crate::error::{Error, Result};
use crate::panic::PanicListener;
use crate::queue::SendQueue;

const ACK_PAYLOAD: &[u8] = &[0u8];

pub trait DownStrategy: PanicListener {
    fn broadcast(&self, data: Bytes) -> Result<()>;
    fn test(&self) -> Result<()>;
    fn wait(&self) -> Result<()>;
    fn acknowledge(&self, channel: ChannelIndex) -> Result<()>;
    fn shutdown(&self, flush: bool, sync: bool) -> Result<()>;
    fn flush(&self) -> Result<()>;
    fn register_new_client_callback(&self, callback: NewClientCallback);
}

fn is_not_initialized(err: &gti_protocol::Error) -> bool {
    matches!(err, gti_protocol::Error::NotInitialized)
}

pub struct SimpleDown {
    protocol: Arc<dyn Protocol>,
    queue: Mutex<SendQueue>,
}

impl SimpleDown {
    pub fn new(protocol: Arc<dyn Protocol>) -> Self {
        SimpleDown {
            protocol,
            queue: Mutex::new(SendQueue::default()),
        }
    }

    fn channels(&self) -> Vec<ChannelIndex> {
        (0..self.protocol.num_channels() as ChannelIndex).collect()
    }

    fn send_to(&self, channel: ChannelIndex, data: &Bytes) -> Result<()> {
        self.protocol.ssend(data, channel)?;
        Ok(())
    }
}

impl DownStrategy for SimpleDown {
    /// Sends to every already-connected channel, queueing only the
    /// channels that are not yet connected — a channel that already took
    /// the broadcast must not be resent to once the rest catch up on
    /// `flush`.
    fn broadcast(&self, data: Bytes) -> Result<()> {
        for channel in self.channels() {
            match self.send_to(channel, &data) {
                Ok(()) => {}
                Err(Error::Protocol(e)) if is_not_initialized(&e) => {
                    self.queue.lock().expect("queue mutex poisoned").push(data.clone(), Some(channel));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn test(&self) -> Result<()> {
        Ok(())
    }

    fn wait(&self) -> Result<()> {
        Ok(())
    }

    fn acknowledge(&self, channel: ChannelIndex) -> Result<()> {
        self.protocol.ssend(ACK_PAYLOAD, channel)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let mut queue = self.queue.lock().expect("queue mutex poisoned");
        let pending: Vec<_> = queue.drain().collect();
        drop(queue);
        let mut remaining = SendQueue::default();
        for item in pending {
            let result = match item.channel {
                Some(channel) => self.send_to(channel, &item.data),
                None => self.broadcast(item.data.clone()),
            };
            if result.is_err() {
                remaining.push(item.data, item.channel);
            }
        }
        *self.queue.lock().expect("queue mutex poisoned") = remaining;
        Ok(())
    }

    fn shutdown(&self, flush: bool, sync: bool) -> Result<()> {
        if flush {
            self.flush()?;
        }
        if sync {
            self.protocol.remove_outstanding_requests();
        }
        self.protocol.shutdown()?;
        Ok(())
    }

    fn register_new_client_callback(&self, callback: NewClientCallback) {
        self.protocol.register_new_client_callback(callback);
    }
}

impl PanicListener for SimpleDown {
    fn on_panic(&self) {
        let _ = self.flush();
    }
}

/// Non-blocking broadcast: issues one `isend` per child, bounding total
/// outstanding requests across all children to `max_requests`.
pub struct IsendDown {
    protocol: Arc<dyn Protocol>,
    queue: Mutex<SendQueue>,
    outstanding: Mutex<VecDeque<RequestId>>,
    max_requests: usize,
}

impl IsendDown {
    pub fn new(protocol: Arc<dyn Protocol>) -> Self {
        Self::with_max_requests(protocol, MAX_REQUESTS_DEFAULT)
    }

    pub fn with_max_requests(protocol: Arc<dyn Protocol>, max_requests: usize) -> Self {
        IsendDown {
            protocol,
            queue: Mutex::new(SendQueue::default()),
            outstanding: Mutex::new(VecDeque::new()),
            max_requests,
        }
    }

    fn channels(&self) -> Vec<ChannelIndex> {
        (0..self.protocol.num_channels() as ChannelIndex).collect()
    }

    fn issue(&self, channel: ChannelIndex, data: Bytes) -> Result<()> {
        let req = self.protocol.isend(data, channel)?;
        let mut outstanding = self.outstanding.lock().expect("outstanding mutex poisoned");
        if outstanding.len() >= self.max_requests {
            if let Some(oldest) = outstanding.pop_front() {
                self.protocol.wait(oldest)?;
            }
        }
        outstanding.push_back(req);
        Ok(())
    }
}

impl DownStrategy for IsendDown {
    /// Issues to every already-connected channel, queueing only the
    /// channels that are not yet connected — a channel that already took
    /// the broadcast must not be resent to once the rest catch up on
    /// `flush`.
    fn broadcast(&self, data: Bytes) -> Result<()> {
        for channel in self.channels() {
            match self.issue(channel, data.clone()) {
                Ok(()) => {}
                Err(Error::Protocol(e)) if is_not_initialized(&e) => {
                    self.queue.lock().expect("queue mutex poisoned").push(data.clone(), Some(channel));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
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

    fn acknowledge(&self, channel: ChannelIndex) -> Result<()> {
        self.protocol.ssend(ACK_PAYLOAD, channel)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let mut queue = self.queue.lock().expect("queue mutex poisoned");
        let pending: Vec<_> = queue.drain().collect();
        drop(queue);
        let mut remaining = SendQueue::default();
        for item in pending {
            let result = match item.channel {
                Some(channel) => self.issue(channel, item.data.clone()),
                None => self.broadcast(item.data.clone()),
            };
            if result.is_err() {
                remaining.push(item.data, item.channel);
            }
        }
        *self.queue.lock().expect("queue mutex poisoned") = remaining;
        Ok(())
    }

    fn shutdown(&self, flush: bool, sync: bool) -> Result<()> {
        if flush {
            self.flush()?;
            self.wait()?;
        }
        if sync {
            self.protocol.remove_outstanding_requests();
        }
        self.protocol.shutdown()?;
        Ok(())
    }

    fn register_new_client_callback(&self, callback: NewClientCallback) {
        self.protocol.register_new_client_callback(callback);
    }
}

impl PanicListener for IsendDown {
    fn on_panic(&self) {
        let _ = self.flush();
        let _ = self.wait();
    }
}

/// Aggregates per broadcast call, then fans the frozen buffer out to
/// every child via `IsendDown`.
pub struct ThreadedDown {
    inner: IsendDown,
    pool: Arc<BufferPool>,
    builder: Mutex<AggregateBuilder>,
    capacity: usize,
    max_msgs: usize,
    immediate: AtomicBool,
}

impl ThreadedDown {
    pub fn new(protocol: Arc<dyn Protocol>) -> Self {
        Self::with_limits(protocol, BUF_LENGTH_DEFAULT, MAX_NUM_MSGS_DEFAULT, MAX_REQUESTS_DEFAULT)
    }

    pub fn with_limits(protocol: Arc<dyn Protocol>, capacity: usize, max_msgs: usize, max_requests: usize) -> Self {
        let pool = BufferPool::new(capacity);
        let builder = AggregateBuilder::new(&pool, capacity, max_msgs);
        ThreadedDown {
            inner: IsendDown::with_max_requests(protocol, max_requests),
            pool,
            builder: Mutex::new(builder),
            capacity,
            max_msgs,
            immediate: AtomicBool::new(false),
        }
    }

    fn flush_builder(&self) -> Result<()> {
        let mut builder = self.builder.lock().expect("builder mutex poisoned");
        if builder.is_empty() {
            return Ok(());
        }
        let fresh = AggregateBuilder::new(&self.pool, self.capacity, self.max_msgs);
        let full = std::mem::replace(&mut *builder, fresh);
        drop(builder);
        self.inner.broadcast(full.finish())
    }
}

impl DownStrategy for ThreadedDown {
    fn broadcast(&self, data: Bytes) -> Result<()> {
        if self.immediate.load(Ordering::SeqCst) {
            return self.inner.broadcast(data);
        }
        let pushed = self.builder.lock().expect("builder mutex poisoned").try_push(&data);
        if pushed {
            return Ok(());
        }
        self.flush_builder()?;
        if data.len() > self.capacity {
            return self.inner.broadcast(data);
        }
        self.builder.lock().expect("builder mutex poisoned").try_push(&data);
        Ok(())
    }

    fn test(&self) -> Result<()> {
        self.inner.test()
    }

    fn wait(&self) -> Result<()> {
        self.inner.wait()
    }

    fn acknowledge(&self, channel: ChannelIndex) -> Result<()> {
        self.inner.acknowledge(channel)
    }

    fn flush(&self) -> Result<()> {
        self.flush_builder()?;
        self.inner.flush()
    }

    fn shutdown(&self, flush: bool, sync: bool) -> Result<()> {
        if flush {
            self.flush_builder()?;
        }
        self.inner.shutdown(flush, sync)
    }

    fn register_new_client_callback(&self, callback: NewClientCallback) {
        self.inner.register_new_client_callback(callback);
    }
}

impl PanicListener for ThreadedDown {
    fn on_panic(&self) {
        self.immediate.store(true, Ordering::SeqCst);
        let _ = self.flush_builder();
        let _ = self.inner.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gti_protocol::Completion;

    /// Channel 1 reports `NotInitialized` exactly once; every accepted
    /// send is recorded so a test can check a channel is never targeted
    /// twice for what was logically one broadcast.
    struct FlakyProtocol {
        fail_channel_one_once: Mutex<bool>,
        sent: Mutex<Vec<ChannelIndex>>,
    }

    impl FlakyProtocol {
        fn new() -> Self {
            FlakyProtocol {
                fail_channel_one_once: Mutex::new(true),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    impl Protocol for FlakyProtocol {
        fn ssend(&self, _buf: &[u8], channel: ChannelIndex) -> gti_protocol::Result<()> {
            if channel == 1 {
                let mut fail_once = self.fail_channel_one_once.lock().unwrap();
                if *fail_once {
                    *fail_once = false;
                    return Err(gti_protocol::Error::NotInitialized);
                }
            }
            self.sent.lock().unwrap().push(channel);
            Ok(())
        }

        fn isend(&self, buf: bytes::Bytes, channel: ChannelIndex) -> gti_protocol::Result<RequestId> {
            self.ssend(&buf, channel)?;
            Ok(RequestId(0))
        }

        fn recv(&self, _buf: &mut [u8], _channel: ChannelIndex) -> gti_protocol::Result<(usize, ChannelIndex)> {
            unimplemented!("not exercised by these tests")
        }

        fn irecv(&self, _buf: Vec<u8>, _channel: ChannelIndex) -> gti_protocol::Result<RequestId> {
            unimplemented!("not exercised by these tests")
        }

        fn test(&self, _req: RequestId) -> gti_protocol::Result<Option<Completion>> {
            Ok(Some(Completion::Sent))
        }

        fn wait(&self, _req: RequestId) -> gti_protocol::Result<Completion> {
            Ok(Completion::Sent)
        }

        fn shutdown(&self) -> gti_protocol::Result<()> {
            Ok(())
        }

        fn remove_outstanding_requests(&self) {}

        fn num_channels(&self) -> usize {
            2
        }

        fn num_clients(&self) -> usize {
            2
        }

        fn place_id(&self) -> u32 {
            0
        }

        fn register_new_client_callback(&self, _callback: NewClientCallback) {}
    }

    #[test]
    fn simple_down_flush_does_not_resend_to_a_channel_that_already_succeeded() {
        let flaky = Arc::new(FlakyProtocol::new());
        let protocol: Arc<dyn Protocol> = flaky.clone();
        let down = SimpleDown::new(protocol);

        down.broadcast(Bytes::from_static(b"hello")).unwrap();
        down.flush().unwrap();

        assert_eq!(*flaky.sent.lock().unwrap(), vec![0, 1], "channel 0 must be sent to exactly once");
    }

    #[test]
    fn isend_down_flush_does_not_resend_to_a_channel_that_already_succeeded() {
        let flaky = Arc::new(FlakyProtocol::new());
        let protocol: Arc<dyn Protocol> = flaky.clone();
        let down = IsendDown::new(protocol);

        down.broadcast(Bytes::from_static(b"hello")).unwrap();
        down.flush().unwrap();

        assert_eq!(*flaky.sent.lock().unwrap(), vec![0, 1], "channel 0 must be sent to exactly once");
    }
}
