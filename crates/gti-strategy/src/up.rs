//! Up strategies (C5): the single logical channel toward a place's
//! parent. Three tiers share one trait so `gti-place` can swap
//! implementations without caring which is wired up.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use gti_protocol::{ChannelIndex, Protocol, RequestId};

use crate::buffer::{AggregateBuilder, BufferPool, BUF_LENGTH_DEFAULT, MAX_NUM_MSGS_DEFAULT, MAX_REQUESTS_DEFAULT};
use crate::error::{Error, Result};
use crate::panic::PanicListener;
use crate::queue::SendQueue;

pub trait UpStrategy: PanicListener {
    fn send(&self, data: Bytes) -> Result<()>;
    fn test(&self) -> Result<()>;
    fn wait(&self) -> Result<()>;
    fn shutdown(&self, flush: bool, sync: bool) -> Result<()>;
    fn raise_panic(&self) -> Result<()>;
    fn flush(&self) -> Result<()>;
    fn flush_and_set_immediate(&self) -> Result<()>;
}

fn is_not_initialized(err: &gti_protocol::Error) -> bool {
    matches!(err, gti_protocol::Error::NotInitialized)
}

/// One message per call, synchronous.
pub struct SimpleUp {
    protocol: Arc<dyn Protocol>,
    channel: ChannelIndex,
    queue: Mutex<SendQueue>,
}

impl SimpleUp {
    pub fn new(protocol: Arc<dyn Protocol>, channel: ChannelIndex) -> Self {
        SimpleUp {
            protocol,
            channel,
            queue: Mutex::new(SendQueue::default()),
        }
    }
}

impl UpStrategy for SimpleUp {
    fn send(&self, data: Bytes) -> Result<()> {
        match self.protocol.ssend(&data, self.channel) {
            Ok(()) => Ok(()),
            Err(e) if is_not_initialized(&e) => {
                self.queue.lock().expect("queue mutex poisoned").push(data, None);
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

    fn flush(&self) -> Result<()> {
        let mut queue = self.queue.lock().expect("queue mutex poisoned");
        let mut remaining = SendQueue::default();
        for pending in queue.drain() {
            match self.protocol.ssend(&pending.data, self.channel) {
                Ok(()) => {}
                Err(e) if is_not_initialized(&e) => remaining.push(pending.data, pending.channel),
                Err(e) => return Err(e.into()),
            }
        }
        *queue = remaining;
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

    fn raise_panic(&self) -> Result<()> {
        self.flush()
    }

    fn flush_and_set_immediate(&self) -> Result<()> {
        self.flush()
    }
}

impl PanicListener for SimpleUp {
    fn on_panic(&self) {
        let _ = self.raise_panic();
    }
}

/// Queues up to `max_requests` outstanding non-blocking sends; forces the
/// oldest to completion once the limit is reached.
pub struct IsendUp {
    protocol: Arc<dyn Protocol>,
    channel: ChannelIndex,
    queue: Mutex<SendQueue>,
    outstanding: Mutex<VecDeque<RequestId>>,
    max_requests: usize,
}

impl IsendUp {
    pub fn new(protocol: Arc<dyn Protocol>, channel: ChannelIndex) -> Self {
        Self::with_max_requests(protocol, channel, MAX_REQUESTS_DEFAULT)
    }

    pub fn with_max_requests(protocol: Arc<dyn Protocol>, channel: ChannelIndex, max_requests: usize) -> Self {
        IsendUp {
            protocol,
            channel,
            queue: Mutex::new(SendQueue::default()),
            outstanding: Mutex::new(VecDeque::new()),
            max_requests,
        }
    }

    fn issue(&self, data: Bytes) -> Result<()> {
        let req = self.protocol.isend(data, self.channel)?;
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

impl UpStrategy for IsendUp {
    fn send(&self, data: Bytes) -> Result<()> {
        match self.issue(data.clone()) {
            Ok(()) => Ok(()),
            Err(Error::Protocol(e)) if is_not_initialized(&e) => {
                self.queue.lock().expect("queue mutex poisoned").push(data, None);
                Ok(())
            }
            Err(e) => Err(e),
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

    fn flush(&self) -> Result<()> {
        let mut queue = self.queue.lock().expect("queue mutex poisoned");
        let pending: Vec<_> = queue.drain().collect();
        drop(queue);
        let mut remaining = SendQueue::default();
        for item in pending {
            match self.issue(item.data.clone()) {
                Ok(()) => {}
                Err(Error::Protocol(e)) if is_not_initialized(&e) => remaining.push(item.data, item.channel),
                Err(e) => return Err(e),
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

    fn raise_panic(&self) -> Result<()> {
        self.flush()?;
        self.wait()
    }

    fn flush_and_set_immediate(&self) -> Result<()> {
        self.raise_panic()
    }
}

impl PanicListener for IsendUp {
    fn on_panic(&self) {
        let _ = self.raise_panic();
    }
}

/// Aggregates small messages into a shared buffer before sending; an
/// oversize record bypasses aggregation and is sent standalone, flushing
/// whatever was pending first.
pub struct ThreadedUp {
    inner: IsendUp,
    pool: Arc<BufferPool>,
    builder: Mutex<AggregateBuilder>,
    capacity: usize,
    max_msgs: usize,
    immediate: AtomicBool,
}

impl ThreadedUp {
    pub fn new(protocol: Arc<dyn Protocol>, channel: ChannelIndex) -> Self {
        Self::with_limits(
            protocol,
            channel,
            BUF_LENGTH_DEFAULT,
            MAX_NUM_MSGS_DEFAULT,
            MAX_REQUESTS_DEFAULT,
        )
    }

    pub fn with_limits(
        protocol: Arc<dyn Protocol>,
        channel: ChannelIndex,
        capacity: usize,
        max_msgs: usize,
        max_requests: usize,
    ) -> Self {
        let pool = BufferPool::new(capacity);
        let builder = AggregateBuilder::new(&pool, capacity, max_msgs);
        ThreadedUp {
            inner: IsendUp::with_max_requests(protocol, channel, max_requests),
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
        self.inner.send(full.finish())
    }
}

impl UpStrategy for ThreadedUp {
    fn send(&self, data: Bytes) -> Result<()> {
        if self.immediate.load(Ordering::SeqCst) {
            return self.inner.send(data);
        }
        let pushed = self.builder.lock().expect("builder mutex poisoned").try_push(&data);
        if pushed {
            return Ok(());
        }
        self.flush_builder()?;
        if data.len() > self.capacity {
            return self.inner.send(data);
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

    fn raise_panic(&self) -> Result<()> {
        self.flush_and_set_immediate()
    }

    fn flush_and_set_immediate(&self) -> Result<()> {
        self.immediate.store(true, Ordering::SeqCst);
        self.flush_builder()?;
        self.inner.raise_panic()
    }
}

impl PanicListener for ThreadedUp {
    fn on_panic(&self) {
        let _ = self.raise_panic();
    }
}
