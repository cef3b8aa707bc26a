//! Shared-memory, in-process protocol: a single [`Hub`] owns a mailbox per
//! connected client (thread), guarded by one `Mutex` and signaled through
//! one `Condvar` — the same "lock-protected shared state behind `Arc`"
//! shape the teacher uses for its own client-side router.
//!
//! A rendezvous through [`Hub::connect`] is the shared-memory analog of
//! the hello-queue: it hands the new client a fresh channel index and, if
//! registered, fires the place's new-client callback.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

use crate::{ChannelIndex, Completion, Error, NewClientCallback, Protocol, RequestId, Result, WILDCARD};

struct Frame {
    data: Vec<u8>,
    from: ChannelIndex,
}

struct RecvWaiter {
    request: RequestId,
    channel_filter: ChannelIndex,
    buf: Vec<u8>,
}

#[derive(Default)]
struct Mailbox {
    queue: VecDeque<Frame>,
    waiters: VecDeque<RecvWaiter>,
}

enum PendingRequest {
    Send,
    Recv,
}

struct HubState {
    mailboxes: Vec<Mailbox>,
    requests: HashMap<RequestId, PendingRequest>,
    completions: HashMap<RequestId, Completion>,
    next_request: u64,
    finalized: bool,
    new_client_cb: Option<NewClientCallback>,
}

/// The place-side rendezvous point shared by every connected client.
pub struct Hub {
    place_id: u32,
    state: Mutex<HubState>,
    cond: Condvar,
}

impl Hub {
    pub fn new(place_id: u32) -> Arc<Hub> {
        Arc::new(Hub {
            place_id,
            state: Mutex::new(HubState {
                mailboxes: Vec::new(),
                requests: HashMap::new(),
                completions: HashMap::new(),
                next_request: 0,
                finalized: false,
                new_client_cb: None,
            }),
            cond: Condvar::new(),
        })
    }

    /// Connects a new client, assigning it the next channel index.
    pub fn connect(self: &Arc<Hub>) -> ShmemClient {
        let index;
        {
            let mut state = self.state.lock().expect("hub mutex poisoned");
            index = state.mailboxes.len() as ChannelIndex;
            state.mailboxes.push(Mailbox::default());
            if let Some(cb) = state.new_client_cb.as_ref() {
                cb(index);
            }
        }
        self.cond.notify_all();
        ShmemClient {
            hub: self.clone(),
            channel: index,
        }
    }

    fn next_request_id(state: &mut HubState) -> RequestId {
        let id = RequestId(state.next_request);
        state.next_request += 1;
        id
    }

    /// Delivers `data` into `to`'s mailbox, satisfying a waiting `irecv`
    /// immediately if one matches, else enqueuing for a future `recv`.
    fn deliver(&self, to: ChannelIndex, from: ChannelIndex, data: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock().expect("hub mutex poisoned");
        if state.finalized {
            return Err(Error::NotInitialized);
        }
        let mailbox = state
            .mailboxes
            .get_mut(to as usize)
            .ok_or(Error::UnknownChannel(to))?;

        if let Some(pos) = mailbox
            .waiters
            .iter()
            .position(|w| w.channel_filter == WILDCARD || w.channel_filter == from)
        {
            let mut waiter = mailbox.waiters.remove(pos).unwrap();
            let len = data.len().min(waiter.buf.len());
            waiter.buf[..len].copy_from_slice(&data[..len]);
            let request = waiter.request;
            state.completions.insert(
                request,
                Completion::Received {
                    buf: waiter.buf,
                    len,
                    from,
                },
            );
            state.requests.remove(&request);
        } else {
            mailbox.queue.push_back(Frame { data, from });
        }
        drop(state);
        self.cond.notify_all();
        Ok(())
    }

    /// Blocking take from `channel`'s mailbox, matching `filter`.
    fn take_blocking(&self, my_channel: ChannelIndex, filter: ChannelIndex) -> Result<(Vec<u8>, ChannelIndex)> {
        let mut state = self.state.lock().expect("hub mutex poisoned");
        loop {
            if state.finalized {
                return Err(Error::NotInitialized);
            }
            let mailbox = state
                .mailboxes
                .get_mut(my_channel as usize)
                .ok_or(Error::UnknownChannel(my_channel))?;
            if let Some(pos) = mailbox
                .queue
                .iter()
                .position(|f| filter == WILDCARD || f.from == filter)
            {
                let frame = mailbox.queue.remove(pos).unwrap();
                return Ok((frame.data, frame.from));
            }
            state = self
                .cond
                .wait(state)
                .expect("hub mutex poisoned while waiting");
        }
    }
}

/// A single client's view of the [`Hub`] — the `Protocol` implementation
/// actually handed to a strategy.
pub struct ShmemClient {
    hub: Arc<Hub>,
    channel: ChannelIndex,
}

impl Protocol for ShmemClient {
    fn ssend(&self, buf: &[u8], channel: ChannelIndex) -> Result<()> {
        self.hub.deliver(channel, self.channel, buf.to_vec())
    }

    fn isend(&self, buf: bytes::Bytes, channel: ChannelIndex) -> Result<RequestId> {
        {
            let state = self.hub.state.lock().expect("hub mutex poisoned");
            if state.finalized {
                return Err(Error::NotInitialized);
            }
        }
        self.hub.deliver(channel, self.channel, buf.to_vec())?;
        let mut state = self.hub.state.lock().expect("hub mutex poisoned");
        let request = Hub::next_request_id(&mut state);
        state.completions.insert(request, Completion::Sent);
        Ok(request)
    }

    fn recv(&self, buf: &mut [u8], channel: ChannelIndex) -> Result<(usize, ChannelIndex)> {
        let (data, from) = self.hub.take_blocking(self.channel, channel)?;
        if data.len() > buf.len() {
            return Err(Error::BufferTooSmall {
                capacity: buf.len(),
                needed: data.len(),
            });
        }
        buf[..data.len()].copy_from_slice(&data);
        Ok((data.len(), from))
    }

    fn irecv(&self, buf: Vec<u8>, channel: ChannelIndex) -> Result<RequestId> {
        let mut state = self.hub.state.lock().expect("hub mutex poisoned");
        if state.finalized {
            return Err(Error::NotInitialized);
        }
        let mailbox = state
            .mailboxes
            .get_mut(self.channel as usize)
            .ok_or(Error::UnknownChannel(self.channel))?;

        if let Some(pos) = mailbox
            .queue
            .iter()
            .position(|f| channel == WILDCARD || f.from == channel)
        {
            let frame = mailbox.queue.remove(pos).unwrap();
            let request = Hub::next_request_id(&mut state);
            let len = frame.data.len().min(buf.len());
            let mut buf = buf;
            buf[..len].copy_from_slice(&frame.data[..len]);
            state.completions.insert(
                request,
                Completion::Received {
                    buf,
                    len,
                    from: frame.from,
                },
            );
            return Ok(request);
        }

        let request = Hub::next_request_id(&mut state);
        state.requests.insert(request, PendingRequest::Recv);
        mailbox.waiters.push_back(RecvWaiter {
            request,
            channel_filter: channel,
            buf,
        });
        Ok(request)
    }

    fn test(&self, req: RequestId) -> Result<Option<Completion>> {
        let mut state = self.hub.state.lock().expect("hub mutex poisoned");
        Ok(state.completions.remove(&req))
    }

    fn wait(&self, req: RequestId) -> Result<Completion> {
        let mut state = self.hub.state.lock().expect("hub mutex poisoned");
        loop {
            if let Some(completion) = state.completions.remove(&req) {
                return Ok(completion);
            }
            if !state.requests.contains_key(&req) && !state.finalized {
                return Err(Error::UnknownRequest(req));
            }
            state = self
                .hub
                .cond
                .wait(state)
                .expect("hub mutex poisoned while waiting");
        }
    }

    fn shutdown(&self) -> Result<()> {
        let mut state = self.hub.state.lock().expect("hub mutex poisoned");
        state.finalized = true;
        drop(state);
        self.hub.cond.notify_all();
        Ok(())
    }

    fn remove_outstanding_requests(&self) {
        let mut state = self.hub.state.lock().expect("hub mutex poisoned");
        if let Some(mailbox) = state.mailboxes.get_mut(self.channel as usize) {
            mailbox.waiters.clear();
        }
        let stale: Vec<RequestId> = state.requests.keys().copied().collect();
        for req in stale {
            state.requests.remove(&req);
        }
    }

    fn num_channels(&self) -> usize {
        self.hub.state.lock().expect("hub mutex poisoned").mailboxes.len()
    }

    fn num_clients(&self) -> usize {
        self.num_channels()
    }

    fn place_id(&self) -> u32 {
        self.hub.place_id
    }

    fn register_new_client_callback(&self, callback: NewClientCallback) {
        self.hub.state.lock().expect("hub mutex poisoned").new_client_cb = Some(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssend_then_recv_delivers_payload() {
        let hub = Hub::new(0);
        let a = hub.connect();
        let b = hub.connect();

        a.ssend(b"hello", b.channel).unwrap();
        let mut buf = [0u8; 16];
        let (len, from) = b.recv(&mut buf, WILDCARD).unwrap();
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(from, a.channel);
    }

    #[test]
    fn irecv_registered_before_send_completes_on_delivery() {
        let hub = Hub::new(0);
        let a = hub.connect();
        let b = hub.connect();

        let req = b.irecv(vec![0u8; 8], a.channel).unwrap();
        assert!(b.test(req).unwrap().is_none());

        a.ssend(b"abcd", b.channel).unwrap();
        match b.wait(req).unwrap() {
            Completion::Received { buf, len, from } => {
                assert_eq!(&buf[..len], b"abcd");
                assert_eq!(from, a.channel);
            }
            Completion::Sent => panic!("expected Received"),
        }
    }

    #[test]
    fn operations_after_shutdown_fail() {
        let hub = Hub::new(0);
        let a = hub.connect();
        a.shutdown().unwrap();
        assert!(matches!(a.ssend(b"x", 0), Err(Error::NotInitialized)));
    }

    #[test]
    fn buffer_too_small_is_reported() {
        let hub = Hub::new(0);
        let a = hub.connect();
        let b = hub.connect();
        a.ssend(b"0123456789", b.channel).unwrap();
        let mut tiny = [0u8; 2];
        assert!(matches!(
            b.recv(&mut tiny, WILDCARD),
            Err(Error::BufferTooSmall { .. })
        ));
    }
}
