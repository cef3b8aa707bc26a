//! Communication protocol (C3): the lowest layer of the tree-based
//! overlay network, responsible for moving raw byte buffers between a
//! place and its channels without any knowledge of record structure.
//!
//! [`Protocol`] is implemented twice: [`shmem`] for same-process,
//! many-threads places, and [`socket`] for places that live in separate
//! address spaces. Both share the same token vocabulary (`token`) and
//! error surface (`Error`).

pub mod error;
pub mod shmem;
pub mod socket;
pub mod token;

pub use error::{Error, Result};

use std::fmt;

/// A physical channel index as seen by the protocol layer. Distinct from
/// `gti_channel::ChannelId`, which is the layered, per-record source
/// descriptor built up as a record crosses several protocol hops.
pub type ChannelIndex = u32;

/// Passed to `recv`/`irecv` to accept a message from any channel.
pub const WILDCARD: ChannelIndex = ChannelIndex::MAX;

/// A handle to an outstanding non-blocking `isend`/`irecv`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// Callback invoked when a new client completes its rendezvous with the
/// protocol, receiving the channel index it was assigned.
pub type NewClientCallback = Box<dyn Fn(ChannelIndex) + Send + Sync>;

/// The outcome of a non-blocking operation. Receives hand the caller's
/// buffer back rather than writing through a raw pointer held across the
/// async gap, so `irecv` stays safe Rust at the cost of one extra move.
#[derive(Debug)]
pub enum Completion {
    Sent,
    Received {
        buf: Vec<u8>,
        len: usize,
        from: ChannelIndex,
    },
}

/// The communication protocol contract (§4.2). Implementations are
/// thread-safe with respect to distinct channels; per-channel ordering
/// is FIFO. All operations except `place_id`/`num_channels`/`num_clients`
/// return [`Error::NotInitialized`] before the protocol connects and
/// after it finalizes.
pub trait Protocol: Send + Sync {
    /// Blocking send of `buf` on `channel`.
    fn ssend(&self, buf: &[u8], channel: ChannelIndex) -> Result<()>;

    /// Non-blocking send; ownership of `buf` moves to the protocol until
    /// the returned request completes.
    fn isend(&self, buf: bytes::Bytes, channel: ChannelIndex) -> Result<RequestId>;

    /// Blocking receive into `buf` from `channel` (or [`WILDCARD`]).
    /// Returns the number of bytes written and the channel it arrived on.
    fn recv(&self, buf: &mut [u8], channel: ChannelIndex) -> Result<(usize, ChannelIndex)>;

    /// Non-blocking receive. `buf` is handed to the protocol and
    /// returned, filled, as part of the request's [`Completion`].
    fn irecv(&self, buf: Vec<u8>, channel: ChannelIndex) -> Result<RequestId>;

    /// Polls a non-blocking request. Returns `Ok(None)` if not yet
    /// complete.
    fn test(&self, req: RequestId) -> Result<Option<Completion>>;

    /// Blocks until a non-blocking request completes.
    fn wait(&self, req: RequestId) -> Result<Completion>;

    /// Finalizes the protocol. Subsequent operations return
    /// [`Error::NotInitialized`].
    fn shutdown(&self) -> Result<()>;

    /// Evicts stale non-blocking requests, used by strategies during
    /// shutdown synchronization so abandoned operations stop consuming
    /// tokens.
    fn remove_outstanding_requests(&self);

    fn num_channels(&self) -> usize;
    fn num_clients(&self) -> usize;
    fn place_id(&self) -> u32;

    fn register_new_client_callback(&self, callback: NewClientCallback);
}
