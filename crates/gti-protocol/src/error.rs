/// Protocol-layer errors (§4.2, §7). All but `Io` are recoverable at the
/// strategy layer, which either buffers the operation (`NotInitialized`)
/// or surfaces it to the place as a panic condition.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("protocol is not yet connected, or has already finalized")]
    NotInitialized,

    #[error("outstanding non-blocking request limit ({limit}) reached")]
    OutstandingLimit { limit: usize },

    #[error("channel {0} is not known to this protocol")]
    UnknownChannel(u32),

    #[error("request {0:?} is not outstanding on this protocol")]
    UnknownRequest(crate::RequestId),

    #[error("receive buffer of {capacity} bytes is too small for a {needed}-byte message")]
    BufferTooSmall { capacity: usize, needed: usize },

    #[error("peer connection lost")]
    PeerGone,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
