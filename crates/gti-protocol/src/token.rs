//! Reserved 64-bit tokens that precede frames on the wire (§4.2). These
//! are never valid channel indices, so a reader can distinguish control
//! frames from channel-addressed payload without extra framing bits.

pub const MESSAGE: u64 = 0xFFFF_FFFE;
pub const LONG_MSG: u64 = 0xFFFF_FFFD;
pub const SHUTDOWN_SYNC: u64 = 0xFFFF_FFFF;
pub const UPDATE: u64 = 0xFFFF_FFFC;
pub const ACKNOWLEDGE: u64 = 0xFFFF_FFFB;
