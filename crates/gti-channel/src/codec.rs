//! On-wire encoding for [`ChannelId`]: the placement driver prepends this
//! to every buffer it forwards upward so the parent's `get_updated_channel_id`
//! can recover the path accumulated by every layer below it before pushing
//! its own level on top (§4.6). Not part of the record wire format itself
//! (§6) — a record's bytes are untouched; this is a small header the
//! driver frames around them.

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::io;

use crate::{ChannelId, SubId};

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("truncated channel id buffer")]
    Truncated,
    #[error("unknown sub-id tag {0}")]
    UnknownTag(u8),
}

impl From<io::Error> for DecodeError {
    fn from(_: io::Error) -> Self {
        DecodeError::Truncated
    }
}

const TAG_RANK: u8 = 0;
const TAG_STRIDE: u8 = 1;
const TAG_UNSET: u8 = 2;

impl ChannelId {
    /// Serializes this channel id as a level count followed by one
    /// 13-byte record per level (tag + three native-endian `u32`s).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.levels().len() * 13);
        buf.write_u32::<NativeEndian>(self.levels().len() as u32)
            .expect("writes to a Vec never fail");
        for level in self.levels() {
            let (tag, a, b, c) = match *level {
                SubId::Rank { from, fan_in } => (TAG_RANK, from, fan_in, 0),
                SubId::Stride {
                    offset,
                    stride,
                    fan_in,
                } => (TAG_STRIDE, offset, stride, fan_in),
                SubId::Unset { fan_in } => (TAG_UNSET, 0, 0, fan_in),
            };
            buf.push(tag);
            buf.write_u32::<NativeEndian>(a).expect("writes to a Vec never fail");
            buf.write_u32::<NativeEndian>(b).expect("writes to a Vec never fail");
            buf.write_u32::<NativeEndian>(c).expect("writes to a Vec never fail");
        }
        buf
    }

    /// Decodes a channel id from the front of `buf`, returning it along
    /// with the number of bytes consumed so the caller can find the
    /// record payload that follows.
    pub fn decode(buf: &[u8]) -> Result<(ChannelId, usize), DecodeError> {
        let mut cursor = buf;
        let count = cursor.read_u32::<NativeEndian>()? as usize;
        let mut levels = Vec::with_capacity(count);
        for _ in 0..count {
            let tag = cursor.read_u8()?;
            let a = cursor.read_u32::<NativeEndian>()?;
            let b = cursor.read_u32::<NativeEndian>()?;
            let c = cursor.read_u32::<NativeEndian>()?;
            let sub_id = match tag {
                TAG_RANK => SubId::Rank { from: a, fan_in: b },
                TAG_STRIDE => SubId::Stride {
                    offset: a,
                    stride: b,
                    fan_in: c,
                },
                TAG_UNSET => SubId::Unset { fan_in: c },
                other => return Err(DecodeError::UnknownTag(other)),
            };
            levels.push(sub_id);
        }
        let consumed = buf.len() - cursor.len();
        Ok((ChannelId::with_levels(levels), consumed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_mixed_levels() {
        let id = ChannelId::with_levels(vec![
            SubId::rank(2, 4),
            SubId::stride(0, 8, 64),
            SubId::unset(16),
        ]);
        let encoded = id.encode();
        let (decoded, consumed) = ChannelId::decode(&encoded).unwrap();
        assert_eq!(decoded, id);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn trailing_bytes_are_left_for_the_caller() {
        let id = ChannelId::with_levels(vec![SubId::rank(0, 2)]);
        let mut encoded = id.encode();
        encoded.extend_from_slice(b"payload");
        let (decoded, consumed) = ChannelId::decode(&encoded).unwrap();
        assert_eq!(decoded, id);
        assert_eq!(&encoded[consumed..], b"payload");
    }

    #[test]
    fn truncated_buffer_errors() {
        let id = ChannelId::with_levels(vec![SubId::rank(0, 2)]);
        let encoded = id.encode();
        assert!(matches!(
            ChannelId::decode(&encoded[..encoded.len() - 2]),
            Err(DecodeError::Truncated)
        ));
    }
}
