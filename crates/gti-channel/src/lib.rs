//! Channel identifiers: the per-record source descriptor that is built up,
//! one sub-id per layer, as a record traverses the tree-based overlay
//! network.
//!
//! A [`ChannelId`] is an ordered vector of [`SubId`]s, most-significant
//! layer first. Comparison, the suspension tree (`gti-suspend`), and the
//! reduction framework (`gti-reduce`) all key off this type.

use std::cmp::Ordering;
use std::fmt;

mod codec;

pub use codec::DecodeError;

/// Marks a sub-id as "single element at offset" rather than a true stride,
/// mirroring the source's reserved stride value.
pub const SINGLE_ELEMENT_STRIDE: u32 = 0xFFFFFFFF;

/// One layer's contribution to a [`ChannelId`].
///
/// `Rank` is the common case: a record arrived on a concrete channel
/// `from` out of `fan_in` channels feeding this layer. `Unset` marks a
/// layer that a channel id has not yet been assigned for (the source's
/// `-1` sentinel). `Stride` compresses a contiguous range of ranks into
/// `(offset, stride)`; `stride == SINGLE_ELEMENT_STRIDE` degrades a stride
/// to a single rank at `offset`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubId {
    Rank { from: u32, fan_in: u32 },
    Stride { offset: u32, stride: u32, fan_in: u32 },
    Unset { fan_in: u32 },
}

impl SubId {
    pub fn rank(from: u32, fan_in: u32) -> Self {
        SubId::Rank { from, fan_in }
    }

    pub fn unset(fan_in: u32) -> Self {
        SubId::Unset { fan_in }
    }

    pub fn stride(offset: u32, stride: u32, fan_in: u32) -> Self {
        SubId::Stride {
            offset,
            stride,
            fan_in,
        }
    }

    /// Number of channels feeding this layer.
    pub fn fan_in(&self) -> u32 {
        match self {
            SubId::Rank { fan_in, .. } => *fan_in,
            SubId::Stride { fan_in, .. } => *fan_in,
            SubId::Unset { fan_in } => *fan_in,
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, SubId::Unset { .. })
    }

    /// True if this sub-id covers exactly one rank (a `Rank`, or a
    /// `Stride` using the single-element sentinel).
    pub fn is_single(&self) -> bool {
        match self {
            SubId::Rank { .. } => true,
            SubId::Stride { stride, .. } => *stride == SINGLE_ELEMENT_STRIDE,
            SubId::Unset { .. } => false,
        }
    }

    /// The representative rank used for ordering and for suspension-tree
    /// child keys: the `from` channel of a `Rank`, or the `offset` of a
    /// `Stride`. `Unset` has no representative rank.
    pub fn representative(&self) -> Option<u32> {
        match self {
            SubId::Rank { from, .. } => Some(*from),
            SubId::Stride { offset, .. } => Some(*offset),
            SubId::Unset { .. } => None,
        }
    }

    /// Stride-compatibility check used by the suspension tree (§4.4):
    /// an incoming sub-id is compatible with a node carrying `self` as
    /// its stride metadata if the stride metadata is identical, or if
    /// the incoming id is a single element that falls within `self`'s
    /// range.
    pub fn stride_compatible(&self, incoming: &SubId) -> bool {
        let SubId::Stride {
            offset, stride, ..
        } = *self
        else {
            return false;
        };
        if self == incoming {
            return true;
        }
        let Some(rank) = incoming.representative() else {
            return false;
        };
        if stride == SINGLE_ELEMENT_STRIDE {
            return rank == offset;
        }
        if stride == 0 {
            return rank == offset;
        }
        rank >= offset && (rank - offset) % stride == 0
    }
}

impl fmt::Display for SubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubId::Rank { from, fan_in } => write!(f, "{from}/{fan_in}"),
            SubId::Stride {
                offset,
                stride,
                fan_in,
            } if *stride == SINGLE_ELEMENT_STRIDE => write!(f, "{offset}!/{fan_in}"),
            SubId::Stride {
                offset,
                stride,
                fan_in,
            } => write!(f, "{offset}+{stride}*/{fan_in}"),
            SubId::Unset { fan_in } => write!(f, "-/{fan_in}"),
        }
    }
}

// `Unset` sorts before any concrete rank, matching the source's use of
// `-1` as the smallest possible sub-id value. Beyond that, ordering is by
// representative rank, then (for strides sharing a rank) by stride width
// so that two otherwise-equal sub-ids with different compression remain
// distinguishable.
impl PartialOrd for SubId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SubId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.representative(), other.representative()) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| {
                let stride_of = |s: &SubId| match s {
                    SubId::Stride { stride, .. } => *stride,
                    _ => 0,
                };
                stride_of(self).cmp(&stride_of(other))
            }),
        }
    }
}

/// An ordered, per-layer source descriptor for a record as it crosses the
/// tree-based overlay network. See §3.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ChannelId {
    levels: Vec<SubId>,
}

impl ChannelId {
    pub fn new() -> Self {
        Self { levels: Vec::new() }
    }

    pub fn with_levels(levels: Vec<SubId>) -> Self {
        Self { levels }
    }

    pub fn push(&mut self, sub_id: SubId) {
        self.levels.push(sub_id);
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn levels(&self) -> &[SubId] {
        &self.levels
    }

    pub fn level(&self, index: usize) -> Option<&SubId> {
        self.levels.get(index)
    }

    pub fn set_level(&mut self, index: usize, sub_id: SubId) {
        if index == self.levels.len() {
            self.levels.push(sub_id);
        } else {
            self.levels[index] = sub_id;
        }
    }

    /// A child id one level deeper than `self`, used by the suspension
    /// tree when migrating a queued record down to a more specific node.
    pub fn child(&self, sub_id: SubId) -> ChannelId {
        let mut levels = self.levels.clone();
        levels.push(sub_id);
        ChannelId { levels }
    }

    /// True if `self` is a strict prefix of `other` — `other` names a
    /// more specific (deeper) channel along the same path.
    pub fn is_prefix_of(&self, other: &ChannelId) -> bool {
        self.levels.len() < other.levels.len() && self.levels[..] == other.levels[..self.levels.len()]
    }
}

impl PartialOrd for ChannelId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChannelId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.levels.cmp(&other.levels)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, level) in self.levels.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{level}")?;
        }
        write!(f, "]")
    }
}

impl From<Vec<SubId>> for ChannelId {
    fn from(levels: Vec<SubId>) -> Self {
        ChannelId { levels }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexicographic_ordering_is_most_significant_first() {
        let a = ChannelId::with_levels(vec![SubId::rank(0, 4), SubId::rank(2, 4)]);
        let b = ChannelId::with_levels(vec![SubId::rank(1, 4), SubId::rank(0, 4)]);
        assert!(a < b, "first level dominates comparison");

        let c = ChannelId::with_levels(vec![SubId::rank(0, 4), SubId::rank(1, 4)]);
        assert!(a < c, "second level breaks ties when first level is equal");
    }

    #[test]
    fn unset_sorts_before_any_rank() {
        assert!(SubId::unset(4) < SubId::rank(0, 4));
    }

    #[test]
    fn equality_is_field_wise() {
        let a = ChannelId::with_levels(vec![SubId::rank(1, 4)]);
        let b = ChannelId::with_levels(vec![SubId::rank(1, 4)]);
        assert_eq!(a, b);
    }

    #[test]
    fn stride_single_element_is_compatible_only_at_offset() {
        let node = SubId::stride(3, SINGLE_ELEMENT_STRIDE, 16);
        assert!(node.stride_compatible(&SubId::rank(3, 16)));
        assert!(!node.stride_compatible(&SubId::rank(4, 16)));
    }

    #[test]
    fn stride_range_is_compatible_with_ranks_on_the_stride() {
        let node = SubId::stride(0, 4, 64);
        assert!(node.stride_compatible(&SubId::rank(8, 64)));
        assert!(node.stride_compatible(&SubId::rank(12, 64)));
        assert!(!node.stride_compatible(&SubId::rank(9, 64)));
    }

    #[test]
    fn is_prefix_of_detects_deeper_channels() {
        let parent = ChannelId::with_levels(vec![SubId::rank(0, 4)]);
        let child = ChannelId::with_levels(vec![SubId::rank(0, 4), SubId::rank(1, 2)]);
        assert!(parent.is_prefix_of(&child));
        assert!(!child.is_prefix_of(&parent));
        assert!(!parent.is_prefix_of(&parent));
    }

    #[quickcheck_macros::quickcheck]
    fn ord_is_consistent_with_eq(a: Vec<u32>, b: Vec<u32>) -> bool {
        let to_id = |v: &Vec<u32>| {
            ChannelId::with_levels(v.iter().map(|r| SubId::rank(*r, u32::MAX)).collect())
        };
        let (ida, idb) = (to_id(&a), to_id(&b));
        (ida == idb) == (ida.cmp(&idb) == Ordering::Equal)
    }
}
