//! Completion tree: per-reduction-wave bookkeeping of which positions in
//! the channel-id space have contributed, sized by each level's own
//! fan-in (§4.5). A node is complete once it was itself the direct
//! target of an arrival, or once it has `fan_in` complete children.

use gti_channel::{ChannelId, SubId};
use indexmap::IndexMap;

fn key_for(sub_id: &SubId) -> i64 {
    sub_id.representative().map(|r| r as i64).unwrap_or(-1)
}

struct CompletionNode {
    fan_in: u32,
    arrived: bool,
    children: IndexMap<i64, CompletionNode>,
}

impl CompletionNode {
    fn new(fan_in: u32) -> Self {
        CompletionNode {
            fan_in,
            arrived: false,
            children: IndexMap::new(),
        }
    }

    fn is_complete(&self) -> bool {
        self.arrived
            || (self.children.len() as u32 >= self.fan_in
                && self.children.values().all(CompletionNode::is_complete))
    }
}

pub struct CompletionTree {
    root: CompletionNode,
}

impl CompletionTree {
    pub fn new(root_fan_in: u32) -> Self {
        CompletionTree {
            root: CompletionNode::new(root_fan_in),
        }
    }

    /// True once `channel`'s full path has been recorded as an arrival.
    pub fn has_arrived(&self, channel: &ChannelId) -> bool {
        let mut node = &self.root;
        for sub_id in channel.levels() {
            match node.children.get(&key_for(sub_id)) {
                Some(child) => node = child,
                None => return false,
            }
        }
        node.arrived
    }

    /// Records one arrival along `channel`'s path, creating nodes lazily.
    pub fn record_arrival(&mut self, channel: &ChannelId) {
        let mut node = &mut self.root;
        for sub_id in channel.levels() {
            let fan_in = sub_id.fan_in();
            node = node
                .children
                .entry(key_for(sub_id))
                .or_insert_with(|| CompletionNode::new(fan_in));
        }
        node.arrived = true;
    }

    pub fn is_complete(&self) -> bool {
        self.root.is_complete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gti_channel::SubId;

    fn channel(from: u32) -> ChannelId {
        ChannelId::with_levels(vec![SubId::rank(from, 2)])
    }

    #[test]
    fn incomplete_until_every_direct_child_arrives() {
        let mut tree = CompletionTree::new(2);
        assert!(!tree.is_complete());
        tree.record_arrival(&channel(0));
        assert!(!tree.is_complete());
        tree.record_arrival(&channel(1));
        assert!(tree.is_complete());
    }

    #[test]
    fn has_arrived_is_path_exact() {
        let mut tree = CompletionTree::new(2);
        tree.record_arrival(&channel(0));
        assert!(tree.has_arrived(&channel(0)));
        assert!(!tree.has_arrived(&channel(1)));
    }
}
