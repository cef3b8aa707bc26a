//! Flood control (C9): picks which (direction, channel) the driver
//! should poll next, weighting down traffic over intra over broadcast
//! over up so the place drains application-bound floods first (§4.7).

use std::collections::HashMap;

use gti_protocol::ChannelIndex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Down,
    Intra,
    Broadcast,
    Up,
}

impl Direction {
    fn priority_weight(self) -> u32 {
        match self {
            Direction::Down => 4,
            Direction::Intra => 3,
            Direction::Broadcast => 2,
            Direction::Up => 1,
        }
    }
}

type Key = (Direction, ChannelIndex);

/// Badness-weighted selection over a fixed, pre-registered set of
/// (direction, channel) pollable sources.
///
/// `queue_size` is incremented whenever the driver learns a source has
/// buffered work (`note_buffered`) and decremented on a successful poll
/// (`mark_good`). Among sources tied for the highest badness, a cursor
/// rotates through them on repeated empty polls and rewinds to the top
/// candidate as soon as one produces a message — the spec's "on
/// non-empty poll, the next call rewinds to the best; on repeated empty
/// polls the next-best is tried", realized as round-robin over the
/// badness-tied set rather than a single fixed tie-break.
pub struct FloodControl {
    registered: Vec<Key>,
    queue_size: HashMap<Key, u32>,
    cursor: usize,
    last: Option<Key>,
}

impl FloodControl {
    pub fn new() -> Self {
        FloodControl {
            registered: Vec::new(),
            queue_size: HashMap::new(),
            cursor: 0,
            last: None,
        }
    }

    pub fn register(&mut self, direction: Direction, channel: ChannelIndex) {
        let key = (direction, channel);
        if !self.registered.contains(&key) {
            self.registered.push(key);
            self.queue_size.insert(key, 0);
        }
    }

    /// Records that `key` has buffered one more unit of unprocessed
    /// work (a send the driver decided to queue rather than dispatch).
    pub fn note_buffered(&mut self, direction: Direction, channel: ChannelIndex) {
        *self.queue_size.entry((direction, channel)).or_insert(0) += 1;
    }

    /// The inverse of `note_buffered`: one previously-buffered unit of
    /// work at `key` has since been drained from the suspension tree.
    pub fn note_drained(&mut self, direction: Direction, channel: ChannelIndex) {
        if let Some(q) = self.queue_size.get_mut(&(direction, channel)) {
            *q = q.saturating_sub(1);
        }
    }

    fn badness(&self, key: &Key) -> u32 {
        self.queue_size.get(key).copied().unwrap_or(0) * key.0.priority_weight()
    }

    /// Returns the next (direction, channel) the driver should poll, or
    /// `None` if nothing is registered.
    pub fn select(&mut self) -> Option<(Direction, ChannelIndex)> {
        if self.registered.is_empty() {
            return None;
        }
        let max_badness = self.registered.iter().map(|k| self.badness(k)).max().unwrap_or(0);
        let mut candidates: Vec<Key> = self
            .registered
            .iter()
            .copied()
            .filter(|k| self.badness(k) == max_badness)
            .collect();
        candidates.sort_by_key(|k| std::cmp::Reverse(k.0.priority_weight()));
        let idx = self.cursor % candidates.len();
        let picked = candidates[idx];
        self.last = Some(picked);
        Some(picked)
    }

    /// A poll of the last-selected source produced a message: rewind to
    /// always retry the top candidate next, and drain one unit of
    /// badness.
    pub fn mark_good(&mut self, direction: Direction, channel: ChannelIndex) {
        if let Some(q) = self.queue_size.get_mut(&(direction, channel)) {
            *q = q.saturating_sub(1);
        }
        self.cursor = 0;
    }

    /// A poll of the last-selected source produced nothing: advance the
    /// rotation so the next call tries a different tied candidate.
    pub fn mark_bad(&mut self, direction: Direction, channel: ChannelIndex) {
        if self.last == Some((direction, channel)) {
            self.cursor = self.cursor.wrapping_add(1);
        }
    }
}

impl Default for FloodControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn down_outranks_up_at_equal_queue_size() {
        let mut flood = FloodControl::new();
        flood.register(Direction::Up, 0);
        flood.register(Direction::Down, 0);
        flood.note_buffered(Direction::Up, 0);
        flood.note_buffered(Direction::Down, 0);

        assert_eq!(flood.select(), Some((Direction::Down, 0)));
    }

    #[test]
    fn repeated_empty_polls_rotate_through_tied_candidates() {
        let mut flood = FloodControl::new();
        flood.register(Direction::Down, 0);
        flood.register(Direction::Down, 1);

        let first = flood.select().unwrap();
        flood.mark_bad(first.0, first.1);
        let second = flood.select().unwrap();
        assert_ne!(first, second);

        flood.mark_good(second.0, second.1);
        let third = flood.select().unwrap();
        assert_eq!(third, first, "a good poll rewinds to the top-priority candidate");
    }

    #[test]
    fn note_drained_undoes_note_buffered() {
        let mut flood = FloodControl::new();
        flood.register(Direction::Up, 0);
        flood.register(Direction::Down, 0);
        flood.note_buffered(Direction::Down, 0);

        assert_eq!(flood.select(), Some((Direction::Down, 0)), "buffered backlog outweighs priority");

        flood.note_drained(Direction::Down, 0);
        assert_eq!(flood.select(), Some((Direction::Down, 0)), "down still wins the static tie-break at equal badness");
    }
}
