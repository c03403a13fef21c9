//! Per-entity snapshot history.
//!
//! Broadcasts arrive in timestamp order, so insertion order is timestamp
//! order and the buffer never needs sorting.

use std::collections::VecDeque;

use plaza_shared::{
    math::Vec2,
    net::{Direction, EntityRecord, SemanticState},
};

/// Default history length per remote entity.
pub const DEFAULT_BUFFER_CAP: usize = 20;

/// One remote entity's state at one broadcast instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub position: Vec2,
    pub direction: Direction,
    pub is_moving: bool,
    pub semantic: SemanticState,
    pub dance_variant: Option<String>,
    /// Server clock, milliseconds.
    pub timestamp: f64,
}

impl Snapshot {
    pub fn from_record(record: &EntityRecord, timestamp: f64) -> Self {
        Self {
            position: record.position(),
            direction: record.dir,
            is_moving: record.is_moving,
            semantic: record.state,
            dance_variant: record.dance_type.clone(),
            timestamp,
        }
    }
}

/// Bounded, timestamp-ordered history.
#[derive(Debug, Clone)]
pub struct SnapshotBuffer {
    history: VecDeque<Snapshot>,
    max: usize,
}

impl Default for SnapshotBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAP)
    }
}

impl SnapshotBuffer {
    pub fn new(max: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(max),
            max,
        }
    }

    pub fn push(&mut self, snap: Snapshot) {
        self.history.push_back(snap);
        while self.history.len() > self.max {
            self.history.pop_front();
        }
    }

    /// Discards history playback has moved past: while at least two entries
    /// remain and the second is not newer than `render_time`, the first goes.
    pub fn prune(&mut self, render_time: f64) -> usize {
        let mut dropped = 0;
        while self.history.len() >= 2 && self.history[1].timestamp <= render_time {
            self.history.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// Adjacent pair with `s0.timestamp <= render_time <= s1.timestamp`.
    pub fn bracket(&self, render_time: f64) -> Option<(&Snapshot, &Snapshot)> {
        self.history
            .iter()
            .zip(self.history.iter().skip(1))
            .find(|(s0, s1)| s0.timestamp <= render_time && render_time <= s1.timestamp)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.history.iter()
    }

    /// Returns the number of buffered snapshots.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Returns true if no snapshots are buffered.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn oldest(&self) -> Option<&Snapshot> {
        self.history.front()
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.history.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(x: f32, timestamp: f64) -> Snapshot {
        Snapshot {
            position: Vec2::new(x, 0.0),
            direction: Direction::Right,
            is_moving: true,
            semantic: SemanticState::Walk,
            dance_variant: None,
            timestamp,
        }
    }

    #[test]
    fn cap_keeps_most_recent_in_order() {
        let mut buf = SnapshotBuffer::new(DEFAULT_BUFFER_CAP);
        for i in 0..25 {
            buf.push(snap(i as f32, 1000.0 + i as f64 * 50.0));
        }
        assert_eq!(buf.len(), 20);
        let xs: Vec<f32> = buf.iter().map(|s| s.position.x).collect();
        let expected: Vec<f32> = (5..25).map(|i| i as f32).collect();
        assert_eq!(xs, expected);
    }

    #[test]
    fn prune_stops_at_two_and_never_passes_render_time() {
        let mut buf = SnapshotBuffer::new(8);
        for t in [1000.0, 1050.0, 1100.0, 1150.0] {
            buf.push(snap(0.0, t));
        }
        assert_eq!(buf.prune(1075.0), 1);
        assert_eq!(buf.oldest().unwrap().timestamp, 1050.0);

        assert_eq!(buf.prune(5000.0), 2);
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.prune(9000.0), 0);
    }

    #[test]
    fn bracket_finds_enclosing_pair() {
        let mut buf = SnapshotBuffer::new(8);
        for t in [1000.0, 1100.0, 1200.0] {
            buf.push(snap(0.0, t));
        }
        let (s0, s1) = buf.bracket(1150.0).unwrap();
        assert_eq!((s0.timestamp, s1.timestamp), (1100.0, 1200.0));
        assert!(buf.bracket(900.0).is_none());
        assert!(buf.bracket(1300.0).is_none());
    }
}
