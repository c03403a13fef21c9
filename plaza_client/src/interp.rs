//! Interpolation.
//!
//! The server sends discrete snapshots at its own rate. Remote entities are
//! drawn a fixed delay behind "now" so there is usually a snapshot on each
//! side of the render time to blend between. When there is not, the entity
//! holds at known data; nothing is extrapolated.

use plaza_shared::{
    math::Vec2,
    net::{Direction, SemanticState},
};

use crate::{
    anim::{self, AnimationKey, PoseInputs},
    buffer::{Snapshot, SnapshotBuffer},
};

/// Default delay behind wall clock, milliseconds.
pub const DEFAULT_RENDER_DELAY_MS: f64 = 100.0;

/// Squared distance under which a stopped entity counts as arrived.
pub const ARRIVAL_EPSILON_SQ: f32 = 1.0;

/// Rendered state of a remote entity for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePose {
    pub position: Vec2,
    pub direction: Direction,
    pub is_moving: bool,
    pub semantic: SemanticState,
    pub dance_variant: Option<String>,
    pub animation: AnimationKey,
    /// False when holding at a snapshot instead of blending two.
    pub interpolated: bool,
}

impl RemotePose {
    fn held(s: &Snapshot) -> Self {
        Self {
            position: s.position,
            direction: s.direction,
            is_moving: false,
            semantic: s.semantic,
            dance_variant: s.dance_variant.clone(),
            animation: AnimationKey::Idle(s.direction),
            interpolated: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Interpolator {
    render_delay_ms: f64,
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::new(DEFAULT_RENDER_DELAY_MS)
    }
}

impl Interpolator {
    pub fn new(render_delay_ms: f64) -> Self {
        Self { render_delay_ms }
    }

    pub fn render_time(&self, now_ms: f64) -> f64 {
        now_ms - self.render_delay_ms
    }

    /// Advances playback of `buffer` to `now_ms` and returns the pose to draw.
    ///
    /// `None` only for an empty buffer.
    pub fn sample(&self, buffer: &mut SnapshotBuffer, now_ms: f64) -> Option<RemotePose> {
        let render_time = self.render_time(now_ms);
        buffer.prune(render_time);

        if let Some((s0, s1)) = buffer.bracket(render_time) {
            return Some(blend(s0, s1, render_time));
        }

        // Either playback ran past the newest snapshot, or it has not reached
        // the oldest yet.
        let oldest = buffer.oldest()?;
        let held = if render_time < oldest.timestamp {
            oldest
        } else {
            buffer.latest()?
        };
        Some(RemotePose::held(held))
    }
}

fn blend(s0: &Snapshot, s1: &Snapshot, render_time: f64) -> RemotePose {
    let span = s1.timestamp - s0.timestamp;
    let t = if span > 0.0 {
        ((render_time - s0.timestamp) / span) as f32
    } else {
        1.0
    };
    let position = s0.position.lerp(s1.position, t);

    // A stopped target still far away keeps the run cycle going until the
    // blend catches up.
    let moving = s1.is_moving || position.distance_sq(s1.position) > ARRIVAL_EPSILON_SQ;
    let animation = anim::resolve(&PoseInputs {
        semantic: s1.semantic,
        dance_variant: s1.dance_variant.as_deref(),
        direction: s1.direction,
        moving,
    });

    RemotePose {
        position,
        direction: s1.direction,
        is_moving: s1.is_moving,
        semantic: s1.semantic,
        dance_variant: s1.dance_variant.clone(),
        animation,
        interpolated: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(x: f32, timestamp: f64, is_moving: bool) -> Snapshot {
        Snapshot {
            position: Vec2::new(x, 0.0),
            direction: Direction::Right,
            is_moving,
            semantic: if is_moving {
                SemanticState::Walk
            } else {
                SemanticState::Idle
            },
            dance_variant: None,
            timestamp,
        }
    }

    fn buffer(snaps: impl IntoIterator<Item = Snapshot>) -> SnapshotBuffer {
        let mut buf = SnapshotBuffer::new(20);
        for s in snaps {
            buf.push(s);
        }
        buf
    }

    #[test]
    fn midpoint_between_two_snapshots() {
        let mut buf = buffer([snap(0.0, 1000.0, true), snap(10.0, 1100.0, true)]);
        let interp = Interpolator::new(100.0);
        let pose = interp.sample(&mut buf, 1150.0).unwrap();
        assert!((pose.position.x - 5.0).abs() < 1e-5);
        assert!(pose.interpolated);
        assert_eq!(pose.animation, AnimationKey::Run(Direction::Right));
    }

    #[test]
    fn exhausted_buffer_snaps_to_latest_and_stops() {
        let mut buf = buffer([snap(0.0, 1000.0, true), snap(10.0, 1100.0, true)]);
        let pose = Interpolator::new(100.0).sample(&mut buf, 2000.0).unwrap();
        assert_eq!(pose.position.x, 10.0);
        assert!(!pose.interpolated);
        assert_eq!(pose.animation, AnimationKey::Idle(Direction::Right));
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn single_snapshot_is_held() {
        let mut buf = buffer([snap(7.0, 1000.0, true)]);
        let pose = Interpolator::new(100.0).sample(&mut buf, 1050.0).unwrap();
        assert_eq!(pose.position.x, 7.0);
        assert!(!pose.interpolated);

        let mut empty = SnapshotBuffer::new(20);
        assert!(Interpolator::default().sample(&mut empty, 0.0).is_none());
    }

    #[test]
    fn stopped_target_keeps_running_until_close() {
        let mut buf = buffer([snap(0.0, 1000.0, true), snap(10.0, 1100.0, false)]);
        let interp = Interpolator::new(100.0);

        let pose = interp.sample(&mut buf, 1150.0).unwrap();
        assert_eq!(pose.animation, AnimationKey::Run(Direction::Right));

        let pose = interp.sample(&mut buf, 1195.0).unwrap();
        assert!((pose.position.x - 9.5).abs() < 1e-4);
        assert_eq!(pose.animation, AnimationKey::Idle(Direction::Right));
    }

    #[test]
    fn playback_never_rewinds() {
        let mut buf = buffer([
            snap(0.0, 1000.0, true),
            snap(10.0, 1100.0, true),
            snap(20.0, 1200.0, true),
        ]);
        let interp = Interpolator::new(100.0);
        interp.sample(&mut buf, 1260.0).unwrap();
        assert_eq!(buf.oldest().unwrap().timestamp, 1100.0);

        // An earlier clock reading cannot bring the dropped snapshot back.
        let pose = interp.sample(&mut buf, 1150.0).unwrap();
        assert_eq!(pose.position.x, 10.0);
        assert!(!pose.interpolated);
    }
}
