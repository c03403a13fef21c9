//! Movement integration.
//!
//! Client prediction, reconciliation replay and the server all integrate a
//! directional intent with this one rule so their results agree bit for bit.

use crate::{math::Vec2, net::Direction};

/// Walking speed in position units per second.
pub const DEFAULT_SPEED: f32 = 120.0;

/// Longest input tick either side integrates.
pub const DEFAULT_MAX_MOVE_DT_MS: f32 = 100.0;

/// Advances `position` by one input tick.
///
/// Diagonal intents are normalized so moving on both axes is no faster than
/// moving along one.
pub fn integrate(position: Vec2, vx: i8, vy: i8, dt_ms: f32, speed: f32) -> Vec2 {
    let wish = Vec2::new(f32::from(vx), f32::from(vy));
    let unit = if vx != 0 && vy != 0 {
        wish.normalize_or_zero()
    } else {
        wish
    };
    position + unit.scale(speed * dt_ms / 1000.0)
}

/// Facing for an intent: horizontal wins only when strictly dominant.
pub fn facing(vx: i8, vy: i8) -> Option<Direction> {
    if vx == 0 && vy == 0 {
        return None;
    }
    let dir = if vx.unsigned_abs() > vy.unsigned_abs() {
        if vx > 0 {
            Direction::Right
        } else {
            Direction::Left
        }
    } else if vy > 0 {
        Direction::Down
    } else {
        Direction::Up
    };
    Some(dir)
}
