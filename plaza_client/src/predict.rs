//! Local prediction.
//!
//! Input is applied to the local entity the tick it is sampled. Every applied
//! tick is numbered, sent to the server and kept in [`PendingInputs`] until the
//! server reports it applied, so reconciliation can replay what the server has
//! not yet seen.

use std::collections::VecDeque;

use plaza_shared::{
    math::Vec2,
    net::{Direction, MoveCmd},
    physics,
};
use tracing::trace;

use crate::input::DirectionalIntent;

/// One tick of local movement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictedInput {
    pub seq: u32,
    pub vx: i8,
    pub vy: i8,
    pub dt_ms: f32,
}

impl PredictedInput {
    /// Integrates this input on top of `position`.
    pub fn apply(&self, position: Vec2, speed: f32) -> Vec2 {
        physics::integrate(position, self.vx, self.vy, self.dt_ms, speed)
    }
}

/// Inputs sent but not yet acknowledged, ascending by `seq`.
#[derive(Debug, Default, Clone)]
pub struct PendingInputs {
    log: VecDeque<PredictedInput>,
}

impl PendingInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, input: PredictedInput) {
        debug_assert!(
            self.log.back().map_or(true, |last| last.seq < input.seq),
            "pending inputs must be pushed in sequence order"
        );
        self.log.push_back(input);
    }

    /// Drops the acknowledged prefix (`seq <= last_acked`) and returns how many
    /// entries went.
    pub fn ack(&mut self, last_acked: u32) -> usize {
        let cut = self.log.partition_point(|i| i.seq <= last_acked);
        self.log.drain(..cut);
        cut
    }

    pub fn iter(&self) -> impl Iterator<Item = &PredictedInput> {
        self.log.iter()
    }

    pub fn seqs(&self) -> Vec<u32> {
        self.log.iter().map(|i| i.seq).collect()
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn clear(&mut self) {
        self.log.clear();
    }
}

/// Numbers and applies local input ticks.
#[derive(Debug, Clone)]
pub struct Predictor {
    next_seq: u32,
    speed: f32,
}

impl Predictor {
    pub fn new(speed: f32) -> Self {
        Self { next_seq: 1, speed }
    }

    /// Sequence number the next predicted tick will carry.
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// Applies `intent` to the local entity.
    ///
    /// Returns the `MOVE` command to send, or `None` for a zero intent, in
    /// which case nothing is mutated or recorded.
    pub fn predict(
        &mut self,
        position: &mut Vec2,
        direction: &mut Direction,
        intent: DirectionalIntent,
        dt_ms: f32,
        pending: &mut PendingInputs,
    ) -> Option<MoveCmd> {
        let facing = physics::facing(intent.vx, intent.vy)?;

        let input = PredictedInput {
            seq: self.next_seq,
            vx: intent.vx,
            vy: intent.vy,
            dt_ms,
        };
        self.next_seq += 1;

        *position = input.apply(*position, self.speed);
        *direction = facing;
        pending.push(input);

        trace!(seq = input.seq, x = position.x, y = position.y, "Predicted input");
        Some(MoveCmd {
            seq: input.seq,
            vx: input.vx,
            vy: input.vy,
            dt: dt_ms,
            dir: facing,
        })
    }
}
