//! Server reconciliation for the locally controlled entity.
//!
//! Each authoritative record for the local id:
//! 1. acknowledges the pending-input prefix the server applied,
//! 2. pulls the predicted position part of the way toward the server's,
//! 3. replays the still unacknowledged inputs on top,
//! 4. hands pose state (direction, motion, semantic state) to the server.

use plaza_shared::{
    math::Vec2,
    net::{EntityRecord, SemanticState},
};
use tracing::debug;

use crate::{predict::PendingInputs, sync::Entity};

/// Default blend weight toward the authoritative position.
pub const DEFAULT_ALPHA: f32 = 0.4;

/// What one reconciliation pass did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reconciliation {
    /// Pending inputs dropped as acknowledged.
    pub acked: usize,
    /// Inputs replayed on top of the blended position.
    pub replayed: usize,
    /// Position after blending, before replay.
    pub blended: Vec2,
    /// Squared distance the local entity moved because of this pass.
    pub correction_sq: f32,
    /// The server still has us dancing while local input is active.
    pub interrupt_dance: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    alpha: f32,
    speed: f32,
}

impl Reconciler {
    pub fn new(alpha: f32, speed: f32) -> Self {
        Self { alpha, speed }
    }

    /// Applies `record` to the local entity.
    ///
    /// `hard_snap` replaces the blend with the server position outright; it
    /// is used once after the pending log overflowed and was cleared.
    pub fn reconcile(
        &self,
        local: &mut Entity,
        record: &EntityRecord,
        pending: &mut PendingInputs,
        input_active: bool,
        hard_snap: bool,
    ) -> Reconciliation {
        let acked = record.last_seq.map_or(0, |seq| pending.ack(seq));

        let server = record.position();
        let blended = if hard_snap {
            server
        } else {
            local.position.lerp(server, self.alpha)
        };
        let replayed = pending
            .iter()
            .fold(blended, |pos, input| input.apply(pos, self.speed));

        let correction_sq = local.position.distance_sq(replayed);
        local.position = replayed;

        local.direction = record.dir;
        local.is_moving = record.is_moving;
        local.semantic = record.state;
        local.dance_variant = record.dance_type.clone();

        let out = Reconciliation {
            acked,
            replayed: pending.len(),
            blended,
            correction_sq,
            interrupt_dance: input_active && record.state == SemanticState::Dance,
        };
        debug!(
            acked = out.acked,
            replayed = out.replayed,
            correction_sq = out.correction_sq,
            hard_snap,
            "Reconciled local entity"
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use plaza_shared::net::Direction;

    use super::*;
    use crate::predict::PredictedInput;

    fn record(x: f32, y: f32, last_seq: Option<u32>) -> EntityRecord {
        EntityRecord {
            id: "me".into(),
            x,
            y,
            dir: Direction::Up,
            is_moving: false,
            state: SemanticState::Idle,
            dance_type: None,
            name: "Me".into(),
            color: 0xffffff,
            emote: None,
            last_seq,
        }
    }

    fn local_at(x: f32, y: f32) -> Entity {
        let mut e = Entity::new("me");
        e.position = Vec2::new(x, y);
        e
    }

    #[test]
    fn blends_forty_percent_with_empty_log() {
        let reconciler = Reconciler::new(DEFAULT_ALPHA, 120.0);
        let mut local = local_at(0.0, 0.0);
        let mut pending = PendingInputs::new();

        let out = reconciler.reconcile(&mut local, &record(10.0, -5.0, None), &mut pending, false, false);
        assert!((local.position.x - 4.0).abs() < 1e-5);
        assert!((local.position.y + 2.0).abs() < 1e-5);
        assert_eq!(local.position, out.blended);
        assert_eq!(local.direction, Direction::Up);
    }

    #[test]
    fn replays_unacknowledged_inputs_after_blend() {
        let reconciler = Reconciler::new(DEFAULT_ALPHA, 120.0);
        let mut local = local_at(0.0, 0.0);
        let mut pending = PendingInputs::new();
        for seq in 5..=8 {
            pending.push(PredictedInput {
                seq,
                vx: 1,
                vy: 0,
                dt_ms: 100.0,
            });
        }

        let out = reconciler.reconcile(&mut local, &record(10.0, 0.0, Some(6)), &mut pending, false, false);
        assert_eq!(pending.seqs(), vec![7, 8]);
        assert_eq!(out.acked, 2);
        assert_eq!(out.replayed, 2);
        // 0.4 * 10 blended, then two 12-unit steps.
        assert!((local.position.x - 28.0).abs() < 1e-4);
    }

    #[test]
    fn hard_snap_ignores_predicted_position() {
        let reconciler = Reconciler::new(DEFAULT_ALPHA, 120.0);
        let mut local = local_at(500.0, 500.0);
        let mut pending = PendingInputs::new();
        reconciler.reconcile(&mut local, &record(1.0, 2.0, None), &mut pending, false, true);
        assert_eq!(local.position, Vec2::new(1.0, 2.0));
    }

    #[test]
    fn active_input_interrupts_authoritative_dance() {
        let reconciler = Reconciler::new(DEFAULT_ALPHA, 120.0);
        let mut local = local_at(0.0, 0.0);
        let mut pending = PendingInputs::new();
        let mut rec = record(0.0, 0.0, None);
        rec.state = SemanticState::Dance;
        rec.dance_type = Some("dance2".into());

        let out = reconciler.reconcile(&mut local, &rec, &mut pending, true, false);
        assert!(out.interrupt_dance);
        assert_eq!(local.semantic, SemanticState::Dance);

        let out = reconciler.reconcile(&mut local, &rec, &mut pending, false, false);
        assert!(!out.interrupt_dance);
    }
}
