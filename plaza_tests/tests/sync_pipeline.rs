//! Deterministic client core ↔ server state tests, no sockets involved.
//!
//! The server's message handlers and broadcast builder are driven directly
//! with a synthetic clock so every step is reproducible.

use plaza_client::anim::AnimationKey;
use plaza_client::input::HeldKeys;
use plaza_client::render::RecordingPresentation;
use plaza_client::sync::{Lifecycle, SyncCore, TickFrame};
use plaza_server::server::{bind_ephemeral, GameServer};
use plaza_shared::config::SyncConfig;
use plaza_shared::net::{ClientId, Direction, MoveCmd, NetMsg, SemanticState};

const DT_MS: f32 = 16.0;

struct Harness {
    server: GameServer,
    me: ClientId,
    core: SyncCore,
    view: RecordingPresentation,
    now_ms: f64,
}

impl Harness {
    async fn new() -> anyhow::Result<Self> {
        let (mut server, _cfg) = bind_ephemeral(20).await?;
        let me = ClientId::new_unique();
        server.spawn_player(me);
        let mut core = SyncCore::new(me.to_string(), "Ann", &SyncConfig::default());
        let mut view = RecordingPresentation::default();
        core.init(&mut view);
        let mut h = Self {
            server,
            me,
            core,
            view,
            now_ms: 1_000.0,
        };
        h.deliver();
        Ok(h)
    }

    /// Hands the client's outbox to the server.
    fn deliver(&mut self) {
        for msg in self.core.drain_outbox() {
            self.server.handle_message(self.me, msg, self.now_ms);
        }
    }

    /// Queues one broadcast for the client, stamped with the current time.
    fn broadcast(&mut self) -> anyhow::Result<()> {
        self.server.simulate(self.now_ms);
        let snap = self.server.snapshot_for(self.me, self.now_ms)?;
        self.core.enqueue(NetMsg::StateSnapshot(snap));
        Ok(())
    }

    fn tick(&mut self, keys: HeldKeys) {
        let frame = TickFrame {
            now_ms: self.now_ms,
            dt_ms: DT_MS,
            input: &keys,
            input_suppressed: false,
        };
        self.core.tick(&frame, &mut self.view);
        self.deliver();
        self.now_ms += f64::from(DT_MS);
    }

    /// Runs `ticks` client ticks with a broadcast every third one.
    fn run(&mut self, ticks: usize, keys: HeldKeys) -> anyhow::Result<()> {
        for i in 0..ticks {
            if i % 3 == 0 {
                self.broadcast()?;
            }
            self.tick(keys);
        }
        Ok(())
    }
}

#[tokio::test]
async fn prediction_converges_on_the_authoritative_position() -> anyhow::Result<()> {
    let mut h = Harness::new().await?;
    h.broadcast()?;
    h.tick(HeldKeys::empty());
    assert!(h.core.local().is_some());
    assert_eq!(h.server.player(h.me).map(|p| p.name.as_str()), Some("Ann"));

    h.run(30, HeldKeys::RIGHT | HeldKeys::DOWN)?;
    let server_pos = h.server.player(h.me).map(|p| p.position).unwrap_or_default();
    assert_eq!(h.server.player(h.me).map(|p| p.last_seq), Some(30));
    assert!(server_pos.x > 320.0 && server_pos.y > 240.0);

    h.run(90, HeldKeys::empty())?;
    assert!(h.core.pending().is_empty());
    let local = h.core.local().map(|e| e.position).unwrap_or_default();
    assert!(local.distance_sq(server_pos) < 1e-4, "{local:?} vs {server_pos:?}");
    assert_eq!(h.server.player(h.me).map(|p| p.last_seq), Some(30));
    Ok(())
}

#[tokio::test]
async fn remote_player_is_interpolated_behind_the_broadcasts() -> anyhow::Result<()> {
    let mut h = Harness::new().await?;
    let other = ClientId::new_unique();
    h.server.spawn_player(other);
    let other_id = other.to_string();

    h.broadcast()?;
    h.tick(HeldKeys::empty());
    assert!(h.core.entity(&other_id).is_some());

    // The other player walks left for a while.
    for seq in 1..=40u32 {
        h.server.handle_message(
            other,
            NetMsg::Move(MoveCmd {
                seq,
                vx: -1,
                vy: 0,
                dt: DT_MS,
                dir: Direction::Left,
            }),
            h.now_ms,
        );
        if seq % 3 == 0 {
            h.broadcast()?;
        }
        h.tick(HeldKeys::empty());

        let remote = h.core.entity(&other_id).map(|e| e.position.x).unwrap_or_default();
        let authoritative = h.server.player(other).map(|p| p.position.x).unwrap_or_default();
        assert!(remote >= authoritative - 1e-3, "view ran ahead of the server");
    }

    let remote = h.core.entity(&other_id).expect("remote entity");
    assert_eq!(remote.animation, AnimationKey::Run(Direction::Left));
    assert!(remote.position.x < 320.0);
    Ok(())
}

#[tokio::test]
async fn moving_interrupts_a_server_side_dance() -> anyhow::Result<()> {
    let mut h = Harness::new().await?;
    h.broadcast()?;
    h.tick(HeldKeys::empty());

    h.core.request_dance("dance3");
    h.deliver();
    h.run(6, HeldKeys::empty())?;
    assert_eq!(h.server.player(h.me).map(|p| p.state), Some(SemanticState::Dance));
    assert_eq!(
        h.view.get(&h.me.to_string()).map(|d| d.animation.clone()),
        Some(AnimationKey::Dance("dance3".into()))
    );

    h.run(6, HeldKeys::UP)?;
    let player = h.server.player(h.me).expect("player");
    assert_eq!(player.state, SemanticState::Walk);
    assert_eq!(player.dance_type, None);
    assert!(matches!(
        h.view.get(&h.me.to_string()).map(|d| &d.animation),
        Some(AnimationKey::Run(_))
    ));
    Ok(())
}
