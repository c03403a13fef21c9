//! Synchronization core.
//!
//! [`SyncCore`] owns every piece of per-entity state: the entity table, the
//! remote snapshot buffers and the local pending-input log. Inbound
//! broadcasts are only queued by [`SyncCore::enqueue`]; they take effect inside
//! [`Lifecycle::tick`], which runs its phases in a fixed order:
//!
//! sample → predict → reconcile / buffer → interpolate → resolve pose → render
//!
//! Nothing here blocks or locks; the host loop calls in once per frame.

use std::collections::{BTreeMap, HashSet, VecDeque};

use plaza_shared::{
    config::SyncConfig,
    math::Vec2,
    net::{Direction, EntityRecord, NetMsg, SemanticState, StateSnapshot},
};
use tracing::{debug, info, trace, warn};

use crate::{
    anim::{self, AnimationKey, PoseInputs},
    buffer::{Snapshot, SnapshotBuffer},
    input::{self, InputSource},
    interp::Interpolator,
    predict::{PendingInputs, Predictor},
    reconcile::Reconciler,
    render::{EntityView, Presentation},
};

/// One connected participant, local or remote.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: String,
    pub position: Vec2,
    pub direction: Direction,
    pub is_moving: bool,
    pub semantic: SemanticState,
    pub dance_variant: Option<String>,
    pub display_name: String,
    pub tint: u32,
    pub emote: Option<String>,
    /// Pose resolved on the last tick.
    pub animation: AnimationKey,
}

impl Entity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            position: Vec2::ZERO,
            direction: Direction::Down,
            is_moving: false,
            semantic: SemanticState::Idle,
            dance_variant: None,
            display_name: String::new(),
            tint: 0xffffff,
            emote: None,
            animation: AnimationKey::Idle(Direction::Down),
        }
    }

    fn from_record(record: &EntityRecord) -> Self {
        let mut e = Self::new(record.id.clone());
        e.position = record.position();
        e.direction = record.dir;
        e.is_moving = record.is_moving;
        e.semantic = record.state;
        e.dance_variant = record.dance_type.clone();
        e.animation = AnimationKey::Idle(record.dir);
        e.apply_identity(record);
        e
    }

    /// Label, tint and emote follow the latest broadcast immediately.
    fn apply_identity(&mut self, record: &EntityRecord) {
        if self.display_name != record.name {
            self.display_name.clone_from(&record.name);
        }
        self.tint = record.color;
        self.emote.clone_from(&record.emote);
    }

    fn view(&self) -> EntityView<'_> {
        EntityView {
            position: self.position,
            animation: &self.animation,
            tint: self.tint,
            label: &self.display_name,
            emote: self.emote.as_deref(),
        }
    }
}

/// Host-provided inputs for one tick.
pub struct TickFrame<'a> {
    /// Wall clock, milliseconds, same timebase as broadcast timestamps.
    pub now_ms: f64,
    /// Length of this tick.
    pub dt_ms: f32,
    pub input: &'a dyn InputSource,
    /// Set while an overlay owns the keyboard.
    pub input_suppressed: bool,
}

/// Explicit lifecycle driven by the host loop.
pub trait Lifecycle {
    fn init(&mut self, presentation: &mut dyn Presentation);
    fn tick(&mut self, frame: &TickFrame<'_>, presentation: &mut dyn Presentation);
    fn teardown(&mut self, presentation: &mut dyn Presentation);
}

/// Counters for status output.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SyncStats {
    pub ticks: u64,
    pub snapshots: u64,
    pub rejected_records: u64,
    pub resyncs: u64,
    pub last_server_timestamp: f64,
}

pub struct SyncCore {
    local_id: String,
    display_name: String,

    entities: BTreeMap<String, Entity>,
    buffers: BTreeMap<String, SnapshotBuffer>,
    pending: PendingInputs,

    predictor: Predictor,
    reconciler: Reconciler,
    interpolator: Interpolator,

    inbound: VecDeque<StateSnapshot>,
    outbox: Vec<NetMsg>,

    buffer_cap: usize,
    max_pending: usize,
    max_dt_ms: f32,
    /// Next local record is applied without blending.
    resync: bool,
    stop_dance_sent: bool,
    input_active: bool,
    stats: SyncStats,
}

impl SyncCore {
    pub fn new(local_id: impl Into<String>, display_name: impl Into<String>, cfg: &SyncConfig) -> Self {
        Self {
            local_id: local_id.into(),
            display_name: display_name.into(),
            entities: BTreeMap::new(),
            buffers: BTreeMap::new(),
            pending: PendingInputs::new(),
            predictor: Predictor::new(cfg.speed),
            reconciler: Reconciler::new(cfg.reconcile_alpha, cfg.speed),
            interpolator: Interpolator::new(cfg.render_delay_ms),
            inbound: VecDeque::new(),
            outbox: Vec::new(),
            buffer_cap: cfg.buffer_cap,
            max_pending: cfg.max_pending_inputs,
            max_dt_ms: cfg.max_move_dt_ms,
            resync: false,
            stop_dance_sent: false,
            input_active: false,
            stats: SyncStats::default(),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn local(&self) -> Option<&Entity> {
        self.entities.get(&self.local_id)
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn buffer(&self, id: &str) -> Option<&SnapshotBuffer> {
        self.buffers.get(id)
    }

    pub fn label(&self, id: &str) -> Option<&str> {
        self.entities.get(id).map(|e| e.display_name.as_str())
    }

    pub fn emote(&self, id: &str) -> Option<&str> {
        self.entities.get(id).and_then(|e| e.emote.as_deref())
    }

    pub fn pending(&self) -> &PendingInputs {
        &self.pending
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Queues an inbound message; broadcasts apply on the next tick.
    pub fn enqueue(&mut self, msg: NetMsg) {
        match msg {
            NetMsg::StateSnapshot(snapshot) => self.inbound.push_back(snapshot),
            NetMsg::Welcome { id } if id == self.local_id => {}
            other => debug!(?other, "Ignoring unexpected inbound message"),
        }
    }

    /// Takes every message produced since the last drain, in order.
    pub fn drain_outbox(&mut self) -> Vec<NetMsg> {
        std::mem::take(&mut self.outbox)
    }

    pub fn request_emote(&mut self, kind: impl Into<String>) {
        self.outbox.push(NetMsg::Emote { kind: kind.into() });
    }

    pub fn request_dance(&mut self, variant: impl Into<String>) {
        self.stop_dance_sent = false;
        self.outbox.push(NetMsg::Dance {
            variant: variant.into(),
        });
    }

    pub fn request_stop_dance(&mut self) {
        self.outbox.push(NetMsg::StopDance);
    }

    fn predict(&mut self, frame: &TickFrame<'_>) {
        let intent = input::sample(frame.input, frame.input_suppressed);
        self.input_active = !intent.is_zero();
        if !self.input_active {
            // The next movement starts a fresh interrupt.
            self.stop_dance_sent = false;
        }

        let Some(local) = self.entities.get_mut(&self.local_id) else {
            return;
        };
        let Some(cmd) = self.predictor.predict(
            &mut local.position,
            &mut local.direction,
            intent,
            // The server clamps the same way, so a hitch cannot overshoot.
            frame.dt_ms.clamp(0.0, self.max_dt_ms),
            &mut self.pending,
        ) else {
            return;
        };
        self.outbox.push(NetMsg::Move(cmd));

        if self.pending.len() > self.max_pending {
            warn!(
                pending = self.pending.len(),
                limit = self.max_pending,
                "Server stopped acknowledging input, forcing resync"
            );
            self.pending.clear();
            self.resync = true;
            self.stats.resyncs += 1;
        }
    }

    fn apply_snapshot(&mut self, snapshot: &StateSnapshot, presentation: &mut dyn Presentation) {
        let decoded = snapshot.decode();
        self.stats.snapshots += 1;
        self.stats.rejected_records += decoded.rejected as u64;
        self.stats.last_server_timestamp = decoded.timestamp;

        let mut saw_local = false;
        for record in &decoded.records {
            if record.id == self.local_id {
                saw_local = true;
                self.reconcile_local(record, presentation);
            } else {
                self.buffer_remote(record, decoded.timestamp);
            }
        }
        if !saw_local {
            trace!("Broadcast has no local record, skipping reconciliation");
        }

        self.remove_departed(&decoded.present, presentation);
    }

    fn reconcile_local(&mut self, record: &EntityRecord, presentation: &mut dyn Presentation) {
        let local = match self.entities.entry(record.id.clone()) {
            std::collections::btree_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::btree_map::Entry::Vacant(e) => {
                info!(id = %record.id, x = record.x, y = record.y, "Local entity appeared");
                presentation.set_camera_follow(&record.id);
                e.insert(Entity::from_record(record))
            }
        };
        local.apply_identity(record);

        let hard_snap = std::mem::take(&mut self.resync);
        let out = self.reconciler.reconcile(
            local,
            record,
            &mut self.pending,
            self.input_active,
            hard_snap,
        );

        if out.interrupt_dance {
            // Resent on every broadcast that still reports the dance.
            self.outbox.push(NetMsg::StopDance);
            self.stop_dance_sent = true;
        } else if record.state != SemanticState::Dance {
            self.stop_dance_sent = false;
        }
    }

    fn buffer_remote(&mut self, record: &EntityRecord, timestamp: f64) {
        let entity = self.entities.entry(record.id.clone()).or_insert_with(|| {
            info!(id = %record.id, name = %record.name, "Remote entity joined");
            Entity::from_record(record)
        });
        entity.apply_identity(record);

        let cap = self.buffer_cap;
        self.buffers
            .entry(record.id.clone())
            .or_insert_with(|| SnapshotBuffer::new(cap))
            .push(Snapshot::from_record(record, timestamp));
    }

    /// Entity, buffer, label and emote of a departed id go in one step.
    fn remove_departed(&mut self, present: &HashSet<String>, presentation: &mut dyn Presentation) {
        let gone: Vec<String> = self
            .entities
            .keys()
            .filter(|id| !present.contains(*id))
            .cloned()
            .collect();
        for id in gone {
            self.entities.remove(&id);
            self.buffers.remove(&id);
            presentation.remove_entity(&id);
            info!(id = %id, "Entity left");
        }
    }

    fn interpolate_remotes(&mut self, now_ms: f64) {
        for (id, buffer) in self.buffers.iter_mut() {
            let Some(entity) = self.entities.get_mut(id) else {
                continue;
            };
            let Some(pose) = self.interpolator.sample(buffer, now_ms) else {
                continue;
            };
            entity.position = pose.position;
            entity.direction = pose.direction;
            entity.is_moving = pose.is_moving;
            entity.semantic = pose.semantic;
            entity.dance_variant = pose.dance_variant;
            entity.animation = pose.animation;
        }
    }

    fn resolve_local_pose(&mut self) {
        let Some(local) = self.entities.get_mut(&self.local_id) else {
            return;
        };

        if self.input_active && local.semantic == SemanticState::Dance && !self.stop_dance_sent {
            info!("Movement interrupts dance");
            self.outbox.push(NetMsg::StopDance);
            self.stop_dance_sent = true;
        }

        // Moving always wins over a dance the server has not ended yet.
        let semantic = if self.input_active && local.semantic == SemanticState::Dance {
            SemanticState::Walk
        } else {
            local.semantic
        };
        local.animation = anim::resolve(&PoseInputs {
            semantic,
            dance_variant: local.dance_variant.as_deref(),
            direction: local.direction,
            moving: local.is_moving || self.input_active || !self.pending.is_empty(),
        });
    }

    fn render(&self, presentation: &mut dyn Presentation) {
        for (id, entity) in &self.entities {
            presentation.upsert_entity(id, entity.view());
        }
    }
}

impl Lifecycle for SyncCore {
    fn init(&mut self, _presentation: &mut dyn Presentation) {
        let name = self.display_name.trim().to_string();
        info!(id = %self.local_id, name = %name, "Joining");
        self.outbox.push(NetMsg::SetName { name });
    }

    fn tick(&mut self, frame: &TickFrame<'_>, presentation: &mut dyn Presentation) {
        self.stats.ticks += 1;

        self.predict(frame);
        while let Some(snapshot) = self.inbound.pop_front() {
            self.apply_snapshot(&snapshot, presentation);
        }
        self.interpolate_remotes(frame.now_ms);
        self.resolve_local_pose();
        self.render(presentation);
    }

    fn teardown(&mut self, presentation: &mut dyn Presentation) {
        for id in self.entities.keys() {
            presentation.remove_entity(id);
        }
        info!(entities = self.entities.len(), "Tearing down");
        self.entities.clear();
        self.buffers.clear();
        self.pending.clear();
        self.inbound.clear();
        self.outbox.clear();
    }
}
