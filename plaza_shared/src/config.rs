//! Configuration system.
//!
//! Loads client and server configuration from JSON strings or files. Every
//! field has a default so partial files are accepted.

use std::path::Path;

use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};

use crate::{
    math::Vec2,
    physics::{DEFAULT_MAX_MOVE_DT_MS, DEFAULT_SPEED},
};

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address, e.g. `127.0.0.1:40000`.
    pub server_addr: String,
    /// Fixed client tick rate.
    pub tick_hz: u32,
    /// Display name sent with `SET_NAME`.
    pub player_name: String,
    pub sync: SyncConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:40000".to_string(),
            tick_hz: 60,
            player_name: "Player".to_string(),
            sync: SyncConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg = Self::from_json_str(&text)
            .with_context(|| format!("parse config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.tick_hz > 0, "tick_hz must be positive");
        ensure!(
            !self.player_name.trim().is_empty(),
            "player_name must not be blank"
        );
        self.sync.validate()
    }
}

/// Tunables of the synchronization core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Movement speed in units per second; must match the server.
    pub speed: f32,
    /// Blend weight toward the authoritative position.
    pub reconcile_alpha: f32,
    /// How far behind "now" remote entities are drawn.
    pub render_delay_ms: f64,
    /// Per-entity snapshot history length.
    pub buffer_cap: usize,
    /// Unacknowledged inputs tolerated before a forced resync.
    pub max_pending_inputs: usize,
    /// Upper bound on one predicted tick; keep equal to the server's.
    pub max_move_dt_ms: f32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            speed: DEFAULT_SPEED,
            reconcile_alpha: 0.4,
            render_delay_ms: 100.0,
            buffer_cap: 20,
            max_pending_inputs: 240,
            max_move_dt_ms: DEFAULT_MAX_MOVE_DT_MS,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.speed > 0.0, "speed must be positive");
        ensure!(
            (0.0..=1.0).contains(&self.reconcile_alpha),
            "reconcile_alpha must be within [0, 1]"
        );
        ensure!(self.render_delay_ms >= 0.0, "render_delay_ms must not be negative");
        ensure!(self.buffer_cap >= 2, "buffer_cap must hold at least two snapshots");
        ensure!(self.max_pending_inputs > 0, "max_pending_inputs must be positive");
        ensure!(self.max_move_dt_ms > 0.0, "max_move_dt_ms must be positive");
        Ok(())
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub listen_addr: String,
    /// Broadcast rate of `STATE_SNAPSHOT`.
    pub tick_hz: u32,
    pub speed: f32,
    pub spawn: Vec2,
    /// A player with no `MOVE` for this long is considered stopped.
    pub idle_after_ms: f64,
    /// How long an emote stays attached to its player.
    pub emote_ms: f64,
    /// Upper bound applied to a `MOVE`'s `dt`.
    pub max_move_dt_ms: f32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:40000".to_string(),
            tick_hz: 20,
            speed: DEFAULT_SPEED,
            spawn: Vec2::new(320.0, 240.0),
            idle_after_ms: 150.0,
            emote_ms: 2500.0,
            max_move_dt_ms: DEFAULT_MAX_MOVE_DT_MS,
        }
    }
}

impl ServerConfig {
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg = Self::from_json_str(&text)
            .with_context(|| format!("parse config {}", path.display()))?;
        ensure!(cfg.tick_hz > 0, "tick_hz must be positive");
        Ok(cfg)
    }
}
