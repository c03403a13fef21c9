//! Server implementation.
//!
//! A small authoritative server for the plaza. It supports:
//! - Client connection with id assignment (`WELCOME`)
//! - Movement, emotes and dances sent by clients
//! - Periodic `STATE_SNAPSHOT` broadcast with per-recipient `lastSeq`
//!
//! Determinism notes:
//! - Movement uses the same integration rule as client prediction.
//! - Players are kept in id order so broadcasts list them stably.

use std::{
    collections::{BTreeMap, HashMap},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::Context;
use plaza_shared::{
    config::ServerConfig,
    math::Vec2,
    net::{
        self, ClientId, ConnReader, ConnWriter, Direction, EntityRecord, MessageSink, MoveCmd,
        NetMsg, ReliableConn, ReliableListener, SemanticState, StateSnapshot,
    },
    physics,
};
use rand::Rng;
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};

/// Longest accepted display name, in characters.
pub const MAX_NAME_CHARS: usize = 20;

/// Authoritative state of one connected player.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: ClientId,
    pub name: String,
    pub position: Vec2,
    pub direction: Direction,
    pub is_moving: bool,
    pub state: SemanticState,
    pub dance_type: Option<String>,
    pub color: u32,
    /// Active emote and the wall-clock time it expires at.
    pub emote: Option<(String, f64)>,
    /// Highest `MOVE` sequence applied.
    pub last_seq: u32,
    last_move_ms: f64,
}

impl Player {
    fn new(id: ClientId, position: Vec2, color: u32) -> Self {
        Self {
            id,
            name: String::new(),
            position,
            direction: Direction::Down,
            is_moving: false,
            state: SemanticState::Idle,
            dance_type: None,
            color,
            emote: None,
            last_seq: 0,
            last_move_ms: 0.0,
        }
    }

    /// Wire form; `lastSeq` is only filled for the recipient's own record.
    pub fn record(&self, last_seq: Option<u32>) -> EntityRecord {
        EntityRecord {
            id: self.id.to_string(),
            x: self.position.x,
            y: self.position.y,
            dir: self.direction,
            is_moving: self.is_moving,
            state: self.state,
            dance_type: self.dance_type.clone(),
            name: self.name.clone(),
            color: self.color,
            emote: self.emote.as_ref().map(|(kind, _)| kind.clone()),
            last_seq,
        }
    }
}

/// What connection tasks report to the simulation.
#[derive(Debug)]
enum ConnEvent {
    Message(ClientId, NetMsg),
    Closed(ClientId),
}

/// Game server.
pub struct GameServer {
    pub cfg: ServerConfig,
    players: BTreeMap<ClientId, Player>,
    writers: HashMap<ClientId, ConnWriter>,
    readers: HashMap<ClientId, JoinHandle<()>>,

    tcp: ReliableListener,
    events_tx: mpsc::UnboundedSender<ConnEvent>,
    events_rx: mpsc::UnboundedReceiver<ConnEvent>,

    tick: u64,
    quit_requested: bool,
    /// Channel for console commands from stdin.
    console_rx: Option<mpsc::Receiver<String>>,
}

impl GameServer {
    /// Creates a new server with the given config.
    pub async fn new(cfg: ServerConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.listen_addr.parse().context("parse listen_addr")?;
        let tcp = ReliableListener::bind(addr).await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            cfg,
            players: BTreeMap::new(),
            writers: HashMap::new(),
            readers: HashMap::new(),
            tcp,
            events_tx,
            events_rx,
            tick: 0,
            quit_requested: false,
            console_rx: None,
        })
    }

    /// Sets the console input receiver.
    pub fn set_console_input(&mut self, rx: mpsc::Receiver<String>) {
        self.console_rx = Some(rx);
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Set once `quit` was entered on the console.
    pub fn quit_requested(&self) -> bool {
        self.quit_requested
    }

    pub fn player(&self, id: ClientId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    /// Accepts exactly one client.
    pub async fn accept_one(&mut self) -> anyhow::Result<ClientId> {
        let (conn, peer) = self.tcp.accept().await?;
        self.handle_new_connection(conn, peer).await
    }

    /// Accepts a client with timeout (non-blocking).
    pub async fn try_accept(&mut self, timeout: Duration) -> anyhow::Result<Option<ClientId>> {
        match tokio::time::timeout(timeout, self.tcp.accept()).await {
            Ok(Ok((conn, peer))) => self.handle_new_connection(conn, peer).await.map(Some),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }

    async fn handle_new_connection(
        &mut self,
        conn: ReliableConn,
        peer: SocketAddr,
    ) -> anyhow::Result<ClientId> {
        let id = ClientId::new_unique();
        let (reader, mut writer) = conn.into_split();
        writer
            .send(&NetMsg::Welcome { id: id.to_string() })
            .await
            .context("send welcome")?;

        let color = self.spawn_player(id).color;
        self.writers.insert(id, writer);
        let handle = tokio::spawn(read_loop(id, reader, self.events_tx.clone()));
        self.readers.insert(id, handle);

        info!(client_id = %id, %peer, color = %format!("{color:06x}"), "Client connected");
        Ok(id)
    }

    /// Adds a player at the spawn point with a random tint.
    pub fn spawn_player(&mut self, id: ClientId) -> &Player {
        let color = rand::thread_rng().gen_range(0..=0x00FF_FFFF);
        let spawn = self.cfg.spawn;
        self.players
            .entry(id)
            .or_insert_with(|| Player::new(id, spawn, color))
    }

    /// Runs the server for a number of ticks, accepting clients between steps.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let dt = Duration::from_secs_f32(1.0 / self.cfg.tick_hz.max(1) as f32);
        let mut next = Instant::now();

        for _ in 0..ticks {
            next += dt;
            if let Some(id) = self.try_accept(Duration::from_millis(1)).await? {
                debug!(client_id = %id, "Accepted during run");
            }
            self.step().await?;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Executes one server step: inbound messages, timers, broadcast.
    pub async fn step(&mut self) -> anyhow::Result<()> {
        self.process_console_commands();
        self.recv_events();
        let now_ms = net::now_millis();
        self.simulate(now_ms);
        self.broadcast(now_ms).await?;
        self.tick += 1;
        Ok(())
    }

    fn process_console_commands(&mut self) {
        let lines: Vec<String> = if let Some(ref mut rx) = self.console_rx {
            let mut collected = Vec::new();
            while let Ok(line) = rx.try_recv() {
                collected.push(line);
            }
            collected
        } else {
            Vec::new()
        };

        for line in lines {
            for out in self.exec_console(&line) {
                println!("{}", out);
            }
        }
    }

    /// Executes a console command.
    pub fn exec_console(&mut self, line: &str) -> Vec<String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&cmd) = tokens.first() else {
            return Vec::new();
        };

        match cmd {
            "status" => {
                let mut out = vec![
                    format!("Tick: {}", self.tick),
                    format!("Players: {}", self.players.len()),
                ];
                for p in self.players.values() {
                    out.push(format!(
                        "  {} '{}' at ({:.1}, {:.1}) {:?} seq={}",
                        p.id, p.name, p.position.x, p.position.y, p.state, p.last_seq
                    ));
                }
                out
            }
            "kick" => match tokens.get(1).and_then(|s| s.trim_start_matches('p').parse::<u32>().ok()) {
                Some(n) => {
                    let id = ClientId(n);
                    if self.players.contains_key(&id) {
                        self.drop_client(id);
                        vec![format!("Kicked {}", id)]
                    } else {
                        vec![format!("No such player: {}", id)]
                    }
                }
                None => vec!["Usage: kick <id>".to_string()],
            },
            "quit" | "exit" => {
                info!("Server shutting down");
                self.quit_requested = true;
                Vec::new()
            }
            _ => vec![format!("Unknown command: {}", cmd)],
        }
    }

    fn recv_events(&mut self) {
        let now_ms = net::now_millis();
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                ConnEvent::Message(id, msg) => self.handle_message(id, msg, now_ms),
                ConnEvent::Closed(id) => self.drop_client(id),
            }
        }
    }

    /// Applies one client message to that client's player.
    pub fn handle_message(&mut self, id: ClientId, msg: NetMsg, now_ms: f64) {
        let emote_ms = self.cfg.emote_ms;
        let speed = self.cfg.speed;
        let max_dt = self.cfg.max_move_dt_ms;
        let Some(player) = self.players.get_mut(&id) else {
            debug!(client_id = %id, "Message from unknown client");
            return;
        };

        match msg {
            NetMsg::SetName { name } => {
                let name: String = name.trim().chars().take(MAX_NAME_CHARS).collect();
                if !name.is_empty() {
                    debug!(client_id = %id, %name, "Name set");
                    player.name = name;
                }
            }
            NetMsg::Move(cmd) => apply_move(player, &cmd, speed, max_dt, now_ms),
            NetMsg::Emote { kind } => {
                player.emote = Some((kind, now_ms + emote_ms));
            }
            NetMsg::Dance { variant } => {
                let same = player.state == SemanticState::Dance
                    && player.dance_type.as_deref() == Some(variant.as_str());
                if same {
                    player.state = SemanticState::Idle;
                    player.dance_type = None;
                } else {
                    player.state = SemanticState::Dance;
                    player.dance_type = Some(variant);
                    player.is_moving = false;
                }
            }
            NetMsg::StopDance => {
                if player.state == SemanticState::Dance {
                    player.state = SemanticState::Idle;
                    player.dance_type = None;
                }
            }
            other => debug!(client_id = %id, ?other, "Unexpected client message"),
        }
    }

    /// Expires emotes and stops players that went quiet.
    pub fn simulate(&mut self, now_ms: f64) {
        for p in self.players.values_mut() {
            if p.is_moving && now_ms - p.last_move_ms > self.cfg.idle_after_ms {
                p.is_moving = false;
                if p.state == SemanticState::Walk {
                    p.state = SemanticState::Idle;
                }
            }
            if p.emote.as_ref().is_some_and(|(_, until)| now_ms >= *until) {
                p.emote = None;
            }
        }
    }

    /// Broadcast for one recipient; its own record carries `lastSeq`.
    pub fn snapshot_for(&self, recipient: ClientId, timestamp: f64) -> anyhow::Result<StateSnapshot> {
        let records: Vec<EntityRecord> = self
            .players
            .values()
            .map(|p| p.record((p.id == recipient).then_some(p.last_seq)))
            .collect();
        StateSnapshot::from_records(&records, timestamp)
    }

    async fn broadcast(&mut self, now_ms: f64) -> anyhow::Result<()> {
        let ids: Vec<ClientId> = self.writers.keys().copied().collect();
        let mut failed = Vec::new();
        for id in ids {
            let snap = self.snapshot_for(id, now_ms)?;
            let Some(writer) = self.writers.get_mut(&id) else {
                continue;
            };
            if let Err(e) = writer.send(&NetMsg::StateSnapshot(snap)).await {
                warn!(client_id = %id, error = %e, "Broadcast failed");
                failed.push(id);
            }
        }
        for id in failed {
            self.drop_client(id);
        }
        Ok(())
    }

    fn drop_client(&mut self, id: ClientId) {
        self.writers.remove(&id);
        if let Some(handle) = self.readers.remove(&id) {
            handle.abort();
        }
        if self.players.remove(&id).is_some() {
            info!(client_id = %id, "Client disconnected");
        }
    }
}

impl Drop for GameServer {
    fn drop(&mut self) {
        for handle in self.readers.values() {
            handle.abort();
        }
    }
}

fn apply_move(player: &mut Player, cmd: &MoveCmd, speed: f32, max_dt: f32, now_ms: f64) {
    if cmd.seq <= player.last_seq {
        debug!(client_id = %player.id, seq = cmd.seq, last = player.last_seq, "Stale move ignored");
        return;
    }
    if !(-1..=1).contains(&cmd.vx) || !(-1..=1).contains(&cmd.vy) {
        warn!(client_id = %player.id, vx = cmd.vx, vy = cmd.vy, "Move rejected");
        return;
    }
    let dt = if cmd.dt.is_finite() { cmd.dt.clamp(0.0, max_dt) } else { 0.0 };

    player.last_seq = cmd.seq;
    player.position = physics::integrate(player.position, cmd.vx, cmd.vy, dt, speed);
    player.direction = physics::facing(cmd.vx, cmd.vy).unwrap_or(cmd.dir);
    player.is_moving = true;
    player.state = SemanticState::Walk;
    player.dance_type = None;
    player.last_move_ms = now_ms;
}

async fn read_loop(id: ClientId, mut reader: ConnReader, tx: mpsc::UnboundedSender<ConnEvent>) {
    loop {
        match reader.recv().await {
            Ok(Some(msg)) => {
                if tx.send(ConnEvent::Message(id, msg)).is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(client_id = %id, error = %e, "Connection read failed");
                break;
            }
        }
    }
    let _ = tx.send(ConnEvent::Closed(id));
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral(tick_hz: u32) -> anyhow::Result<(GameServer, ServerConfig)> {
    let cfg = ServerConfig {
        listen_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        tick_hz,
        ..Default::default()
    };
    let mut server = GameServer::new(cfg).await?;
    server.cfg.listen_addr = server.local_addr()?.to_string();
    let cfg = server.cfg.clone();
    Ok((server, cfg))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn server_with_player() -> (GameServer, ClientId) {
        let (mut server, _) = bind_ephemeral(20).await.unwrap();
        server.cfg.spawn = Vec2::ZERO;
        let id = ClientId::new_unique();
        server.spawn_player(id);
        (server, id)
    }

    fn mv(seq: u32, vx: i8, vy: i8, dt: f32) -> NetMsg {
        NetMsg::Move(MoveCmd {
            seq,
            vx,
            vy,
            dt,
            dir: Direction::Right,
        })
    }

    #[tokio::test]
    async fn move_integrates_and_tracks_seq() {
        let (mut server, id) = server_with_player().await;
        server.handle_message(id, mv(1, 1, 0, 100.0), 1000.0);
        let p = server.player(id).unwrap();
        assert!((p.position.x - 12.0).abs() < 1e-4);
        assert_eq!(p.last_seq, 1);
        assert_eq!(p.state, SemanticState::Walk);
        assert_eq!(p.direction, Direction::Right);
    }

    #[tokio::test]
    async fn stale_and_invalid_moves_are_ignored() {
        let (mut server, id) = server_with_player().await;
        server.handle_message(id, mv(3, 1, 0, 100.0), 1000.0);
        server.handle_message(id, mv(2, 1, 0, 100.0), 1010.0);
        server.handle_message(id, mv(4, 5, 0, 100.0), 1020.0);
        let p = server.player(id).unwrap();
        assert_eq!(p.last_seq, 3);
        assert!((p.position.x - 12.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn move_dt_is_clamped() {
        let (mut server, id) = server_with_player().await;
        server.handle_message(id, mv(1, 0, 1, 10_000.0), 1000.0);
        let p = server.player(id).unwrap();
        assert!((p.position.y - 12.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn name_is_trimmed_and_capped() {
        let (mut server, id) = server_with_player().await;
        server.handle_message(
            id,
            NetMsg::SetName {
                name: "  a-very-long-display-name-indeed  ".into(),
            },
            0.0,
        );
        assert_eq!(server.player(id).unwrap().name.chars().count(), MAX_NAME_CHARS);
        server.handle_message(id, NetMsg::SetName { name: "   ".into() }, 0.0);
        assert!(!server.player(id).unwrap().name.is_empty());
    }

    #[tokio::test]
    async fn dance_toggles_and_move_leaves_it() {
        let (mut server, id) = server_with_player().await;
        let dance = |v: &str| NetMsg::Dance { variant: v.into() };

        server.handle_message(id, dance("dance2"), 0.0);
        assert_eq!(server.player(id).unwrap().state, SemanticState::Dance);
        server.handle_message(id, dance("dance3"), 0.0);
        assert_eq!(server.player(id).unwrap().dance_type.as_deref(), Some("dance3"));
        server.handle_message(id, dance("dance3"), 0.0);
        assert_eq!(server.player(id).unwrap().state, SemanticState::Idle);

        server.handle_message(id, dance("dance1"), 0.0);
        server.handle_message(id, mv(1, -1, 0, 16.0), 0.0);
        let p = server.player(id).unwrap();
        assert_eq!(p.state, SemanticState::Walk);
        assert_eq!(p.dance_type, None);
    }

    #[tokio::test]
    async fn timers_stop_players_and_expire_emotes() {
        let (mut server, id) = server_with_player().await;
        server.handle_message(id, mv(1, 1, 0, 16.0), 1000.0);
        server.handle_message(id, NetMsg::Emote { kind: "👋".into() }, 1000.0);

        server.simulate(1100.0);
        assert!(server.player(id).unwrap().is_moving);
        server.simulate(1200.0);
        let p = server.player(id).unwrap();
        assert!(!p.is_moving);
        assert_eq!(p.state, SemanticState::Idle);
        assert!(p.emote.is_some());

        server.simulate(1000.0 + server.cfg.emote_ms);
        assert!(server.player(id).unwrap().emote.is_none());
    }

    #[tokio::test]
    async fn snapshot_carries_last_seq_only_for_recipient() {
        let (mut server, a) = server_with_player().await;
        let b = ClientId::new_unique();
        server.spawn_player(b);
        server.handle_message(a, mv(7, 1, 0, 16.0), 0.0);

        let decoded = server.snapshot_for(a, 42.0).unwrap().decode();
        assert_eq!(decoded.records.len(), 2);
        let own = decoded.records.iter().find(|r| r.id == a.to_string()).unwrap();
        let other = decoded.records.iter().find(|r| r.id == b.to_string()).unwrap();
        assert_eq!(own.last_seq, Some(7));
        assert_eq!(other.last_seq, None);
    }

    #[tokio::test]
    async fn status_lists_players() {
        let (mut server, id) = server_with_player().await;
        let out = server.exec_console("status");
        assert!(out.iter().any(|l| l.contains(&id.to_string())));
        let out = server.exec_console(&format!("kick {}", id));
        assert_eq!(out, vec![format!("Kicked {}", id)]);
        assert!(server.player(id).is_none());
    }
}
