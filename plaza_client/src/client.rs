//! Client implementation.
//!
//! The client maintains:
//! - A reliable connection split into a reader task and an outbound sink
//! - A queue of inbound messages, drained at the start of every tick
//! - The synchronization core, ticked at a fixed rate
//! - Held movement keys and the emote-wheel flag set from the console

use std::net::SocketAddr;

use anyhow::{bail, Context};
use plaza_shared::{
    config::ClientConfig,
    net::{self, ConnReader, MessageSink, NetMsg, ReliableConn},
};
use tokio::{
    sync::mpsc::{self, error::TryRecvError},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    anim::DEFAULT_DANCE,
    input::{HeldKeys, MoveKey},
    render::Presentation,
    sync::{Lifecycle, SyncCore, TickFrame},
};

/// Emotes bound to the number keys of the emote wheel.
pub const EMOTES: [&str; 4] = ["👋", "❤️", "😄", "😡"];

/// Client connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    /// Connected and exchanging messages.
    Connected,
    /// The transport closed; entities keep their last known state.
    Disconnected,
}

/// What the reader task reports.
#[derive(Debug)]
pub enum TransportEvent {
    Message(NetMsg),
    Closed(Option<String>),
}

/// High-level game client.
pub struct GameClient {
    pub state: ClientState,
    pub core: SyncCore,
    /// Movement keys currently held.
    pub keys: HeldKeys,
    /// Emote wheel open; movement input is ignored while set.
    pub wheel_open: bool,

    sink: Box<dyn MessageSink>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    reader: Option<JoinHandle<()>>,
    nominal_dt_ms: f32,
    last_tick: Option<Instant>,
}

impl GameClient {
    /// Connects to a server and waits for the id assignment.
    pub async fn connect(cfg: &ClientConfig) -> anyhow::Result<Self> {
        cfg.validate()?;
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        info!(server = %server_addr, "Connecting to server");

        let mut conn = ReliableConn::connect(server_addr).await?;
        let local_id = match conn.recv().await? {
            Some(NetMsg::Welcome { id }) => id,
            Some(other) => bail!("expected WELCOME, got {other:?}"),
            None => bail!("server closed the connection during handshake"),
        };
        info!(id = %local_id, "Connected to server");

        let (reader, writer) = conn.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(read_loop(reader, tx));

        let mut client = Self::with_transport(local_id, cfg, Box::new(writer), rx);
        client.reader = Some(handle);
        Ok(client)
    }

    /// Builds a client over an already established transport.
    pub fn with_transport(
        local_id: String,
        cfg: &ClientConfig,
        sink: Box<dyn MessageSink>,
        inbound: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self {
            state: ClientState::Connected,
            core: SyncCore::new(local_id, cfg.player_name.clone(), &cfg.sync),
            keys: HeldKeys::empty(),
            wheel_open: false,
            sink,
            inbound,
            reader: None,
            nominal_dt_ms: 1000.0 / cfg.tick_hz.max(1) as f32,
            last_tick: None,
        }
    }

    pub fn local_id(&self) -> &str {
        self.core.local_id()
    }

    /// Registers the display name with the server.
    pub async fn init(&mut self, presentation: &mut dyn Presentation) -> anyhow::Result<()> {
        self.core.init(presentation);
        self.flush().await
    }

    /// Advances one client tick: apply queued messages, simulate, send.
    pub async fn tick(&mut self, presentation: &mut dyn Presentation) -> anyhow::Result<()> {
        self.drain_inbound();

        let now = Instant::now();
        let dt_ms = self
            .last_tick
            .map_or(self.nominal_dt_ms, |prev| (now - prev).as_secs_f32() * 1000.0);
        self.last_tick = Some(now);

        let frame = TickFrame {
            now_ms: net::now_millis(),
            dt_ms,
            input: &self.keys,
            input_suppressed: self.wheel_open,
        };
        self.core.tick(&frame, presentation);
        self.flush().await
    }

    /// Removes every entity and stops reading from the transport.
    pub fn teardown(&mut self, presentation: &mut dyn Presentation) {
        self.core.teardown(presentation);
        if let Some(handle) = self.reader.take() {
            handle.abort();
        }
    }

    pub fn hold(&mut self, key: MoveKey) {
        self.keys.insert(HeldKeys::flag(key));
    }

    pub fn release(&mut self, key: MoveKey) {
        self.keys.remove(HeldKeys::flag(key));
    }

    pub fn emote(&mut self, kind: &str) {
        self.core.request_emote(kind);
    }

    pub fn dance(&mut self, variant: &str) {
        self.core.request_dance(variant);
    }

    pub fn stop_dance(&mut self) {
        self.core.request_stop_dance();
    }

    fn drain_inbound(&mut self) {
        loop {
            match self.inbound.try_recv() {
                Ok(TransportEvent::Message(msg)) => self.core.enqueue(msg),
                Ok(TransportEvent::Closed(reason)) => {
                    info!(reason = ?reason, "Disconnected from server");
                    self.state = ClientState::Disconnected;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.state != ClientState::Disconnected {
                        info!("Transport reader stopped");
                        self.state = ClientState::Disconnected;
                    }
                    break;
                }
            }
        }
    }

    async fn flush(&mut self) -> anyhow::Result<()> {
        let outbox = self.core.drain_outbox();
        if self.state == ClientState::Disconnected {
            if !outbox.is_empty() {
                debug!(dropped = outbox.len(), "Not connected, dropping outbound messages");
            }
            return Ok(());
        }
        for msg in &outbox {
            if let Err(e) = self.sink.send(msg).await {
                warn!(error = %e, "Send failed, marking connection closed");
                self.state = ClientState::Disconnected;
                break;
            }
        }
        Ok(())
    }

    /// Executes a console command.
    pub fn exec_console(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        match tokens[0] {
            "hold" | "release" => {
                let Some(arg) = tokens.get(1) else {
                    if tokens[0] == "release" {
                        self.keys = HeldKeys::empty();
                        return Ok(vec!["Released all keys".to_string()]);
                    }
                    return Ok(vec!["Usage: hold <left|right|up|down>".to_string()]);
                };
                let Some(key) = MoveKey::parse(arg) else {
                    return Ok(vec![format!("Unknown key '{arg}'")]);
                };
                if tokens[0] == "hold" {
                    self.hold(key);
                } else {
                    self.release(key);
                }
                Ok(vec![format!("Keys: {:?}", self.keys)])
            }
            "emote" => {
                let Some(arg) = tokens.get(1) else {
                    return Ok(vec!["Usage: emote <1-4|text>".to_string()]);
                };
                let kind = arg
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| EMOTES.get(i).copied())
                    .unwrap_or(*arg);
                self.emote(kind);
                self.wheel_open = false;
                Ok(vec![format!("Emote {kind}")])
            }
            "dance" => {
                let variant = tokens.get(1).copied().unwrap_or(DEFAULT_DANCE);
                self.dance(variant);
                self.wheel_open = false;
                Ok(vec![format!("Dance {variant}")])
            }
            "stop" => {
                self.stop_dance();
                self.wheel_open = false;
                Ok(vec!["Stop dancing".to_string()])
            }
            "wheel" => {
                self.wheel_open = !self.wheel_open;
                Ok(vec![format!("Emote wheel open: {}", self.wheel_open)])
            }
            "status" => Ok(self.status()),
            other => Ok(vec![format!("Unknown command '{other}'")]),
        }
    }

    pub fn status(&self) -> Vec<String> {
        let stats = self.core.stats();
        let mut out = vec![
            format!("State: {:?}", self.state),
            format!("Local id: {}", self.local_id()),
            format!("Ticks: {}", stats.ticks),
            format!(
                "Snapshots: {} (rejected records: {}, resyncs: {})",
                stats.snapshots, stats.rejected_records, stats.resyncs
            ),
            format!("Pending inputs: {}", self.core.pending().len()),
        ];
        for e in self.core.entities() {
            let buffered = self.core.buffer(&e.id).map_or(0, |b| b.len());
            out.push(format!(
                "  {} '{}' at ({:.1}, {:.1}) {} buffered={}",
                e.id, e.display_name, e.position.x, e.position.y, e.animation, buffered
            ));
        }
        out
    }
}

/// Forwards every decoded inbound message to the tick loop.
async fn read_loop(mut reader: ConnReader, tx: mpsc::UnboundedSender<TransportEvent>) {
    loop {
        match reader.recv().await {
            Ok(Some(msg)) => {
                if tx.send(TransportEvent::Message(msg)).is_err() {
                    break;
                }
            }
            Ok(None) => {
                let _ = tx.send(TransportEvent::Closed(None));
                break;
            }
            Err(e) => {
                warn!(error = %e, "Transport read failed");
                let _ = tx.send(TransportEvent::Closed(Some(e.to_string())));
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use plaza_shared::net::StateSnapshot;
    use serde_json::json;

    use super::*;
    use crate::render::RecordingPresentation;

    fn in_process() -> (
        GameClient,
        mpsc::UnboundedReceiver<NetMsg>,
        mpsc::UnboundedSender<TransportEvent>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel::<NetMsg>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let client = GameClient::with_transport(
            "p1".into(),
            &ClientConfig::default(),
            Box::new(out_tx),
            in_rx,
        );
        (client, out_rx, in_tx)
    }

    #[tokio::test]
    async fn held_key_produces_move_after_local_record_arrives() {
        let (mut client, mut out_rx, in_tx) = in_process();
        let mut view = RecordingPresentation::default();
        client.init(&mut view).await.unwrap();
        assert!(matches!(out_rx.try_recv().unwrap(), NetMsg::SetName { .. }));

        let users = vec![json!({
            "id": "p1", "x": 0.0, "y": 0.0, "dir": "down", "isMoving": false,
            "state": "idle", "name": "Player", "color": 1
        })];
        in_tx
            .send(TransportEvent::Message(NetMsg::StateSnapshot(StateSnapshot {
                users,
                timestamp: net::now_millis(),
            })))
            .unwrap();
        client.tick(&mut view).await.unwrap();

        client.exec_console("hold right").unwrap();
        client.tick(&mut view).await.unwrap();
        match out_rx.try_recv().unwrap() {
            NetMsg::Move(cmd) => assert_eq!((cmd.seq, cmd.vx, cmd.vy), (1, 1, 0)),
            other => panic!("expected MOVE, got {other:?}"),
        }
        assert!(view.get("p1").unwrap().position.x > 0.0);
    }

    #[tokio::test]
    async fn wheel_suppresses_movement_and_closing_transport_disconnects() {
        let (mut client, mut out_rx, in_tx) = in_process();
        let mut view = RecordingPresentation::default();
        client.exec_console("wheel").unwrap();
        client.exec_console("hold left").unwrap();
        client.tick(&mut view).await.unwrap();
        assert!(out_rx.try_recv().is_err());

        client.exec_console("emote 2").unwrap();
        assert!(!client.wheel_open);
        client.tick(&mut view).await.unwrap();
        assert_eq!(
            out_rx.try_recv().unwrap(),
            NetMsg::Emote {
                kind: EMOTES[1].to_string()
            }
        );

        in_tx.send(TransportEvent::Closed(None)).unwrap();
        client.tick(&mut view).await.unwrap();
        assert_eq!(client.state, ClientState::Disconnected);
     }

    #[tokio::test]
    async fn disconnected_client_keeps_drawing_until_teardown() {
        let (mut client, _out_rx, in_tx) = in_process();
        let mut view = RecordingPresentation::default();
        client.init(&mut view).await.unwrap();

        let users = vec![
            json!({
                "id": "p1", "x": 10.0, "y": 0.0, "dir": "down", "isMoving": false,
                "state": "idle", "name": "Me", "color": 1
            }),
            json!({
                "id": "p2", "x": 50.0, "y": 0.0, "dir": "left", "isMoving": false,
                "state": "idle", "name": "Bob", "color": 2
            }),
        ];
        in_tx
            .send(TransportEvent::Message(NetMsg::StateSnapshot(StateSnapshot {
                users,
                timestamp: net::now_millis(),
            })))
            .unwrap();
        client.tick(&mut view).await.unwrap();
        assert!(view.get("p2").is_some());

        in_tx.send(TransportEvent::Closed(None)).unwrap();
        drop(in_tx);
        client.hold(MoveKey::Right);
        for _ in 0..5 {
            client.tick(&mut view).await.unwrap();
        }
        assert_eq!(client.state, ClientState::Disconnected);
        assert!(view.removed.is_empty());
        assert!(view.get("p1").is_some() && view.get("p2").is_some());

        client.teardown(&mut view);
        assert!(view.drawn.is_empty());
        assert_eq!(view.removed.len(), 2);
    }
}
