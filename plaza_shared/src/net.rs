//! Networking primitives.
//!
//! Goals:
//! - Provide a reliable, ordered (TCP) channel with length-prefixed JSON frames.
//! - Provide the event messages exchanged by client and server.
//! - Validate broadcast records at the boundary instead of trusting their shape.

use std::{
    collections::HashSet,
    fmt,
    net::SocketAddr,
    sync::atomic::{AtomicU32, Ordering},
};

use anyhow::{bail, Context};
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    sync::mpsc,
};
use tracing::warn;

use crate::math::Vec2;

/// Largest frame either side accepts.
pub const MAX_FRAME_LEN: usize = 1 << 20;

static NEXT_CLIENT_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies a connected client on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u32);

impl ClientId {
    pub fn new_unique() -> Self {
        ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The wire id is the opaque string form.
impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Facing of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    #[default]
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-kinematic mode of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SemanticState {
    #[default]
    Idle,
    Walk,
    Dance,
}

/// One predicted input tick sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MoveCmd {
    pub seq: u32,
    pub vx: i8,
    pub vy: i8,
    /// Tick length in milliseconds.
    pub dt: f32,
    pub dir: Direction,
}

/// Authoritative state of one participant, as broadcast by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub dir: Direction,
    pub is_moving: bool,
    pub state: SemanticState,
    #[serde(default)]
    pub dance_type: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub color: u32,
    #[serde(default)]
    pub emote: Option<String>,
    /// Highest input sequence the server applied; only on the recipient's own record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seq: Option<u32>,
}

impl EntityRecord {
    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }
}

/// Full authoritative broadcast.
///
/// `users` stays untyped until [`StateSnapshot::decode`] so one bad record
/// cannot fail the whole message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateSnapshot {
    pub users: Vec<serde_json::Value>,
    /// Server wall clock in milliseconds.
    pub timestamp: f64,
}

/// A broadcast after per-record validation.
#[derive(Debug, Clone, Default)]
pub struct DecodedSnapshot {
    pub timestamp: f64,
    pub records: Vec<EntityRecord>,
    /// Every id named in the broadcast, including records that failed validation.
    pub present: HashSet<String>,
    pub rejected: usize,
}

impl StateSnapshot {
    pub fn from_records(records: &[EntityRecord], timestamp: f64) -> anyhow::Result<Self> {
        let users = records
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .context("serialize entity records")?;
        Ok(Self { users, timestamp })
    }

    pub fn decode(&self) -> DecodedSnapshot {
        let mut out = DecodedSnapshot {
            timestamp: self.timestamp,
            ..Default::default()
        };
        for value in &self.users {
            let Some(id) = value.get("id").and_then(|v| v.as_str()) else {
                warn!("Dropping broadcast record without an id");
                out.rejected += 1;
                continue;
            };
            out.present.insert(id.to_string());

            match serde_json::from_value::<EntityRecord>(value.clone()) {
                Ok(record) if record.x.is_finite() && record.y.is_finite() => {
                    out.records.push(record)
                }
                Ok(_) => {
                    warn!(id = %id, "Dropping broadcast record with non-finite position");
                    out.rejected += 1;
                }
                Err(e) => {
                    warn!(id = %id, error = %e, "Dropping malformed broadcast record");
                    out.rejected += 1;
                }
            }
        }
        out
    }
}

/// Message envelope, `{"event": "...", "data": {...}}` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetMsg {
    // ─── Client -> server ───
    /// Register a display name, once at join.
    SetName { name: String },
    /// One predicted input tick.
    Move(MoveCmd),
    /// Transient emote request.
    Emote {
        #[serde(rename = "type")]
        kind: String,
    },
    /// Request or toggle a dance variant.
    Dance {
        #[serde(rename = "type")]
        variant: String,
    },
    /// Leave the dance state.
    StopDance,

    // ─── Server -> client ───
    /// Assigns the client its entity id.
    Welcome { id: String },
    /// Periodic authoritative broadcast.
    StateSnapshot(StateSnapshot),
}

/// Writes one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, msg: &NetMsg) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(msg).context("serialize msg")?;
    if payload.len() > MAX_FRAME_LEN {
        bail!("frame of {} bytes exceeds limit of {MAX_FRAME_LEN}", payload.len());
    }
    let len = u32::try_from(payload.len()).context("frame length")?;
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(len);
    buf.extend_from_slice(&payload);
    w.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

/// Reads one length-prefixed frame; `None` when the peer closed cleanly.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> anyhow::Result<Option<NetMsg>> {
    match read_payload(r).await? {
        Some(payload) => Ok(Some(decode_from_bytes(&payload)?)),
        None => Ok(None),
    }
}

/// Reads the raw payload of one frame.
pub async fn read_payload<R: AsyncRead + Unpin>(r: &mut R) -> anyhow::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("tcp read len"),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        bail!("frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}");
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .await
        .context("tcp read payload")?;
    Ok(Some(payload))
}

/// Outbound half of a transport.
#[async_trait]
pub trait MessageSink: Send {
    async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()>;
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok(Self::new(stream))
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.stream, msg).await
    }

    pub async fn recv(&mut self) -> anyhow::Result<Option<NetMsg>> {
        read_frame(&mut self.stream).await
    }

    /// Splits into independently owned halves so reads can run on their own task.
    pub fn into_split(self) -> (ConnReader, ConnWriter) {
        let (r, w) = self.stream.into_split();
        (ConnReader { inner: r }, ConnWriter { inner: w })
    }
}

/// Read half of a [`ReliableConn`].
#[derive(Debug)]
pub struct ConnReader {
    inner: OwnedReadHalf,
}

impl ConnReader {
    /// Next decodable message. Frames that fail to decode are logged and
    /// skipped; framing errors end the stream.
    pub async fn recv(&mut self) -> anyhow::Result<Option<NetMsg>> {
        loop {
            let Some(payload) = read_payload(&mut self.inner).await? else {
                return Ok(None);
            };
            match decode_from_bytes(&payload) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => warn!(error = %e, len = payload.len(), "Skipping undecodable frame"),
            }
        }
    }
}

/// Write half of a [`ReliableConn`].
#[derive(Debug)]
pub struct ConnWriter {
    inner: OwnedWriteHalf,
}

#[async_trait]
impl MessageSink for ConnWriter {
    async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.inner, msg).await
    }
}

/// In-process transport, used when client and server share a runtime.
#[async_trait]
impl MessageSink for mpsc::UnboundedSender<NetMsg> {
    async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        mpsc::UnboundedSender::send(self, msg.clone()).context("channel closed")?;
        Ok(())
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Decodes one frame payload.
pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<NetMsg> {
    serde_json::from_slice(b).context("deserialize")
}

/// Wall clock in milliseconds, the timebase of broadcast timestamps.
pub fn now_millis() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64
}
