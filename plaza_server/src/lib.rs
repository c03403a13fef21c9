//! `plaza_server`
//!
//! Server-side systems:
//! - Authoritative player state
//! - Receives `MOVE`, `EMOTE`, `DANCE` and friends
//! - Broadcasts `STATE_SNAPSHOT`s at a fixed rate
//!
//! Networking model:
//! - TCP with length-prefixed JSON frames, one reader task per client

pub mod server;

pub use server::GameServer;
