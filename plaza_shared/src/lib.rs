//! `plaza_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - Deterministic movement so prediction and the server agree.
//! - Clear separation of concerns (net, math, physics, config).
//! - No `unsafe`.

pub mod config;
pub mod math;
pub mod net;
pub mod physics;
