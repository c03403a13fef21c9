//! `plaza_client`
//!
//! Client-side systems:
//! - Input sampling and local prediction with a pending-input log
//! - Reconciliation of the local entity against authoritative broadcasts
//! - Snapshot buffering and delayed interpolation for remote entities
//! - Animation selection and a presentation abstraction
//! - Connection management and the fixed-rate host loop

pub mod anim;
pub mod buffer;
pub mod client;
pub mod input;
pub mod interp;
pub mod predict;
pub mod reconcile;
pub mod render;
pub mod sync;

pub use client::GameClient;
pub use sync::{Lifecycle, SyncCore};
