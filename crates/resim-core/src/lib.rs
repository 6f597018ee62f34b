//! Resim Core - Types for deterministic rollback simulation
//!
//! This crate provides the shared vocabulary of the resim engine:
//! - Instance identity with provisional client ids (`InstanceId`)
//! - Model kinds with dense ids (`SimModel`, `KindId`, `KindRegistry`)
//! - Fixed-step frames and tick contexts (`Frame`, `TickContext`)
//! - Per-frame snapshots (`Snapshot`)
//! - Simulation limits (`SimConfig`)
//!
//! The engine itself, the frame history ring, and the netcode live in
//! sibling crates; everything here is plain data and registries so the two
//! execution contexts can share one vocabulary without sharing state.

mod config;
mod frame;
mod identity;
mod kind;
mod registry;
mod snapshot;

pub use config::SimConfig;
pub use frame::{apply_offset, Frame, FrameOffset, TickContext};
pub use identity::{InstanceId, InstanceIdAllocator};
pub use kind::{KindId, SimModel};
pub use registry::{KindInfo, KindRegistry};
pub use snapshot::{Snapshot, SnapshotEntry};
