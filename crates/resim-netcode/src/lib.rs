//! Resim Netcode - Reconciliation and wire protocol for rollback simulation
//!
//! This crate provides the network-facing half of the rollback core:
//!
//! - **Reconciliation**: compare authoritative snapshots against local
//!   history and pick the single minimal rewind frame across all kinds
//! - **Wire protocol**: little-endian frame updates with a bounded window
//!   of future input commands
//! - **Input rings**: per-controller buffered input pulled by step number
//! - **Controller bindings**: which side authors an instance's input
//!
//! Decoded updates are *staged*, never applied: the engine batches every
//! snapshot received during a control tick into one reconciliation pass,
//! so multiple kinds (and multiple snapshots) share a single rewind.

mod binding;
mod error;
mod input_ring;
mod protocol;
mod reconcile;
pub mod wire;

pub use binding::{ControllerBinding, ControllerId, InputPolicy};
pub use error::{Error, Result};
pub use input_ring::InputRing;
pub use protocol::{
    read_header, read_kind_body, read_kind_id, write_header, write_kind_body, write_kind_id,
    UpdateHeader,
};
pub use reconcile::{
    reconcile_kind, AuthorityEntry, AuthoritySnapshot, Correction, CorrectionEntry, Desync,
    DesyncReason, KindOutcome, ReconcileReport,
};
