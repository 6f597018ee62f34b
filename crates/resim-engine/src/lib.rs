//! Resim Engine - Two-context rollback simulation engine
//!
//! This crate assembles the rollback core into a usable engine:
//!
//! - **Two contexts**: a control side the caller talks to and a simulation
//!   side the step loop owns, sharing nothing but marshal mailboxes and a
//!   latest-output slot
//! - **Marshal**: queued [`ControlOp`]s applied once per step in a fixed
//!   phase order, so a same-step delete of a just-created instance works
//! - **Registration**: instance lifecycle with provisional client ids and
//!   the one-time rename to the server id
//! - **Ticking**: deterministic fixed steps driven by a pluggable
//!   [`StepBackend`]
//! - **Rewind**: batched reconciliation, one system-wide rollback target,
//!   corrections honored at their exact frames during replay
//!
//! ```no_run
//! use resim_engine::{Engine, InputPolicy};
//! # use resim_core::{SimModel, TickContext};
//! # struct Counter;
//! # impl SimModel for Counter {
//! #     type Input = i32;
//! #     type NetState = i64;
//! #     type Local = ();
//! #     const NAME: &'static str = "counter";
//! #     fn tick(_: &TickContext, input: &i32, state: &mut i64, _: &mut ()) {
//! #         *state += *input as i64;
//! #     }
//! # }
//!
//! let mut engine = Engine::builder().kind::<Counter>().build();
//! let player = engine.register::<Counter>((), 0, InputPolicy::Local);
//! engine.push_input(&player, 1);
//! engine.advance(1, 1.0 / 60.0);
//! assert_eq!(engine.read_latest(&player), Some(1));
//! ```

mod backend;
mod collection;
mod control_store;
mod driver;
mod engine;
mod error;
mod ops;
mod sim_store;

pub use backend::{LockstepBackend, StepBackend};
pub use collection::DataStoreCollection;
pub use control_store::{ControlStore, LatestOutput, OutputEntry};
pub use driver::{KindDriver, ModelDriver};
pub use engine::{Engine, EngineBuilder, InstanceHandle};
pub use error::{Error, Result};
pub use ops::ControlOp;
pub use sim_store::{InstanceRecord, SimStore};

// The pieces callers need alongside the engine API.
pub use resim_core::{Frame, FrameOffset, InstanceId, KindId, SimConfig, SimModel, TickContext};
pub use resim_netcode::{ControllerId, InputPolicy, ReconcileReport};
