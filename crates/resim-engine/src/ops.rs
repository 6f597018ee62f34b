//! Control-to-simulation marshal operations
//!
//! Everything the control context wants done to simulation state is
//! expressed as a [`ControlOp`] and queued in the control-side outbox. Once
//! per step the outbox is handed to the simulation side and applied in a
//! fixed phase order, so a same-step delete of a just-created instance is
//! correct and deletions always win.

use resim_core::{Frame, InstanceId, SimModel};
use resim_netcode::InputPolicy;

/// One marshaled operation
pub enum ControlOp<M: SimModel> {
    /// Create an instance with its glue data and initial networked state
    Spawn {
        id: InstanceId,
        local: M::Local,
        state: M::NetState,
        policy: InputPolicy,
    },
    /// Rename a provisional client id to its server id
    Remap { old: InstanceId, new: InstanceId },
    /// Change where an instance's input comes from
    SetInputSource { id: InstanceId, policy: InputPolicy },
    /// Ad-hoc mutation of the non-networked glue data
    MutateLocal {
        id: InstanceId,
        mutate: Box<dyn FnOnce(&mut M::Local) + Send>,
    },
    /// Ad-hoc mutation of the networked state at the upcoming step
    MutateNet {
        id: InstanceId,
        mutate: Box<dyn FnOnce(&mut M::NetState) + Send>,
    },
    /// Input command; `frame: None` targets the step about to run,
    /// `Some(f)` buffers for a specific future step
    Input {
        id: InstanceId,
        frame: Option<Frame>,
        input: M::Input,
    },
    /// Destroy an instance; applied after everything else in the batch
    Despawn { id: InstanceId },
}

impl<M: SimModel> ControlOp<M> {
    /// Application phase; ops of one batch apply phase by phase, keeping
    /// enqueue order within a phase
    pub fn phase(&self) -> u8 {
        match self {
            ControlOp::Spawn { .. } => 0,
            ControlOp::Remap { .. } => 1,
            ControlOp::SetInputSource { .. } => 2,
            ControlOp::MutateLocal { .. } => 3,
            ControlOp::MutateNet { .. } => 4,
            ControlOp::Input { .. } => 5,
            ControlOp::Despawn { .. } => 6,
        }
    }

    /// The instance this op targets, if it targets exactly one
    pub fn target(&self) -> Option<InstanceId> {
        match self {
            ControlOp::Spawn { id, .. }
            | ControlOp::SetInputSource { id, .. }
            | ControlOp::MutateLocal { id, .. }
            | ControlOp::MutateNet { id, .. }
            | ControlOp::Input { id, .. }
            | ControlOp::Despawn { id } => Some(*id),
            ControlOp::Remap { .. } => None,
        }
    }

    /// Rewrite the targeted instance id (used when a rename happens while
    /// ops are still queued control-side)
    pub fn retarget(&mut self, from: InstanceId, to: InstanceId) {
        match self {
            ControlOp::Spawn { id, .. }
            | ControlOp::SetInputSource { id, .. }
            | ControlOp::MutateLocal { id, .. }
            | ControlOp::MutateNet { id, .. }
            | ControlOp::Input { id, .. }
            | ControlOp::Despawn { id } => {
                if *id == from {
                    *id = to;
                }
            }
            ControlOp::Remap { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resim_core::TickContext;

    struct Counter;

    impl SimModel for Counter {
        type Input = i32;
        type NetState = i64;
        type Local = ();
        const NAME: &'static str = "counter";
        fn tick(_: &TickContext, input: &i32, state: &mut i64, _: &mut ()) {
            *state += *input as i64;
        }
    }

    #[test]
    fn test_phase_order_spawn_first_despawn_last() {
        let spawn: ControlOp<Counter> = ControlOp::Spawn {
            id: InstanceId(1),
            local: (),
            state: 0,
            policy: InputPolicy::Local,
        };
        let despawn: ControlOp<Counter> = ControlOp::Despawn { id: InstanceId(1) };
        assert!(spawn.phase() < despawn.phase());
    }

    #[test]
    fn test_retarget() {
        let mut op: ControlOp<Counter> = ControlOp::Input {
            id: InstanceId(-3),
            frame: None,
            input: 1,
        };
        op.retarget(InstanceId(-3), InstanceId(12));
        assert_eq!(op.target(), Some(InstanceId(12)));
    }
}
