//! Controller bindings
//!
//! Associates an instance with the network controller that drives its
//! input, and records which of the two input policies applies: a pending
//! command written each control tick, or a per-controller buffered ring
//! pulled by step number.

use resim_core::Frame;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a network controller (connection/endpoint)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ControllerId(pub u32);

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "controller:{}", self.0)
    }
}

/// Where an instance's input comes from each step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum InputPolicy {
    /// The owning side writes a pending command each control tick
    #[default]
    Local,
    /// Input for future steps is pulled from a buffered ring by step number
    Buffered,
}

/// Association of an instance with its controlling input source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ControllerBinding {
    /// Bound controller, if any
    pub controller: Option<ControllerId>,
    /// Input sourcing policy
    pub policy: InputPolicy,
    /// Last frame consumed from the buffered ring
    pub last_consumed: Option<Frame>,
}

impl ControllerBinding {
    /// Create a binding with the given policy and no controller
    pub fn with_policy(policy: InputPolicy) -> Self {
        Self {
            controller: None,
            policy,
            last_consumed: None,
        }
    }

    /// Whether the instance's input is authored on this side
    ///
    /// Locally-controlled instances never reconcile on their own input,
    /// only on state.
    pub fn is_locally_controlled(&self) -> bool {
        self.policy == InputPolicy::Local
    }
}
