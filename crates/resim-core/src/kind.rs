//! Simulation model kinds
//!
//! A [`SimModel`] bundles the four data shapes of one kind of simulated
//! instance and its deterministic tick function. Each registered kind is
//! assigned a dense [`KindId`] at finalization, which indexes every
//! per-kind storage table in both execution contexts.

use crate::frame::TickContext;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense index of a registered model kind
///
/// Assigned once by the registry at finalization and immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KindId(pub u16);

impl KindId {
    /// Get the raw index
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for KindId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kind:{}", self.0)
    }
}

/// One kind of deterministic simulation
///
/// Bundles the client-authoritative input command, the server-authoritative
/// networked state, the non-networked local glue data, and the tick
/// function that advances one instance by one fixed step.
///
/// `Local` is never serialized, never rolled back, and never crosses the
/// network; it typically holds a handle into the external physics backend.
pub trait SimModel: 'static {
    /// Client-authoritative control data consumed by the tick
    type Input: Clone + Default + PartialEq + Serialize + DeserializeOwned + Send;
    /// Server-authoritative, networked, rolled-back simulation state
    type NetState: Clone + Default + PartialEq + Serialize + DeserializeOwned + Send;
    /// Non-networked glue data, private to the simulation context
    type Local: Send;

    /// Kind name, unique across the registry
    const NAME: &'static str;
    /// Sort priority for dense id assignment; ties break by name
    const PRIORITY: i16 = 0;

    /// Advance one instance by one fixed step
    ///
    /// Must produce the same `state` given the same `(frame, delta_time,
    /// input, prior state)`; this determinism is what makes resimulation
    /// after a rollback valid.
    fn tick(ctx: &TickContext, input: &Self::Input, state: &mut Self::NetState, local: &mut Self::Local);

    /// Check that the local glue data is usable this step
    ///
    /// Returning false skips the instance's tick for the step (logged, not
    /// fatal); its state simply does not advance this frame.
    fn local_valid(_local: &Self::Local) -> bool {
        true
    }

    /// Decide whether an authoritative state differs enough to correct
    fn should_reconcile(local: &Self::NetState, authoritative: &Self::NetState) -> bool {
        local != authoritative
    }

    /// Decide whether an authoritative input differs enough to correct
    ///
    /// Only consulted for instances that are not locally controlled;
    /// locally-controlled instances never reconcile on their own input.
    fn should_reconcile_input(local: &Self::Input, authoritative: &Self::Input) -> bool {
        local != authoritative
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter;

    impl SimModel for Counter {
        type Input = u32;
        type NetState = u64;
        type Local = ();
        const NAME: &'static str = "counter";

        fn tick(_ctx: &TickContext, input: &u32, state: &mut u64, _local: &mut ()) {
            *state += *input as u64;
        }
    }

    #[test]
    fn test_tick_deterministic() {
        let ctx = TickContext::new(3, 1.0 / 60.0);
        let mut a = 10u64;
        let mut b = 10u64;
        Counter::tick(&ctx, &5, &mut a, &mut ());
        Counter::tick(&ctx, &5, &mut b, &mut ());
        assert_eq!(a, b);
        assert_eq!(a, 15);
    }

    #[test]
    fn test_default_reconcile_predicates() {
        assert!(Counter::should_reconcile(&1, &2));
        assert!(!Counter::should_reconcile(&2, &2));
        assert!(Counter::should_reconcile_input(&0, &1));
    }
}
