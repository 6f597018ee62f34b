//! Per-frame snapshots
//!
//! A [`Snapshot`] is one frame's complete mapping from instance id to
//! `(input, state)` for one model kind. It is the unit stored in frame
//! history, handed back to the control context, and carried on the wire.

use crate::identity::InstanceId;
use crate::kind::SimModel;
use std::collections::BTreeMap;
use std::fmt;

// Derives would put bounds on `M` itself rather than on the associated
// types, and model kinds are usually plain marker types. Implemented by
// hand instead.

/// One instance's recorded data at one frame
pub struct SnapshotEntry<M: SimModel> {
    /// Input command consumed by this frame's tick
    pub input: M::Input,
    /// Networked state produced by this frame's tick
    pub state: M::NetState,
}

impl<M: SimModel> SnapshotEntry<M> {
    /// Create an entry from explicit parts
    pub fn new(input: M::Input, state: M::NetState) -> Self {
        Self { input, state }
    }
}

impl<M: SimModel> Clone for SnapshotEntry<M> {
    fn clone(&self) -> Self {
        Self {
            input: self.input.clone(),
            state: self.state.clone(),
        }
    }
}

impl<M: SimModel> Default for SnapshotEntry<M> {
    fn default() -> Self {
        Self {
            input: M::Input::default(),
            state: M::NetState::default(),
        }
    }
}

impl<M: SimModel> PartialEq for SnapshotEntry<M> {
    fn eq(&self, other: &Self) -> bool {
        self.input == other.input && self.state == other.state
    }
}

impl<M: SimModel> fmt::Debug for SnapshotEntry<M>
where
    M::Input: fmt::Debug,
    M::NetState: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotEntry")
            .field("input", &self.input)
            .field("state", &self.state)
            .finish()
    }
}

/// All instances' `(input, state)` pairs for one kind at one frame
///
/// Keyed by instance id in a sorted map so iteration order is
/// deterministic across contexts and machines.
pub struct Snapshot<M: SimModel> {
    /// Entries keyed by instance id
    pub entries: BTreeMap<InstanceId, SnapshotEntry<M>>,
}

impl<M: SimModel> Clone for Snapshot<M> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<M: SimModel> PartialEq for Snapshot<M> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<M: SimModel> fmt::Debug for Snapshot<M>
where
    M::Input: fmt::Debug,
    M::NetState: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot").field("entries", &self.entries).finish()
    }
}

impl<M: SimModel> Snapshot<M> {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Number of instances captured
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether no instances are captured
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up one instance's entry
    pub fn get(&self, id: InstanceId) -> Option<&SnapshotEntry<M>> {
        self.entries.get(&id)
    }

    /// Look up one instance's entry mutably
    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut SnapshotEntry<M>> {
        self.entries.get_mut(&id)
    }

    /// Insert or replace one instance's entry
    pub fn insert(&mut self, id: InstanceId, entry: SnapshotEntry<M>) {
        self.entries.insert(id, entry);
    }

    /// Remove one instance's entry
    pub fn remove(&mut self, id: InstanceId) -> Option<SnapshotEntry<M>> {
        self.entries.remove(&id)
    }

    /// Re-key an instance's entry, if present
    pub fn rekey(&mut self, old: InstanceId, new: InstanceId) {
        if let Some(entry) = self.entries.remove(&old) {
            self.entries.insert(new, entry);
        }
    }
}

impl<M: SimModel> Default for Snapshot<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::TickContext;

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
    fn test_insert_and_get() {
        let mut snap: Snapshot<Counter> = Snapshot::new();
        snap.insert(InstanceId(1), SnapshotEntry::new(2, 10));
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.get(InstanceId(1)).unwrap().state, 10);
        assert!(snap.get(InstanceId(2)).is_none());
    }

    #[test]
    fn test_rekey() {
        let mut snap: Snapshot<Counter> = Snapshot::new();
        snap.insert(InstanceId(-1), SnapshotEntry::new(0, 42));
        snap.rekey(InstanceId(-1), InstanceId(7));
        assert!(snap.get(InstanceId(-1)).is_none());
        assert_eq!(snap.get(InstanceId(7)).unwrap().state, 42);
    }

    #[test]
    fn test_deterministic_order() {
        let mut snap: Snapshot<Counter> = Snapshot::new();
        snap.insert(InstanceId(3), SnapshotEntry::default());
        snap.insert(InstanceId(-2), SnapshotEntry::default());
        snap.insert(InstanceId(1), SnapshotEntry::default());
        let ids: Vec<_> = snap.entries.keys().copied().collect();
        assert_eq!(ids, vec![InstanceId(-2), InstanceId(1), InstanceId(3)]);
    }
}
