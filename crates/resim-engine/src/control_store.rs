//! Control-side per-kind storage
//!
//! The control context never touches history. It queues [`ControlOp`]s in
//! an outbox, keeps the controller bindings and buffered-input rings for
//! the instances it registered, and reads the latest published output the
//! simulation side handed back after its step.

use crate::ops::ControlOp;
use resim_core::{Frame, InstanceId, SimModel};
use resim_netcode::{AuthoritySnapshot, ControllerBinding, InputRing};
use std::collections::BTreeMap;

/// One instance's slice of the latest published step
pub struct OutputEntry<M: SimModel> {
    /// Networked state after the step
    pub state: M::NetState,
    /// Input the step consumed
    pub input: M::Input,
}

impl<M: SimModel> Clone for OutputEntry<M> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            input: self.input.clone(),
        }
    }
}

/// Latest simulation output visible to the control context
///
/// Overwritten wholesale at every publish; deletion sentinels accumulate
/// until the control side acknowledges them.
pub struct LatestOutput<M: SimModel> {
    /// Frame the entries describe, `None` before the first publish
    pub frame: Option<Frame>,
    /// Per-instance state and consumed input
    pub entries: BTreeMap<InstanceId, OutputEntry<M>>,
    /// Instances deleted since the last [`take_removed`](Self::take_removed)
    pub removed: Vec<InstanceId>,
}

impl<M: SimModel> LatestOutput<M> {
    /// Read one instance's latest published entry
    pub fn get(&self, id: InstanceId) -> Option<&OutputEntry<M>> {
        self.entries.get(&id)
    }

    /// Drain the accumulated deletion sentinels
    pub fn take_removed(&mut self) -> Vec<InstanceId> {
        std::mem::take(&mut self.removed)
    }
}

impl<M: SimModel> Default for LatestOutput<M> {
    fn default() -> Self {
        Self {
            frame: None,
            entries: BTreeMap::new(),
            removed: Vec::new(),
        }
    }
}

/// Control-side storage block for one kind
pub struct ControlStore<M: SimModel> {
    /// Ops queued for the next marshal hand-off
    pub outbox: Vec<ControlOp<M>>,
    /// Input source per registered instance
    pub bindings: BTreeMap<InstanceId, ControllerBinding>,
    /// Buffered-input rings, only for instances under the buffered policy
    pub rings: BTreeMap<InstanceId, InputRing<M::Input>>,
    /// Latest published step
    pub latest: LatestOutput<M>,
    /// Decoded authoritative snapshots awaiting the next reconcile pass
    pub staged: Vec<AuthoritySnapshot<M>>,
    /// Control-side liveness record; ops for absent ids are dropped with a
    /// debug log instead of erroring
    pub spawned: BTreeMap<InstanceId, Frame>,
}

impl<M: SimModel> ControlStore<M> {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            outbox: Vec::new(),
            bindings: BTreeMap::new(),
            rings: BTreeMap::new(),
            latest: LatestOutput::default(),
            staged: Vec::new(),
            spawned: BTreeMap::new(),
        }
    }

    /// Queue an op for the next hand-off
    pub fn push(&mut self, op: ControlOp<M>) {
        self.outbox.push(op);
    }

    /// Rename an instance in every control-side table, including ops still
    /// queued in the outbox
    pub fn rekey(&mut self, old: InstanceId, new: InstanceId) {
        for op in &mut self.outbox {
            op.retarget(old, new);
        }
        if let Some(binding) = self.bindings.remove(&old) {
            self.bindings.insert(new, binding);
        }
        if let Some(ring) = self.rings.remove(&old) {
            self.rings.insert(new, ring);
        }
        if let Some(entry) = self.latest.entries.remove(&old) {
            self.latest.entries.insert(new, entry);
        }
        for snapshot in &mut self.staged {
            if let Some(entry) = snapshot.entries.remove(&old) {
                snapshot.entries.insert(new, entry);
            }
        }
        if let Some(frame) = self.spawned.remove(&old) {
            self.spawned.insert(new, frame);
        }
    }

    /// Forget an instance in every control-side table
    pub fn forget(&mut self, id: InstanceId) {
        self.bindings.remove(&id);
        self.rings.remove(&id);
        self.latest.entries.remove(&id);
        self.spawned.remove(&id);
    }
}

impl<M: SimModel> Default for ControlStore<M> {
    fn default() -> Self {
        Self::new()
    }
}
