//! Simulation-side per-kind storage and step execution
//!
//! A [`SimStore`] owns everything the simulation context needs for one
//! kind: the instance records (with their never-rolled-back glue data),
//! the frame history of snapshots, the marshal inbox, and the correction
//! and future-input tables consumed during replay.

use crate::ops::ControlOp;
use resim_core::{Frame, InstanceId, SimModel, Snapshot, SnapshotEntry, TickContext};
use resim_history::FrameHistory;
use resim_netcode::{Correction, InputPolicy};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Per-instance association living in the simulation context
pub struct InstanceRecord<M: SimModel> {
    /// Non-networked glue data; never rolled back, never networked
    pub local: M::Local,
    /// Frame the instance first appeared at
    pub spawn_frame: Frame,
    /// Initial networked state, kept for replays that cross the spawn frame
    pub spawn_state: M::NetState,
    /// Where the instance's input comes from
    pub policy: InputPolicy,
}

impl<M: SimModel> InstanceRecord<M> {
    /// Whether this side authors the instance's input
    pub fn locally_controlled(&self) -> bool {
        self.policy == InputPolicy::Local
    }
}

/// Simulation-side storage block for one kind
pub struct SimStore<M: SimModel> {
    /// Instance records keyed by id
    pub records: BTreeMap<InstanceId, InstanceRecord<M>>,
    /// Frame-indexed snapshot history
    pub history: FrameHistory<Snapshot<M>>,
    /// Marshal inbox for the step about to run
    pub inbox: Vec<ControlOp<M>>,
    /// Buffered inputs for future steps, keyed frame-then-instance
    pub future_inputs: BTreeMap<Frame, BTreeMap<InstanceId, M::Input>>,
    /// Frame-stamped corrections awaiting their exact frame
    pub corrections: BTreeMap<Frame, Correction<M>>,
    /// Deletion sentinels for the next output publish
    pub removed: Vec<InstanceId>,
}

impl<M: SimModel> SimStore<M> {
    /// Create a store with an empty snapshot seeded at `start`
    pub fn new(history_frames: usize, start: Frame) -> Self {
        let mut history = FrameHistory::new(history_frames);
        history.seed(start, Snapshot::new());
        Self {
            records: BTreeMap::new(),
            history,
            inbox: Vec::new(),
            future_inputs: BTreeMap::new(),
            corrections: BTreeMap::new(),
            removed: Vec::new(),
        }
    }

    /// Start a normal step: advance history and apply the marshal batch
    pub fn begin_step(&mut self, frame: Frame) {
        let advanced = self.history.advance();
        debug_assert_eq!(advanced, frame, "simulation frame out of lockstep");
        self.apply_inbox(frame);
        self.merge_future_inputs(frame);
    }

    fn apply_inbox(&mut self, frame: Frame) {
        let mut ops = std::mem::take(&mut self.inbox);
        // Stable phase sort: spawns first, deletions last, enqueue order
        // preserved within a phase.
        ops.sort_by_key(|op| op.phase());
        for op in ops {
            self.apply_op(op, frame);
        }
    }

    fn apply_op(&mut self, op: ControlOp<M>, frame: Frame) {
        match op {
            ControlOp::Spawn {
                id,
                local,
                state,
                policy,
            } => {
                assert!(
                    !self.records.contains_key(&id),
                    "instance {id} registered twice"
                );
                self.records.insert(
                    id,
                    InstanceRecord {
                        local,
                        spawn_frame: frame,
                        spawn_state: state.clone(),
                        policy,
                    },
                );
                self.history
                    .write(frame)
                    .insert(id, SnapshotEntry::new(M::Input::default(), state));
            }
            ControlOp::Remap { old, new } => self.remap(old, new),
            ControlOp::SetInputSource { id, policy } => match self.records.get_mut(&id) {
                Some(record) => record.policy = policy,
                None => debug!(%id, "input source change for missing instance dropped"),
            },
            ControlOp::MutateLocal { id, mutate } => match self.records.get_mut(&id) {
                Some(record) => mutate(&mut record.local),
                None => debug!(%id, "local mutation for missing instance dropped"),
            },
            ControlOp::MutateNet { id, mutate } => {
                match self.history.write(frame).get_mut(id) {
                    Some(entry) => mutate(&mut entry.state),
                    None => debug!(%id, "state mutation for missing instance dropped"),
                }
            }
            ControlOp::Input {
                id,
                frame: target,
                input,
            } => match target {
                None => self.set_input(id, frame, input),
                Some(f) if f == frame => self.set_input(id, frame, input),
                Some(f) if f > frame => {
                    self.future_inputs.entry(f).or_default().insert(id, input);
                }
                Some(f) => debug!(%id, frame = f, "stale buffered input dropped"),
            },
            ControlOp::Despawn { id } => {
                if self.records.remove(&id).is_some() {
                    self.history.write(frame).remove(id);
                    self.future_inputs.values_mut().for_each(|inputs| {
                        inputs.remove(&id);
                    });
                    self.removed.push(id);
                } else {
                    debug!(%id, "despawn for missing instance dropped");
                }
            }
        }
    }

    fn set_input(&mut self, id: InstanceId, frame: Frame, input: M::Input) {
        match self.history.write(frame).get_mut(id) {
            Some(entry) => entry.input = input,
            None => debug!(%id, "input for missing instance dropped"),
        }
    }

    fn merge_future_inputs(&mut self, frame: Frame) {
        // Entries below the running frame are stale; the one at the frame
        // feeds this step.
        self.future_inputs = self.future_inputs.split_off(&frame);
        if let Some(inputs) = self.future_inputs.remove(&frame) {
            let snapshot = self.history.write(frame);
            for (id, input) in inputs {
                match snapshot.get_mut(id) {
                    Some(entry) => entry.input = input,
                    None => debug!(%id, "buffered input for missing instance dropped"),
                }
            }
        }
    }

    /// Run the deterministic tick for every instance at `frame`
    ///
    /// An instance whose glue data is invalid is skipped with a warning;
    /// its state simply does not advance this frame.
    pub fn run_tick(&mut self, ctx: &TickContext) {
        let Self {
            records, history, ..
        } = self;
        let snapshot = history.write(ctx.frame);
        for (id, record) in records.iter_mut() {
            // A replayed frame predates instances spawned later.
            if record.spawn_frame > ctx.frame {
                continue;
            }
            let Some(entry) = snapshot.get_mut(*id) else {
                debug!(%id, frame = ctx.frame, "no snapshot entry for live instance");
                continue;
            };
            if !M::local_valid(&record.local) {
                warn!(%id, frame = ctx.frame, "invalid local state, tick skipped");
                continue;
            }
            let SnapshotEntry { input, state } = entry;
            M::tick(ctx, input, state, &mut record.local);
        }
    }

    /// Start a replayed step after a rollback
    ///
    /// The preserved slot supplies the original membership and recorded
    /// inputs; states are re-seeded from the prior frame (or from the spawn
    /// state when the instance spawned this very frame), then captured
    /// future inputs and correction inputs stamped for this frame are laid
    /// in before the tick runs.
    pub fn begin_replay_step(&mut self, frame: Frame) {
        let advanced = self.history.advance();
        debug_assert_eq!(advanced, frame, "replay frame out of lockstep");

        // Collect seeds first; the prior frame and the current frame live
        // in the same history.
        let mut seeds: Vec<(InstanceId, M::NetState)> = Vec::new();
        for (id, record) in &self.records {
            if record.spawn_frame > frame {
                continue;
            }
            let seed = self
                .history
                .read(frame - 1)
                .and_then(|prior| prior.get(*id))
                .map(|entry| entry.state.clone())
                .unwrap_or_else(|| record.spawn_state.clone());
            seeds.push((*id, seed));
        }

        let snapshot = self.history.write(frame);
        for (id, state) in seeds {
            snapshot
                .entries
                .entry(id)
                .or_insert_with(SnapshotEntry::default)
                .state = state;
        }

        if let Some(inputs) = self.future_inputs.get(&frame) {
            for (id, input) in inputs {
                if let Some(entry) = snapshot.get_mut(*id) {
                    entry.input = input.clone();
                }
            }
        }
        if let Some(correction) = self.corrections.get(&frame) {
            for (id, centry) in &correction.entries {
                if let Some(input) = &centry.input {
                    if let Some(entry) = snapshot.get_mut(*id) {
                        entry.input = input.clone();
                    }
                }
            }
        }
    }

    /// Finish a replayed step: authoritative state stamped for this frame
    /// overwrites whatever the tick just computed
    pub fn finish_replay_step(&mut self, frame: Frame) {
        if let Some(correction) = self.corrections.remove(&frame) {
            let snapshot = self.history.write(frame);
            for (id, centry) in correction.entries {
                snapshot
                    .entries
                    .entry(id)
                    .or_insert_with(SnapshotEntry::default)
                    .state = centry.state;
            }
        }
    }

    /// Apply a correction directly at the rollback target frame
    ///
    /// The target frame itself is not re-ticked: the authoritative state
    /// (and, for remote instances, input) replaces the recorded values and
    /// replay starts from the next frame.
    pub fn apply_correction_at(&mut self, frame: Frame) {
        if let Some(correction) = self.corrections.remove(&frame) {
            let snapshot = self.history.write(frame);
            for (id, centry) in correction.entries {
                let entry = snapshot
                    .entries
                    .entry(id)
                    .or_insert_with(SnapshotEntry::default);
                entry.state = centry.state;
                if let Some(input) = centry.input {
                    entry.input = input;
                }
            }
        }
    }

    /// Drop corrections below a clamped rollback target, reporting each
    pub fn drop_corrections_below(&mut self, frame: Frame) -> Vec<(Frame, InstanceId)> {
        let keep = self.corrections.split_off(&frame);
        let dropped = std::mem::replace(&mut self.corrections, keep);
        let mut lost = Vec::new();
        for (f, correction) in dropped {
            for id in correction.entries.keys() {
                lost.push((f, *id));
            }
        }
        lost
    }

    /// Re-key every table that mentions `old`
    ///
    /// History contents are untouched; only the keys change.
    pub fn remap(&mut self, old: InstanceId, new: InstanceId) {
        if let Some(record) = self.records.remove(&old) {
            assert!(
                !self.records.contains_key(&new),
                "remap target {new} already registered"
            );
            self.records.insert(new, record);
        } else {
            debug!(%old, %new, "remap for missing instance dropped");
            return;
        }
        for (_, snapshot) in self.history.iter_mut() {
            snapshot.rekey(old, new);
        }
        for inputs in self.future_inputs.values_mut() {
            if let Some(input) = inputs.remove(&old) {
                inputs.insert(new, input);
            }
        }
        for correction in self.corrections.values_mut() {
            if let Some(entry) = correction.entries.remove(&old) {
                correction.entries.insert(new, entry);
            }
        }
        for id in &mut self.removed {
            if *id == old {
                *id = new;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resim_netcode::CorrectionEntry;

    struct Counter;

    impl SimModel for Counter {
        type Input = i32;
        type NetState = i64;
        type Local = bool; // validity flag doubles as the glue data
        const NAME: &'static str = "counter";

        fn tick(_: &TickContext, input: &i32, state: &mut i64, _: &mut bool) {
            *state += *input as i64;
        }

        fn local_valid(local: &bool) -> bool {
            *local
        }
    }

    fn spawn(store: &mut SimStore<Counter>, id: InstanceId, state: i64) {
        store.inbox.push(ControlOp::Spawn {
            id,
            local: true,
            state,
            policy: InputPolicy::Local,
        });
    }

    fn step(store: &mut SimStore<Counter>, frame: Frame) {
        store.begin_step(frame);
        store.run_tick(&TickContext::new(frame, 1.0 / 60.0));
    }

    #[test]
    fn test_spawn_then_tick() {
        let mut store: SimStore<Counter> = SimStore::new(16, 0);
        spawn(&mut store, InstanceId(1), 0);
        store.inbox.push(ControlOp::Input {
            id: InstanceId(1),
            frame: None,
            input: 1,
        });
        step(&mut store, 1);
        assert_eq!(store.history.read(1).unwrap().get(InstanceId(1)).unwrap().state, 1);
    }

    #[test]
    fn test_same_step_spawn_despawn() {
        let mut store: SimStore<Counter> = SimStore::new(16, 0);
        spawn(&mut store, InstanceId(1), 5);
        // Despawn enqueued before the spawn still applies last.
        store.inbox.insert(0, ControlOp::Despawn { id: InstanceId(1) });
        step(&mut store, 1);
        assert!(store.records.is_empty());
        assert!(store.history.read(1).unwrap().get(InstanceId(1)).is_none());
        assert_eq!(store.removed, vec![InstanceId(1)]);
    }

    #[test]
    fn test_invalid_local_skips_tick() {
        let mut store: SimStore<Counter> = SimStore::new(16, 0);
        spawn(&mut store, InstanceId(1), 0);
        store.inbox.push(ControlOp::Input {
            id: InstanceId(1),
            frame: None,
            input: 1,
        });
        step(&mut store, 1);
        store.inbox.push(ControlOp::MutateLocal {
            id: InstanceId(1),
            mutate: Box::new(|valid| *valid = false),
        });
        step(&mut store, 2);
        // Sticky input carried forward but the tick was skipped.
        assert_eq!(store.history.read(2).unwrap().get(InstanceId(1)).unwrap().state, 1);
    }

    #[test]
    fn test_buffered_future_input_lands_on_its_frame() {
        let mut store: SimStore<Counter> = SimStore::new(16, 0);
        spawn(&mut store, InstanceId(1), 0);
        store.inbox.push(ControlOp::Input {
            id: InstanceId(1),
            frame: Some(3),
            input: 10,
        });
        step(&mut store, 1);
        step(&mut store, 2);
        step(&mut store, 3);
        let history = &store.history;
        assert_eq!(history.read(2).unwrap().get(InstanceId(1)).unwrap().state, 0);
        assert_eq!(history.read(3).unwrap().get(InstanceId(1)).unwrap().state, 10);
    }

    #[test]
    fn test_rollback_replay_reproduces_states() {
        let mut store: SimStore<Counter> = SimStore::new(16, 0);
        spawn(&mut store, InstanceId(1), 0);
        store.inbox.push(ControlOp::Input {
            id: InstanceId(1),
            frame: None,
            input: 1,
        });
        for frame in 1..=10 {
            step(&mut store, frame);
        }
        assert_eq!(store.history.read(10).unwrap().get(InstanceId(1)).unwrap().state, 10);

        store.history.rollback(5).unwrap();
        for frame in 6..=10 {
            store.begin_replay_step(frame);
            store.run_tick(&TickContext::replay(frame, 1.0 / 60.0));
            store.finish_replay_step(frame);
        }
        assert_eq!(store.history.read(10).unwrap().get(InstanceId(1)).unwrap().state, 10);
    }

    #[test]
    fn test_correction_at_target_then_replay() {
        // Counter ticks +1 each frame; authority says 7 at frame 5.
        let mut store: SimStore<Counter> = SimStore::new(16, 0);
        spawn(&mut store, InstanceId(1), 0);
        store.inbox.push(ControlOp::Input {
            id: InstanceId(1),
            frame: None,
            input: 1,
        });
        for frame in 1..=10 {
            step(&mut store, frame);
        }

        let mut correction = Correction::new();
        correction.entries.insert(
            InstanceId(1),
            CorrectionEntry::<Counter> {
                state: 7,
                input: None,
            },
        );
        store.corrections.insert(5, correction);

        store.history.rollback(5).unwrap();
        store.apply_correction_at(5);
        assert_eq!(store.history.read(5).unwrap().get(InstanceId(1)).unwrap().state, 7);

        for frame in 6..=10 {
            store.begin_replay_step(frame);
            store.run_tick(&TickContext::replay(frame, 1.0 / 60.0));
            store.finish_replay_step(frame);
        }
        assert_eq!(store.history.read(10).unwrap().get(InstanceId(1)).unwrap().state, 12);
    }

    #[test]
    fn test_remap_rekeys_history() {
        let mut store: SimStore<Counter> = SimStore::new(16, 0);
        spawn(&mut store, InstanceId(-1), 3);
        store.inbox.push(ControlOp::Input {
            id: InstanceId(-1),
            frame: None,
            input: 1,
        });
        step(&mut store, 1);
        step(&mut store, 2);

        store.remap(InstanceId(-1), InstanceId(9));
        assert!(store.records.contains_key(&InstanceId(9)));
        assert!(!store.records.contains_key(&InstanceId(-1)));
        for frame in 1..=2 {
            let snapshot = store.history.read(frame).unwrap();
            assert!(snapshot.get(InstanceId(9)).is_some());
            assert!(snapshot.get(InstanceId(-1)).is_none());
        }
    }
}
