//! Type-erased per-kind drivers
//!
//! The engine's step loop is kind-agnostic: it walks a list of boxed
//! [`KindDriver`]s in finalized kind order and each driver downcasts its
//! own slot out of the two store collections. [`ModelDriver`] is the one
//! implementation, generic over the model type.

use crate::collection::DataStoreCollection;
use crate::control_store::{ControlStore, OutputEntry};
use crate::ops::ControlOp;
use crate::sim_store::SimStore;
use resim_core::{Frame, KindId, SimConfig, SimModel, TickContext};
use resim_netcode::wire::{Reader, Writer};
use resim_netcode::{
    reconcile_kind, write_kind_body, write_kind_id, AuthorityEntry, Desync, DesyncReason,
    ReconcileReport,
};
use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use tracing::warn;

/// One kind's slice of the engine loop
///
/// Every method takes the store collections by reference so a single
/// driver list can serve both contexts without holding typed state.
pub trait KindDriver: Send {
    /// Dense id of the kind this driver serves
    fn kind(&self) -> KindId;

    /// Registered kind name, for logs
    fn name(&self) -> &'static str;

    /// Populate both collections' slots for this kind
    fn install(
        &self,
        config: &SimConfig,
        start: Frame,
        control: &mut DataStoreCollection,
        sim: &mut DataStoreCollection,
    );

    /// Hand the control outbox (plus due buffered inputs) to the sim inbox
    fn marshal_in(
        &self,
        upcoming: Frame,
        control: &mut DataStoreCollection,
        sim: &mut DataStoreCollection,
    );

    /// Advance history and apply the marshal batch for a normal step
    fn begin_step(&self, frame: Frame, sim: &mut DataStoreCollection);

    /// Run the deterministic tick at the context's frame
    fn tick(&self, ctx: &TickContext, sim: &mut DataStoreCollection);

    /// Overwrite the control side's latest output with the step result
    fn publish(&self, frame: Frame, sim: &mut DataStoreCollection, control: &mut DataStoreCollection);

    /// Retained history window `(tail, head)`, if seeded
    fn span(&self, sim: &DataStoreCollection) -> Option<(Frame, Frame)>;

    /// Compare staged authority against local history, queueing corrections
    fn reconcile(
        &self,
        control: &mut DataStoreCollection,
        sim: &mut DataStoreCollection,
        report: &mut ReconcileReport,
    );

    /// Roll history back to `target` and apply the correction stamped there
    fn rollback(
        &self,
        target: Frame,
        sim: &mut DataStoreCollection,
        report: &mut ReconcileReport,
    ) -> crate::Result<()>;

    /// Advance one replay step: re-seed states, lay in replay inputs
    fn begin_replay(&self, frame: Frame, sim: &mut DataStoreCollection);

    /// Close one replay step: corrections stamped at the frame win
    fn finish_replay(&self, frame: Frame, sim: &mut DataStoreCollection);

    /// Encode this kind's block of an update message from the head snapshot
    fn encode_body(
        &self,
        writer: &mut Writer,
        future_delta: u8,
        sim: &DataStoreCollection,
    ) -> resim_netcode::Result<()>;

    /// Decode one kind block and stage it as pending authority
    fn stage_authority(
        &self,
        reader: &mut Reader<'_>,
        frame: Frame,
        future_delta: u8,
        control: &mut DataStoreCollection,
    ) -> resim_netcode::Result<()>;
}

/// The per-model [`KindDriver`] implementation
pub struct ModelDriver<M: SimModel> {
    kind: KindId,
    _marker: PhantomData<fn() -> M>,
}

impl<M: SimModel> ModelDriver<M> {
    /// Create a driver for the kind's finalized id
    pub fn new(kind: KindId) -> Self {
        Self {
            kind,
            _marker: PhantomData,
        }
    }
}

impl<M: SimModel> KindDriver for ModelDriver<M> {
    fn kind(&self) -> KindId {
        self.kind
    }

    fn name(&self) -> &'static str {
        M::NAME
    }

    fn install(
        &self,
        config: &SimConfig,
        start: Frame,
        control: &mut DataStoreCollection,
        sim: &mut DataStoreCollection,
    ) {
        control.insert(self.kind, ControlStore::<M>::new());
        sim.insert(self.kind, SimStore::<M>::new(config.history_frames, start));
    }

    fn marshal_in(
        &self,
        upcoming: Frame,
        control: &mut DataStoreCollection,
        sim: &mut DataStoreCollection,
    ) {
        let cstore = control.get_mut::<ControlStore<M>>(self.kind);
        let mut ops = std::mem::take(&mut cstore.outbox);
        for (id, ring) in cstore.rings.iter_mut() {
            for (frame, input) in ring.take_through(upcoming) {
                ops.push(ControlOp::Input {
                    id: *id,
                    frame: Some(frame),
                    input,
                });
            }
            // The binding mirrors the ring's consumption mark.
            if let Some(binding) = cstore.bindings.get_mut(id) {
                binding.last_consumed = ring.last_consumed();
            }
        }
        sim.get_mut::<SimStore<M>>(self.kind).inbox.extend(ops);
    }

    fn begin_step(&self, frame: Frame, sim: &mut DataStoreCollection) {
        sim.get_mut::<SimStore<M>>(self.kind).begin_step(frame);
    }

    fn tick(&self, ctx: &TickContext, sim: &mut DataStoreCollection) {
        sim.get_mut::<SimStore<M>>(self.kind).run_tick(ctx);
    }

    fn publish(
        &self,
        frame: Frame,
        sim: &mut DataStoreCollection,
        control: &mut DataStoreCollection,
    ) {
        let store = sim.get_mut::<SimStore<M>>(self.kind);
        let mut entries = BTreeMap::new();
        if let Some(snapshot) = store.history.read(frame) {
            for (id, entry) in &snapshot.entries {
                entries.insert(
                    *id,
                    OutputEntry::<M> {
                        state: entry.state.clone(),
                        input: entry.input.clone(),
                    },
                );
            }
        }
        let removed = std::mem::take(&mut store.removed);

        let cstore = control.get_mut::<ControlStore<M>>(self.kind);
        cstore.latest.frame = Some(frame);
        cstore.latest.entries = entries;
        for id in removed {
            cstore.forget(id);
            cstore.latest.removed.push(id);
        }
    }

    fn span(&self, sim: &DataStoreCollection) -> Option<(Frame, Frame)> {
        let history = &sim.get::<SimStore<M>>(self.kind).history;
        Some((history.tail()?, history.head()?))
    }

    fn reconcile(
        &self,
        control: &mut DataStoreCollection,
        sim: &mut DataStoreCollection,
        report: &mut ReconcileReport,
    ) {
        let staged = std::mem::take(&mut control.get_mut::<ControlStore<M>>(self.kind).staged);
        if staged.is_empty() {
            return;
        }

        let store = sim.get_mut::<SimStore<M>>(self.kind);
        let known: BTreeSet<_> = store.records.keys().copied().collect();
        let locally: BTreeSet<_> = store
            .records
            .iter()
            .filter(|(_, record)| record.locally_controlled())
            .map(|(id, _)| *id)
            .collect();

        // Staging order is arrival order; a later snapshot for the same
        // frame wins on merge.
        for auth in staged {
            let outcome = reconcile_kind::<M>(self.kind, &store.history, &auth, &known, &locally, report);
            if let Some((frame, correction)) = outcome.correction {
                store.corrections.entry(frame).or_default().merge(correction);
            }
            for (frame, inputs) in outcome.future_inputs {
                store.future_inputs.entry(frame).or_default().extend(inputs);
            }
        }
    }

    fn rollback(
        &self,
        target: Frame,
        sim: &mut DataStoreCollection,
        report: &mut ReconcileReport,
    ) -> crate::Result<()> {
        let store = sim.get_mut::<SimStore<M>>(self.kind);
        store.history.rollback(target)?;

        // Corrections below a clamped target can no longer be honored at
        // their stamped frame.
        let tail = store.history.tail().unwrap_or(target);
        for (frame, id) in store.drop_corrections_below(target) {
            warn!(%id, frame, target, "correction below rewind target dropped");
            report.desyncs.push(Desync {
                id,
                kind: self.kind,
                reason: DesyncReason::HistoryEvicted {
                    target: frame,
                    tail,
                },
            });
        }
        store.apply_correction_at(target);
        Ok(())
    }

    fn begin_replay(&self, frame: Frame, sim: &mut DataStoreCollection) {
        sim.get_mut::<SimStore<M>>(self.kind).begin_replay_step(frame);
    }

    fn finish_replay(&self, frame: Frame, sim: &mut DataStoreCollection) {
        sim.get_mut::<SimStore<M>>(self.kind).finish_replay_step(frame);
    }

    fn encode_body(
        &self,
        writer: &mut Writer,
        future_delta: u8,
        sim: &DataStoreCollection,
    ) -> resim_netcode::Result<()> {
        let store = sim.get::<SimStore<M>>(self.kind);
        let mut entries: BTreeMap<_, AuthorityEntry<M>> = BTreeMap::new();

        if let Some(head) = store.history.head() {
            if let Some(snapshot) = store.history.read(head) {
                for (id, entry) in &snapshot.entries {
                    let mut future_inputs = Vec::new();
                    if future_delta > 0 {
                        // Slot zero is the head frame's own input; the rest
                        // come from the buffered-future table until a gap.
                        future_inputs.push(entry.input.clone());
                        for offset in 1..future_delta as Frame {
                            match store
                                .future_inputs
                                .get(&(head + offset))
                                .and_then(|inputs| inputs.get(id))
                            {
                                Some(input) => future_inputs.push(input.clone()),
                                None => break,
                            }
                        }
                    }
                    entries.insert(
                        *id,
                        AuthorityEntry {
                            state: entry.state.clone(),
                            future_inputs,
                        },
                    );
                }
            }
        }

        write_kind_id(writer, self.kind);
        write_kind_body::<M>(writer, &entries, future_delta)
    }

    fn stage_authority(
        &self,
        reader: &mut Reader<'_>,
        frame: Frame,
        future_delta: u8,
        control: &mut DataStoreCollection,
    ) -> resim_netcode::Result<()> {
        let snapshot = resim_netcode::read_kind_body::<M>(reader, frame, future_delta)?;
        control
            .get_mut::<ControlStore<M>>(self.kind)
            .staged
            .push(snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resim_core::InstanceId;
    use resim_netcode::InputPolicy;

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

    fn rig() -> (Box<dyn KindDriver>, DataStoreCollection, DataStoreCollection) {
        let driver: Box<dyn KindDriver> = Box::new(ModelDriver::<Counter>::new(KindId(0)));
        let mut control = DataStoreCollection::with_capacity(1);
        let mut sim = DataStoreCollection::with_capacity(1);
        driver.install(&SimConfig::default(), 0, &mut control, &mut sim);
        (driver, control, sim)
    }

    #[test]
    fn test_marshal_step_publish() {
        let (driver, mut control, mut sim) = rig();
        let cstore = control.get_mut::<ControlStore<Counter>>(KindId(0));
        cstore.push(ControlOp::Spawn {
            id: InstanceId(1),
            local: (),
            state: 3,
            policy: InputPolicy::Local,
        });
        cstore.push(ControlOp::Input {
            id: InstanceId(1),
            frame: None,
            input: 2,
        });

        driver.marshal_in(1, &mut control, &mut sim);
        driver.begin_step(1, &mut sim);
        driver.tick(&TickContext::new(1, 1.0 / 60.0), &mut sim);
        driver.publish(1, &mut sim, &mut control);

        let latest = &control.get::<ControlStore<Counter>>(KindId(0)).latest;
        assert_eq!(latest.frame, Some(1));
        assert_eq!(latest.get(InstanceId(1)).unwrap().state, 5);
    }

    #[test]
    fn test_buffered_ring_drains_through_upcoming_step() {
        let (driver, mut control, mut sim) = rig();
        let cstore = control.get_mut::<ControlStore<Counter>>(KindId(0));
        cstore.push(ControlOp::Spawn {
            id: InstanceId(1),
            local: (),
            state: 0,
            policy: InputPolicy::Buffered,
        });
        let mut ring = resim_netcode::InputRing::new(8);
        ring.push(1, 4).unwrap();
        ring.push(3, 9).unwrap();
        cstore.rings.insert(InstanceId(1), ring);
        cstore.bindings.insert(
            InstanceId(1),
            resim_netcode::ControllerBinding::with_policy(InputPolicy::Buffered),
        );

        driver.marshal_in(1, &mut control, &mut sim);
        driver.begin_step(1, &mut sim);
        driver.tick(&TickContext::new(1, 1.0 / 60.0), &mut sim);

        let store = sim.get::<SimStore<Counter>>(KindId(0));
        assert_eq!(store.history.read(1).unwrap().get(InstanceId(1)).unwrap().state, 4);
        // The frame-3 input is still in the control-side ring, and the
        // binding records how far consumption got.
        let cstore = control.get::<ControlStore<Counter>>(KindId(0));
        assert_eq!(cstore.rings[&InstanceId(1)].get(3), Some(&9));
        assert_eq!(cstore.bindings[&InstanceId(1)].last_consumed, Some(1));
    }
}
