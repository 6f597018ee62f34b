//! The two-context rollback engine
//!
//! [`Engine`] owns both store collections (the control side the caller
//! talks to and the simulation side the step loop mutates) plus the
//! finalized kind table, the id allocator, and the step backend. The two
//! contexts share nothing but the marshal mailboxes and the latest-output
//! slots; every cross-context type is `Send`, so the simulation side can
//! be driven from a worker thread without changing any of this code.
//!
//! A control tick looks like:
//!
//! ```text
//! engine.push_input(&handle, cmd);          // control context
//! engine.advance(1, DT);                    // run fixed steps
//! engine.stage_remote_update(&bytes, off);  // decode, never apply
//! let report = engine.reconcile_and_rewind();
//! let state = engine.read_latest(&handle);  // latest published output
//! ```

use crate::backend::{LockstepBackend, StepBackend};
use crate::collection::DataStoreCollection;
use crate::control_store::ControlStore;
use crate::driver::{KindDriver, ModelDriver};
use crate::ops::ControlOp;
use crate::{Error, Result};
use resim_core::{
    apply_offset, Frame, FrameOffset, InstanceId, InstanceIdAllocator, KindId, KindRegistry,
    SimConfig, SimModel, TickContext,
};
use resim_netcode::wire::{Reader, Writer};
use resim_netcode::{
    read_header, read_kind_id, write_header, ControllerBinding, ControllerId, InputPolicy,
    InputRing, ReconcileReport, UpdateHeader,
};
use std::marker::PhantomData;
use tracing::{debug, info};

/// Typed reference to one registered instance
///
/// Cheap to copy; stays valid across a remap only on the handle returned
/// by [`Engine::remap`].
pub struct InstanceHandle<M: SimModel> {
    id: InstanceId,
    kind: KindId,
    _marker: PhantomData<fn() -> M>,
}

impl<M: SimModel> InstanceHandle<M> {
    /// The instance's id
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// The instance's dense kind id
    pub fn kind(&self) -> KindId {
        self.kind
    }
}

impl<M: SimModel> Clone for InstanceHandle<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: SimModel> Copy for InstanceHandle<M> {}

impl<M: SimModel> std::fmt::Debug for InstanceHandle<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Builder assembling the kind table before the engine exists
///
/// Kinds must all be registered up front; the build step finalizes the
/// registry, and the resulting dense ids are frozen for the engine's
/// lifetime.
pub struct EngineBuilder {
    registry: KindRegistry,
    factories: Vec<Box<dyn FnOnce(&KindRegistry) -> Box<dyn KindDriver>>>,
    config: SimConfig,
    start_frame: Frame,
    authoritative: bool,
    backend: Option<Box<dyn StepBackend>>,
}

impl EngineBuilder {
    /// Start a builder with the default configuration
    pub fn new() -> Self {
        Self {
            registry: KindRegistry::new(),
            factories: Vec::new(),
            config: SimConfig::default(),
            start_frame: 0,
            authoritative: true,
            backend: None,
        }
    }

    /// Register a model kind
    ///
    /// # Panics
    ///
    /// Panics on a duplicate registration (same type or same name).
    pub fn kind<M: SimModel>(mut self) -> Self {
        self.registry.register::<M>();
        self.factories.push(Box::new(|registry| {
            Box::new(ModelDriver::<M>::new(registry.id_of::<M>()))
        }));
        self
    }

    /// Override the simulation limits
    pub fn config(mut self, config: SimConfig) -> Self {
        self.config = config;
        self
    }

    /// Seed the frame line at a non-zero start
    pub fn start_frame(mut self, frame: Frame) -> Self {
        self.start_frame = frame;
        self
    }

    /// Select whether this side issues permanent or provisional ids
    ///
    /// The authoritative side (the server) allocates positive permanent
    /// ids; the other side allocates negative provisional ids awaiting a
    /// remap.
    pub fn authoritative(mut self, authoritative: bool) -> Self {
        self.authoritative = authoritative;
        self
    }

    /// Supply a step backend; defaults to [`LockstepBackend`]
    pub fn backend(mut self, backend: Box<dyn StepBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Finalize the kind table and assemble the engine
    ///
    /// # Panics
    ///
    /// Panics if more kinds were registered than `config.max_kinds`.
    pub fn build(mut self) -> Engine {
        self.registry.finalize();
        assert!(
            self.registry.len() <= self.config.max_kinds,
            "{} kinds registered, limit is {}",
            self.registry.len(),
            self.config.max_kinds
        );

        let mut drivers: Vec<Box<dyn KindDriver>> = self
            .factories
            .into_iter()
            .map(|factory| factory(&self.registry))
            .collect();
        drivers.sort_by_key(|driver| driver.kind());

        let mut control = DataStoreCollection::with_capacity(self.registry.len());
        let mut sim = DataStoreCollection::with_capacity(self.registry.len());
        for driver in &drivers {
            driver.install(&self.config, self.start_frame, &mut control, &mut sim);
        }

        info!(
            kinds = drivers.len(),
            start = self.start_frame,
            authoritative = self.authoritative,
            "engine assembled"
        );

        Engine {
            registry: self.registry,
            drivers,
            control,
            sim,
            allocator: InstanceIdAllocator::new(),
            config: self.config,
            backend: Some(
                self.backend
                    .unwrap_or_else(|| Box::new(LockstepBackend::new(self.start_frame))),
            ),
            frame: self.start_frame,
            delta_time: 1.0 / 60.0,
            authoritative: self.authoritative,
        }
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The assembled two-context engine
pub struct Engine {
    registry: KindRegistry,
    drivers: Vec<Box<dyn KindDriver>>,
    control: DataStoreCollection,
    sim: DataStoreCollection,
    allocator: InstanceIdAllocator,
    config: SimConfig,
    // Taken out while a step loop runs so its closure can borrow the rest
    backend: Option<Box<dyn StepBackend>>,
    frame: Frame,
    delta_time: f64,
    authoritative: bool,
}

impl Engine {
    /// Start building an engine
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Latest frame the simulation has results for
    pub fn current_frame(&self) -> Frame {
        self.frame
    }

    /// The engine's limits
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// The finalized kind table
    pub fn registry(&self) -> &KindRegistry {
        &self.registry
    }

    fn control_store<M: SimModel>(&mut self) -> (KindId, &mut ControlStore<M>) {
        let kind = self.registry.id_of::<M>();
        (kind, self.control.get_mut::<ControlStore<M>>(kind))
    }

    // ---- registration (control context) ----

    /// Register an instance, allocating its id on this side
    ///
    /// Authoritative engines hand out permanent ids; others hand out
    /// provisional ids to be renamed via [`remap`](Self::remap) once the
    /// server confirms the spawn.
    pub fn register<M: SimModel>(
        &mut self,
        local: M::Local,
        initial: M::NetState,
        policy: InputPolicy,
    ) -> InstanceHandle<M> {
        let id = self.allocator.allocate(!self.authoritative);
        self.register_with_id(id, local, initial, policy)
    }

    /// Register an instance under an id assigned elsewhere
    ///
    /// Used for server-replicated spawns, where the id arrived over the
    /// wire with the spawn data.
    ///
    /// # Panics
    ///
    /// Panics if the id is invalid or already registered for this kind.
    pub fn register_with_id<M: SimModel>(
        &mut self,
        id: InstanceId,
        local: M::Local,
        initial: M::NetState,
        policy: InputPolicy,
    ) -> InstanceHandle<M> {
        assert!(id.is_valid(), "cannot register the invalid instance id");
        let upcoming = self.frame + 1;
        let ring_frames = self.config.input_ring_frames;
        let (kind, cstore) = self.control_store::<M>();
        assert!(
            !cstore.spawned.contains_key(&id),
            "instance {id} registered twice"
        );
        cstore.spawned.insert(id, upcoming);
        cstore.bindings.insert(id, ControllerBinding::with_policy(policy));
        if policy == InputPolicy::Buffered {
            cstore.rings.insert(id, InputRing::new(ring_frames));
        }
        cstore.push(ControlOp::Spawn {
            id,
            local,
            state: initial,
            policy,
        });
        InstanceHandle {
            id,
            kind,
            _marker: PhantomData,
        }
    }

    /// Unregister an instance; the deletion lands on the next step
    pub fn unregister<M: SimModel>(&mut self, handle: InstanceHandle<M>) {
        let (_, cstore) = self.control_store::<M>();
        if cstore.spawned.remove(&handle.id).is_none() {
            debug!(id = %handle.id, "unregister of unknown instance dropped");
            return;
        }
        cstore.bindings.remove(&handle.id);
        cstore.rings.remove(&handle.id);
        cstore.push(ControlOp::Despawn { id: handle.id });
    }

    /// Rename a provisional id to its server-assigned id
    ///
    /// Re-keys every table on both sides: records, bindings, rings,
    /// history entries, buffered future inputs, and staged authority,
    /// without touching any recorded state. Ops still queued for the old id are
    /// retargeted, so the rename cannot race its own mailbox.
    ///
    /// # Panics
    ///
    /// Panics if `handle` does not hold a provisional id, if `server_id`
    /// is not server-assigned, or on a second remap of the same id.
    pub fn remap<M: SimModel>(
        &mut self,
        handle: InstanceHandle<M>,
        server_id: InstanceId,
    ) -> InstanceHandle<M> {
        self.allocator.remap(handle.id, server_id);
        let (kind, cstore) = self.control_store::<M>();
        cstore.rekey(handle.id, server_id);
        cstore.push(ControlOp::Remap {
            old: handle.id,
            new: server_id,
        });
        InstanceHandle {
            id: server_id,
            kind,
            _marker: PhantomData,
        }
    }

    /// Bind (or unbind) the controller driving an instance's input
    pub fn bind_controller<M: SimModel>(
        &mut self,
        handle: &InstanceHandle<M>,
        controller: Option<ControllerId>,
    ) {
        let (_, cstore) = self.control_store::<M>();
        match cstore.bindings.get_mut(&handle.id) {
            Some(binding) => binding.controller = controller,
            None => debug!(id = %handle.id, "controller bind for unknown instance dropped"),
        }
    }

    /// Switch an instance's input policy
    pub fn set_input_policy<M: SimModel>(&mut self, handle: &InstanceHandle<M>, policy: InputPolicy) {
        let ring_frames = self.config.input_ring_frames;
        let (_, cstore) = self.control_store::<M>();
        let Some(binding) = cstore.bindings.get_mut(&handle.id) else {
            debug!(id = %handle.id, "policy change for unknown instance dropped");
            return;
        };
        binding.policy = policy;
        match policy {
            InputPolicy::Buffered => {
                cstore
                    .rings
                    .entry(handle.id)
                    .or_insert_with(|| InputRing::new(ring_frames));
            }
            InputPolicy::Local => {
                cstore.rings.remove(&handle.id);
            }
        }
        cstore.push(ControlOp::SetInputSource {
            id: handle.id,
            policy,
        });
    }

    /// Queue a mutation of an instance's non-networked glue data
    pub fn modify_local<M: SimModel>(
        &mut self,
        handle: &InstanceHandle<M>,
        mutate: impl FnOnce(&mut M::Local) + Send + 'static,
    ) {
        let (_, cstore) = self.control_store::<M>();
        if !cstore.spawned.contains_key(&handle.id) {
            debug!(id = %handle.id, "local mutation for unknown instance dropped");
            return;
        }
        cstore.push(ControlOp::MutateLocal {
            id: handle.id,
            mutate: Box::new(mutate),
        });
    }

    /// Queue a mutation of an instance's networked state
    pub fn modify_net<M: SimModel>(
        &mut self,
        handle: &InstanceHandle<M>,
        mutate: impl FnOnce(&mut M::NetState) + Send + 'static,
    ) {
        let (_, cstore) = self.control_store::<M>();
        if !cstore.spawned.contains_key(&handle.id) {
            debug!(id = %handle.id, "state mutation for unknown instance dropped");
            return;
        }
        cstore.push(ControlOp::MutateNet {
            id: handle.id,
            mutate: Box::new(mutate),
        });
    }

    /// Write the pending input consumed by the step about to run
    pub fn push_input<M: SimModel>(&mut self, handle: &InstanceHandle<M>, input: M::Input) {
        let (_, cstore) = self.control_store::<M>();
        if !cstore.spawned.contains_key(&handle.id) {
            debug!(id = %handle.id, "input for unknown instance dropped");
            return;
        }
        cstore.push(ControlOp::Input {
            id: handle.id,
            frame: None,
            input,
        });
    }

    /// Buffer an input for a specific future step (Buffered policy only)
    pub fn buffer_input<M: SimModel>(
        &mut self,
        handle: &InstanceHandle<M>,
        frame: Frame,
        input: M::Input,
    ) -> Result<()> {
        let (_, cstore) = self.control_store::<M>();
        if !cstore.spawned.contains_key(&handle.id) {
            return Err(Error::UnknownInstance(handle.id));
        }
        let ring = cstore
            .rings
            .get_mut(&handle.id)
            .ok_or(Error::NotBuffered(handle.id))?;
        ring.push(frame, input)?;
        Ok(())
    }

    /// Read an instance's state from the latest published output
    pub fn read_latest<M: SimModel>(&mut self, handle: &InstanceHandle<M>) -> Option<M::NetState> {
        let (_, cstore) = self.control_store::<M>();
        cstore.latest.get(handle.id).map(|entry| entry.state.clone())
    }

    /// Frame of the latest published output for a kind
    pub fn latest_frame<M: SimModel>(&mut self) -> Option<Frame> {
        let (_, cstore) = self.control_store::<M>();
        cstore.latest.frame
    }

    /// Drain the deletion sentinels accumulated for a kind
    pub fn take_removed<M: SimModel>(&mut self) -> Vec<InstanceId> {
        let (_, cstore) = self.control_store::<M>();
        cstore.latest.take_removed()
    }

    // ---- step loop (simulation context) ----

    /// Run `steps` fixed steps of `delta_time` seconds each
    ///
    /// Zero steps is a valid control tick: queued ops simply wait. Returns
    /// the new head frame.
    pub fn advance(&mut self, steps: u32, delta_time: f64) -> Frame {
        self.delta_time = delta_time;
        let mut backend = self.backend.take().expect("step backend missing");
        let Self {
            drivers,
            control,
            sim,
            frame,
            ..
        } = self;

        backend.run_steps(steps, &mut |step| {
            for driver in drivers.iter() {
                driver.marshal_in(step, control, sim);
            }
            for driver in drivers.iter() {
                driver.begin_step(step, sim);
            }
            let ctx = TickContext::new(step, delta_time);
            for driver in drivers.iter() {
                driver.tick(&ctx, sim);
            }
            for driver in drivers.iter() {
                driver.publish(step, sim, control);
            }
            *frame = step;
        });

        self.backend = Some(backend);
        self.frame
    }

    /// Reconcile all staged authority and rewind-replay if anything diverged
    ///
    /// Every snapshot staged since the last call feeds one batched pass:
    /// the minimum divergent frame across all kinds (clamped to the
    /// backend's earliest retained step) is the single system-wide rewind
    /// target. Corrections stamped at the target are applied to the target
    /// snapshot directly, without re-ticking that frame, and every frame
    /// after it is replayed up to the current head.
    pub fn reconcile_and_rewind(&mut self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for driver in &self.drivers {
            driver.reconcile(&mut self.control, &mut self.sim, &mut report);
        }

        let Some(divergent) = report.rewind else {
            return Ok(report);
        };

        let head = self.frame;
        let earliest = self
            .backend
            .as_ref()
            .expect("step backend missing")
            .earliest_retained_step();
        let tail = self
            .drivers
            .first()
            .and_then(|driver| driver.span(&self.sim))
            .map(|(tail, _)| tail)
            .unwrap_or(divergent);
        let target = divergent.max(earliest).max(tail);
        report.rewind = Some(target);

        debug!(rewind = target, head, corrections = report.corrections, "rewinding");
        for driver in &self.drivers {
            driver.rollback(target, &mut self.sim, &mut report)?;
        }

        for frame in target + 1..=head {
            let ctx = TickContext::replay(frame, self.delta_time);
            for driver in &self.drivers {
                driver.begin_replay(frame, &mut self.sim);
            }
            for driver in &self.drivers {
                driver.tick(&ctx, &mut self.sim);
            }
            for driver in &self.drivers {
                driver.finish_replay(frame, &mut self.sim);
            }
        }

        // The head changed under the control side's feet; republish it.
        for driver in &self.drivers {
            driver.publish(head, &mut self.sim, &mut self.control);
        }
        Ok(report)
    }

    // ---- wire entry points ----

    /// Encode an update message from the head snapshot of every kind
    ///
    /// `future_delta` is clamped to the configured maximum; each instance
    /// carries its head-frame input plus whatever buffered future inputs
    /// are contiguous after it.
    pub fn serialize_update(&self, future_delta: u8) -> Result<Vec<u8>> {
        let future_delta = future_delta.min(self.config.max_future_inputs);
        let mut writer = Writer::new();
        write_header(
            &mut writer,
            &UpdateHeader {
                frame: self.frame,
                future_delta,
                kind_count: self.drivers.len() as u16,
            },
        );
        for driver in &self.drivers {
            driver.encode_body(&mut writer, future_delta, &self.sim)?;
        }
        Ok(writer.into_bytes())
    }

    /// Decode an update message and stage it for the next reconcile pass
    ///
    /// `offset` maps the sender's frame numbers onto the local frame line.
    /// Nothing is applied here; staged authority waits for
    /// [`reconcile_and_rewind`](Self::reconcile_and_rewind).
    pub fn stage_remote_update(&mut self, bytes: &[u8], offset: FrameOffset) -> Result<()> {
        let mut reader = Reader::new(bytes);
        let header = read_header(&mut reader, self.config.max_future_inputs)?;
        let frame = apply_offset(header.frame, offset).ok_or(
            resim_netcode::Error::OffsetOutOfRange {
                frame: header.frame,
                offset,
            },
        )?;

        for _ in 0..header.kind_count {
            let kind = read_kind_id(&mut reader)?;
            let driver = self
                .drivers
                .get(kind.index())
                .ok_or(resim_netcode::Error::UnknownKind(kind.0))?;
            driver.stage_authority(&mut reader, frame, header.future_delta, &mut self.control)?;
        }
        Ok(())
    }
}
