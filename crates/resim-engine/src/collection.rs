//! Type-erased per-kind storage table
//!
//! One [`DataStoreCollection`] exists per execution context. It is a
//! fixed-size array of type-erased slots indexed by dense kind id, each
//! lazily populated with a strongly-typed storage block at engine build
//! time. The table must never resize after the simulation-side copy has
//! been handed to the simulation context, so it is pre-sized to the
//! finalized kind count and indexing past it is a fatal assert.

use resim_core::KindId;
use std::any::Any;

/// Fixed-size table of typed storage blocks, one slot per kind
#[derive(Default)]
pub struct DataStoreCollection {
    slots: Vec<Option<Box<dyn Any + Send>>>,
}

impl DataStoreCollection {
    /// Create a table with one empty slot per finalized kind
    pub fn with_capacity(kinds: usize) -> Self {
        Self {
            slots: (0..kinds).map(|_| None).collect(),
        }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check whether the table has no slots
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, kind: KindId) -> &Option<Box<dyn Any + Send>> {
        assert!(
            kind.index() < self.slots.len(),
            "kind {kind} outside the finalized store table"
        );
        &self.slots[kind.index()]
    }

    /// Populate a kind's slot with its typed storage block
    ///
    /// # Panics
    ///
    /// Panics if the slot is already populated or outside the table.
    pub fn insert<S: Any + Send>(&mut self, kind: KindId, store: S) {
        assert!(
            kind.index() < self.slots.len(),
            "kind {kind} outside the finalized store table"
        );
        let slot = &mut self.slots[kind.index()];
        assert!(slot.is_none(), "store for {kind} installed twice");
        *slot = Some(Box::new(store));
    }

    /// Borrow a kind's typed storage block
    ///
    /// # Panics
    ///
    /// Panics on an empty slot or a store of a different shape; both are
    /// programmer errors caught at first use.
    pub fn get<S: Any + Send>(&self, kind: KindId) -> &S {
        self.slot(kind)
            .as_ref()
            .unwrap_or_else(|| panic!("no store installed for {kind}"))
            .downcast_ref::<S>()
            .unwrap_or_else(|| panic!("store for {kind} has a different shape"))
    }

    /// Borrow a kind's typed storage block mutably
    ///
    /// # Panics
    ///
    /// Same contract as [`get`](Self::get).
    pub fn get_mut<S: Any + Send>(&mut self, kind: KindId) -> &mut S {
        assert!(
            kind.index() < self.slots.len(),
            "kind {kind} outside the finalized store table"
        );
        self.slots[kind.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("no store installed for {kind}"))
            .downcast_mut::<S>()
            .unwrap_or_else(|| panic!("store for {kind} has a different shape"))
    }

    /// Drop every typed storage block, keeping the table's size
    pub fn reset_all(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }
}
