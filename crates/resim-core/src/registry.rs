//! Two-phase kind registry
//!
//! Kinds are registered explicitly by process start-up code, then the
//! registry is finalized once: entries are sorted by `(priority, name)` and
//! assigned dense [`KindId`]s. Lookups before finalization, duplicate
//! registrations, and registrations after finalization are programmer
//! errors.

use crate::kind::{KindId, SimModel};
use indexmap::IndexMap;
use std::any::TypeId;

/// Descriptor of one registered kind
#[derive(Debug, Clone)]
pub struct KindInfo {
    /// Kind name (unique)
    pub name: &'static str,
    /// Sort priority; ties break by name
    pub priority: i16,
    /// Dense id, assigned at finalization
    pub id: KindId,
}

/// Registry mapping model kinds to dense integer ids
///
/// Keeps registration order until [`finalize`](KindRegistry::finalize),
/// then becomes an immutable lookup table.
#[derive(Debug, Default)]
pub struct KindRegistry {
    entries: IndexMap<TypeId, KindInfo>,
    finalized: bool,
}

impl KindRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
            finalized: false,
        }
    }

    /// Register a model kind
    ///
    /// # Panics
    ///
    /// Panics if the registry is already finalized or if the kind (by type
    /// or by name) was registered before.
    pub fn register<M: SimModel>(&mut self) {
        assert!(
            !self.finalized,
            "cannot register kind '{}' after finalization",
            M::NAME
        );
        assert!(
            !self.entries.values().any(|e| e.name == M::NAME),
            "kind name '{}' registered twice",
            M::NAME
        );
        let previous = self.entries.insert(
            TypeId::of::<M>(),
            KindInfo {
                name: M::NAME,
                priority: M::PRIORITY,
                id: KindId(0),
            },
        );
        assert!(previous.is_none(), "kind '{}' registered twice", M::NAME);
    }

    /// Sort entries by `(priority, name)` and assign dense ids
    ///
    /// # Panics
    ///
    /// Panics if called twice or if more kinds were registered than fit a
    /// dense u16 index.
    pub fn finalize(&mut self) {
        assert!(!self.finalized, "kind registry finalized twice");
        assert!(
            self.entries.len() <= u16::MAX as usize,
            "too many registered kinds"
        );
        self.entries
            .sort_by(|_, a, _, b| (a.priority, a.name).cmp(&(b.priority, b.name)));
        for (index, (_, info)) in self.entries.iter_mut().enumerate() {
            info.id = KindId(index as u16);
        }
        self.finalized = true;
    }

    /// Check whether the registry is finalized
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Number of registered kinds
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up the dense id of a kind
    ///
    /// # Panics
    ///
    /// Panics before finalization or for an unregistered kind; both are
    /// programmer errors.
    pub fn id_of<M: SimModel>(&self) -> KindId {
        assert!(
            self.finalized,
            "kind id for '{}' requested before finalization",
            M::NAME
        );
        self.entries
            .get(&TypeId::of::<M>())
            .unwrap_or_else(|| panic!("kind '{}' is not registered", M::NAME))
            .id
    }

    /// Look up a kind's descriptor by dense id
    pub fn info(&self, id: KindId) -> Option<&KindInfo> {
        self.entries.values().find(|info| info.id == id)
    }

    /// Iterate descriptors in dense id order (finalized registries only)
    pub fn iter(&self) -> impl Iterator<Item = &KindInfo> {
        self.entries.values()
    }
}
