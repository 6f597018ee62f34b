//! Instance identity and the allocator that issues it
//!
//! Every simulated instance is named by an [`InstanceId`] across both
//! execution contexts and the network. Servers issue increasing positive
//! ids; clients issue decreasing negative ids so a locally spawned instance
//! is usable immediately, before the server has confirmed it. A client id
//! is later renamed to its server id exactly once via
//! [`InstanceIdAllocator::remap`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Unique identity of one simulated instance
///
/// - `0` is invalid
/// - `> 0` is server-assigned (globally unique, monotonically increasing)
/// - `< 0` is a client-generated provisional id pending remap
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub i64);

impl InstanceId {
    /// The invalid id
    pub const INVALID: InstanceId = InstanceId(0);

    /// Create an id from a raw value
    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Get the raw id value
    pub fn raw(&self) -> i64 {
        self.0
    }

    /// Check that this id names an instance at all
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    /// Check whether this id was assigned by the server
    pub fn is_server_assigned(&self) -> bool {
        self.0 > 0
    }

    /// Check whether this id is a client-generated provisional id
    pub fn is_client_provisional(&self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance:{}", self.0)
    }
}

/// Issues [`InstanceId`]s and validates the one-time client-to-server rename
///
/// Server-side allocators hand out `1, 2, 3, …`; client-side allocators hand
/// out `-1, -2, -3, …`. The allocator remembers which provisional ids it has
/// already remapped so a double rename is caught as a programmer error.
#[derive(Debug, Default)]
pub struct InstanceIdAllocator {
    next_server: i64,
    next_client: i64,
    remapped: BTreeSet<InstanceId>,
}

impl InstanceIdAllocator {
    /// Create a fresh allocator
    pub fn new() -> Self {
        Self {
            next_server: 0,
            next_client: 0,
            remapped: BTreeSet::new(),
        }
    }

    /// Allocate the next id
    ///
    /// `for_client` selects the provisional (negative) range; otherwise the
    /// permanent (positive) server range is used.
    pub fn allocate(&mut self, for_client: bool) -> InstanceId {
        if for_client {
            self.next_client -= 1;
            InstanceId(self.next_client)
        } else {
            self.next_server += 1;
            InstanceId(self.next_server)
        }
    }

    /// Validate the rename of a provisional id to its server id
    ///
    /// Must be called exactly once per client-generated id. The rename
    /// itself (re-keying dependent tables) is the caller's job; this records
    /// it and enforces the contract.
    ///
    /// # Panics
    ///
    /// Panics if `old` is not client-provisional, if `new` is not
    /// server-assigned, or if `old` has already been remapped. All three are
    /// programmer errors, not runtime-recoverable conditions.
    pub fn remap(&mut self, old: InstanceId, new: InstanceId) {
        assert!(
            old.is_client_provisional(),
            "remap source {old} is not a client provisional id"
        );
        assert!(
            new.is_server_assigned(),
            "remap target {new} is not a server-assigned id"
        );
        assert!(
            self.remapped.insert(old),
            "provisional id {old} was already remapped"
        );
    }

    /// Check whether a provisional id has already been remapped
    pub fn is_remapped(&self, id: InstanceId) -> bool {
        self.remapped.contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_classification() {
        assert!(!InstanceId::INVALID.is_valid());
        assert!(InstanceId::new(7).is_server_assigned());
        assert!(InstanceId::new(-3).is_client_provisional());
        assert!(!InstanceId::new(-3).is_server_assigned());
        assert_eq!(format!("{}", InstanceId::new(5)), "instance:5");
    }

    #[test]
    fn test_allocate_monotonic() {
        let mut alloc = InstanceIdAllocator::new();
        assert_eq!(alloc.allocate(false), InstanceId(1));
        assert_eq!(alloc.allocate(false), InstanceId(2));
        assert_eq!(alloc.allocate(true), InstanceId(-1));
        assert_eq!(alloc.allocate(true), InstanceId(-2));
    }

    #[test]
    fn test_remap_once() {
        let mut alloc = InstanceIdAllocator::new();
        let temp = alloc.allocate(true);
        alloc.remap(temp, InstanceId(10));
        assert!(alloc.is_remapped(temp));
    }

    #[test]
    #[should_panic(expected = "already remapped")]
    fn test_double_remap_panics() {
        let mut alloc = InstanceIdAllocator::new();
        let temp = alloc.allocate(true);
        alloc.remap(temp, InstanceId(10));
        alloc.remap(temp, InstanceId(11));
    }

    #[test]
    #[should_panic(expected = "not a client provisional id")]
    fn test_remap_permanent_panics() {
        let mut alloc = InstanceIdAllocator::new();
        alloc.remap(InstanceId(5), InstanceId(6));
    }
}
