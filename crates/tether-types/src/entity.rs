use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Identity of a persisted entity: a top-level record, a sequence, or a map.
///
/// Ids are drawn from one counter shared by every entity kind, so an id alone
/// is enough to find an entity in storage.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Storage representation. Stores keep ids in signed 64-bit columns.
    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }

    /// Parse an id read back from a signed storage column.
    pub fn from_i64(raw: i64) -> Result<Self, TypeError> {
        u64::try_from(raw)
            .map(Self)
            .map_err(|_| TypeError::NegativeId(raw))
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Monotonic id source shared by all entity kinds.
///
/// Ids are never reused. When entities are reloaded with fixed ids the
/// allocator is advanced past them so later allocations cannot collide.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Start allocating at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start allocating at `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Take the next id.
    pub fn allocate(&self) -> EntityId {
        EntityId(self.next.fetch_add(1, Ordering::SeqCst))
    }

    /// Make sure no future allocation returns `id` or anything below it.
    pub fn advance_past(&self, id: EntityId) {
        self.next.fetch_max(id.0 + 1, Ordering::SeqCst);
    }

    /// The id the next call to [`allocate`](Self::allocate) would return.
    pub fn peek(&self) -> EntityId {
        EntityId(self.next.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn allocations_are_strictly_increasing() {
        let ids = IdAllocator::new();
        let a = ids.allocate();
        let b = ids.allocate();
        let c = ids.allocate();
        assert!(a < b && b < c);
        assert_eq!(a, EntityId::new(0));
    }

    #[test]
    fn advance_past_skips_fixed_ids() {
        let ids = IdAllocator::new();
        ids.advance_past(EntityId::new(41));
        assert_eq!(ids.allocate(), EntityId::new(42));
    }

    #[test]
    fn advance_past_never_moves_backwards() {
        let ids = IdAllocator::starting_at(10);
        ids.advance_past(EntityId::new(3));
        assert_eq!(ids.peek(), EntityId::new(10));
    }

    #[test]
    fn negative_storage_id_is_rejected() {
        assert_eq!(EntityId::from_i64(-1), Err(TypeError::NegativeId(-1)));
        assert_eq!(EntityId::from_i64(7).unwrap(), EntityId::new(7));
    }

    #[test]
    fn display_uses_hash_prefix() {
        assert_eq!(EntityId::new(12).to_string(), "#12");
    }

    #[test]
    fn concurrent_allocations_are_distinct() {
        use std::collections::HashSet;
        use std::sync::Arc;
        use std::thread;

        let ids = Arc::new(IdAllocator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = Arc::clone(&ids);
                thread::spawn(move || (0..100).map(|_| ids.allocate()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().expect("thread should not panic") {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 400);
    }

    proptest! {
        #[test]
        fn mixed_fixed_and_fresh_ids_never_collide(fixed in proptest::collection::vec(0u64..500, 0..20), fresh in 1usize..50) {
            let ids = IdAllocator::new();
            for raw in &fixed {
                ids.advance_past(EntityId::new(*raw));
            }
            let max_fixed = fixed.iter().copied().max();
            let mut last = None;
            for _ in 0..fresh {
                let id = ids.allocate();
                if let Some(m) = max_fixed {
                    prop_assert!(id.get() > m);
                }
                if let Some(prev) = last {
                    prop_assert!(id > prev);
                }
                last = Some(id);
            }
        }
    }
}
