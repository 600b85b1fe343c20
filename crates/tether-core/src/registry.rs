//! Live-instance and class directories.
//!
//! [`Registry`] is the explicit service object behind identity
//! preservation: every live record, sequence and map is registered here
//! under its entity id, and every class spec under its name. Entries are
//! only ever added, except that a failed reload withdraws what it loaded;
//! [`Registry::shutdown`] drops them all at once.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use tether_types::{EntityId, IdAllocator};

use crate::class::ClassSpec;
use crate::error::{CoreError, CoreResult};
use crate::map::Map;
use crate::record::Record;
use crate::sequence::Sequence;

/// Directory of live entities and declared classes.
#[derive(Debug, Default)]
pub struct Registry {
    ids: IdAllocator,
    classes: RwLock<BTreeMap<String, Arc<ClassSpec>>>,
    records: RwLock<BTreeMap<EntityId, Record>>,
    sequences: RwLock<BTreeMap<EntityId, Sequence>>,
    maps: RwLock<BTreeMap<EntityId, Map>>,
}

fn signature(spec: &ClassSpec) -> String {
    format!("{}({})", spec.name(), spec.fields().join(", "))
}

/// Look up `id`, or insert the handle built by `create`. The write lock is
/// held across both steps so two loaders never build the same entity.
fn get_or_insert<T: Clone>(
    table: &RwLock<BTreeMap<EntityId, T>>,
    id: EntityId,
    create: impl FnOnce() -> T,
) -> (T, bool) {
    let mut table = table.write().expect("registry lock poisoned");
    if let Some(existing) = table.get(&id) {
        return (existing.clone(), false);
    }
    let created = create();
    table.insert(id, created.clone());
    (created, true)
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared id counter.
    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    pub fn allocate_id(&self) -> EntityId {
        self.ids.allocate()
    }

    // ---- classes ----

    /// Register a class spec.
    ///
    /// Registering an identical spec twice returns the existing entry;
    /// registering a different spec under a known name is a `ClassMismatch`.
    pub fn register_class(&self, spec: ClassSpec) -> CoreResult<Arc<ClassSpec>> {
        let mut classes = self.classes.write().expect("registry lock poisoned");
        if let Some(existing) = classes.get(spec.name()) {
            if **existing == spec {
                return Ok(Arc::clone(existing));
            }
            return Err(CoreError::ClassMismatch {
                expected: signature(existing),
                found: signature(&spec),
            });
        }
        let spec = Arc::new(spec);
        classes.insert(spec.name().to_string(), Arc::clone(&spec));
        Ok(spec)
    }

    pub fn class(&self, name: &str) -> CoreResult<Arc<ClassSpec>> {
        self.classes
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::ClassNotRegistered(name.to_string()))
    }

    pub fn classes(&self) -> Vec<Arc<ClassSpec>> {
        self.classes
            .read()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    // ---- records ----

    pub fn record(&self, id: EntityId) -> Option<Record> {
        self.records
            .read()
            .expect("registry lock poisoned")
            .get(&id)
            .cloned()
    }

    /// All live records, ordered by id.
    pub fn records(&self) -> Vec<Record> {
        self.records
            .read()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub(crate) fn register_record(&self, record: Record) {
        self.records
            .write()
            .expect("registry lock poisoned")
            .insert(record.id(), record);
    }

    /// Returns the record under `id`, creating it with `create` if absent.
    /// The flag is `true` when `create` ran.
    pub(crate) fn record_or_insert_with(
        &self,
        id: EntityId,
        create: impl FnOnce() -> Record,
    ) -> (Record, bool) {
        get_or_insert(&self.records, id, create)
    }

    // ---- aggregates ----

    pub fn sequence(&self, id: EntityId) -> Option<Sequence> {
        self.sequences
            .read()
            .expect("registry lock poisoned")
            .get(&id)
            .cloned()
    }

    pub(crate) fn register_sequence(&self, sequence: Sequence) {
        self.sequences
            .write()
            .expect("registry lock poisoned")
            .insert(sequence.id(), sequence);
    }

    pub(crate) fn sequence_or_insert_with(
        &self,
        id: EntityId,
        create: impl FnOnce() -> Sequence,
    ) -> (Sequence, bool) {
        get_or_insert(&self.sequences, id, create)
    }

    pub fn map(&self, id: EntityId) -> Option<Map> {
        self.maps
            .read()
            .expect("registry lock poisoned")
            .get(&id)
            .cloned()
    }

    pub(crate) fn register_map(&self, map: Map) {
        self.maps
            .write()
            .expect("registry lock poisoned")
            .insert(map.id(), map);
    }

    pub(crate) fn map_or_insert_with(
        &self,
        id: EntityId,
        create: impl FnOnce() -> Map,
    ) -> (Map, bool) {
        get_or_insert(&self.maps, id, create)
    }

    /// Number of live records, sequences and maps.
    pub fn live_counts(&self) -> (usize, usize, usize) {
        (
            self.records.read().expect("registry lock poisoned").len(),
            self.sequences.read().expect("registry lock poisoned").len(),
            self.maps.read().expect("registry lock poisoned").len(),
        )
    }

    /// Ids of every live entity, of all kinds.
    pub fn entity_ids(&self) -> BTreeSet<EntityId> {
        let mut ids: BTreeSet<EntityId> = self
            .records
            .read()
            .expect("registry lock poisoned")
            .keys()
            .copied()
            .collect();
        ids.extend(self.sequences.read().expect("registry lock poisoned").keys());
        ids.extend(self.maps.read().expect("registry lock poisoned").keys());
        ids
    }

    /// Drop every live entity whose id is not in `keep`. Returns how many
    /// were dropped.
    pub(crate) fn retain_entities(&self, keep: &BTreeSet<EntityId>) -> usize {
        fn retain<T>(table: &RwLock<BTreeMap<EntityId, T>>, keep: &BTreeSet<EntityId>) -> usize {
            let mut table = table.write().expect("registry lock poisoned");
            let before = table.len();
            table.retain(|id, _| keep.contains(id));
            before - table.len()
        }
        retain(&self.records, keep) + retain(&self.sequences, keep) + retain(&self.maps, keep)
    }

    /// Drop every registered entity and class.
    pub fn shutdown(&self) {
        self.records.write().expect("registry lock poisoned").clear();
        self.sequences.write().expect("registry lock poisoned").clear();
        self.maps.write().expect("registry lock poisoned").clear();
        self.classes.write().expect("registry lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::testing::{map_ctx, sequence_ctx, RecordingHook};

    fn spec(fields: &[&str]) -> ClassSpec {
        ClassSpec::builder("Point")
            .fields(fields.iter().copied())
            .build()
            .unwrap()
    }

    #[test]
    fn class_registration_is_idempotent() {
        let registry = Registry::new();
        let a = registry.register_class(spec(&["x", "y"])).unwrap();
        let b = registry.register_class(spec(&["x", "y"])).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.classes().len(), 1);
    }

    #[test]
    fn conflicting_class_spec_fails() {
        let registry = Registry::new();
        registry.register_class(spec(&["x", "y"])).unwrap();
        let err = registry.register_class(spec(&["x"])).unwrap_err();
        assert!(matches!(
            err,
            CoreError::ClassMismatch { ref expected, ref found }
                if expected == "Point(x, y)" && found == "Point(x)"
        ));
    }

    #[test]
    fn unknown_class() {
        let registry = Registry::new();
        assert!(matches!(
            registry.class("Nope"),
            Err(CoreError::ClassNotRegistered(name)) if name == "Nope"
        ));
    }

    #[test]
    fn get_or_insert_creates_once() {
        let registry = Registry::new();
        let hook = Arc::new(RecordingHook::default());
        let id = EntityId::new(5);

        let (first, created) = registry
            .sequence_or_insert_with(id, || Sequence::from_context(sequence_ctx(5, &hook)));
        assert!(created);
        let (second, created) = registry.sequence_or_insert_with(id, || unreachable!());
        assert!(!created);
        assert!(first.ptr_eq(&second));
        assert!(registry.sequence(id).is_some());
    }

    #[test]
    fn shutdown_clears_tables() {
        let registry = Registry::new();
        let hook = Arc::new(RecordingHook::default());
        registry.register_sequence(Sequence::from_context(sequence_ctx(1, &hook)));
        registry.register_class(spec(&["x"])).unwrap();
        assert_eq!(registry.live_counts(), (0, 1, 0));

        registry.shutdown();
        assert_eq!(registry.live_counts(), (0, 0, 0));
        assert!(registry.classes().is_empty());
    }

    #[test]
    fn retain_drops_entities_outside_the_keep_set() {
        let registry = Registry::new();
        let hook = Arc::new(RecordingHook::default());
        registry.register_sequence(Sequence::from_context(sequence_ctx(1, &hook)));
        let keep = registry.entity_ids();

        registry.register_sequence(Sequence::from_context(sequence_ctx(2, &hook)));
        registry.register_map(Map::from_context(map_ctx(3, &hook)));
        assert_eq!(registry.entity_ids().len(), 3);

        assert_eq!(registry.retain_entities(&keep), 2);
        assert_eq!(registry.live_counts(), (0, 1, 0));
        assert!(registry.sequence(EntityId::new(1)).is_some());
    }

    #[test]
    fn ids_come_from_one_counter() {
        let registry = Registry::new();
        let a = registry.allocate_id();
        let b = registry.allocate_id();
        assert!(b > a);
        registry.ids().advance_past(EntityId::new(100));
        assert_eq!(registry.allocate_id(), EntityId::new(101));
    }
}
