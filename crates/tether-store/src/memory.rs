use std::collections::BTreeMap;
use std::sync::RwLock;

use tether_types::{EntityId, FieldKey, StoredValue};

use crate::error::{StoreError, StoreResult};
use crate::traits::RowStore;

/// In-memory, `BTreeMap`-based row store.
///
/// Intended for tests and embedding. Rows are visible immediately; `commit`
/// only closes the current batch. The store counts row writes, deletes and
/// commits so callers can observe exactly what a flush did.
pub struct InMemoryRowStore {
    inner: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    objects: BTreeMap<EntityId, String>,
    data: BTreeMap<(EntityId, FieldKey), StoredValue>,
    writes: u64,
    deletes: u64,
    commits: u64,
    uncommitted: u64,
}

impl InMemoryRowStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryState::default()),
        }
    }

    /// Number of `objects` rows.
    pub fn entity_count(&self) -> usize {
        self.inner.read().expect("lock poisoned").objects.len()
    }

    /// Number of `data` rows.
    pub fn row_count(&self) -> usize {
        self.inner.read().expect("lock poisoned").data.len()
    }

    /// Total `write_row` calls since creation.
    pub fn write_count(&self) -> u64 {
        self.inner.read().expect("lock poisoned").writes
    }

    /// Total successful `delete_row` calls since creation.
    pub fn delete_count(&self) -> u64 {
        self.inner.read().expect("lock poisoned").deletes
    }

    /// Total `commit` calls that closed a non-empty batch.
    pub fn commit_count(&self) -> u64 {
        self.inner.read().expect("lock poisoned").commits
    }

    /// Returns `true` if there are writes not yet committed.
    pub fn has_uncommitted(&self) -> bool {
        self.inner.read().expect("lock poisoned").uncommitted > 0
    }
}

impl Default for InMemoryRowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RowStore for InMemoryRowStore {
    fn insert_entity(&self, id: EntityId, type_tag: &str) -> StoreResult<()> {
        let mut state = self.inner.write().expect("lock poisoned");
        if state.objects.contains_key(&id) {
            return Err(StoreError::DuplicateEntity(id));
        }
        state.objects.insert(id, type_tag.to_string());
        state.uncommitted += 1;
        Ok(())
    }

    fn entities(&self) -> StoreResult<Vec<(EntityId, String)>> {
        let state = self.inner.read().expect("lock poisoned");
        Ok(state
            .objects
            .iter()
            .map(|(id, tag)| (*id, tag.clone()))
            .collect())
    }

    fn read_row(&self, id: EntityId, field: &FieldKey) -> StoreResult<Option<StoredValue>> {
        let state = self.inner.read().expect("lock poisoned");
        Ok(state.data.get(&(id, field.clone())).cloned())
    }

    fn write_row(&self, id: EntityId, field: &FieldKey, value: &StoredValue) -> StoreResult<()> {
        let mut state = self.inner.write().expect("lock poisoned");
        state.data.insert((id, field.clone()), value.clone());
        state.writes += 1;
        state.uncommitted += 1;
        Ok(())
    }

    fn delete_row(&self, id: EntityId, field: &FieldKey) -> StoreResult<bool> {
        let mut state = self.inner.write().expect("lock poisoned");
        let existed = state.data.remove(&(id, field.clone())).is_some();
        if existed {
            state.deletes += 1;
            state.uncommitted += 1;
        }
        Ok(existed)
    }

    fn fields(&self, id: EntityId) -> StoreResult<Vec<FieldKey>> {
        let state = self.inner.read().expect("lock poisoned");
        Ok(state
            .data
            .keys()
            .filter(|(owner, _)| *owner == id)
            .map(|(_, field)| field.clone())
            .collect())
    }

    fn max_entity_id(&self) -> StoreResult<Option<EntityId>> {
        let state = self.inner.read().expect("lock poisoned");
        let max_object = state.objects.keys().next_back().copied();
        let max_data = state.data.keys().next_back().map(|(id, _)| *id);
        Ok(max_object.max(max_data))
    }

    fn commit(&self) -> StoreResult<()> {
        let mut state = self.inner.write().expect("lock poisoned");
        if state.uncommitted > 0 {
            state.commits += 1;
            state.uncommitted = 0;
        }
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryRowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRowStore")
            .field("entity_count", &self.entity_count())
            .field("row_count", &self.row_count())
            .finish()
    }
}
