use tether_types::{EntityId, FieldKey, StoredValue};

use crate::error::StoreResult;

/// Storage for the `objects`/`data` schema.
///
/// All implementations must satisfy these invariants:
/// - `write_row` replaces any existing cell for `(entity, field)`.
/// - Writes become durable only after `commit`; a store may lose
///   uncommitted writes when it is dropped.
/// - `entities` lists top-level records only; aggregates live solely in
///   the `data` rows.
/// - All I/O errors are propagated, never silently ignored.
pub trait RowStore: Send + Sync {
    /// Add the identity row of a top-level record.
    ///
    /// Fails with `DuplicateEntity` if the id is already present.
    fn insert_entity(&self, id: EntityId, type_tag: &str) -> StoreResult<()>;

    /// All identity rows, ordered by id.
    fn entities(&self) -> StoreResult<Vec<(EntityId, String)>>;

    /// Read one cell. Returns `Ok(None)` if the row does not exist.
    fn read_row(&self, id: EntityId, field: &FieldKey) -> StoreResult<Option<StoredValue>>;

    /// Create or replace one cell.
    fn write_row(&self, id: EntityId, field: &FieldKey, value: &StoredValue) -> StoreResult<()>;

    /// Delete one cell. Returns `true` if the row existed.
    fn delete_row(&self, id: EntityId, field: &FieldKey) -> StoreResult<bool>;

    /// Every field key stored for `id`, in key order.
    fn fields(&self, id: EntityId) -> StoreResult<Vec<FieldKey>>;

    /// Highest integer field stored for `id`, or `None` if there is none.
    ///
    /// Default implementation scans `fields()`. Backends may override with
    /// an indexed lookup.
    fn max_index(&self, id: EntityId) -> StoreResult<Option<i64>> {
        Ok(self
            .fields(id)?
            .iter()
            .filter_map(FieldKey::as_int)
            .max())
    }

    /// Highest entity id present in either table.
    fn max_entity_id(&self) -> StoreResult<Option<EntityId>>;

    /// Make all writes since the last commit durable.
    fn commit(&self) -> StoreResult<()>;

    /// All cells of one entity, in key order.
    ///
    /// Default implementation calls `read_row()` for each field.
    fn rows(&self, id: EntityId) -> StoreResult<Vec<(FieldKey, StoredValue)>> {
        let mut rows = Vec::new();
        for field in self.fields(id)? {
            if let Some(value) = self.read_row(id, &field)? {
                rows.push((field, value));
            }
        }
        Ok(rows)
    }
}
