//! Storage backend contract and the row-store implementation.
//!
//! A [`Backend`] persists contexts: it writes identity rows for new
//! records, writes the dirty cells of changed entities, and loads the
//! declared fields of a record back into live values. [`RowBackend`]
//! implements the contract over any [`RowStore`].
//!
//! # Loading aggregates
//!
//! Sequence and map cells are materialised inline while a field loads.
//! An aggregate already registered is returned as is. Otherwise an empty
//! stub is registered under the stored id *before* its entries load, so
//! a cycle leading back to it finds the stub instead of recursing.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use tether_store::RowStore;
use tether_types::{EntityId, FieldKey, StoredValue, Tag};

use crate::codec::Codec;
use crate::context::{Context, EntityKind, SaveHook};
use crate::error::{CoreError, CoreResult};
use crate::map::Map;
use crate::registry::Registry;
use crate::sequence::Sequence;
use crate::value::Value;

/// Contexts written by one [`Backend::set`], each with the dirty keys the
/// write cleared.
pub type Persisted = Vec<(Context, Vec<FieldKey>)>;

/// The fixed persistence contract the engine drives.
pub trait Backend: Send + Sync {
    /// Write the identity row of a new record and one unset cell per
    /// declared field. Aggregates have no identity row.
    fn init(&self, ctx: &Context) -> CoreResult<()>;

    /// Load every declared field of a record, then synchronize it.
    fn get(&self, ctx: &Context) -> CoreResult<BTreeMap<String, Value>>;

    /// Persist the dirty cells of `ctx`, deleting cells for removed
    /// aggregate entries, then synchronize it.
    ///
    /// Returns the dirty keys cleared on every context written, `ctx` and
    /// any nested aggregate alike, so a caller whose commit fails can put
    /// them back. On error no context is left cleared.
    fn set(&self, ctx: &Context) -> CoreResult<Persisted>;

    /// `(id, type_tag)` of every stored top-level record.
    fn enumerate_entities(&self) -> CoreResult<Vec<(EntityId, String)>>;

    fn commit(&self) -> CoreResult<()>;
}

/// [`Backend`] over the `objects`/`data` row schema.
pub struct RowBackend {
    store: Arc<dyn RowStore>,
    registry: Arc<Registry>,
    codec: Codec,
}

impl RowBackend {
    pub fn new(store: Arc<dyn RowStore>, registry: Arc<Registry>, codec: Codec) -> Self {
        Self {
            store,
            registry,
            codec,
        }
    }

    pub fn store(&self) -> &Arc<dyn RowStore> {
        &self.store
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    fn load_cell(
        &self,
        id: EntityId,
        field: &FieldKey,
        hook: &Arc<dyn SaveHook>,
    ) -> CoreResult<Value> {
        let cell = self
            .store
            .read_row(id, field)?
            .ok_or_else(|| CoreError::LoadFailure {
                entity: id,
                field: field.clone(),
            })?;
        self.decode_cell(&cell, hook)
    }

    fn decode_cell(&self, cell: &StoredValue, hook: &Arc<dyn SaveHook>) -> CoreResult<Value> {
        match &cell.tag {
            Some(Tag::Sequence) => self.materialize_sequence(cell.value.as_entity_id()?, hook),
            Some(Tag::Map) => self.materialize_map(cell.value.as_entity_id()?, hook),
            _ => self.codec.decode(cell),
        }
    }

    fn materialize_sequence(&self, id: EntityId, hook: &Arc<dyn SaveHook>) -> CoreResult<Value> {
        let (seq, created) = self.registry.sequence_or_insert_with(id, || {
            Sequence::from_context(Context::stub(id, EntityKind::Sequence, Arc::clone(hook)))
        });
        if !created {
            return Ok(Value::Sequence(seq));
        }
        self.registry.ids().advance_past(id);

        seq.context().enter_loading_mode();
        if let Some(max) = self.store.max_index(id)? {
            for index in 0..=max {
                let item = self.load_cell(id, &FieldKey::Int(index), hook)?;
                seq.append(item)?;
            }
        }
        seq.context().synchronize();
        debug!(entity = %id, len = seq.len(), "loaded sequence");
        Ok(Value::Sequence(seq))
    }

    fn materialize_map(&self, id: EntityId, hook: &Arc<dyn SaveHook>) -> CoreResult<Value> {
        let (map, created) = self.registry.map_or_insert_with(id, || {
            Map::from_context(Context::stub(id, EntityKind::Map, Arc::clone(hook)))
        });
        if !created {
            return Ok(Value::Map(map));
        }
        self.registry.ids().advance_past(id);

        map.context().enter_loading_mode();
        for key in self.store.fields(id)? {
            let value = self.load_cell(id, &key, hook)?;
            map.insert(key, value)?;
        }
        map.context().synchronize();
        debug!(entity = %id, len = map.len(), "loaded map");
        Ok(Value::Map(map))
    }

    /// Write the dirty cells of `ctx` and of any dirty aggregate reached
    /// through them. The context stays locked for the whole write, so a
    /// concurrent mutation lands either before the dirty set is read or
    /// after it is cleared.
    fn persist(
        &self,
        ctx: &Context,
        visited: &mut BTreeSet<EntityId>,
        persisted: &mut Persisted,
    ) -> CoreResult<()> {
        if !visited.insert(ctx.id()) {
            return Ok(());
        }
        let id = ctx.id();
        let mut state = ctx.lock();
        if state.dirty.is_empty() {
            state.suppress_notify = false;
            return Ok(());
        }

        let mut written = 0usize;
        let mut deleted = 0usize;
        for field in &state.dirty {
            match state.cache.lookup(field) {
                Some(value) => {
                    let cell = self.codec.encode(value)?;
                    self.store.write_row(id, field, &cell)?;
                    written += 1;
                    let nested = match value {
                        Value::Sequence(seq) => Some(seq.context()),
                        Value::Map(map) => Some(map.context()),
                        _ => None,
                    };
                    if let Some(nested) = nested {
                        self.persist(nested, visited, persisted)?;
                    }
                }
                None => {
                    self.store.delete_row(id, field)?;
                    deleted += 1;
                }
            }
        }

        let cleared = std::mem::take(&mut state.dirty);
        state.suppress_notify = false;
        persisted.push((ctx.clone(), cleared.into_iter().collect()));
        debug!(entity = %id, type_tag = ctx.type_tag(), written, deleted, "persisted entity");
        Ok(())
    }
}

impl Backend for RowBackend {
    fn init(&self, ctx: &Context) -> CoreResult<()> {
        if !matches!(ctx.kind(), EntityKind::Record(_)) {
            return Ok(());
        }
        self.store.insert_entity(ctx.id(), ctx.type_tag())?;
        let unset = StoredValue::unset();
        for field in ctx.field_spec() {
            self.store
                .write_row(ctx.id(), &FieldKey::from(field.as_str()), &unset)?;
        }
        debug!(entity = %ctx.id(), type_tag = ctx.type_tag(), "initialized record");
        Ok(())
    }

    fn get(&self, ctx: &Context) -> CoreResult<BTreeMap<String, Value>> {
        let hook = ctx.hook();
        let mut fields = BTreeMap::new();
        for name in ctx.field_spec() {
            let value = self.load_cell(ctx.id(), &FieldKey::from(name.as_str()), &hook)?;
            fields.insert(name.clone(), value);
        }
        ctx.synchronize();
        debug!(entity = %ctx.id(), fields = fields.len(), "loaded record");
        Ok(fields)
    }

    fn set(&self, ctx: &Context) -> CoreResult<Persisted> {
        let mut persisted = Vec::new();
        match self.persist(ctx, &mut BTreeSet::new(), &mut persisted) {
            Ok(()) => Ok(persisted),
            Err(e) => {
                for (written, keys) in persisted {
                    written.restore_dirty(keys);
                }
                Err(e)
            }
        }
    }

    fn enumerate_entities(&self) -> CoreResult<Vec<(EntityId, String)>> {
        Ok(self.store.entities()?)
    }

    fn commit(&self) -> CoreResult<()> {
        Ok(self.store.commit()?)
    }
}

impl std::fmt::Debug for RowBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowBackend")
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}
