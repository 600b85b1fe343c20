//! Per-entity change tracking.
//!
//! Every persisted entity owns one [`Context`]. It holds the entity's
//! identity, its current field cache, and the set of fields changed since
//! the last successful write. Every mutation reports to the context, and
//! the context forwards itself to a single [`SaveHook`] (the cache
//! controller in a running engine).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tether_types::{EntityId, FieldKey, Tag};

use crate::class::ClassSpec;
use crate::error::CoreResult;
use crate::value::Value;

/// Receives a context every time one of its fields becomes dirty.
pub trait SaveHook: Send + Sync {
    fn save(&self, ctx: &Context) -> CoreResult<()>;
}

/// What kind of entity a context tracks.
#[derive(Clone, Debug)]
pub enum EntityKind {
    /// A top-level record of a declared class.
    Record(Arc<ClassSpec>),
    Sequence,
    Map,
}

impl EntityKind {
    /// The `type_tag`: the class name, or the reserved aggregate tag.
    pub fn type_tag(&self) -> &str {
        match self {
            Self::Record(spec) => spec.name(),
            Self::Sequence => Tag::SEQUENCE,
            Self::Map => Tag::MAP,
        }
    }
}

/// The field cache of one entity.
///
/// For aggregates the cache is the container itself: sequence indices and
/// map keys double as field names.
#[derive(Clone, Debug)]
pub(crate) enum Cache {
    Fields(BTreeMap<String, Value>),
    Items(Vec<Value>),
    Entries(BTreeMap<FieldKey, Value>),
}

impl Cache {
    fn empty(kind: &EntityKind) -> Self {
        match kind {
            EntityKind::Record(_) => Self::Fields(BTreeMap::new()),
            EntityKind::Sequence => Self::Items(Vec::new()),
            EntityKind::Map => Self::Entries(BTreeMap::new()),
        }
    }

    /// Current value under `key`, if present.
    pub(crate) fn lookup(&self, key: &FieldKey) -> Option<&Value> {
        match (self, key) {
            (Self::Fields(fields), FieldKey::Text(name)) => fields.get(name),
            (Self::Items(items), FieldKey::Int(i)) => {
                usize::try_from(*i).ok().and_then(|i| items.get(i))
            }
            (Self::Entries(entries), key) => entries.get(key),
            _ => None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Fields(fields) => fields.len(),
            Self::Items(items) => items.len(),
            Self::Entries(entries) => entries.len(),
        }
    }
}

/// Mutable part of a context, guarded by the context's lock.
pub(crate) struct ContextState {
    pub(crate) cache: Cache,
    pub(crate) dirty: BTreeSet<FieldKey>,
    pub(crate) suppress_notify: bool,
}

struct ContextInner {
    id: EntityId,
    kind: EntityKind,
    state: Mutex<ContextState>,
    hook: Arc<dyn SaveHook>,
}

/// Shared handle to an entity's change-tracking state.
///
/// Cloning is cheap and yields a handle to the same context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Context for a newly created entity.
    ///
    /// Records start with every declared field set to [`Value::Unset`].
    pub(crate) fn new(id: EntityId, kind: EntityKind, hook: Arc<dyn SaveHook>) -> Self {
        let cache = match &kind {
            EntityKind::Record(spec) => Cache::Fields(
                spec.fields()
                    .iter()
                    .map(|name| (name.clone(), Value::Unset))
                    .collect(),
            ),
            other => Cache::empty(other),
        };
        Self::with_state(id, kind, hook, cache, false)
    }

    /// Empty context for an entity about to be loaded from storage.
    ///
    /// Notifications stay suppressed until [`synchronize`](Self::synchronize).
    pub(crate) fn stub(id: EntityId, kind: EntityKind, hook: Arc<dyn SaveHook>) -> Self {
        let cache = Cache::empty(&kind);
        Self::with_state(id, kind, hook, cache, true)
    }

    fn with_state(
        id: EntityId,
        kind: EntityKind,
        hook: Arc<dyn SaveHook>,
        cache: Cache,
        suppress_notify: bool,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id,
                kind,
                state: Mutex::new(ContextState {
                    cache,
                    dirty: BTreeSet::new(),
                    suppress_notify,
                }),
                hook,
            }),
        }
    }

    pub fn id(&self) -> EntityId {
        self.inner.id
    }

    pub fn kind(&self) -> &EntityKind {
        &self.inner.kind
    }

    pub fn type_tag(&self) -> &str {
        self.inner.kind.type_tag()
    }

    /// Declared field names. Empty for aggregates.
    pub fn field_spec(&self) -> &[String] {
        match &self.inner.kind {
            EntityKind::Record(spec) => spec.fields(),
            EntityKind::Sequence | EntityKind::Map => &[],
        }
    }

    /// Union `fields` into the dirty set and hand this context to the save
    /// hook. Does nothing while notifications are suppressed.
    pub fn mark_dirty<I>(&self, fields: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = FieldKey>,
    {
        self.update(|_| Ok(((), fields.into_iter().collect())))
    }

    /// Clear the dirty set and leave loading mode.
    pub fn synchronize(&self) {
        let mut state = self.lock();
        state.dirty.clear();
        state.suppress_notify = false;
    }

    /// Suppress notifications until the next [`synchronize`](Self::synchronize).
    pub fn enter_loading_mode(&self) {
        self.lock().suppress_notify = true;
    }

    pub fn is_loading(&self) -> bool {
        self.lock().suppress_notify
    }

    /// Put back dirty keys cleared by a write that never became durable.
    pub(crate) fn restore_dirty(&self, keys: impl IntoIterator<Item = FieldKey>) {
        self.lock().dirty.extend(keys);
    }

    pub fn dirty_fields(&self) -> Vec<FieldKey> {
        self.lock().dirty.iter().cloned().collect()
    }

    pub fn is_dirty(&self) -> bool {
        !self.lock().dirty.is_empty()
    }

    /// Whether both handles refer to the same context instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn hook(&self) -> Arc<dyn SaveHook> {
        Arc::clone(&self.inner.hook)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.inner.state.lock().expect("lock poisoned")
    }

    /// Read the cache under the lock.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&Cache) -> R) -> R {
        f(&self.lock().cache)
    }

    /// Apply a mutation and mark the keys it reports as dirty, atomically.
    ///
    /// The save hook runs after the lock is released so it may flush this
    /// very context.
    pub(crate) fn update<R>(
        &self,
        f: impl FnOnce(&mut Cache) -> CoreResult<(R, Vec<FieldKey>)>,
    ) -> CoreResult<R> {
        let result = {
            let mut state = self.lock();
            let (result, keys) = f(&mut state.cache)?;
            if state.suppress_notify || keys.is_empty() {
                return Ok(result);
            }
            state.dirty.extend(keys);
            result
        };
        self.inner.hook.save(self)?;
        Ok(result)
    }

    /// Replace the cache wholesale without touching the dirty set.
    pub(crate) fn replace_cache(&self, cache: Cache) {
        self.lock().cache = cache;
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("type_tag", &self.type_tag())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Hook that records the id of every context it is handed.
    #[derive(Default)]
    pub(crate) struct RecordingHook {
        pub(crate) saves: Mutex<Vec<EntityId>>,
    }

    impl RecordingHook {
        pub(crate) fn count(&self) -> usize {
            self.saves.lock().expect("lock poisoned").len()
        }
    }

    impl SaveHook for RecordingHook {
        fn save(&self, ctx: &Context) -> CoreResult<()> {
            self.saves.lock().expect("lock poisoned").push(ctx.id());
            Ok(())
        }
    }

    pub(crate) fn sequence_ctx(id: u64, hook: &Arc<RecordingHook>) -> Context {
        Context::new(EntityId::new(id), EntityKind::Sequence, hook.clone())
    }

    pub(crate) fn map_ctx(id: u64, hook: &Arc<RecordingHook>) -> Context {
        Context::new(EntityId::new(id), EntityKind::Map, hook.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn point_spec() -> Arc<ClassSpec> {
        Arc::new(
            ClassSpec::builder("Point")
                .field("x")
                .field("y")
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn new_record_starts_unset() {
        let hook = Arc::new(RecordingHook::default());
        let ctx = Context::new(EntityId::new(1), EntityKind::Record(point_spec()), hook);
        assert_eq!(ctx.type_tag(), "Point");
        assert_eq!(ctx.field_spec(), ["x".to_string(), "y".to_string()]);
        ctx.read(|cache| {
            assert_eq!(cache.lookup(&FieldKey::from("x")), Some(&Value::Unset));
            assert_eq!(cache.len(), 2);
        });
        assert!(!ctx.is_loading());
        assert!(!ctx.is_dirty());
    }

    #[test]
    fn mark_dirty_unions_and_notifies() {
        let hook = Arc::new(RecordingHook::default());
        let ctx = sequence_ctx(4, &hook);

        ctx.mark_dirty([FieldKey::index(0), FieldKey::index(1)]).unwrap();
        ctx.mark_dirty([FieldKey::index(1)]).unwrap();

        assert_eq!(ctx.dirty_fields(), vec![FieldKey::index(0), FieldKey::index(1)]);
        assert_eq!(hook.count(), 2);
    }

    #[test]
    fn loading_mode_suppresses_everything() {
        let hook = Arc::new(RecordingHook::default());
        let ctx = map_ctx(2, &hook);
        ctx.enter_loading_mode();

        ctx.mark_dirty([FieldKey::from("k")]).unwrap();
        assert!(!ctx.is_dirty());
        assert_eq!(hook.count(), 0);

        ctx.synchronize();
        assert!(!ctx.is_loading());
        ctx.mark_dirty([FieldKey::from("k")]).unwrap();
        assert_eq!(hook.count(), 1);
    }

    #[test]
    fn stub_starts_in_loading_mode() {
        let hook = Arc::new(RecordingHook::default());
        let ctx = Context::stub(EntityId::new(9), EntityKind::Record(point_spec()), hook);
        assert!(ctx.is_loading());
        ctx.read(|cache| assert_eq!(cache.len(), 0));
    }

    #[test]
    fn synchronize_clears_dirty() {
        let hook = Arc::new(RecordingHook::default());
        let ctx = sequence_ctx(1, &hook);
        ctx.mark_dirty([FieldKey::index(0)]).unwrap();
        ctx.synchronize();
        assert!(ctx.dirty_fields().is_empty());
    }

    #[test]
    fn empty_update_does_not_notify() {
        let hook = Arc::new(RecordingHook::default());
        let ctx = sequence_ctx(1, &hook);
        ctx.mark_dirty(Vec::new()).unwrap();
        assert_eq!(hook.count(), 0);
    }

    #[test]
    fn clones_share_state() {
        let hook = Arc::new(RecordingHook::default());
        let ctx = sequence_ctx(1, &hook);
        let other = ctx.clone();
        other.mark_dirty([FieldKey::index(3)]).unwrap();
        assert!(ctx.is_dirty());
        assert!(ctx.ptr_eq(&other));
    }
}
