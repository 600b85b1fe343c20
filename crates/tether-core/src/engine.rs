//! The engine: one open store with its registries, codec and cache.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use tether_store::{InMemoryRowStore, RowStore, SqliteRowStore};
use tether_types::EntityId;

use crate::backend::{Backend, RowBackend};
use crate::cache::{CacheController, CacheMode, Clock, SystemClock};
use crate::class::ClassSpec;
use crate::codec::{Codec, ReferenceResolver};
use crate::config::EngineConfig;
use crate::context::{Context, EntityKind, SaveHook};
use crate::error::{CoreError, CoreResult};
use crate::map::Map;
use crate::record::{Persistent, Record, RecordResolver};
use crate::registry::Registry;
use crate::sequence::Sequence;
use crate::value::Value;

/// Options for opening an [`Engine`].
pub struct EngineBuilder {
    store: Arc<dyn RowStore>,
    config: EngineConfig,
    resolvers: Vec<Arc<dyn ReferenceResolver>>,
    clock: Arc<dyn Clock>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a domain resolver. Resolvers run in the order added, all
    /// before the built-in record resolver.
    pub fn resolver(mut self, resolver: Arc<dyn ReferenceResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    /// Time source for the `timer` cache mode.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn open(self) -> CoreResult<Engine> {
        let registry = Arc::new(Registry::new());
        if let Some(max) = self.store.max_entity_id()? {
            registry.ids().advance_past(max);
        }

        let codec = self
            .resolvers
            .into_iter()
            .fold(Codec::new(), Codec::with_resolver)
            .with_resolver(Arc::new(RecordResolver::new(Arc::clone(&registry))));
        let backend = Arc::new(RowBackend::new(
            Arc::clone(&self.store),
            Arc::clone(&registry),
            codec,
        ));
        let cache = Arc::new(CacheController::with_clock(
            backend.clone(),
            self.config.cache_mode,
            self.config.flush_timeout(),
            self.clock,
        ));

        info!(
            cache_mode = %self.config.cache_mode,
            next_id = %registry.ids().peek(),
            "engine opened"
        );
        Ok(Engine {
            store: self.store,
            registry,
            backend,
            cache,
            finished: false,
        })
    }
}

/// An open persistence engine.
///
/// Owns the live-object registry, the backend over one row store, and the
/// cache controller every entity reports to. Call
/// [`shutdown`](Engine::shutdown) to close it and see the result of the
/// final flush; dropping it closes it too, logging any error.
pub struct Engine {
    store: Arc<dyn RowStore>,
    registry: Arc<Registry>,
    backend: Arc<RowBackend>,
    cache: Arc<CacheController>,
    finished: bool,
}

impl Engine {
    pub fn builder(store: Arc<dyn RowStore>) -> EngineBuilder {
        EngineBuilder {
            store,
            config: EngineConfig::default(),
            resolvers: Vec::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn open(store: Arc<dyn RowStore>, config: EngineConfig) -> CoreResult<Self> {
        Self::builder(store).config(config).open()
    }

    /// Engine over a fresh in-memory store.
    pub fn in_memory(config: EngineConfig) -> CoreResult<Self> {
        Self::open(Arc::new(InMemoryRowStore::new()), config)
    }

    /// Engine over a SQLite database file, created if missing.
    pub fn open_sqlite(path: impl AsRef<Path>, config: EngineConfig) -> CoreResult<Self> {
        let store = SqliteRowStore::open(path)?;
        Self::open(Arc::new(store), config)
    }

    pub fn store(&self) -> &Arc<dyn RowStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn cache(&self) -> &CacheController {
        &self.cache
    }

    fn hook(&self) -> Arc<dyn SaveHook> {
        self.cache.clone()
    }

    // ---- classes ----

    /// Register `T`'s field spec.
    pub fn register<T: Persistent>(&self) -> CoreResult<Arc<ClassSpec>> {
        self.register_class(T::declare()?)
    }

    pub fn register_class(&self, spec: ClassSpec) -> CoreResult<Arc<ClassSpec>> {
        let spec = self.registry.register_class(spec)?;
        debug!(class = spec.name(), fields = spec.fields().len(), "class registered");
        Ok(spec)
    }

    // ---- creation ----

    /// Create a new `T`. Its class must be registered.
    pub fn create<T: Persistent>(&self) -> CoreResult<T> {
        self.create_record(T::CLASS).map(T::from_record)
    }

    /// Create a record of a registered class, with every field unset.
    ///
    /// The identity and unset rows are written at once; when they become
    /// durable depends on the cache mode.
    pub fn create_record(&self, class: &str) -> CoreResult<Record> {
        let spec = self.registry.class(class)?;
        let id = self.registry.allocate_id();
        let record = Record::new(id, spec, self.hook());
        self.backend.init(record.context())?;
        self.registry.register_record(record.clone());
        self.cache.save(record.context())?;
        debug!(entity = %id, class, "record created");
        Ok(record)
    }

    /// A new sequence holding `items`. Every initial index is dirty.
    pub fn wrap_sequence<I, V>(&self, items: I) -> CoreResult<Sequence>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let id = self.registry.allocate_id();
        let seq = Sequence::from_context(Context::new(id, EntityKind::Sequence, self.hook()));
        self.registry.register_sequence(seq.clone());
        seq.extend(items)?;
        Ok(seq)
    }

    pub fn new_sequence(&self) -> CoreResult<Sequence> {
        self.wrap_sequence(std::iter::empty::<Value>())
    }

    /// A new map holding `entries`. Every initial key is dirty.
    pub fn wrap_map<I, K, V>(&self, entries: I) -> CoreResult<Map>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<tether_types::FieldKey>,
        V: Into<Value>,
    {
        let id = self.registry.allocate_id();
        let map = Map::from_context(Context::new(id, EntityKind::Map, self.hook()));
        self.registry.register_map(map.clone());
        map.update(entries)?;
        Ok(map)
    }

    pub fn new_map(&self) -> CoreResult<Map> {
        self.wrap_map(std::iter::empty::<(tether_types::FieldKey, Value)>())
    }

    // ---- lookup ----

    pub fn lookup(&self, id: EntityId) -> Option<Record> {
        self.registry.record(id)
    }

    /// The live record `id` viewed as `T`.
    pub fn get<T: Persistent>(&self, id: EntityId) -> CoreResult<Option<T>> {
        self.lookup(id).map(T::cast).transpose()
    }

    pub fn sequence(&self, id: EntityId) -> Option<Sequence> {
        self.registry.sequence(id)
    }

    pub fn map(&self, id: EntityId) -> Option<Map> {
        self.registry.map(id)
    }

    /// All live records, ordered by id.
    pub fn records(&self) -> Vec<Record> {
        self.registry.records()
    }

    // ---- reload ----

    /// Rebuild every stored record in two phases.
    ///
    /// Phase one registers an empty stub for each stored record, so every
    /// record reference has a live target before any field loads. Phase
    /// two loads each stub's fields. Records already live are left alone,
    /// but a live record whose class differs from the stored one is a
    /// `ClassMismatch`. Returns the number of records loaded.
    ///
    /// On failure every entity registered by this call is withdrawn again,
    /// so a later call starts from the same state.
    pub fn reload_all(&self) -> CoreResult<usize> {
        let live = self.registry.entity_ids();
        self.load_stored().inspect_err(|e| {
            let dropped = self.registry.retain_entities(&live);
            warn!(error = %e, dropped, "reload failed, withdrew partially loaded entities");
        })
    }

    fn load_stored(&self) -> CoreResult<usize> {
        let entities = self.backend.enumerate_entities()?;

        let mut stubs = Vec::new();
        for (id, type_tag) in &entities {
            let spec = self.registry.class(type_tag)?;
            self.registry.ids().advance_past(*id);
            let (record, created) = self
                .registry
                .record_or_insert_with(*id, || Record::stub(*id, Arc::clone(&spec), self.hook()));
            if created {
                stubs.push(record);
            } else if record.class_name() != spec.name() {
                return Err(CoreError::ClassMismatch {
                    expected: type_tag.clone(),
                    found: record.class_name().to_string(),
                });
            }
        }

        for record in &stubs {
            record.reload(self.backend.as_ref())?;
        }

        info!(
            stored = entities.len(),
            loaded = stubs.len(),
            "reloaded records"
        );
        Ok(stubs.len())
    }

    // ---- cache ----

    /// Write all pending changes now.
    pub fn flush(&self) -> CoreResult<usize> {
        self.cache.flush()
    }

    pub fn cache_mode(&self) -> CacheMode {
        self.cache.mode()
    }

    pub fn set_cache_mode(&self, mode: CacheMode) {
        self.cache.change_mode(mode);
    }

    pub fn set_flush_timeout(&self, timeout: Duration) {
        self.cache.set_timeout(timeout);
    }

    // ---- shutdown ----

    /// Close the engine: run the shutdown flush if armed, then drop every
    /// registered entity. Handles still held by the caller keep their
    /// values but can no longer be saved.
    pub fn shutdown(mut self) -> CoreResult<()> {
        self.finish().map(drop)
    }

    fn finish(&mut self) -> CoreResult<usize> {
        if self.finished {
            return Ok(0);
        }
        self.finished = true;
        let result = self.cache.close();
        self.registry.shutdown();
        info!(flushed = result.as_ref().ok().copied(), "engine shut down");
        result
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!(error = %e, "shutdown flush failed during drop");
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
