//! The persistence proxy for top-level records.

use std::fmt;
use std::sync::Arc;

use tether_types::{EntityId, FieldKey, Scalar, Tag};

use crate::backend::Backend;
use crate::class::ClassSpec;
use crate::codec::ReferenceResolver;
use crate::context::{Cache, Context, EntityKind, SaveHook};
use crate::error::{CoreError, CoreResult};
use crate::registry::Registry;
use crate::value::Value;

/// Tag under which record references are stored.
pub const RECORD_TAG: &str = "object";

/// A live top-level record.
///
/// Only declared fields can be read or written; every write marks the
/// field dirty on the record's context. Handles are cheap to clone and
/// share state.
#[derive(Clone)]
pub struct Record {
    ctx: Context,
    spec: Arc<ClassSpec>,
}

impl Record {
    /// A new record with every declared field unset.
    pub(crate) fn new(id: EntityId, spec: Arc<ClassSpec>, hook: Arc<dyn SaveHook>) -> Self {
        let ctx = Context::new(id, EntityKind::Record(Arc::clone(&spec)), hook);
        Self { ctx, spec }
    }

    /// An empty record awaiting [`reload`](Self::reload).
    pub(crate) fn stub(id: EntityId, spec: Arc<ClassSpec>, hook: Arc<dyn SaveHook>) -> Self {
        let ctx = Context::stub(id, EntityKind::Record(Arc::clone(&spec)), hook);
        Self { ctx, spec }
    }

    pub fn id(&self) -> EntityId {
        self.ctx.id()
    }

    pub fn class_name(&self) -> &str {
        self.spec.name()
    }

    pub fn spec(&self) -> &Arc<ClassSpec> {
        &self.spec
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Whether both handles refer to the same live record.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.ctx.ptr_eq(&other.ctx)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.spec.has_field(name)
    }

    fn check_declared(&self, name: &str) -> CoreResult<()> {
        if self.has_field(name) {
            Ok(())
        } else {
            Err(CoreError::FieldNotDeclared {
                class: self.spec.name().to_string(),
                field: name.to_string(),
            })
        }
    }

    pub fn get(&self, name: &str) -> CoreResult<Value> {
        self.check_declared(name)?;
        let key = FieldKey::from(name);
        Ok(self
            .ctx
            .read(|cache| cache.lookup(&key).cloned())
            .unwrap_or(Value::Unset))
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) -> CoreResult<()> {
        self.check_declared(name)?;
        let value = value.into();
        self.ctx.update(|cache| match cache {
            Cache::Fields(fields) => {
                fields.insert(name.to_string(), value);
                Ok(((), vec![FieldKey::from(name)]))
            }
            _ => Err(CoreError::ClassMismatch {
                expected: self.spec.name().to_string(),
                found: self.ctx.type_tag().to_string(),
            }),
        })
    }

    /// Accessor bound to one declared field.
    pub fn field<'a>(&'a self, name: &'a str) -> FieldHandle<'a> {
        FieldHandle { record: self, name }
    }

    /// Snapshot of every declared field, in declaration order.
    pub fn fields(&self) -> Vec<(String, Value)> {
        self.ctx.read(|cache| {
            self.spec
                .fields()
                .iter()
                .map(|name| {
                    let value = cache
                        .lookup(&FieldKey::from(name.as_str()))
                        .cloned()
                        .unwrap_or(Value::Unset);
                    (name.clone(), value)
                })
                .collect()
        })
    }

    /// Replace the whole field cache with a fresh load from `backend`.
    pub fn reload(&self, backend: &dyn Backend) -> CoreResult<()> {
        let fields = backend.get(&self.ctx)?;
        self.ctx.replace_cache(Cache::Fields(fields));
        Ok(())
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("class", &self.class_name())
            .field("id", &self.id())
            .finish()
    }
}

/// Get/set access to one declared field of a record.
#[derive(Clone, Copy)]
pub struct FieldHandle<'a> {
    record: &'a Record,
    name: &'a str,
}

impl FieldHandle<'_> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn get(&self) -> CoreResult<Value> {
        self.record.get(self.name)
    }

    pub fn set(&self, value: impl Into<Value>) -> CoreResult<()> {
        self.record.set(self.name, value)
    }
}

impl fmt::Debug for FieldHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.record.class_name(), self.name)
    }
}

/// An application type backed by a [`Record`].
///
/// Usually implemented through [`persistent_class!`](crate::persistent_class).
pub trait Persistent: Sized {
    /// Class name, also the record's `type_tag`.
    const CLASS: &'static str;

    /// The class's field spec, including inherited fields.
    fn declare() -> CoreResult<ClassSpec>;

    /// Wrap a record without checking its class.
    fn from_record(record: Record) -> Self;

    fn record(&self) -> &Record;

    fn id(&self) -> EntityId {
        self.record().id()
    }

    /// A field value referencing this record.
    fn to_value(&self) -> Value {
        Value::Record(self.record().clone())
    }

    /// View `record` as `Self`. The record's class must be `Self::CLASS`
    /// or extend it.
    fn cast(record: Record) -> CoreResult<Self> {
        if record.spec().is_a(Self::CLASS) {
            Ok(Self::from_record(record))
        } else {
            Err(CoreError::ClassMismatch {
                expected: Self::CLASS.to_string(),
                found: record.class_name().to_string(),
            })
        }
    }
}

/// Resolves record references through the live-object registry.
///
/// Records are stored as `(id, "object")`; decoding returns the registered
/// instance so identity survives reload.
#[derive(Debug)]
pub struct RecordResolver {
    registry: Arc<Registry>,
}

impl RecordResolver {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

impl ReferenceResolver for RecordResolver {
    fn resolve_encode(&self, value: &Value) -> Option<(Scalar, Tag)> {
        let record = value.as_record()?;
        Some((Scalar::from(record.id()), Tag::external(RECORD_TAG)))
    }

    fn resolve_decode(&self, target: &Scalar, tag: &Tag) -> CoreResult<Option<Value>> {
        if tag.as_str() != RECORD_TAG {
            return Ok(None);
        }
        let id = target.as_entity_id()?;
        self.registry
            .record(id)
            .map(|record| Some(Value::Record(record)))
            .ok_or_else(|| CoreError::DereferenceFailure {
                tag: RECORD_TAG.to_string(),
                reason: format!("no live record {id}"),
            })
    }
}
