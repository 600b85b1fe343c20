//! Persistence-aware key-value map.

use std::collections::BTreeMap;
use std::fmt;

use tether_types::{EntityId, FieldKey};

use crate::context::{Cache, Context};
use crate::error::{CoreError, CoreResult};
use crate::value::Value;

/// A map whose entries are the fields of its own context.
///
/// Keys are [`FieldKey`]s (integer or text) and iterate in key order.
/// Mutations dirty exactly the keys they touch; `clear` dirties every key
/// that was present, `update` every key present afterwards.
#[derive(Clone)]
pub struct Map {
    ctx: Context,
}

impl Map {
    pub(crate) fn from_context(ctx: Context) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn id(&self) -> EntityId {
        self.ctx.id()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.ctx.ptr_eq(&other.ctx)
    }

    fn read<R>(&self, f: impl FnOnce(&BTreeMap<FieldKey, Value>) -> R) -> R {
        self.ctx.read(|cache| match cache {
            Cache::Entries(entries) => f(entries),
            _ => f(&BTreeMap::new()),
        })
    }

    fn modify<R>(
        &self,
        f: impl FnOnce(&mut BTreeMap<FieldKey, Value>) -> CoreResult<(R, Vec<FieldKey>)>,
    ) -> CoreResult<R> {
        let type_tag = self.ctx.type_tag();
        self.ctx.update(|cache| match cache {
            Cache::Entries(entries) => f(entries),
            _ => Err(CoreError::ClassMismatch {
                expected: "map".to_string(),
                found: type_tag.to_string(),
            }),
        })
    }

    pub fn len(&self) -> usize {
        self.read(BTreeMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: impl Into<FieldKey>) -> bool {
        let key = key.into();
        self.read(|entries| entries.contains_key(&key))
    }

    pub fn get(&self, key: impl Into<FieldKey>) -> CoreResult<Value> {
        let key = key.into();
        self.read(|entries| entries.get(&key).cloned())
            .ok_or(CoreError::KeyNotFound(key))
    }

    /// Value under `key`, or `default` if absent.
    pub fn get_or(&self, key: impl Into<FieldKey>, default: impl Into<Value>) -> Value {
        self.get(key).unwrap_or_else(|_| default.into())
    }

    pub fn keys(&self) -> Vec<FieldKey> {
        self.read(|entries| entries.keys().cloned().collect())
    }

    /// Snapshot of all entries in key order.
    pub fn entries(&self) -> Vec<(FieldKey, Value)> {
        self.read(|entries| {
            entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
    }

    /// Set `key` to `value`, returning the previous value.
    pub fn insert(
        &self,
        key: impl Into<FieldKey>,
        value: impl Into<Value>,
    ) -> CoreResult<Option<Value>> {
        let key = key.into();
        let value = value.into();
        self.modify(|entries| {
            let previous = entries.insert(key.clone(), value);
            Ok((previous, vec![key]))
        })
    }

    pub fn delete(&self, key: impl Into<FieldKey>) -> CoreResult<()> {
        self.pop(key).map(drop)
    }

    /// Remove `key` and return its value.
    pub fn pop(&self, key: impl Into<FieldKey>) -> CoreResult<Value> {
        let key = key.into();
        self.modify(|entries| match entries.remove(&key) {
            Some(value) => Ok((value, vec![key])),
            None => Err(CoreError::KeyNotFound(key)),
        })
    }

    /// Remove `key` if present; otherwise return `default` and dirty nothing.
    pub fn pop_or(&self, key: impl Into<FieldKey>, default: impl Into<Value>) -> CoreResult<Value> {
        let key = key.into();
        let default = default.into();
        self.modify(|entries| match entries.remove(&key) {
            Some(value) => Ok((value, vec![key])),
            None => Ok((default, Vec::new())),
        })
    }

    /// Remove and return the entry with the greatest key.
    pub fn popitem(&self) -> CoreResult<Option<(FieldKey, Value)>> {
        self.modify(|entries| match entries.pop_last() {
            Some((key, value)) => Ok((Some((key.clone(), value)), vec![key])),
            None => Ok((None, Vec::new())),
        })
    }

    pub fn clear(&self) -> CoreResult<()> {
        self.modify(|entries| {
            let old = std::mem::take(entries);
            Ok(((), old.into_keys().collect()))
        })
    }

    /// Insert every pair. All keys present afterwards become dirty.
    pub fn update<I, K, V>(&self, pairs: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<FieldKey>,
        V: Into<Value>,
    {
        let pairs: Vec<(FieldKey, Value)> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.modify(|entries| {
            entries.extend(pairs);
            Ok(((), entries.keys().cloned().collect()))
        })
    }
}

impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Map").field("id", &self.id()).finish()
    }
}
