//! Object-graph persistence engine for Tether.
//!
//! This crate gives live records, sequences and maps durable storage in a
//! [`RowStore`](tether_store::RowStore) while preserving reference identity
//! across reload, cycles included, and writing only the fields that changed.
//!
//! # Data Flow
//!
//! A mutation updates an entity's cache and marks the touched fields dirty
//! on its [`Context`]. The context hands itself to the [`CacheController`],
//! which decides per [`CacheMode`] when to flush. A flush calls
//! [`Backend::set`] for every pending context; the backend encodes each
//! dirty value with the [`Codec`] and writes it.
//!
//! Reload runs the other way. [`Engine::reload_all`] registers an empty
//! stub for every stored record, then loads each stub's fields, resolving
//! record references against the [`Registry`] instead of constructing new
//! instances.
//!
//! # Key Types
//!
//! - [`Engine`] -- an open store with its registries and cache
//! - [`Record`] -- the persistence proxy for a top-level record
//! - [`Sequence`] / [`Map`] -- persistence-aware aggregates
//! - [`Value`] -- a field value: scalar, unset, or entity handle
//! - [`persistent_class!`] -- declares a typed record wrapper
//!
//! # Design Rules
//!
//! 1. No two live entities share an id; ids are never reused.
//! 2. Only declared fields of a record are persistent.
//! 3. A failed flush leaves the affected contexts dirty for a later retry.
//! 4. Nothing is retried internally and nothing is garbage collected.

pub mod backend;
pub mod cache;
pub mod class;
pub mod codec;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
mod macros;
pub mod map;
pub mod record;
pub mod registry;
pub mod sequence;
pub mod value;

pub use backend::{Backend, Persisted, RowBackend};
pub use cache::{CacheController, CacheMode, Clock, ManualClock, SystemClock};
pub use class::{ClassSpec, ClassSpecBuilder};
pub use codec::{Codec, ReferenceResolver};
pub use config::EngineConfig;
pub use context::{Context, EntityKind, SaveHook};
pub use engine::{Engine, EngineBuilder};
pub use error::{CoreError, CoreResult};
pub use map::Map;
pub use record::{FieldHandle, Persistent, Record, RecordResolver, RECORD_TAG};
pub use registry::Registry;
pub use sequence::Sequence;
pub use value::Value;

pub use tether_types::{EntityId, FieldKey, Scalar};
