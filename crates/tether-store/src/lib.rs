//! Row storage for Tether.
//!
//! Every backend preserves the same logical schema:
//!
//! - `objects(entity_id PRIMARY KEY, type_tag)` -- one row per top-level record
//! - `data(entity_id, field, ref_tag, value)` keyed by `(entity_id, field)` --
//!   one row per stored cell of any entity, records and aggregates alike
//!
//! A store never interprets the cells it holds. Encoding live values into
//! [`StoredValue`](tether_types::StoredValue)s and rebuilding object graphs
//! from them is the job of `tether-core`.
//!
//! # Storage Backends
//!
//! All backends implement the [`RowStore`] trait:
//!
//! - [`InMemoryRowStore`] -- `BTreeMap`-based store for tests and embedding
//! - [`SqliteRowStore`] -- SQLite file (or in-memory) database
//!
//! # Design Rules
//!
//! 1. Writes are buffered until [`RowStore::commit`]; readers on the same
//!    store always see their own uncommitted writes.
//! 2. Cells are replaced whole; there is no partial update.
//! 3. Deleting a row never cascades to entities it references.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryRowStore;
pub use sqlite::SqliteRowStore;
pub use traits::RowStore;
