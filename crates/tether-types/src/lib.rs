//! Foundation types for Tether.
//!
//! This crate provides the identity and storage-level value types shared by
//! every other Tether crate. Nothing here knows about live objects or
//! change tracking; these are the shapes that cross the storage boundary.
//!
//! # Key Types
//!
//! - [`EntityId`] -- Globally unique identity of a persisted entity
//! - [`IdAllocator`] -- The single monotonic counter ids are drawn from
//! - [`Scalar`] -- The allowed plain value set (integer, float, text, bytes, null)
//! - [`FieldKey`] -- A field name, sequence index, or map key
//! - [`Tag`] -- How to interpret a stored reference value
//! - [`StoredValue`] -- One `(ref_tag, value)` cell of the `data` table

pub mod entity;
pub mod error;
pub mod field;
pub mod scalar;
pub mod stored;
pub mod tag;

pub use entity::{EntityId, IdAllocator};
pub use error::TypeError;
pub use field::FieldKey;
pub use scalar::Scalar;
pub use stored::StoredValue;
pub use tag::Tag;
