//! Error types for the persistence engine.

use tether_types::{EntityId, FieldKey, TypeError};

/// Errors produced by the persistence engine.
///
/// None of these are retried internally; retry policy belongs to the
/// application.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// No field spec is registered under this class name.
    #[error("class not registered: {0}")]
    ClassNotRegistered(String),

    /// A record's class does not match the class it was used as.
    #[error("class mismatch: expected {expected}, found {found}")]
    ClassMismatch { expected: String, found: String },

    /// A class spec redeclares an inherited (or already declared) field.
    #[error("class {class} redeclares field {field}")]
    DuplicateFieldOverride { class: String, field: String },

    /// The class name collides with a reserved aggregate tag.
    #[error("class name is reserved: {0}")]
    ReservedClassName(String),

    /// Get or set on a field the class does not declare.
    #[error("field {field} is not declared by {class}")]
    FieldNotDeclared { class: String, field: String },

    /// A value cannot be encoded: it is neither an allowed scalar, an
    /// aggregate, nor claimed by a resolver.
    #[error("unsupported type for storage: {0}")]
    UnsupportedType(&'static str),

    /// A stored reference has an unknown or malformed tag or target.
    #[error("cannot dereference {tag}: {reason}")]
    DereferenceFailure { tag: String, reason: String },

    /// Sequence access outside `0..len`.
    #[error("index {index} out of range for sequence of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// Map access on an absent key.
    #[error("key not found: {0}")]
    KeyNotFound(FieldKey),

    /// A row the loader expected is missing from the store.
    #[error("failed to load field {field} of {entity}")]
    LoadFailure { entity: EntityId, field: FieldKey },

    /// The engine (or its cache controller) has been shut down.
    #[error("engine is shut down")]
    Shutdown,

    /// Configuration could not be parsed or serialized.
    #[error("config error: {0}")]
    Config(String),

    /// Error from the row store.
    #[error("store error: {0}")]
    Store(#[from] tether_store::StoreError),

    /// Error converting a stored scalar or tag.
    #[error("type error: {0}")]
    Type(#[from] TypeError),
}

/// Convenience alias for engine results.
pub type CoreResult<T> = Result<T, CoreError>;
