use tether_types::{EntityId, TypeError};

/// Errors from row store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An `objects` row with this id already exists.
    #[error("entity already stored: {0}")]
    DuplicateEntity(EntityId),

    /// A stored row could not be interpreted.
    #[error("corrupt row for {entity}: {reason}")]
    Corrupt { entity: EntityId, reason: String },

    /// A stored scalar or tag failed conversion.
    #[error("type error: {0}")]
    Type(#[from] TypeError),

    /// Error from the SQLite engine.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
