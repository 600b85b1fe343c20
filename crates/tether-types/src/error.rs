use thiserror::Error;

/// Errors produced by type conversions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("negative entity id: {0}")]
    NegativeId(i64),

    #[error("expected {expected}, got {actual}")]
    UnexpectedScalar {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("empty reference tag")]
    EmptyTag,
}
