use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::scalar::Scalar;
use crate::tag::Tag;

/// One stored cell: the `(ref_tag, value)` pair of a `data` row.
///
/// A missing tag means `value` is a plain scalar. A present tag means
/// `value` is a reference target to be interpreted according to the tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredValue {
    pub tag: Option<Tag>,
    pub value: Scalar,
}

impl StoredValue {
    /// Target written for the unset sentinel.
    pub const UNSET_TARGET: i64 = -1;

    pub fn scalar(value: Scalar) -> Self {
        Self { tag: None, value }
    }

    pub fn reference(tag: Tag, target: Scalar) -> Self {
        Self {
            tag: Some(tag),
            value: target,
        }
    }

    pub fn entity(tag: Tag, id: EntityId) -> Self {
        Self::reference(tag, Scalar::from(id))
    }

    pub fn unset() -> Self {
        Self::reference(Tag::Unset, Scalar::Int(Self::UNSET_TARGET))
    }

    pub fn is_reference(&self) -> bool {
        self.tag.is_some()
    }
}

impl fmt::Display for StoredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            None => write!(f, "{}", self.value),
            Some(tag) => write!(f, "<{tag} {}>", self.value),
        }
    }
}
