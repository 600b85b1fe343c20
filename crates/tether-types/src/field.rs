use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of one stored cell within an entity.
///
/// Records use text field names, sequences use integer indices, and maps
/// use whichever of the two their keys are. The `data` table's `field`
/// column holds this value untyped.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldKey {
    Int(i64),
    Text(String),
}

impl FieldKey {
    /// Key for sequence position `index`.
    pub fn index(index: usize) -> Self {
        Self::Int(index as i64)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(name) => Some(name),
            Self::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Text(_) => None,
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(name) => write!(f, "{name}"),
        }
    }
}

impl From<&str> for FieldKey {
    fn from(name: &str) -> Self {
        Self::Text(name.to_string())
    }
}

impl From<String> for FieldKey {
    fn from(name: String) -> Self {
        Self::Text(name)
    }
}

impl From<i64> for FieldKey {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_sort_before_text() {
        let mut keys = vec![FieldKey::from("b"), FieldKey::Int(2), FieldKey::from("a"), FieldKey::Int(-1)];
        keys.sort();
        assert_eq!(
            keys,
            vec![FieldKey::Int(-1), FieldKey::Int(2), FieldKey::from("a"), FieldKey::from("b")]
        );
    }

    #[test]
    fn index_key() {
        assert_eq!(FieldKey::index(4), FieldKey::Int(4));
        assert_eq!(FieldKey::index(4).as_int(), Some(4));
        assert_eq!(FieldKey::index(4).as_text(), None);
    }

    #[test]
    fn untagged_json() {
        assert_eq!(serde_json::to_string(&FieldKey::Int(3)).unwrap(), "3");
        assert_eq!(serde_json::to_string(&FieldKey::from("x")).unwrap(), "\"x\"");
    }
}
