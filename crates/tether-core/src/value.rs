//! Live field values.

use std::cmp::Ordering;
use std::fmt;

use tether_types::{EntityId, Scalar};

use crate::map::Map;
use crate::record::Record;
use crate::sequence::Sequence;

/// The value held by one field of a live entity.
///
/// Scalars are held by value. Aggregates and records are handles: cloning a
/// `Value` that holds one yields another handle to the same entity, and
/// equality compares identity, not contents.
#[derive(Clone, Debug)]
pub enum Value {
    /// Declared but never assigned. Distinct from `Null`.
    Unset,
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Sequence(Sequence),
    Map(Map),
    Record(Record),
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Null => "null",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Sequence(_) => "sequence",
            Self::Map(_) => "map",
            Self::Record(_) => "record",
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&Sequence> {
        match self {
            Self::Sequence(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }

    /// The plain scalar this value holds, if it is one.
    pub fn to_scalar(&self) -> Option<Scalar> {
        match self {
            Self::Null => Some(Scalar::Null),
            Self::Int(v) => Some(Scalar::Int(*v)),
            Self::Float(v) => Some(Scalar::Float(*v)),
            Self::Text(v) => Some(Scalar::Text(v.clone())),
            Self::Bytes(v) => Some(Scalar::Bytes(v.clone())),
            Self::Unset | Self::Sequence(_) | Self::Map(_) | Self::Record(_) => None,
        }
    }

    /// Identity of the referenced entity, for handle values.
    pub fn entity_id(&self) -> Option<EntityId> {
        match self {
            Self::Sequence(s) => Some(s.id()),
            Self::Map(m) => Some(m.id()),
            Self::Record(r) => Some(r.id()),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Unset => 0,
            Self::Null => 1,
            Self::Int(_) | Self::Float(_) => 2,
            Self::Text(_) => 3,
            Self::Bytes(_) => 4,
            Self::Sequence(_) => 5,
            Self::Map(_) => 6,
            Self::Record(_) => 7,
        }
    }

    /// Total order used by [`Sequence::sort`].
    ///
    /// Values group by kind (unset, null, numbers, text, bytes, sequences,
    /// maps, records). Integers and floats compare numerically with each
    /// other; handles compare by entity id.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Int(a), Self::Float(b)) => (*a as f64).total_cmp(b),
            (Self::Float(a), Self::Int(b)) => a.total_cmp(&(*b as f64)),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Bytes(a), Self::Bytes(b)) => a.cmp(b),
            _ => match (self.entity_id(), other.entity_id()) {
                (Some(a), Some(b)) if self.rank() == other.rank() => a.cmp(&b),
                _ => self.rank().cmp(&other.rank()),
            },
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unset, Self::Unset) | (Self::Null, Self::Null) => true,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Sequence(a), Self::Sequence(b)) => a.id() == b.id(),
            (Self::Map(a), Self::Map(b)) => a.id() == b.id(),
            (Self::Record(a), Self::Record(b)) => a.id() == b.id(),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => write!(f, "<unset>"),
            Self::Sequence(s) => write!(f, "sequence{}(len {})", s.id(), s.len()),
            Self::Map(m) => write!(f, "map{}(len {})", m.id(), m.len()),
            Self::Record(r) => write!(f, "{}{}", r.class_name(), r.id()),
            other => match other.to_scalar() {
                Some(scalar) => write!(f, "{scalar}"),
                None => Ok(()),
            },
        }
    }
}

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Null => Self::Null,
            Scalar::Int(v) => Self::Int(v),
            Scalar::Float(v) => Self::Float(v),
            Scalar::Text(v) => Self::Text(v),
            Scalar::Bytes(v) => Self::Bytes(v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<Sequence> for Value {
    fn from(s: Sequence) -> Self {
        Self::Sequence(s)
    }
}

impl From<Map> for Value {
    fn from(m: Map) -> Self {
        Self::Map(m)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Self::Record(r)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
