use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Identifies how the `value` of a tagged storage cell is interpreted.
///
/// `Unset`, `Sequence` and `Map` are reserved by the engine; any other tag
/// belongs to a pluggable reference resolver.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Tag {
    /// The field was declared but never assigned.
    Unset,
    /// The value is the entity id of a sequence.
    Sequence,
    /// The value is the entity id of a map.
    Map,
    /// A resolver-defined reference kind.
    External(String),
}

impl Tag {
    pub const UNSET: &'static str = "unset";
    pub const SEQUENCE: &'static str = "sequence";
    pub const MAP: &'static str = "map";

    /// Parse a stored tag string.
    pub fn parse(raw: &str) -> Result<Self, TypeError> {
        match raw {
            "" => Err(TypeError::EmptyTag),
            Self::UNSET => Ok(Self::Unset),
            Self::SEQUENCE => Ok(Self::Sequence),
            Self::MAP => Ok(Self::Map),
            other => Ok(Self::External(other.to_string())),
        }
    }

    pub fn external(name: impl Into<String>) -> Self {
        Self::External(name.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Unset => Self::UNSET,
            Self::Sequence => Self::SEQUENCE,
            Self::Map => Self::MAP,
            Self::External(name) => name,
        }
    }

    /// Whether `name` collides with one of the engine's own tags.
    pub fn is_reserved(name: &str) -> bool {
        matches!(name, Self::UNSET | Self::SEQUENCE | Self::MAP)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.as_str().to_string()
    }
}

impl TryFrom<String> for Tag {
    type Error = TypeError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Tag::parse(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_tags_parse() {
        assert_eq!(Tag::parse("unset").unwrap(), Tag::Unset);
        assert_eq!(Tag::parse("sequence").unwrap(), Tag::Sequence);
        assert_eq!(Tag::parse("map").unwrap(), Tag::Map);
    }

    #[test]
    fn unknown_tags_are_external() {
        assert_eq!(Tag::parse("object").unwrap(), Tag::external("object"));
        assert_eq!(Tag::external("object").as_str(), "object");
    }

    #[test]
    fn empty_tag_is_rejected() {
        assert_eq!(Tag::parse(""), Err(TypeError::EmptyTag));
    }

    #[test]
    fn reserved_names() {
        assert!(Tag::is_reserved("map"));
        assert!(!Tag::is_reserved("Ship"));
    }

    #[test]
    fn serializes_as_plain_string() {
        assert_eq!(serde_json::to_string(&Tag::Sequence).unwrap(), "\"sequence\"");
        let back: Tag = serde_json::from_str("\"object\"").unwrap();
        assert_eq!(back, Tag::external("object"));
    }
}
