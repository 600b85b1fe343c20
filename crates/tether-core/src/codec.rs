//! Reference codec: live values to and from stored cells.

use std::sync::Arc;

use tether_types::{Scalar, StoredValue, Tag};

use crate::error::{CoreError, CoreResult};
use crate::value::Value;

/// Pluggable handler for domain-specific reference kinds.
///
/// Resolvers are consulted before the codec's built-in rules, in the order
/// they were added. Returning `None` passes the value on.
pub trait ReferenceResolver: Send + Sync {
    /// Claim `value` and return its `(target, tag)` form.
    fn resolve_encode(&self, value: &Value) -> Option<(Scalar, Tag)>;

    /// Turn a tagged cell back into a live value.
    ///
    /// Errors are for cells this resolver owns but cannot satisfy, such as
    /// a dangling target.
    fn resolve_decode(&self, target: &Scalar, tag: &Tag) -> CoreResult<Option<Value>>;
}

/// Encodes field values into [`StoredValue`] cells and back.
///
/// Encoding rules, first match wins:
/// 1. a resolver claims the value;
/// 2. [`Value::Unset`] becomes `(-1, "unset")`;
/// 3. a sequence or map becomes `(id, "sequence" | "map")`;
/// 4. any other non-scalar is `UnsupportedType`;
/// 5. a scalar is stored untagged.
///
/// Decoding mirrors this, except that sequence and map cells are never
/// decoded here: the backend materialises them inline.
#[derive(Clone, Default)]
pub struct Codec {
    resolvers: Vec<Arc<dyn ReferenceResolver>>,
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resolver after the existing ones.
    pub fn with_resolver(mut self, resolver: Arc<dyn ReferenceResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    pub fn resolver_count(&self) -> usize {
        self.resolvers.len()
    }

    pub fn encode(&self, value: &Value) -> CoreResult<StoredValue> {
        for resolver in &self.resolvers {
            if let Some((target, tag)) = resolver.resolve_encode(value) {
                return Ok(StoredValue::reference(tag, target));
            }
        }
        match value {
            Value::Unset => Ok(StoredValue::unset()),
            Value::Sequence(seq) => Ok(StoredValue::entity(Tag::Sequence, seq.id())),
            Value::Map(map) => Ok(StoredValue::entity(Tag::Map, map.id())),
            other => other
                .to_scalar()
                .map(StoredValue::scalar)
                .ok_or(CoreError::UnsupportedType(other.kind())),
        }
    }

    /// Decode one cell. Untagged cells never reach the resolvers.
    pub fn decode(&self, stored: &StoredValue) -> CoreResult<Value> {
        let Some(tag) = &stored.tag else {
            return Ok(Value::from(stored.value.clone()));
        };
        for resolver in &self.resolvers {
            if let Some(value) = resolver.resolve_decode(&stored.value, tag)? {
                return Ok(value);
            }
        }
        match tag {
            Tag::Unset => Ok(Value::Unset),
            Tag::Sequence | Tag::Map => Err(CoreError::DereferenceFailure {
                tag: tag.to_string(),
                reason: "aggregates are materialised by the backend".to_string(),
            }),
            Tag::External(_) => Err(CoreError::DereferenceFailure {
                tag: tag.to_string(),
                reason: "no resolver handles this tag".to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("resolvers", &self.resolvers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tether_types::EntityId;

    use super::*;
    use crate::context::testing::{map_ctx, sequence_ctx, RecordingHook};
    use crate::map::Map;
    use crate::sequence::Sequence;

    /// Stores text starting with `@` as a `handle` reference.
    struct HandleResolver;

    impl ReferenceResolver for HandleResolver {
        fn resolve_encode(&self, value: &Value) -> Option<(Scalar, Tag)> {
            let handle = value.as_text()?.strip_prefix('@')?;
            Some((Scalar::from(handle), Tag::external("handle")))
        }

        fn resolve_decode(&self, target: &Scalar, tag: &Tag) -> CoreResult<Option<Value>> {
            if tag.as_str() != "handle" {
                return Ok(None);
            }
            match target {
                Scalar::Text(handle) => Ok(Some(Value::from(format!("@{handle}")))),
                other => Err(CoreError::DereferenceFailure {
                    tag: tag.to_string(),
                    reason: format!("bad target {other}"),
                }),
            }
        }
    }

    #[test]
    fn scalars_are_untagged() {
        let codec = Codec::new();
        let cell = codec.encode(&Value::Int(7)).unwrap();
        assert_eq!(cell, StoredValue::scalar(Scalar::Int(7)));
        assert_eq!(codec.decode(&cell).unwrap(), Value::Int(7));

        let null = codec.encode(&Value::Null).unwrap();
        assert_eq!(codec.decode(&null).unwrap(), Value::Null);
    }

    #[test]
    fn unset_round_trips() {
        let codec = Codec::new();
        let cell = codec.encode(&Value::Unset).unwrap();
        assert_eq!(cell, StoredValue::unset());
        assert!(codec.decode(&cell).unwrap().is_unset());
    }

    #[test]
    fn containers_encode_as_tagged_ids() {
        let hook = Arc::new(RecordingHook::default());
        let seq = Sequence::from_context(sequence_ctx(3, &hook));
        let map = Map::from_context(map_ctx(4, &hook));
        let codec = Codec::new();

        assert_eq!(
            codec.encode(&Value::from(seq)).unwrap(),
            StoredValue::entity(Tag::Sequence, EntityId::new(3))
        );
        assert_eq!(
            codec.encode(&Value::from(map)).unwrap(),
            StoredValue::entity(Tag::Map, EntityId::new(4))
        );
    }

    #[test]
    fn aggregate_tags_are_not_decoded_here() {
        let codec = Codec::new();
        let cell = StoredValue::entity(Tag::Sequence, EntityId::new(3));
        assert!(matches!(
            codec.decode(&cell),
            Err(CoreError::DereferenceFailure { .. })
        ));
    }

    #[test]
    fn unknown_tag_fails() {
        let codec = Codec::new();
        let cell = StoredValue::reference(Tag::external("ghost"), Scalar::Int(1));
        assert!(matches!(
            codec.decode(&cell),
            Err(CoreError::DereferenceFailure { ref tag, .. }) if tag == "ghost"
        ));
    }

    #[test]
    fn resolver_runs_first() {
        let codec = Codec::new().with_resolver(Arc::new(HandleResolver));
        let cell = codec.encode(&Value::from("@bob")).unwrap();
        assert_eq!(
            cell,
            StoredValue::reference(Tag::external("handle"), Scalar::from("bob"))
        );
        assert_eq!(codec.decode(&cell).unwrap(), Value::from("@bob"));

        // Unclaimed values fall through to the built-in rules.
        let plain = codec.encode(&Value::from("bob")).unwrap();
        assert_eq!(plain, StoredValue::scalar(Scalar::from("bob")));
    }

    #[test]
    fn resolver_errors_propagate() {
        let codec = Codec::new().with_resolver(Arc::new(HandleResolver));
        let cell = StoredValue::reference(Tag::external("handle"), Scalar::Int(1));
        assert!(codec.decode(&cell).is_err());
    }
}
