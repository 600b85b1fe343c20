use serde_json::{json, Value as Json};
use tether_core::{Scalar, Value};
use tether_types::StoredValue;

pub fn scalar_json(scalar: &Scalar) -> Json {
    match scalar {
        Scalar::Null => Json::Null,
        Scalar::Int(v) => json!(v),
        Scalar::Float(v) => json!(v),
        Scalar::Text(v) => json!(v),
        Scalar::Bytes(v) => json!({ "$bytes": hex::encode(v) }),
    }
}

pub fn stored_json(stored: &StoredValue) -> Json {
    match &stored.tag {
        None => scalar_json(&stored.value),
        Some(tag) => json!({ "tag": tag.as_str(), "value": scalar_json(&stored.value) }),
    }
}

/// One-line text form of a live value. Aggregates are expanded one level.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Sequence(seq) => {
            let items: Vec<String> = seq.to_vec().iter().map(ToString::to_string).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Map(map) => {
            let entries: Vec<String> = map
                .entries()
                .iter()
                .map(|(key, value)| format!("{key}: {value}"))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
        other => other.to_string(),
    }
}

/// JSON form of a live value. References to other entities become
/// `$ref`/`$sequence`/`$map` objects; aggregates are expanded one level.
pub fn value_json(value: &Value) -> Json {
    match value {
        Value::Unset => json!({ "$unset": true }),
        Value::Record(record) => json!({ "$ref": record.id().get(), "class": record.class_name() }),
        Value::Sequence(seq) => json!({
            "$sequence": seq.id().get(),
            "items": seq.to_vec().iter().map(shallow_json).collect::<Vec<_>>(),
        }),
        Value::Map(map) => {
            let entries: serde_json::Map<String, Json> = map
                .entries()
                .iter()
                .map(|(key, value)| (key.to_string(), shallow_json(value)))
                .collect();
            json!({ "$map": map.id().get(), "entries": entries })
        }
        other => other.to_scalar().map_or(Json::Null, |s| scalar_json(&s)),
    }
}

fn shallow_json(value: &Value) -> Json {
    match value {
        Value::Sequence(seq) => json!({ "$sequence": seq.id().get() }),
        Value::Map(map) => json!({ "$map": map.id().get() }),
        other => value_json(other),
    }
}
