//! Self-describing text codec: `{"type": <name>, "value": <value>}`.
//!
//! Used for debugging, import/export, and the checkpoint `.meta` sidecar's
//! companion tooling — anywhere a human or another process benefits from
//! a readable envelope rather than the binary codec's dense byte layout.
//! Not required to interoperate byte-for-byte with the binary codec; only
//! the value it represents must roundtrip (§8).

use chrono::{TimeZone, Utc};
use serde_json::{json, Map as JsonMap, Value as Json};

use crate::error::Error;
use crate::value::{Date, DataType, TypedValue, ValueMap, MAX_NESTING_DEPTH};
use crate::Result;

/// Serializes `v` to the self-describing JSON text form. `pretty`
/// controls whether the output is pretty-printed.
pub fn serialize_text(v: &TypedValue, pretty: bool) -> Result<String> {
    let json = to_json(v);
    if pretty {
        serde_json::to_string_pretty(&json).map_err(Error::from)
    } else {
        serde_json::to_string(&json).map_err(Error::from)
    }
}

/// Parses a string produced by [`serialize_text`] back into a `TypedValue`.
pub fn deserialize_text(text: &str) -> Result<TypedValue> {
    let json: Json = serde_json::from_str(text)?;
    from_json(&json, 0)
}

fn to_json(v: &TypedValue) -> Json {
    let (type_name, value) = match v {
        TypedValue::Null => (DataType::Null.name(), Json::Null),
        TypedValue::Int(n) => (DataType::Int.name(), json!(n)),
        TypedValue::Float(f) => (DataType::Float.name(), json!(f)),
        TypedValue::Double(d) => (DataType::Double.name(), json!(d)),
        TypedValue::String(s) => (DataType::String.name(), json!(s)),
        TypedValue::Timestamp(ms) => {
            let dt = Utc.timestamp_millis_opt(*ms).single().unwrap_or_else(Utc::now);
            (
                DataType::Timestamp.name(),
                json!(dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            )
        }
        TypedValue::Date(d) => (DataType::Date.name(), json!(d.to_string())),
        TypedValue::List(items) => (
            DataType::List.name(),
            Json::Array(items.iter().map(to_json).collect()),
        ),
        TypedValue::Set(items) => (
            DataType::Set.name(),
            Json::Array(items.iter().map(to_json).collect()),
        ),
        TypedValue::Map(m) => {
            let mut obj = JsonMap::new();
            for (k, val) in m {
                obj.insert(k.clone(), to_json(val));
            }
            (DataType::Map.name(), Json::Object(obj))
        }
        TypedValue::Blob(b) => {
            use base64::Engine;
            (
                DataType::Blob.name(),
                json!(base64::engine::general_purpose::STANDARD.encode(b)),
            )
        }
    };
    json!({ "type": type_name, "value": value })
}

fn from_json(json: &Json, depth: u32) -> Result<TypedValue> {
    if depth > MAX_NESTING_DEPTH {
        return Err(Error::Codec(format!(
            "nesting depth exceeds {MAX_NESTING_DEPTH}"
        )));
    }
    let obj = json
        .as_object()
        .ok_or_else(|| Error::Codec("expected a {type, value} object".into()))?;
    let type_name = obj
        .get("type")
        .and_then(Json::as_str)
        .ok_or_else(|| Error::Codec("missing 'type' field".into()))?;
    let value = obj
        .get("value")
        .ok_or_else(|| Error::Codec("missing 'value' field".into()))?;

    Ok(match type_name {
        "Null" => TypedValue::Null,
        "Int" => TypedValue::Int(
            value
                .as_i64()
                .ok_or_else(|| Error::Codec("expected integer value".into()))?,
        ),
        "Float" => TypedValue::Float(
            value
                .as_f64()
                .ok_or_else(|| Error::Codec("expected float value".into()))? as f32,
        ),
        "Double" => TypedValue::Double(
            value
                .as_f64()
                .ok_or_else(|| Error::Codec("expected double value".into()))?,
        ),
        "String" => TypedValue::String(
            value
                .as_str()
                .ok_or_else(|| Error::Codec("expected string value".into()))?
                .to_string(),
        ),
        "Timestamp" => {
            let s = value
                .as_str()
                .ok_or_else(|| Error::Codec("expected timestamp string".into()))?;
            let dt = chrono::DateTime::parse_from_rfc3339(s)
                .or_else(|_| chrono::DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ"))
                .map_err(|e| Error::Codec(format!("bad timestamp '{s}': {e}")))?;
            TypedValue::Timestamp(dt.timestamp_millis())
        }
        "Date" => {
            let s = value
                .as_str()
                .ok_or_else(|| Error::Codec("expected date string".into()))?;
            let parts: Vec<&str> = s.split('-').collect();
            if parts.len() != 3 {
                return Err(Error::Codec(format!("bad date '{s}'")));
            }
            let year: i32 = parts[0].parse().map_err(|_| Error::Codec(format!("bad date '{s}'")))?;
            let month: i32 = parts[1].parse().map_err(|_| Error::Codec(format!("bad date '{s}'")))?;
            let day: i32 = parts[2].parse().map_err(|_| Error::Codec(format!("bad date '{s}'")))?;
            TypedValue::Date(Date::new(year, month, day))
        }
        "List" | "Set" => {
            let arr = value
                .as_array()
                .ok_or_else(|| Error::Codec("expected array value".into()))?;
            let items: Result<Vec<TypedValue>> =
                arr.iter().map(|item| from_json(item, depth + 1)).collect();
            let items = items?;
            if type_name == "Set" {
                TypedValue::new_set(items)
            } else {
                TypedValue::List(items)
            }
        }
        "Map" => {
            let obj = value
                .as_object()
                .ok_or_else(|| Error::Codec("expected object value".into()))?;
            let mut map = ValueMap::new();
            for (k, v) in obj {
                map.insert(k.clone(), from_json(v, depth + 1)?);
            }
            TypedValue::Map(map)
        }
        "Blob" => {
            use base64::Engine;
            let s = value
                .as_str()
                .ok_or_else(|| Error::Codec("expected base64 blob string".into()))?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(s)
                .map_err(|e| Error::Codec(format!("bad base64: {e}")))?;
            TypedValue::Blob(bytes)
        }
        other => return Err(Error::Codec(format!("unknown type tag '{other}'"))),
    })
}
