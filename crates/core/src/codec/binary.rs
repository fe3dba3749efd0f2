//! Binary codec: tag byte + little-endian fixed fields, `u32`-length
//! prefixes for variable-length payloads. This is the wire format for WAL
//! payloads and is required to be stable across versions (§6.1).

use byteorder::{ByteOrder, LittleEndian};

use crate::error::Error;
use crate::value::{Date, DataType, TypedValue, ValueMap, MAX_NESTING_DEPTH};
use crate::Result;

/// Serializes `v` to the binary wire format.
pub fn serialize_binary(v: &TypedValue) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    write_value(v, &mut out, 0);
    out
}

/// Deserializes a binary payload produced by [`serialize_binary`]. Fails
/// with [`Error::Codec`] on any malformed or truncated input — the codec
/// never guesses.
pub fn deserialize_binary(bytes: &[u8]) -> Result<TypedValue> {
    let mut cursor = 0usize;
    let value = read_value(bytes, &mut cursor, 0)?;
    if cursor != bytes.len() {
        return Err(Error::Codec(format!(
            "trailing {} byte(s) after value",
            bytes.len() - cursor
        )));
    }
    Ok(value)
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    let mut buf = [0u8; 4];
    LittleEndian::write_u32(&mut buf, v);
    out.extend_from_slice(&buf);
}

fn write_i64(out: &mut Vec<u8>, v: i64) {
    let mut buf = [0u8; 8];
    LittleEndian::write_i64(&mut buf, v);
    out.extend_from_slice(&buf);
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

fn write_value(v: &TypedValue, out: &mut Vec<u8>, depth: u32) {
    out.push(v.data_type() as u8);
    match v {
        TypedValue::Null => {}
        TypedValue::Int(n) => write_i64(out, *n),
        TypedValue::Float(f) => {
            let mut buf = [0u8; 4];
            LittleEndian::write_f32(&mut buf, *f);
            out.extend_from_slice(&buf);
        }
        TypedValue::Double(d) => {
            let mut buf = [0u8; 8];
            LittleEndian::write_f64(&mut buf, *d);
            out.extend_from_slice(&buf);
        }
        TypedValue::String(s) => write_bytes(out, s.as_bytes()),
        TypedValue::Timestamp(ms) => write_i64(out, *ms),
        TypedValue::Date(d) => {
            let mut buf = [0u8; 4];
            LittleEndian::write_i32(&mut buf, d.year);
            out.extend_from_slice(&buf);
            LittleEndian::write_i32(&mut buf, d.month);
            out.extend_from_slice(&buf);
            LittleEndian::write_i32(&mut buf, d.day);
            out.extend_from_slice(&buf);
        }
        TypedValue::List(items) | TypedValue::Set(items) => {
            write_u32(out, items.len() as u32);
            for item in items {
                let mut sub = Vec::new();
                write_value(item, &mut sub, depth + 1);
                write_bytes(out, &sub);
            }
        }
        TypedValue::Map(m) => {
            write_u32(out, m.len() as u32);
            for (k, val) in m {
                write_bytes(out, k.as_bytes());
                let mut sub = Vec::new();
                write_value(val, &mut sub, depth + 1);
                write_bytes(out, &sub);
            }
        }
        TypedValue::Blob(b) => write_bytes(out, b),
    }
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    if *cursor + 4 > bytes.len() {
        return Err(Error::Codec("truncated u32".into()));
    }
    let v = LittleEndian::read_u32(&bytes[*cursor..*cursor + 4]);
    *cursor += 4;
    Ok(v)
}

fn read_i64(bytes: &[u8], cursor: &mut usize) -> Result<i64> {
    if *cursor + 8 > bytes.len() {
        return Err(Error::Codec("truncated i64".into()));
    }
    let v = LittleEndian::read_i64(&bytes[*cursor..*cursor + 8]);
    *cursor += 8;
    Ok(v)
}

fn read_i32(bytes: &[u8], cursor: &mut usize) -> Result<i32> {
    if *cursor + 4 > bytes.len() {
        return Err(Error::Codec("truncated i32".into()));
    }
    let v = LittleEndian::read_i32(&bytes[*cursor..*cursor + 4]);
    *cursor += 4;
    Ok(v)
}

fn read_bytes<'a>(bytes: &'a [u8], cursor: &mut usize) -> Result<&'a [u8]> {
    let len = read_u32(bytes, cursor)? as usize;
    if *cursor + len > bytes.len() {
        return Err(Error::Codec("truncated byte string".into()));
    }
    let slice = &bytes[*cursor..*cursor + len];
    *cursor += len;
    Ok(slice)
}

fn read_value(bytes: &[u8], cursor: &mut usize, depth: u32) -> Result<TypedValue> {
    if depth > MAX_NESTING_DEPTH {
        return Err(Error::Codec(format!(
            "nesting depth exceeds {MAX_NESTING_DEPTH}"
        )));
    }
    if *cursor >= bytes.len() {
        return Err(Error::Codec("truncated tag byte".into()));
    }
    let tag = bytes[*cursor];
    *cursor += 1;
    let data_type = DataType::from_tag(tag).ok_or_else(|| Error::Codec(format!("unknown type tag {tag}")))?;

    Ok(match data_type {
        DataType::Null => TypedValue::Null,
        DataType::Int => TypedValue::Int(read_i64(bytes, cursor)?),
        DataType::Float => {
            if *cursor + 4 > bytes.len() {
                return Err(Error::Codec("truncated f32".into()));
            }
            let v = LittleEndian::read_f32(&bytes[*cursor..*cursor + 4]);
            *cursor += 4;
            TypedValue::Float(v)
        }
        DataType::Double => {
            if *cursor + 8 > bytes.len() {
                return Err(Error::Codec("truncated f64".into()));
            }
            let v = LittleEndian::read_f64(&bytes[*cursor..*cursor + 8]);
            *cursor += 8;
            TypedValue::Double(v)
        }
        DataType::String => {
            let s = read_bytes(bytes, cursor)?;
            TypedValue::String(
                String::from_utf8(s.to_vec()).map_err(|e| Error::Codec(e.to_string()))?,
            )
        }
        DataType::Timestamp => TypedValue::Timestamp(read_i64(bytes, cursor)?),
        DataType::Date => {
            let year = read_i32(bytes, cursor)?;
            let month = read_i32(bytes, cursor)?;
            let day = read_i32(bytes, cursor)?;
            TypedValue::Date(Date::new(year, month, day))
        }
        DataType::List | DataType::Set => {
            let count = read_u32(bytes, cursor)?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let sub = read_bytes(bytes, cursor)?;
                let mut sub_cursor = 0;
                items.push(read_value(sub, &mut sub_cursor, depth + 1)?);
            }
            if data_type == DataType::Set {
                TypedValue::Set(items)
            } else {
                TypedValue::List(items)
            }
        }
        DataType::Map => {
            let count = read_u32(bytes, cursor)?;
            let mut map = ValueMap::new();
            for _ in 0..count {
                let key_bytes = read_bytes(bytes, cursor)?;
                let key =
                    String::from_utf8(key_bytes.to_vec()).map_err(|e| Error::Codec(e.to_string()))?;
                let sub = read_bytes(bytes, cursor)?;
                let mut sub_cursor = 0;
                map.insert(key, read_value(sub, &mut sub_cursor, depth + 1)?);
            }
            TypedValue::Map(map)
        }
        DataType::Blob => TypedValue::Blob(read_bytes(bytes, cursor)?.to_vec()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: TypedValue) {
        let bytes = serialize_binary(&v);
        let back = deserialize_binary(&bytes).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn roundtrip_scalars() {
        roundtrip(TypedValue::Null);
        roundtrip(TypedValue::Int(-42));
        roundtrip(TypedValue::Float(1.5));
        roundtrip(TypedValue::Double(-3.25));
        roundtrip(TypedValue::String("hello".into()));
        roundtrip(TypedValue::Timestamp(1_700_000_000_000));
        roundtrip(TypedValue::Date(Date::new(2024, 1, 31)));
        roundtrip(TypedValue::Blob(vec![0, 1, 2, 255]));
    }

    #[test]
    fn roundtrip_containers() {
        roundtrip(TypedValue::List(vec![TypedValue::Int(1), TypedValue::String("a".into())]));
        roundtrip(TypedValue::new_set(vec![TypedValue::Int(3), TypedValue::Int(1)]));
        let mut m = ValueMap::new();
        m.insert("x".into(), TypedValue::Int(1));
        m.insert("y".into(), TypedValue::String("z".into()));
        roundtrip(TypedValue::Map(m));
    }

    #[test]
    fn roundtrip_nested_containers() {
        let nested = TypedValue::List(vec![TypedValue::List(vec![TypedValue::Int(1)])]);
        roundtrip(nested);
    }

    #[test]
    fn truncated_input_fails() {
        let bytes = serialize_binary(&TypedValue::Int(7));
        let truncated = &bytes[..bytes.len() - 1];
        assert!(deserialize_binary(truncated).is_err());
    }

    #[test]
    fn unknown_tag_fails() {
        let bytes = [200u8];
        assert!(deserialize_binary(&bytes).is_err());
    }

    #[test]
    fn trailing_bytes_fail() {
        let mut bytes = serialize_binary(&TypedValue::Int(7));
        bytes.push(0xFF);
        assert!(deserialize_binary(&bytes).is_err());
    }

    #[test]
    fn depth_guard_rejects_deep_nesting() {
        let mut value = TypedValue::Int(0);
        for _ in 0..(MAX_NESTING_DEPTH as usize + 5) {
            value = TypedValue::List(vec![value]);
        }
        let bytes = serialize_binary(&value);
        assert!(deserialize_binary(&bytes).is_err());
    }
}

/// Property: `deserialize_binary(serialize_binary(v)) == v` for any value a
/// caller could actually construct, scalars and shallow containers alike
/// (spec §8's codec roundtrip law).
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn leaf() -> impl Strategy<Value = TypedValue> {
        prop_oneof![
            Just(TypedValue::Null),
            any::<i64>().prop_map(TypedValue::Int),
            any::<f32>().prop_filter("no NaN", |f| !f.is_nan()).prop_map(TypedValue::Float),
            any::<f64>().prop_filter("no NaN", |f| !f.is_nan()).prop_map(TypedValue::Double),
            "[a-zA-Z0-9 ]{0,16}".prop_map(TypedValue::String),
            any::<i64>().prop_map(TypedValue::Timestamp),
            (1970..2100i32, 1..13i32, 1..29i32)
                .prop_map(|(y, m, d)| TypedValue::Date(Date::new(y, m, d))),
            prop::collection::vec(any::<u8>(), 0..16).prop_map(TypedValue::Blob),
        ]
    }

    fn arbitrary_value() -> impl Strategy<Value = TypedValue> {
        leaf().prop_recursive(4, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(TypedValue::List),
                prop::collection::vec(inner.clone(), 0..4).prop_map(TypedValue::new_set),
                prop::collection::vec(("[a-z]{1,8}", inner), 0..4).prop_map(|pairs| {
                    let mut map = ValueMap::new();
                    for (k, v) in pairs {
                        map.insert(k, v);
                    }
                    TypedValue::Map(map)
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn roundtrip_is_lossless(v in arbitrary_value()) {
            let bytes = serialize_binary(&v);
            let back = deserialize_binary(&bytes).unwrap();
            prop_assert_eq!(v, back);
        }
    }
}
