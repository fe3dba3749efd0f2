//! Encodes/decodes the `key` (+ value, for `Put`) carried in a
//! [`super::entry::WalEntry`]'s payload (spec §3.3: "the payload encodes
//! `key` plus (for `Put`) the serialized typed value"). Shared by the
//! control plane, which builds these payloads on commit, and the recovery
//! manager, which decodes them during replay.

use byteorder::{ByteOrder, LittleEndian};
use kvdb_core::{deserialize_binary, serialize_binary, Error, Result, TypedValue};

/// `key_len (u32) | key bytes | serialize_binary(value)`.
pub fn encode_put(key: &str, value: &TypedValue) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + key.len() + 16);
    let mut len_buf = [0u8; 4];
    LittleEndian::write_u32(&mut len_buf, key.len() as u32);
    out.extend_from_slice(&len_buf);
    out.extend_from_slice(key.as_bytes());
    out.extend_from_slice(&serialize_binary(value));
    out
}

pub fn decode_put(payload: &[u8]) -> Result<(String, TypedValue)> {
    let (key, rest) = decode_key(payload)?;
    let value = deserialize_binary(rest)?;
    Ok((key, value))
}

/// `key_len (u32) | key bytes` (no value — a deletion).
pub fn encode_del(key: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + key.len());
    let mut len_buf = [0u8; 4];
    LittleEndian::write_u32(&mut len_buf, key.len() as u32);
    out.extend_from_slice(&len_buf);
    out.extend_from_slice(key.as_bytes());
    out
}

pub fn decode_del(payload: &[u8]) -> Result<String> {
    let (key, rest) = decode_key(payload)?;
    if !rest.is_empty() {
        return Err(Error::Codec("trailing bytes after delete key".into()));
    }
    Ok(key)
}

fn decode_key(payload: &[u8]) -> Result<(String, &[u8])> {
    if payload.len() < 4 {
        return Err(Error::Codec("truncated payload key length".into()));
    }
    let key_len = LittleEndian::read_u32(&payload[0..4]) as usize;
    if payload.len() < 4 + key_len {
        return Err(Error::Codec("truncated payload key".into()));
    }
    let key = String::from_utf8(payload[4..4 + key_len].to_vec())
        .map_err(|e| Error::Codec(e.to_string()))?;
    Ok((key, &payload[4 + key_len..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_roundtrip() {
        let payload = encode_put("k1", &TypedValue::Int(42));
        let (key, value) = decode_put(&payload).unwrap();
        assert_eq!(key, "k1");
        assert_eq!(value, TypedValue::Int(42));
    }

    #[test]
    fn del_roundtrip() {
        let payload = encode_del("k1");
        assert_eq!(decode_del(&payload).unwrap(), "k1");
    }

    #[test]
    fn truncated_payload_fails() {
        assert!(decode_put(&[1, 0]).is_err());
    }

    #[test]
    fn del_with_trailing_bytes_fails() {
        let mut payload = encode_del("k1");
        payload.push(9);
        assert!(decode_del(&payload).is_err());
    }
}
