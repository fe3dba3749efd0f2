//! `WalEntry`: a single record in the write-ahead log.
//!
//! Binary layout, little-endian, fixed order (spec §4.3):
//! `lsn (u64) | entry_size (u32) | crc32 (u32) | kind (u32) | timestamp_ms
//! (u64) | payload (entry_size bytes)`. `crc32` covers `payload` only — the
//! header fields are checked structurally (kind in range, size fits the
//! remaining segment) rather than checksummed themselves.

use byteorder::{ByteOrder, LittleEndian};
use kvdb_core::{crc32, Error, Result};

/// Fixed-size portion of an entry, everything before the payload.
pub const ENTRY_HEADER_SIZE: usize = 8 + 4 + 4 + 4 + 8;

/// The kind of mutation a WAL entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EntryKind {
    Put = 1,
    Del = 2,
    TxnBegin = 3,
    TxnCommit = 4,
    TxnAbort = 5,
}

impl EntryKind {
    pub fn from_u32(v: u32) -> Result<Self> {
        Ok(match v {
            1 => EntryKind::Put,
            2 => EntryKind::Del,
            3 => EntryKind::TxnBegin,
            4 => EntryKind::TxnCommit,
            5 => EntryKind::TxnAbort,
            other => return Err(Error::Corrupted(format!("unknown WAL entry kind {other}"))),
        })
    }
}

#[derive(Debug, Clone)]
pub struct WalEntry {
    pub lsn: u64,
    pub kind: EntryKind,
    pub timestamp_ms: u64,
    pub payload: Vec<u8>,
}

impl WalEntry {
    pub fn new(lsn: u64, kind: EntryKind, timestamp_ms: u64, payload: Vec<u8>) -> Self {
        WalEntry {
            lsn,
            kind,
            timestamp_ms,
            payload,
        }
    }

    /// Total on-disk size of this entry, header plus payload.
    pub fn encoded_len(&self) -> usize {
        ENTRY_HEADER_SIZE + self.payload.len()
    }

    /// Serializes to the on-disk layout described in the module doc.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        let mut buf8 = [0u8; 8];
        let mut buf4 = [0u8; 4];

        LittleEndian::write_u64(&mut buf8, self.lsn);
        out.extend_from_slice(&buf8);

        LittleEndian::write_u32(&mut buf4, self.payload.len() as u32);
        out.extend_from_slice(&buf4);

        let crc = crc32(&self.payload);
        LittleEndian::write_u32(&mut buf4, crc);
        out.extend_from_slice(&buf4);

        LittleEndian::write_u32(&mut buf4, self.kind as u32);
        out.extend_from_slice(&buf4);

        LittleEndian::write_u64(&mut buf8, self.timestamp_ms);
        out.extend_from_slice(&buf8);

        out.extend_from_slice(&self.payload);
        out
    }

    /// Parses one entry from the front of `bytes`. Returns the entry and
    /// the number of bytes consumed. A truncated header or payload, or a
    /// CRC mismatch, is reported as [`Error::Corrupted`] so the caller
    /// (segment/recovery scan) can stop replay at this point and report a
    /// `PartialSegment`.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < ENTRY_HEADER_SIZE {
            return Err(Error::Corrupted("truncated entry header".into()));
        }
        let lsn = LittleEndian::read_u64(&bytes[0..8]);
        let entry_size = LittleEndian::read_u32(&bytes[8..12]) as usize;
        let crc = LittleEndian::read_u32(&bytes[12..16]);
        let kind = EntryKind::from_u32(LittleEndian::read_u32(&bytes[16..20]))?;
        let timestamp_ms = LittleEndian::read_u64(&bytes[20..28]);

        if bytes.len() < ENTRY_HEADER_SIZE + entry_size {
            return Err(Error::Corrupted("truncated entry payload".into()));
        }
        let payload = bytes[ENTRY_HEADER_SIZE..ENTRY_HEADER_SIZE + entry_size].to_vec();

        let computed = crc32(&payload);
        if computed != crc {
            return Err(Error::Corrupted(format!(
                "entry {lsn}: crc mismatch (expected {crc:#x}, computed {computed:#x})"
            )));
        }

        let entry = WalEntry {
            lsn,
            kind,
            timestamp_ms,
            payload,
        };
        Ok((entry, ENTRY_HEADER_SIZE + entry_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let e = WalEntry::new(1, EntryKind::Put, 1_700_000_000_000, b"hello".to_vec());
        let bytes = e.to_bytes();
        let (back, consumed) = WalEntry::from_bytes(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(back.lsn, 1);
        assert_eq!(back.payload, b"hello");
    }

    #[test]
    fn empty_payload_roundtrip() {
        let e = WalEntry::new(5, EntryKind::TxnCommit, 0, Vec::new());
        let bytes = e.to_bytes();
        let (back, _) = WalEntry::from_bytes(&bytes).unwrap();
        assert_eq!(back.payload.len(), 0);
        assert_eq!(back.kind, EntryKind::TxnCommit);
    }

    #[test]
    fn corrupted_payload_fails_crc() {
        let e = WalEntry::new(1, EntryKind::Put, 0, b"hello".to_vec());
        let mut bytes = e.to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(WalEntry::from_bytes(&bytes).is_err());
    }

    #[test]
    fn truncated_header_fails() {
        assert!(WalEntry::from_bytes(&[0u8; 4]).is_err());
    }

    #[test]
    fn truncated_payload_fails() {
        let e = WalEntry::new(1, EntryKind::Put, 0, b"hello world".to_vec());
        let bytes = e.to_bytes();
        let truncated = &bytes[..bytes.len() - 3];
        assert!(WalEntry::from_bytes(truncated).is_err());
    }

    #[test]
    fn unknown_kind_fails() {
        assert!(EntryKind::from_u32(99).is_err());
    }

    #[test]
    fn multiple_entries_back_to_back() {
        let e1 = WalEntry::new(1, EntryKind::Put, 0, b"a".to_vec());
        let e2 = WalEntry::new(2, EntryKind::Del, 0, b"b".to_vec());
        let mut buf = e1.to_bytes();
        buf.extend_from_slice(&e2.to_bytes());

        let (back1, n1) = WalEntry::from_bytes(&buf).unwrap();
        let (back2, n2) = WalEntry::from_bytes(&buf[n1..]).unwrap();
        assert_eq!(back1.lsn, 1);
        assert_eq!(back2.lsn, 2);
        assert_eq!(n1 + n2, buf.len());
    }
}

/// Property tests for the CRC-protected entry format (spec §8: "a single
/// flipped payload bit is always caught by the CRC").
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn roundtrip_is_lossless_for_any_lsn_and_payload(
            lsn in any::<u64>(),
            kind_idx in 0u32..5,
            timestamp_ms in any::<u64>(),
            payload in prop::collection::vec(any::<u8>(), 0..256),
        ) {
            let kind = EntryKind::from_u32(kind_idx + 1).unwrap();
            let entry = WalEntry::new(lsn, kind, timestamp_ms, payload.clone());
            let bytes = entry.to_bytes();
            let (back, consumed) = WalEntry::from_bytes(&bytes).unwrap();
            prop_assert_eq!(consumed, bytes.len());
            prop_assert_eq!(back.lsn, lsn);
            prop_assert_eq!(back.payload, payload);
        }

        /// A non-empty payload guarantees the CRC actually covers something,
        /// so flipping any one of its bits must change the checksum and be
        /// rejected rather than silently accepted.
        #[test]
        fn single_bit_flip_in_payload_is_always_detected(
            payload in prop::collection::vec(any::<u8>(), 1..256),
            flip_byte in 0usize..256,
            flip_bit in 0u8..8,
        ) {
            let byte_idx = flip_byte % payload.len();
            let entry = WalEntry::new(1, EntryKind::Put, 0, payload);
            let mut bytes = entry.to_bytes();
            bytes[ENTRY_HEADER_SIZE + byte_idx] ^= 1 << flip_bit;
            prop_assert!(WalEntry::from_bytes(&bytes).is_err());
        }
    }
}
