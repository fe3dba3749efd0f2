//! Shared CRC-32 helper.
//!
//! Standard IEEE 802.3 CRC-32: polynomial `0xEDB88320`, little-endian bit
//! order, initial value `0xFFFFFFFF`, final XOR `0xFFFFFFFF`. Every
//! checksum in the workspace (WAL entries and segment headers, checkpoint
//! images, backup archives) goes through this one function so the
//! algorithm is defined exactly once.

/// Computes the IEEE 802.3 CRC-32 of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Computes the CRC-32 of the concatenation of several byte slices without
/// allocating an intermediate buffer. Used for header checksums where the
/// covered bytes aren't already contiguous (e.g. a header with its own
/// CRC field zeroed out).
pub fn crc32_parts(parts: &[&[u8]]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // "123456789" is the standard CRC-32 test vector (CRC-32/ISO-HDLC).
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn empty_input() {
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn parts_equals_concatenated() {
        let whole = crc32(b"hello world");
        let parts = crc32_parts(&[b"hello ", b"world"]);
        assert_eq!(whole, parts);
    }
}
