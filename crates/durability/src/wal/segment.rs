//! Segment header and the on-disk segment file.
//!
//! Layout (spec §6.3): `magic u32 "WALS" | version u32 | segment_id u64 |
//! start_lsn u64 | end_lsn u64 | entry_count u32 | segment_size u64 |
//! creation_ms u64 | header_crc32 u32 | data_crc32 u32 | reserved[6] u32`,
//! followed by the concatenation of [`super::entry::WalEntry`] records.
//!
//! `header_crc32` covers the header with the `header_crc32` field itself
//! zeroed. `data_crc32` covers the concatenation of serialized entries.
//! A segment is sealed exactly once; a sealed segment is opened read-only
//! for recovery (spec §3.3/§4.3).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{ByteOrder, LittleEndian};
use kvdb_core::{crc32_parts, Error, Result};

use super::entry::WalEntry;

pub const SEGMENT_MAGIC: u32 = 0x5741_4C53; // "WALS" as a little-endian u32
pub const SEGMENT_FORMAT_VERSION: u32 = 1;
pub const SEGMENT_HEADER_SIZE: usize = 4 + 4 + 8 + 8 + 8 + 4 + 8 + 8 + 4 + 4 + 6 * 4;

/// Default segment capacity: 64 MiB, matching the source engine's
/// `MAX_SEGMENT_SIZE`.
pub const DEFAULT_MAX_SEGMENT_SIZE: u64 = 64 * 1024 * 1024;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHeader {
    pub magic: u32,
    pub version: u32,
    pub segment_id: u64,
    pub start_lsn: u64,
    pub end_lsn: u64,
    pub entry_count: u32,
    pub segment_size: u64,
    pub creation_ms: u64,
    pub header_crc32: u32,
    pub data_crc32: u32,
    pub reserved: [u32; 6],
}

impl SegmentHeader {
    pub fn new(segment_id: u64, start_lsn: u64) -> Self {
        SegmentHeader {
            magic: SEGMENT_MAGIC,
            version: SEGMENT_FORMAT_VERSION,
            segment_id,
            start_lsn,
            end_lsn: start_lsn.saturating_sub(1),
            entry_count: 0,
            segment_size: 0,
            creation_ms: now_ms(),
            header_crc32: 0,
            data_crc32: 0,
            reserved: [0; 6],
        }
    }

    pub fn to_bytes(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut out = [0u8; SEGMENT_HEADER_SIZE];
        let mut off = 0;
        macro_rules! put_u32 {
            ($v:expr) => {{
                LittleEndian::write_u32(&mut out[off..off + 4], $v);
                off += 4;
            }};
        }
        macro_rules! put_u64 {
            ($v:expr) => {{
                LittleEndian::write_u64(&mut out[off..off + 8], $v);
                off += 8;
            }};
        }
        put_u32!(self.magic);
        put_u32!(self.version);
        put_u64!(self.segment_id);
        put_u64!(self.start_lsn);
        put_u64!(self.end_lsn);
        put_u32!(self.entry_count);
        put_u64!(self.segment_size);
        put_u64!(self.creation_ms);
        put_u32!(self.header_crc32);
        put_u32!(self.data_crc32);
        for r in self.reserved {
            put_u32!(r);
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SEGMENT_HEADER_SIZE {
            return Err(Error::Corrupted("truncated segment header".into()));
        }
        let mut off = 0;
        macro_rules! get_u32 {
            () => {{
                let v = LittleEndian::read_u32(&bytes[off..off + 4]);
                off += 4;
                v
            }};
        }
        macro_rules! get_u64 {
            () => {{
                let v = LittleEndian::read_u64(&bytes[off..off + 8]);
                off += 8;
                v
            }};
        }
        let magic = get_u32!();
        let version = get_u32!();
        let segment_id = get_u64!();
        let start_lsn = get_u64!();
        let end_lsn = get_u64!();
        let entry_count = get_u32!();
        let segment_size = get_u64!();
        let creation_ms = get_u64!();
        let header_crc32 = get_u32!();
        let data_crc32 = get_u32!();
        let mut reserved = [0u32; 6];
        for r in &mut reserved {
            *r = get_u32!();
        }
        let header = SegmentHeader {
            magic,
            version,
            segment_id,
            start_lsn,
            end_lsn,
            entry_count,
            segment_size,
            creation_ms,
            header_crc32,
            data_crc32,
            reserved,
        };
        if header.magic != SEGMENT_MAGIC {
            return Err(Error::Corrupted(format!(
                "bad segment magic {:#x}",
                header.magic
            )));
        }
        if header.version > SEGMENT_FORMAT_VERSION {
            return Err(Error::Corrupted(format!(
                "unsupported segment version {}",
                header.version
            )));
        }
        Ok(header)
    }

    /// Computes the header CRC with the `header_crc32` field zeroed, as
    /// required by spec §3.3.
    pub fn compute_header_crc32(&self) -> u32 {
        let mut clean = self.clone();
        clean.header_crc32 = 0;
        crc32_parts(&[&clean.to_bytes()])
    }

    pub fn is_structurally_valid(&self) -> bool {
        self.magic == SEGMENT_MAGIC
            && self.version <= SEGMENT_FORMAT_VERSION
            && self.start_lsn <= self.end_lsn.wrapping_add(1)
    }
}

/// Filename for a given segment id, e.g. `wal_segment_3.seg` (spec §6.3).
pub fn segment_path(dir: &Path, segment_id: u64) -> PathBuf {
    dir.join(format!("wal_segment_{segment_id}.seg"))
}

/// An open WAL segment: either the active (appendable) segment or one
/// opened read-only for recovery/validation.
pub struct WalSegment {
    file: File,
    path: PathBuf,
    header: SegmentHeader,
    max_size: u64,
    sealed: bool,
    data_hasher: crc32fast::Hasher,
}

impl WalSegment {
    /// Creates a brand-new, empty, writable segment.
    pub fn create(dir: &Path, segment_id: u64, start_lsn: u64, max_size: u64) -> Result<Self> {
        let path = segment_path(dir, segment_id);
        let mut file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;
        let header = SegmentHeader::new(segment_id, start_lsn);
        file.write_all(&header.to_bytes())?;
        file.flush()?;
        Ok(WalSegment {
            file,
            path,
            header,
            max_size,
            sealed: false,
            data_hasher: crc32fast::Hasher::new(),
        })
    }

    /// Opens an existing, already-sealed segment read-only, e.g. for
    /// recovery or validation.
    pub fn open_read(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).open(path)?;
        let mut header_buf = [0u8; SEGMENT_HEADER_SIZE];
        file.read_exact(&mut header_buf)?;
        let header = SegmentHeader::from_bytes(&header_buf)?;
        Ok(WalSegment {
            file,
            path: path.to_path_buf(),
            header,
            max_size: u64::MAX,
            sealed: true,
            data_hasher: crc32fast::Hasher::new(),
        })
    }

    /// Re-opens an active (not-yet-sealed) segment for further appends
    /// after a restart. `data_offset` is the number of already-valid data
    /// bytes (as returned by [`Self::read_entries_with_offset`]); any bytes
    /// beyond it (a torn write from a crash mid-append) are truncated away
    /// so the next append starts from a clean tail, and the running data
    /// hash is seeded from the bytes that are kept.
    pub fn open_append(path: PathBuf, header: SegmentHeader, max_size: u64, data_offset: u64) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let mut data_hasher = crc32fast::Hasher::new();
        if data_offset > 0 {
            file.seek(SeekFrom::Start(SEGMENT_HEADER_SIZE as u64))?;
            let mut kept = vec![0u8; data_offset as usize];
            file.read_exact(&mut kept)?;
            data_hasher.update(&kept);
        }
        file.set_len(SEGMENT_HEADER_SIZE as u64 + data_offset)?;
        file.seek(SeekFrom::Start(SEGMENT_HEADER_SIZE as u64 + data_offset))?;
        Ok(WalSegment {
            file,
            path,
            header,
            max_size,
            sealed: false,
            data_hasher,
        })
    }

    pub fn creation_ms(&self) -> u64 {
        self.header.creation_ms
    }

    pub fn segment_id(&self) -> u64 {
        self.header.segment_id
    }

    pub fn start_lsn(&self) -> u64 {
        self.header.start_lsn
    }

    pub fn end_lsn(&self) -> u64 {
        self.header.end_lsn
    }

    pub fn entry_count(&self) -> u32 {
        self.header.entry_count
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether an entry of `entry_len` bytes fits in the remaining
    /// capacity of this segment.
    pub fn can_add_entry(&self, entry_len: u64) -> bool {
        SEGMENT_HEADER_SIZE as u64 + self.header.segment_size + entry_len <= self.max_size
    }

    /// Appends `entry` to this segment. Caller must have already checked
    /// [`Self::can_add_entry`]; this does not seal or rotate.
    pub fn add_entry(&mut self, entry: &WalEntry) -> Result<()> {
        if self.sealed {
            return Err(Error::SegmentSealed {
                segment_id: self.header.segment_id,
            });
        }
        let bytes = entry.to_bytes();
        self.file.write_all(&bytes)?;
        self.data_hasher.update(&bytes);
        self.header.entry_count += 1;
        self.header.end_lsn = entry.lsn;
        self.header.segment_size += bytes.len() as u64;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Finalizes the segment: computes `data_crc32` and `header_crc32`,
    /// rewrites the header in place, and flushes to stable storage. A
    /// sealed segment never accepts another `add_entry`.
    pub fn seal(&mut self) -> Result<()> {
        if self.sealed {
            return Ok(());
        }
        self.header.data_crc32 = std::mem::take(&mut self.data_hasher).finalize();
        self.header.header_crc32 = self.header.compute_header_crc32();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.header.to_bytes())?;
        self.file.sync_data()?;
        self.sealed = true;
        Ok(())
    }

    /// Reads back every entry in the segment, stopping (without erroring)
    /// at the first truncated or CRC-failing entry. Returns the entries
    /// read and, if replay stopped early, the LSN of the last good entry.
    pub fn read_entries(&mut self) -> Result<(Vec<WalEntry>, Option<u64>)> {
        let (entries, _consumed, partial) = self.read_entries_with_offset()?;
        Ok((entries, partial))
    }

    /// As [`Self::read_entries`], but also returns the number of data bytes
    /// (after the header) that made up the valid entries, so a caller that
    /// wants to keep appending after the last good entry knows exactly
    /// where the clean tail ends.
    pub fn read_entries_with_offset(&mut self) -> Result<(Vec<WalEntry>, usize, Option<u64>)> {
        self.file.seek(SeekFrom::Start(SEGMENT_HEADER_SIZE as u64))?;
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf)?;

        let mut entries = Vec::new();
        let mut cursor = 0usize;
        let mut last_good_lsn = None;
        while cursor < buf.len() {
            match WalEntry::from_bytes(&buf[cursor..]) {
                Ok((entry, consumed)) => {
                    last_good_lsn = Some(entry.lsn);
                    entries.push(entry);
                    cursor += consumed;
                }
                Err(_) => break,
            }
        }
        let partial = if cursor < buf.len() { last_good_lsn.or(Some(0)) } else { None };
        Ok((entries, cursor, partial.filter(|_| cursor < buf.len())))
    }

    /// Validates header structure and the data CRC against the entries
    /// actually present on disk. Used by `validate_all` and recovery.
    pub fn validate(&mut self) -> Result<()> {
        if !self.header.is_structurally_valid() {
            return Err(Error::Corrupted(format!(
                "segment {} header is structurally invalid",
                self.header.segment_id
            )));
        }
        let expected_header_crc = self.header.compute_header_crc32();
        if expected_header_crc != self.header.header_crc32 {
            return Err(Error::Corrupted(format!(
                "segment {} header crc mismatch",
                self.header.segment_id
            )));
        }
        self.file.seek(SeekFrom::Start(SEGMENT_HEADER_SIZE as u64))?;
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf)?;
        let computed_data_crc = kvdb_core::crc32(&buf);
        if computed_data_crc != self.header.data_crc32 {
            return Err(Error::Corrupted(format!(
                "segment {} data crc mismatch",
                self.header.segment_id
            )));
        }
        Ok(())
    }
}
