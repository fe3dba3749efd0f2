//! Value model, codecs, CRC helper, and the shared error type for `kvdb`.
//!
//! This crate has no knowledge of the WAL, memtable, or indexes above it —
//! it exists so that every other crate in the workspace can agree on what
//! a value is and how errors are reported, without depending on each
//! other.

pub mod codec;
pub mod crc;
pub mod error;
pub mod value;

pub use codec::{deserialize_binary, deserialize_text, serialize_binary, serialize_text};
pub use crc::{crc32, crc32_parts};
pub use error::{Error, Result};
pub use value::{Date, DataType, TypedValue, ValueMap, MAX_NESTING_DEPTH};
