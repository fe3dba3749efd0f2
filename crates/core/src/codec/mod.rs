//! Binary and text codecs for [`crate::value::TypedValue`] (spec §6.1, §6.2).

pub mod binary;
pub mod text;

pub use binary::{deserialize_binary, serialize_binary};
pub use text::{deserialize_text, serialize_text};
