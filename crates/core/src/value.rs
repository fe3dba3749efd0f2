//! The typed value algebra.
//!
//! `TypedValue` is the sum type every cell in the memtable, every WAL
//! payload, and every indexed field ultimately holds. It mirrors the
//! source engine's `TypedValue` (a tagged union over scalars, temporals,
//! containers, and raw bytes) rather than treating values as opaque byte
//! strings, so that indexes and the query optimizer can reason about
//! comparisons and conversions without re-parsing.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A calendar date, stored as plain year/month/day components (no
/// timezone, no validation beyond what callers provide — the engine is
/// not a calendar library).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Date {
    pub year: i32,
    pub month: i32,
    pub day: i32,
}

impl Date {
    pub fn new(year: i32, month: i32, day: i32) -> Self {
        Date { year, month, day }
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// The maximum nesting depth permitted for `List`/`Set`/`Map` values, per
/// §9's guard against unbounded recursive serialization.
pub const MAX_NESTING_DEPTH: u32 = 64;

/// Discriminant for a `TypedValue`'s variant, independent of its payload.
/// Used by `get_key_type`, `type_scan`, and the binary codec's tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum DataType {
    Null = 0,
    Int = 1,
    Float = 2,
    Double = 3,
    String = 4,
    Timestamp = 5,
    Date = 6,
    List = 7,
    Set = 8,
    Map = 9,
    Blob = 10,
}

impl DataType {
    pub fn name(self) -> &'static str {
        match self {
            DataType::Null => "Null",
            DataType::Int => "Int",
            DataType::Float => "Float",
            DataType::Double => "Double",
            DataType::String => "String",
            DataType::Timestamp => "Timestamp",
            DataType::Date => "Date",
            DataType::List => "List",
            DataType::Set => "Set",
            DataType::Map => "Map",
            DataType::Blob => "Blob",
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => DataType::Null,
            1 => DataType::Int,
            2 => DataType::Float,
            3 => DataType::Double,
            4 => DataType::String,
            5 => DataType::Timestamp,
            6 => DataType::Date,
            7 => DataType::List,
            8 => DataType::Set,
            9 => DataType::Map,
            10 => DataType::Blob,
            _ => return None,
        })
    }
}

/// A `Map`'s values are keyed by string and iterated in insertion-stable,
/// lexical order (`BTreeMap` gives us deterministic iteration for free,
/// which both the text codec and `convert_to(String)` rely on).
pub type ValueMap = BTreeMap<String, TypedValue>;

/// The engine's typed value. See the module doc for the overall design;
/// ordering and equality are defined below in `PartialOrd`/`Ord`/`PartialEq`.
#[derive(Debug, Clone)]
pub enum TypedValue {
    Null,
    Int(i64),
    Float(f32),
    Double(f64),
    String(String),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Date(Date),
    List(Vec<TypedValue>),
    /// Stored sorted and de-duplicated by construction; see `Set::insert`
    /// via `TypedValue::new_set`.
    Set(Vec<TypedValue>),
    Map(ValueMap),
    Blob(Vec<u8>),
}

impl TypedValue {
    pub fn data_type(&self) -> DataType {
        match self {
            TypedValue::Null => DataType::Null,
            TypedValue::Int(_) => DataType::Int,
            TypedValue::Float(_) => DataType::Float,
            TypedValue::Double(_) => DataType::Double,
            TypedValue::String(_) => DataType::String,
            TypedValue::Timestamp(_) => DataType::Timestamp,
            TypedValue::Date(_) => DataType::Date,
            TypedValue::List(_) => DataType::List,
            TypedValue::Set(_) => DataType::Set,
            TypedValue::Map(_) => DataType::Map,
            TypedValue::Blob(_) => DataType::Blob,
        }
    }

    /// Builds a `Set` from an iterable of values, sorting and deduping by
    /// the value's total order.
    pub fn new_set(mut items: Vec<TypedValue>) -> Self {
        items.sort_by(|a, b| a.cmp(b));
        items.dedup_by(|a, b| a == b);
        TypedValue::Set(items)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }

    /// Canonical string form, used by the text codec's debug rendering and
    /// by `convert_to(String)`.
    pub fn to_canonical_string(&self) -> String {
        match self {
            TypedValue::Null => String::new(),
            TypedValue::Int(v) => v.to_string(),
            TypedValue::Float(v) => v.to_string(),
            TypedValue::Double(v) => v.to_string(),
            TypedValue::String(v) => v.clone(),
            TypedValue::Timestamp(v) => v.to_string(),
            TypedValue::Date(d) => d.to_string(),
            TypedValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_canonical_string()).collect();
                format!("[{}]", parts.join(","))
            }
            TypedValue::Set(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_canonical_string()).collect();
                format!("{{{}}}", parts.join(","))
            }
            TypedValue::Map(m) => {
                let parts: Vec<String> = m
                    .iter()
                    .map(|(k, v)| format!("{}:{}", k, v.to_canonical_string()))
                    .collect();
                format!("{{{}}}", parts.join(","))
            }
            TypedValue::Blob(b) => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD.encode(b)
            }
        }
    }

    /// Converts to `target`, per spec §4.1: identity on the same type,
    /// numeric widening/narrowing among Int/Float/Double, any value to
    /// String via the canonical form, and String to Int by decimal parse.
    /// Everything else fails with `TypeConversion`.
    pub fn convert_to(&self, target: DataType) -> crate::Result<TypedValue> {
        use crate::Error;

        if self.data_type() == target {
            return Ok(self.clone());
        }

        match (self, target) {
            (TypedValue::Int(v), DataType::Float) => Ok(TypedValue::Float(*v as f32)),
            (TypedValue::Int(v), DataType::Double) => Ok(TypedValue::Double(*v as f64)),
            (TypedValue::Float(v), DataType::Int) => Ok(TypedValue::Int(*v as i64)),
            (TypedValue::Float(v), DataType::Double) => Ok(TypedValue::Double(*v as f64)),
            (TypedValue::Double(v), DataType::Int) => Ok(TypedValue::Int(*v as i64)),
            (TypedValue::Double(v), DataType::Float) => Ok(TypedValue::Float(*v as f32)),
            (_, DataType::String) => Ok(TypedValue::String(self.to_canonical_string())),
            (TypedValue::String(s), DataType::Int) => s
                .parse::<i64>()
                .map(TypedValue::Int)
                .map_err(|_| Error::TypeConversion(format!("cannot parse '{s}' as Int"))),
            _ => Err(Error::TypeConversion(format!(
                "no conversion from {} to {}",
                self.data_type().name(),
                target.name()
            ))),
        }
    }

    /// Approximate serialized size in bytes, for memtable flush-trigger
    /// heuristics. Does not need to be exact (spec §4.2).
    pub fn approx_size(&self) -> usize {
        match self {
            TypedValue::Null => 1,
            TypedValue::Int(_) => 9,
            TypedValue::Float(_) => 5,
            TypedValue::Double(_) => 9,
            TypedValue::String(s) => 5 + s.len(),
            TypedValue::Timestamp(_) => 9,
            TypedValue::Date(_) => 13,
            TypedValue::Blob(b) => 5 + b.len(),
            TypedValue::List(items) | TypedValue::Set(items) => {
                4 + items.iter().map(TypedValue::approx_size).sum::<usize>()
            }
            TypedValue::Map(m) => {
                4 + m
                    .iter()
                    .map(|(k, v)| 4 + k.len() + v.approx_size())
                    .sum::<usize>()
            }
        }
    }
}

impl PartialEq for TypedValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for TypedValue {}

impl PartialOrd for TypedValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Total order: variant tag first (so every comparison is total even
/// across mismatched types, which `Set` relies on to stay sorted), then
/// variant-local order.
impl Ord for TypedValue {
    fn cmp(&self, other: &Self) -> Ordering {
        let tag_order = self.data_type().cmp(&other.data_type());
        if tag_order != Ordering::Equal {
            return tag_order;
        }
        match (self, other) {
            (TypedValue::Null, TypedValue::Null) => Ordering::Equal,
            (TypedValue::Int(a), TypedValue::Int(b)) => a.cmp(b),
            (TypedValue::Float(a), TypedValue::Float(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (TypedValue::Double(a), TypedValue::Double(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (TypedValue::String(a), TypedValue::String(b)) => a.cmp(b),
            (TypedValue::Timestamp(a), TypedValue::Timestamp(b)) => a.cmp(b),
            (TypedValue::Date(a), TypedValue::Date(b)) => a.cmp(b),
            (TypedValue::List(a), TypedValue::List(b)) | (TypedValue::Set(a), TypedValue::Set(b)) => {
                a.cmp(b)
            }
            (TypedValue::Map(a), TypedValue::Map(b)) => a.cmp(b),
            (TypedValue::Blob(a), TypedValue::Blob(b)) => a.cmp(b),
            _ => unreachable!("tag_order already ensured matching variants"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_tag_first() {
        let i = TypedValue::Int(1_000_000);
        let s = TypedValue::String("a".into());
        assert!(i < s, "Int tag (1) sorts before String tag (4)");
    }

    #[test]
    fn set_dedupes_and_sorts() {
        let set = TypedValue::new_set(vec![
            TypedValue::Int(3),
            TypedValue::Int(1),
            TypedValue::Int(3),
            TypedValue::Int(2),
        ]);
        match set {
            TypedValue::Set(items) => {
                assert_eq!(
                    items,
                    vec![TypedValue::Int(1), TypedValue::Int(2), TypedValue::Int(3)]
                );
            }
            _ => panic!("expected Set"),
        }
    }

    #[test]
    fn convert_identity() {
        let v = TypedValue::Int(5);
        assert_eq!(v.convert_to(DataType::Int).unwrap(), v);
    }

    #[test]
    fn convert_numeric_widening() {
        let v = TypedValue::Int(5).convert_to(DataType::Double).unwrap();
        assert_eq!(v, TypedValue::Double(5.0));
    }

    #[test]
    fn convert_any_to_string() {
        let v = TypedValue::Int(42).convert_to(DataType::String).unwrap();
        assert_eq!(v, TypedValue::String("42".into()));
    }

    #[test]
    fn convert_string_to_int() {
        let v = TypedValue::String("123".into())
            .convert_to(DataType::Int)
            .unwrap();
        assert_eq!(v, TypedValue::Int(123));
    }

    #[test]
    fn convert_string_to_int_failure() {
        let err = TypedValue::String("not a number".into()).convert_to(DataType::Int);
        assert!(err.is_err());
    }

    #[test]
    fn convert_unsupported_fails() {
        let err = TypedValue::Null.convert_to(DataType::Blob);
        assert!(err.is_err());
    }

    #[test]
    fn convert_string_to_float_is_unsupported() {
        let err = TypedValue::String("1.5".into()).convert_to(DataType::Float);
        assert!(err.is_err());
    }

    #[test]
    fn date_display() {
        assert_eq!(Date::new(2024, 3, 7).to_string(), "2024-03-07");
    }

    #[test]
    fn equality_is_structural() {
        let a = TypedValue::List(vec![TypedValue::Int(1), TypedValue::Int(2)]);
        let b = TypedValue::List(vec![TypedValue::Int(1), TypedValue::Int(2)]);
        assert_eq!(a, b);
    }
}
