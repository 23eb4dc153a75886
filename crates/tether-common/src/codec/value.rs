//! The dynamic value model carried by invocation arguments and payloads.
//!
//! Containers and user objects are held behind `Arc`, so one instance may be
//! shared by several places in a graph. The encoder writes a shared instance
//! once and back-references it afterwards; the decoder restores the sharing.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use uuid::Uuid;

use super::comparator::Comparator;
use crate::protocol::error::CodecError;
use crate::protocol::signature::TypeRef;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    String(String),
    BigInteger(BigInteger),
    BigDecimal(BigDecimal),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Instant(DateTime<Utc>),
    Duration(TimeDelta),
    Charset(Charset),
    Bytes(Vec<u8>),
    Array(Arc<ArrayValue>),
    List(Arc<Vec<Value>>),
    Set(Arc<SetValue>),
    SortedSet(Arc<SortedSetValue>),
    Map(Arc<MapValue>),
    SortedMap(Arc<SortedMapValue>),
    Enum(EnumValue),
    Object(Arc<ObjectValue>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Builds a list from any iterator of values.
    pub fn list(items: impl IntoIterator<Item = Value>) -> Value {
        Value::List(Arc::new(items.into_iter().collect()))
    }

    /// Builds a set; duplicate items are dropped, first occurrence wins.
    pub fn set(items: impl IntoIterator<Item = Value>) -> Value {
        Value::Set(Arc::new(SetValue::new(items)))
    }

    pub fn sorted_set(comparator: Comparator, items: impl IntoIterator<Item = Value>) -> Value {
        Value::SortedSet(Arc::new(SortedSetValue::new(comparator, items)))
    }

    /// Builds a map; a repeated key replaces the earlier value.
    pub fn map(entries: impl IntoIterator<Item = (Value, Value)>) -> Value {
        Value::Map(Arc::new(MapValue::new(entries)))
    }

    pub fn sorted_map(
        comparator: Comparator,
        entries: impl IntoIterator<Item = (Value, Value)>,
    ) -> Value {
        Value::SortedMap(Arc::new(SortedMapValue::new(comparator, entries)))
    }

    pub fn object(class: impl Into<Arc<str>>, fields: Vec<Value>) -> Value {
        Value::Object(Arc::new(ObjectValue {
            class: class.into(),
            fields,
        }))
    }

    pub fn enum_variant(class: impl Into<Arc<str>>, ordinal: u32) -> Value {
        Value::Enum(EnumValue {
            class: class.into(),
            ordinal,
        })
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "Bool",
            Value::Byte(_) => "Byte",
            Value::Short(_) => "Short",
            Value::Int(_) => "Int",
            Value::Long(_) => "Long",
            Value::Float(_) => "Float",
            Value::Double(_) => "Double",
            Value::Char(_) => "Char",
            Value::String(_) => "String",
            Value::BigInteger(_) => "BigInteger",
            Value::BigDecimal(_) => "BigDecimal",
            Value::Uuid(_) => "Uuid",
            Value::Date(_) => "Date",
            Value::Time(_) => "Time",
            Value::DateTime(_) => "DateTime",
            Value::Instant(_) => "Instant",
            Value::Duration(_) => "Duration",
            Value::Charset(_) => "Charset",
            Value::Bytes(_) => "Bytes",
            Value::Array(_) => "Array",
            Value::List(_) => "List",
            Value::Set(_) => "Set",
            Value::SortedSet(_) => "SortedSet",
            Value::Map(_) => "Map",
            Value::SortedMap(_) => "SortedMap",
            Value::Enum(_) => "Enum",
            Value::Object(_) => "Object",
        }
    }

    /// Natural ordering between two values of the same variant.
    ///
    /// Returns `None` for values of different variants, for containers and
    /// objects, and for NaN floats.
    pub fn natural_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Byte(a), Value::Byte(b)) => Some(a.cmp(b)),
            (Value::Short(a), Value::Short(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Long(a), Value::Long(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::BigInteger(a), Value::BigInteger(b)) => Some(a.cmp(b)),
            (Value::BigDecimal(a), Value::BigDecimal(b)) => a.partial_cmp_same_scale(b),
            (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Instant(a), Value::Instant(b)) => Some(a.cmp(b)),
            (Value::Duration(a), Value::Duration(b)) => Some(a.cmp(b)),
            (Value::Charset(a), Value::Charset(b)) => Some(a.name().cmp(b.name())),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Enum(a), Value::Enum(b)) if a.class == b.class => Some(a.ordinal.cmp(&b.ordinal)),
            _ => None,
        }
    }

    /// Total order used for sorting: natural order within a variant, floats
    /// by their IEEE total order, otherwise by variant.
    pub(crate) fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::BigDecimal(a), Value::BigDecimal(b)) => a
                .scale
                .cmp(&b.scale)
                .then_with(|| a.unscaled.cmp(&b.unscaled)),
            (Value::Enum(a), Value::Enum(b)) => a
                .class
                .cmp(&b.class)
                .then(a.ordinal.cmp(&b.ordinal)),
            _ => self
                .natural_cmp(other)
                .unwrap_or_else(|| self.rank().cmp(&other.rank())),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Byte(_) => 2,
            Value::Short(_) => 3,
            Value::Int(_) => 4,
            Value::Long(_) => 5,
            Value::Float(_) => 6,
            Value::Double(_) => 7,
            Value::Char(_) => 8,
            Value::String(_) => 9,
            Value::BigInteger(_) => 10,
            Value::BigDecimal(_) => 11,
            Value::Uuid(_) => 12,
            Value::Date(_) => 13,
            Value::Time(_) => 14,
            Value::DateTime(_) => 15,
            Value::Instant(_) => 16,
            Value::Duration(_) => 17,
            Value::Charset(_) => 18,
            Value::Bytes(_) => 19,
            Value::Array(_) => 20,
            Value::List(_) => 21,
            Value::Set(_) => 22,
            Value::SortedSet(_) => 23,
            Value::Map(_) => 24,
            Value::SortedMap(_) => 25,
            Value::Enum(_) => 26,
            Value::Object(_) => 27,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Byte(v) => write!(f, "{}", v),
            Value::Short(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:?}", v),
            Value::Double(v) => write!(f, "{:?}", v),
            Value::Char(v) => write!(f, "{}", v),
            Value::String(v) => f.write_str(v),
            Value::BigInteger(v) => write!(f, "{}", v),
            Value::BigDecimal(v) => write!(f, "{}", v),
            Value::Uuid(v) => write!(f, "{}", v),
            Value::Date(v) => write!(f, "{}", v),
            Value::Time(v) => write!(f, "{}", v),
            Value::DateTime(v) => write!(f, "{}", v),
            Value::Instant(v) => write!(f, "{}", v.to_rfc3339()),
            Value::Duration(v) => write!(f, "{}", v),
            Value::Charset(v) => f.write_str(v.name()),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::Array(v) => write_seq(f, "[", v.items.iter(), "]"),
            Value::List(v) => write_seq(f, "[", v.iter(), "]"),
            Value::Set(v) => write_seq(f, "{", v.items().iter(), "}"),
            Value::SortedSet(v) => write_seq(f, "{", v.items().iter(), "}"),
            Value::Map(v) => write_entries(f, v.entries()),
            Value::SortedMap(v) => write_entries(f, v.entries()),
            Value::Enum(v) => write!(f, "{}#{}", v.class, v.ordinal),
            Value::Object(v) => {
                f.write_str(&v.class)?;
                write_seq(f, "(", v.fields.iter(), ")")
            }
        }
    }
}

fn write_seq<'a>(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    items: impl Iterator<Item = &'a Value>,
    close: &str,
) -> fmt::Result {
    f.write_str(open)?;
    for (i, item) in items.enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str(close)
}

fn write_entries(f: &mut fmt::Formatter<'_>, entries: &[(Value, Value)]) -> fmt::Result {
    f.write_str("{")?;
    for (i, (key, value)) in entries.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}={}", key, value)?;
    }
    f.write_str("}")
}

// ============================================================================
// Arbitrary-precision numbers
// ============================================================================

/// An arbitrary-precision integer in minimal two's-complement big-endian form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BigInteger(Vec<u8>);

impl BigInteger {
    /// Wraps two's-complement big-endian bytes, dropping redundant sign bytes.
    /// An empty slice is zero.
    pub fn from_be_bytes(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return BigInteger(vec![0]);
        }
        let negative = bytes[0] & 0x80 != 0;
        let filler = if negative { 0xff } else { 0x00 };
        let mut start = 0;
        while start + 1 < bytes.len()
            && bytes[start] == filler
            && (bytes[start + 1] & 0x80 != 0) == negative
        {
            start += 1;
        }
        BigInteger(bytes[start..].to_vec())
    }

    pub fn from_i128(value: i128) -> Self {
        Self::from_be_bytes(&value.to_be_bytes())
    }

    pub fn to_i128(&self) -> Option<i128> {
        if self.0.len() > 16 {
            return None;
        }
        let filler = if self.is_negative() { 0xff } else { 0x00 };
        let mut buf = [filler; 16];
        buf[16 - self.0.len()..].copy_from_slice(&self.0);
        Some(i128::from_be_bytes(buf))
    }

    pub fn as_be_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0.first().is_some_and(|b| b & 0x80 != 0)
    }
}

impl Ord for BigInteger {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_negative(), other.is_negative()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (negative, _) => {
                // Minimal encodings of the same sign: more bytes means a
                // larger magnitude, equal lengths compare bytewise.
                let by_len = self.0.len().cmp(&other.0.len());
                let by_len = if negative { by_len.reverse() } else { by_len };
                by_len.then_with(|| self.0.cmp(&other.0))
            }
        }
    }
}

impl PartialOrd for BigInteger {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BigInteger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_i128() {
            Some(v) => write!(f, "{}", v),
            None => {
                f.write_str("0x")?;
                for byte in &self.0 {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

/// An arbitrary-precision decimal: `unscaled * 10^-scale`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BigDecimal {
    pub unscaled: BigInteger,
    pub scale: i32,
}

impl BigDecimal {
    pub fn new(unscaled: BigInteger, scale: i32) -> Self {
        BigDecimal { unscaled, scale }
    }

    fn partial_cmp_same_scale(&self, other: &Self) -> Option<Ordering> {
        (self.scale == other.scale).then(|| self.unscaled.cmp(&other.unscaled))
    }
}

impl fmt::Display for BigDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.unscaled.to_string();
        if self.scale <= 0 || digits.starts_with("0x") {
            return write!(f, "{}E{}", digits, -i64::from(self.scale));
        }
        let (sign, digits) = match digits.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", digits.as_str()),
        };
        let scale = self.scale as usize;
        if digits.len() > scale {
            let (int, frac) = digits.split_at(digits.len() - scale);
            write!(f, "{}{}.{}", sign, int, frac)
        } else {
            write!(f, "{}0.{}{}", sign, "0".repeat(scale - digits.len()), digits)
        }
    }
}

/// A character set identified by its canonical name, e.g. `UTF-8`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Charset(String);

impl Charset {
    /// Validates the name: non-empty ASCII letters, digits and `-+.:_`.
    pub fn new(name: impl Into<String>) -> Result<Self, CodecError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.' | ':' | '_'));
        if valid {
            Ok(Charset(name))
        } else {
            Err(CodecError::InvalidValue {
                what: "charset name",
                value: name,
            })
        }
    }

    pub fn utf8() -> Self {
        Charset("UTF-8".to_string())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Containers
// ============================================================================

/// A fixed-length array with a declared element type.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayValue {
    pub element: TypeRef,
    pub items: Vec<Value>,
}

impl ArrayValue {
    /// Creates an array, checking every item against the element type.
    pub fn new(element: TypeRef, items: Vec<Value>) -> Result<Self, CodecError> {
        if element == TypeRef::Void {
            return Err(CodecError::InvalidValue {
                what: "array element type",
                value: element.to_string(),
            });
        }
        if let Some(bad) = items.iter().find(|item| !element.accepts(item)) {
            return Err(CodecError::InvalidValue {
                what: "array element",
                value: format!("{} is not assignable to {}", bad.type_name(), element),
            });
        }
        Ok(ArrayValue { element, items })
    }
}

/// An unordered set; items are unique under `==`.
#[derive(Debug, Clone, PartialEq)]
pub struct SetValue {
    items: Vec<Value>,
}

impl SetValue {
    pub fn new(items: impl IntoIterator<Item = Value>) -> Self {
        let mut unique: Vec<Value> = Vec::new();
        for item in items {
            if !unique.contains(&item) {
                unique.push(item);
            }
        }
        SetValue { items: unique }
    }

    pub(crate) fn from_decoded(items: Vec<Value>) -> Self {
        SetValue { items }
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, item: &Value) -> bool {
        self.items.contains(item)
    }
}

/// A set kept in comparator order. Items the comparator finds equal are
/// collapsed, first occurrence wins.
#[derive(Debug, Clone, PartialEq)]
pub struct SortedSetValue {
    comparator: Comparator,
    items: Vec<Value>,
}

impl SortedSetValue {
    pub fn new(comparator: Comparator, items: impl IntoIterator<Item = Value>) -> Self {
        let mut items: Vec<Value> = items.into_iter().collect();
        sort_dedup(&comparator, &mut items, |v| v);
        SortedSetValue { comparator, items }
    }

    pub fn comparator(&self) -> &Comparator {
        &self.comparator
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A map in insertion order; a repeated key replaces the earlier value.
#[derive(Debug, Clone, PartialEq)]
pub struct MapValue {
    entries: Vec<(Value, Value)>,
}

impl MapValue {
    pub fn new(entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        let mut unique: Vec<(Value, Value)> = Vec::new();
        for (key, value) in entries {
            match unique.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => unique.push((key, value)),
            }
        }
        MapValue { entries: unique }
    }

    pub(crate) fn from_decoded(entries: Vec<(Value, Value)>) -> Self {
        MapValue { entries }
    }

    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A map kept in comparator order of its keys.
#[derive(Debug, Clone, PartialEq)]
pub struct SortedMapValue {
    comparator: Comparator,
    entries: Vec<(Value, Value)>,
}

impl SortedMapValue {
    pub fn new(comparator: Comparator, entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        let mut entries: Vec<(Value, Value)> = entries.into_iter().collect();
        // Later entries win on equal keys, so dedup from the back.
        entries.reverse();
        sort_dedup(&comparator, &mut entries, |(k, _)| k);
        SortedMapValue {
            comparator,
            entries,
        }
    }

    pub fn comparator(&self) -> &Comparator {
        &self.comparator
    }

    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Stable-sorts by the comparator and drops items that compare equal to an
/// earlier one. `Custom`
/// comparators cannot be evaluated locally, so the caller's order is kept.
fn sort_dedup<T>(comparator: &Comparator, items: &mut Vec<T>, key: impl Fn(&T) -> &Value) {
    if matches!(comparator, Comparator::Custom(_)) {
        return;
    }
    items.sort_by(|a, b| comparator.sort_order(key(a), key(b)));
    items.dedup_by(|b, a| comparator.compare(key(a), key(b)) == Some(Ordering::Equal));
}

// ============================================================================
// User types
// ============================================================================

/// A variant of a registered enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumValue {
    pub class: Arc<str>,
    pub ordinal: u32,
}

/// An instance of a registered object class; fields in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectValue {
    pub class: Arc<str>,
    pub fields: Vec<Value>,
}

impl ObjectValue {
    pub fn field(&self, index: usize) -> Option<&Value> {
        self.fields.get(index)
    }
}
