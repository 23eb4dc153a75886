//! Built-in class ids and the kind classifier.
//!
//! A class tag on the wire is `0` for null or `class_id + 1` otherwise.
//! Whether a class is reference-tracked follows from its kind alone, so the
//! encoder and decoder agree without extra markers.

use super::registry::{ClassDescriptor, TypeRegistry};
use super::value::Value;
use crate::protocol::error::CodecError;

pub(crate) const VOID: u32 = 0;
pub(crate) const BOOL: u32 = 1;
pub(crate) const BYTE: u32 = 2;
pub(crate) const SHORT: u32 = 3;
pub(crate) const INT: u32 = 4;
pub(crate) const LONG: u32 = 5;
pub(crate) const FLOAT: u32 = 6;
pub(crate) const DOUBLE: u32 = 7;
pub(crate) const CHAR: u32 = 8;
pub(crate) const STRING: u32 = 9;
pub(crate) const BIG_INTEGER: u32 = 10;
pub(crate) const BIG_DECIMAL: u32 = 11;
pub(crate) const UUID: u32 = 12;
pub(crate) const DATE: u32 = 13;
pub(crate) const TIME: u32 = 14;
pub(crate) const DATE_TIME: u32 = 15;
pub(crate) const INSTANT: u32 = 16;
pub(crate) const DURATION: u32 = 17;
pub(crate) const CHARSET: u32 = 18;
pub(crate) const BYTES: u32 = 19;
/// Array whose element type is a value type
pub(crate) const VALUE_ARRAY: u32 = 20;
/// Array of containers, objects or `Any`
pub(crate) const OBJECT_ARRAY: u32 = 21;
pub(crate) const COLLECTION: u32 = 22;
pub(crate) const MAP: u32 = 23;
pub(crate) const COMPARATOR: u32 = 24;
pub(crate) const ANY: u32 = 25;
pub(crate) const INVOKE_SPEC: u32 = 26;
pub(crate) const INVOKE_RESULT: u32 = 27;

/// First wire id available to registered user classes.
pub const USER_BASE: u32 = 64;

/// How the codec treats a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Immutable scalars, strings, temporal values and arrays of those
    Value,
    /// Registered enums
    Enum,
    /// Comparator descriptors of sorted containers
    Comparator,
    /// Lists, sets and arrays of non-value elements
    Collection,
    Map,
    /// Registered object classes
    Object,
}

impl ValueKind {
    /// Only mutable-identity kinds are reference-tracked.
    pub const fn tracks_references(self) -> bool {
        matches!(
            self,
            ValueKind::Collection | ValueKind::Map | ValueKind::Object
        )
    }

    /// Classifies a wire class id. Errors for ids that never appear as a
    /// value class tag.
    pub(crate) fn of_class(class_id: u32, registry: &TypeRegistry) -> Result<ValueKind, CodecError> {
        match class_id {
            BOOL..=BYTES | VALUE_ARRAY => Ok(ValueKind::Value),
            OBJECT_ARRAY | COLLECTION => Ok(ValueKind::Collection),
            MAP => Ok(ValueKind::Map),
            COMPARATOR => Ok(ValueKind::Comparator),
            id if id >= USER_BASE => match registry.by_class_id(id)? {
                ClassDescriptor::Object { .. } => Ok(ValueKind::Object),
                ClassDescriptor::Enum { .. } => Ok(ValueKind::Enum),
            },
            id => Err(CodecError::UnexpectedClass {
                expected: "value class",
                found: id,
            }),
        }
    }
}

impl Value {
    /// Kind of this value. Null and value arrays classify as plain values.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Array(array) if array.element.is_value_type() => ValueKind::Value,
            Value::Array(_) | Value::List(_) | Value::Set(_) | Value::SortedSet(_) => {
                ValueKind::Collection
            }
            Value::Map(_) | Value::SortedMap(_) => ValueKind::Map,
            Value::Enum(_) => ValueKind::Enum,
            Value::Object(_) => ValueKind::Object,
            _ => ValueKind::Value,
        }
    }
}
