use std::collections::HashMap;
use std::sync::Arc;

use bytes::BytesMut;
use chrono::{Datelike, Timelike};

use super::class::{self, ValueKind};
use super::comparator::Comparator;
use super::registry::ClassDescriptor;
use super::value::{BigInteger, Value};
use super::wire::WireWriter;
use super::CodecConfig;
use crate::protocol::error::CodecError;
use crate::protocol::requests::InvokeSpec;
use crate::protocol::responses::InvokeResult;
use crate::protocol::signature::{MethodSignature, TypeRef};

/// Writes one envelope. A fresh encoder is used per envelope, so reference
/// ids never leak between messages.
pub(crate) struct Encoder<'a> {
    out: WireWriter,
    config: &'a CodecConfig,
    /// Arc address -> reference id, for tracked kinds only
    refs: HashMap<usize, u32>,
    depth: usize,
}

impl<'a> Encoder<'a> {
    pub(crate) fn new(config: &'a CodecConfig) -> Self {
        Encoder {
            out: WireWriter::with_capacity(128),
            config,
            refs: HashMap::new(),
            depth: 0,
        }
    }

    pub(crate) fn finish(self) -> BytesMut {
        self.out.into_inner()
    }

    // ========================================================================
    // Envelopes
    // ========================================================================

    pub(crate) fn write_spec(&mut self, spec: &InvokeSpec) -> Result<(), CodecError> {
        self.out.put_varint(u64::from(class::INVOKE_SPEC) + 1);
        self.out.put_varint(spec.request_id);
        self.out.put_zigzag(spec.timestamp);
        self.out.put_str(&spec.service_name);
        self.out.put_str(&spec.method_name);
        self.write_signature(&spec.signature)?;
        self.out.put_len(spec.arguments.len());
        for argument in &spec.arguments {
            self.write_value(argument)?;
        }
        Ok(())
    }

    pub(crate) fn write_result(&mut self, result: &InvokeResult) -> Result<(), CodecError> {
        self.out.put_varint(u64::from(class::INVOKE_RESULT) + 1);
        self.out.put_varint(result.request_id);
        self.out.put_zigzag(result.timestamp);
        self.out.put_varint(u64::from(result.status.ordinal()));
        self.out.put_opt_str(result.error_message.as_deref());
        self.write_value(&result.payload)
    }

    /// Parameter count, a bitset of primitive flags (bit 0 for the return
    /// type, bit i+1 for parameter i), then the return and parameter types.
    fn write_signature(&mut self, signature: &MethodSignature) -> Result<(), CodecError> {
        let specs = std::iter::once(&signature.returns).chain(&signature.params);
        let mut bits = vec![0u8; signature.params.len() / 8 + 1];
        for (i, spec) in specs.clone().enumerate() {
            if !spec.is_valid() {
                return Err(CodecError::InvalidPrimitive(spec.ty.to_string()));
            }
            if spec.primitive {
                bits[i / 8] |= 1 << (i % 8);
            }
        }
        while bits.last() == Some(&0) {
            bits.pop();
        }

        self.out.put_len(signature.params.len());
        self.out.put_bytes(&bits);
        for spec in specs {
            self.write_type_ref(&spec.ty)?;
        }
        Ok(())
    }

    fn write_type_ref(&mut self, ty: &TypeRef) -> Result<(), CodecError> {
        self.enter()?;
        match ty {
            TypeRef::Void => self.out.put_varint(u64::from(class::VOID)),
            TypeRef::Any => self.out.put_varint(u64::from(class::ANY)),
            TypeRef::Collection(kind) => {
                self.out.put_varint(u64::from(class::COLLECTION));
                self.out.put_u8(kind.tag());
            }
            TypeRef::Map(kind) => {
                self.out.put_varint(u64::from(class::MAP));
                self.out.put_u8(kind.tag());
            }
            TypeRef::Array(element) => {
                let id = if element.is_value_type() {
                    class::VALUE_ARRAY
                } else {
                    class::OBJECT_ARRAY
                };
                self.out.put_varint(u64::from(id));
                self.write_type_ref(element)?;
            }
            TypeRef::Registered(name) => {
                let id = self.config.registry.class_id_of(name)?;
                self.out.put_varint(u64::from(id));
            }
            scalar => {
                let id = value_class_id(scalar).ok_or_else(|| CodecError::InvalidValue {
                    what: "type reference",
                    value: scalar.to_string(),
                })?;
                self.out.put_varint(u64::from(id));
            }
        }
        self.leave();
        Ok(())
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Class tag, then the body.
    pub(crate) fn write_value(&mut self, value: &Value) -> Result<(), CodecError> {
        if value.is_null() {
            self.out.put_varint(0);
            return Ok(());
        }
        let class_id = self.class_id(value)?;
        self.out.put_varint(u64::from(class_id) + 1);
        self.write_body(class_id, value)
    }

    fn class_id(&self, value: &Value) -> Result<u32, CodecError> {
        Ok(match value {
            Value::Null => class::VOID,
            Value::Bool(_) => class::BOOL,
            Value::Byte(_) => class::BYTE,
            Value::Short(_) => class::SHORT,
            Value::Int(_) => class::INT,
            Value::Long(_) => class::LONG,
            Value::Float(_) => class::FLOAT,
            Value::Double(_) => class::DOUBLE,
            Value::Char(_) => class::CHAR,
            Value::String(_) => class::STRING,
            Value::BigInteger(_) => class::BIG_INTEGER,
            Value::BigDecimal(_) => class::BIG_DECIMAL,
            Value::Uuid(_) => class::UUID,
            Value::Date(_) => class::DATE,
            Value::Time(_) => class::TIME,
            Value::DateTime(_) => class::DATE_TIME,
            Value::Instant(_) => class::INSTANT,
            Value::Duration(_) => class::DURATION,
            Value::Charset(_) => class::CHARSET,
            Value::Bytes(_) => class::BYTES,
            Value::Array(array) if array.element.is_value_type() => class::VALUE_ARRAY,
            Value::Array(_) => class::OBJECT_ARRAY,
            Value::List(_) | Value::Set(_) | Value::SortedSet(_) => class::COLLECTION,
            Value::Map(_) | Value::SortedMap(_) => class::MAP,
            Value::Enum(variant) => self.config.registry.class_id_of(&variant.class)?,
            Value::Object(object) => self.config.registry.class_id_of(&object.class)?,
        })
    }

    /// Body of a non-null value of `class_id`, with the reference marker for
    /// tracked kinds.
    fn write_body(&mut self, class_id: u32, value: &Value) -> Result<(), CodecError> {
        let kind = ValueKind::of_class(class_id, &self.config.registry)?;
        if kind.tracks_references() {
            let address = identity(value);
            if let Some(id) = self.refs.get(&address) {
                self.out.put_varint(u64::from(*id) + 1);
                return Ok(());
            }
            let id = self.refs.len() as u32;
            self.refs.insert(address, id);
            self.out.put_varint(0);
        }
        self.enter()?;
        self.write_contents(value)?;
        self.leave();
        Ok(())
    }

    fn write_contents(&mut self, value: &Value) -> Result<(), CodecError> {
        match value {
            Value::Null => {}
            Value::Bool(v) => self.out.put_u8(u8::from(*v)),
            Value::Byte(v) => self.out.put_u8(*v as u8),
            Value::Short(v) => self.out.put_i16(*v),
            Value::Int(v) => self.out.put_zigzag(i64::from(*v)),
            Value::Long(v) => self.out.put_zigzag(*v),
            Value::Float(v) => self.out.put_f32(*v),
            Value::Double(v) => self.out.put_f64(*v),
            Value::Char(v) => self.out.put_varint(u64::from(u32::from(*v))),
            Value::String(v) => self.out.put_str(v),
            Value::BigInteger(v) => self.write_big_integer(v),
            Value::BigDecimal(v) => {
                self.out.put_zigzag(i64::from(v.scale));
                self.write_big_integer(&v.unscaled);
            }
            Value::Uuid(v) => self.out.put_raw(v.as_bytes()),
            Value::Date(v) => self.out.put_zigzag(i64::from(v.num_days_from_ce())),
            Value::Time(v) => {
                self.out.put_varint(u64::from(v.num_seconds_from_midnight()));
                self.out.put_varint(u64::from(v.nanosecond()));
            }
            Value::DateTime(v) => {
                self.out.put_zigzag(i64::from(v.date().num_days_from_ce()));
                self.out.put_varint(u64::from(v.time().num_seconds_from_midnight()));
                self.out.put_varint(u64::from(v.time().nanosecond()));
            }
            Value::Instant(v) => {
                self.out.put_zigzag(v.timestamp());
                self.out.put_varint(u64::from(v.timestamp_subsec_nanos()));
            }
            Value::Duration(v) => {
                self.out.put_zigzag(v.num_seconds());
                self.out.put_zigzag(i64::from(v.subsec_nanos()));
            }
            Value::Charset(v) => self.out.put_str(v.name()),
            Value::Bytes(v) => self.out.put_bytes(v),
            Value::Array(array) => {
                self.write_type_ref(&array.element)?;
                self.write_elements(&array.items)?;
            }
            Value::List(items) => {
                self.out.put_u8(1);
                self.write_elements(items)?;
            }
            Value::Set(set) => {
                self.out.put_u8(2);
                self.write_elements(set.items())?;
            }
            Value::SortedSet(set) => {
                self.out.put_u8(3);
                self.write_comparator(set.comparator())?;
                self.write_elements(set.items())?;
            }
            Value::Map(map) => {
                self.out.put_u8(1);
                self.write_entries(map.entries())?;
            }
            Value::SortedMap(map) => {
                self.out.put_u8(2);
                self.write_comparator(map.comparator())?;
                self.write_entries(map.entries())?;
            }
            Value::Enum(variant) => {
                let class_id = self.config.registry.class_id_of(&variant.class)?;
                match self.config.registry.by_class_id(class_id)? {
                    ClassDescriptor::Enum { variants, .. } if (variant.ordinal as usize) < variants.len() => {
                        self.out.put_varint(u64::from(variant.ordinal));
                    }
                    _ => {
                        return Err(CodecError::InvalidValue {
                            what: "enum ordinal",
                            value: format!("{}#{}", variant.class, variant.ordinal),
                        })
                    }
                }
            }
            Value::Object(object) => {
                let class_id = self.config.registry.class_id_of(&object.class)?;
                match self.config.registry.by_class_id(class_id)? {
                    ClassDescriptor::Object { fields, .. } if fields.len() == object.fields.len() => {}
                    ClassDescriptor::Object { fields, .. } => {
                        return Err(CodecError::FieldCount {
                            class: object.class.to_string(),
                            expected: fields.len(),
                            found: object.fields.len(),
                        })
                    }
                    ClassDescriptor::Enum { .. } => {
                        return Err(CodecError::UnregisteredType(object.class.to_string()))
                    }
                }
                for field in &object.fields {
                    self.write_value(field)?;
                }
            }
        }
        Ok(())
    }

    fn write_big_integer(&mut self, v: &BigInteger) {
        self.out.put_bytes(v.as_be_bytes());
    }

    fn write_comparator(&mut self, comparator: &Comparator) -> Result<(), CodecError> {
        self.config.comparators.check(comparator)?;
        self.out.put_u8(comparator.wire_id());
        if let Comparator::Custom(name) = comparator {
            self.out.put_str(name);
        }
        Ok(())
    }

    /// Size, then either a shared element class followed by untagged bodies,
    /// or `0` followed by fully tagged elements.
    fn write_elements(&mut self, items: &[Value]) -> Result<(), CodecError> {
        self.out.put_len(items.len());
        if items.is_empty() {
            return Ok(());
        }
        match self.shared_class(items.iter())? {
            Some(class_id) => {
                self.out.put_varint(u64::from(class_id) + 1);
                for item in items {
                    self.write_body(class_id, item)?;
                }
            }
            None => {
                self.out.put_varint(0);
                for item in items {
                    self.write_value(item)?;
                }
            }
        }
        Ok(())
    }

    fn write_entries(&mut self, entries: &[(Value, Value)]) -> Result<(), CodecError> {
        self.out.put_len(entries.len());
        if entries.is_empty() {
            return Ok(());
        }
        let key_class = self.shared_class(entries.iter().map(|(k, _)| k))?;
        let value_class = self.shared_class(entries.iter().map(|(_, v)| v))?;
        self.out.put_varint(key_class.map_or(0, |id| u64::from(id) + 1));
        self.out.put_varint(value_class.map_or(0, |id| u64::from(id) + 1));
        for (key, value) in entries {
            match key_class {
                Some(id) => self.write_body(id, key)?,
                None => self.write_value(key)?,
            }
            match value_class {
                Some(id) => self.write_body(id, value)?,
                None => self.write_value(value)?,
            }
        }
        Ok(())
    }

    /// The class every item shares, or `None` when any item is null or the
    /// classes differ.
    fn shared_class<'v>(
        &self,
        mut items: impl Iterator<Item = &'v Value>,
    ) -> Result<Option<u32>, CodecError> {
        let first = match items.next() {
            Some(Value::Null) | None => return Ok(None),
            Some(first) => self.class_id(first)?,
        };
        for item in items {
            if item.is_null() || self.class_id(item)? != first {
                return Ok(None);
            }
        }
        Ok(Some(first))
    }

    fn enter(&mut self) -> Result<(), CodecError> {
        self.depth += 1;
        if self.depth > self.config.max_depth {
            return Err(CodecError::DepthExceeded(self.config.max_depth));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }
}

/// Address of the shared allocation behind a tracked value.
fn identity(value: &Value) -> usize {
    match value {
        Value::Array(v) => Arc::as_ptr(v) as *const () as usize,
        Value::List(v) => Arc::as_ptr(v) as *const () as usize,
        Value::Set(v) => Arc::as_ptr(v) as *const () as usize,
        Value::SortedSet(v) => Arc::as_ptr(v) as *const () as usize,
        Value::Map(v) => Arc::as_ptr(v) as *const () as usize,
        Value::SortedMap(v) => Arc::as_ptr(v) as *const () as usize,
        Value::Object(v) => Arc::as_ptr(v) as *const () as usize,
        other => other as *const Value as usize,
    }
}

/// Class id of a value type, `None` for every other type reference.
pub(crate) fn value_class_id(ty: &TypeRef) -> Option<u32> {
    let id = match ty {
        TypeRef::Bool => class::BOOL,
        TypeRef::Byte => class::BYTE,
        TypeRef::Short => class::SHORT,
        TypeRef::Int => class::INT,
        TypeRef::Long => class::LONG,
        TypeRef::Float => class::FLOAT,
        TypeRef::Double => class::DOUBLE,
        TypeRef::Char => class::CHAR,
        TypeRef::String => class::STRING,
        TypeRef::BigInteger => class::BIG_INTEGER,
        TypeRef::BigDecimal => class::BIG_DECIMAL,
        TypeRef::Uuid => class::UUID,
        TypeRef::Date => class::DATE,
        TypeRef::Time => class::TIME,
        TypeRef::DateTime => class::DATE_TIME,
        TypeRef::Instant => class::INSTANT,
        TypeRef::Duration => class::DURATION,
        TypeRef::Charset => class::CHARSET,
        TypeRef::Bytes => class::BYTES,
        _ => return None,
    };
    Some(id)
}
