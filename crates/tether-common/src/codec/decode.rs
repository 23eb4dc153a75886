use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use uuid::Uuid;

use super::class::{self, ValueKind, USER_BASE};
use super::comparator::{Comparator, CUSTOM_COMPARATOR_ID};
use super::registry::ClassDescriptor;
use super::value::{
    ArrayValue, BigDecimal, BigInteger, Charset, EnumValue, MapValue, ObjectValue, SetValue,
    SortedMapValue, SortedSetValue, Value,
};
use super::wire::WireReader;
use super::CodecConfig;
use crate::protocol::error::CodecError;
use crate::protocol::requests::InvokeSpec;
use crate::protocol::responses::{InvokeResult, StatusCode};
use crate::protocol::signature::{CollectionKind, MapKind, MethodSignature, TypeRef, TypeSpec};

/// Reads one envelope.
pub(crate) struct Decoder<'a> {
    input: WireReader<'a>,
    config: &'a CodecConfig,
    /// Reference slots in first-appearance order, with the class each was
    /// written under; the value is `None` while the object is still being
    /// read.
    refs: Vec<(u32, Option<Value>)>,
    depth: usize,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(input: &'a [u8], config: &'a CodecConfig) -> Self {
        Decoder {
            input: WireReader::new(input),
            config,
            refs: Vec::new(),
            depth: 0,
        }
    }

    /// Fails if any input is left over.
    pub(crate) fn finish(self) -> Result<(), CodecError> {
        match self.input.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }

    // ========================================================================
    // Envelopes
    // ========================================================================

    fn expect_class(&mut self, class_id: u32, expected: &'static str) -> Result<(), CodecError> {
        let tag = self.input.get_varint_u32()?;
        if tag != class_id + 1 {
            return Err(CodecError::UnexpectedClass {
                expected,
                found: tag.wrapping_sub(1),
            });
        }
        Ok(())
    }

    pub(crate) fn read_spec(&mut self) -> Result<InvokeSpec, CodecError> {
        self.expect_class(class::INVOKE_SPEC, "InvokeSpec")?;
        let request_id = self.input.get_varint()?;
        let timestamp = self.input.get_zigzag()?;
        let service_name = self.input.get_string()?;
        let method_name = self.input.get_string()?;
        let signature = self.read_signature()?;
        let count = self.input.get_len(1)?;
        let mut arguments = Vec::with_capacity(count);
        for _ in 0..count {
            arguments.push(self.read_value()?);
        }
        Ok(InvokeSpec {
            request_id,
            timestamp,
            service_name,
            method_name,
            signature,
            arguments,
        })
    }

    pub(crate) fn read_result(&mut self) -> Result<InvokeResult, CodecError> {
        self.expect_class(class::INVOKE_RESULT, "InvokeResult")?;
        let request_id = self.input.get_varint()?;
        let timestamp = self.input.get_zigzag()?;
        let ordinal = self.input.get_varint_u32()?;
        let status = StatusCode::from_ordinal(ordinal).ok_or_else(|| CodecError::InvalidValue {
            what: "status ordinal",
            value: ordinal.to_string(),
        })?;
        let error_message = self.input.get_opt_string()?;
        let payload = self.read_value()?;
        Ok(InvokeResult {
            request_id,
            timestamp,
            status,
            error_message,
            payload,
        })
    }

    fn read_signature(&mut self) -> Result<MethodSignature, CodecError> {
        let count = self.input.get_len(1)?;
        let bits = self.input.get_bytes()?;
        if bits.len() > count / 8 + 1 {
            return Err(CodecError::InvalidValue {
                what: "primitive flag set",
                value: format!("{} bytes for {} parameters", bits.len(), count),
            });
        }
        let flag = |i: usize| bits.get(i / 8).is_some_and(|b| b & (1 << (i % 8)) != 0);

        let returns = self.read_type_spec(flag(0))?;
        let mut params = Vec::with_capacity(count);
        for i in 0..count {
            params.push(self.read_type_spec(flag(i + 1))?);
        }
        Ok(MethodSignature { returns, params })
    }

    fn read_type_spec(&mut self, primitive: bool) -> Result<TypeSpec, CodecError> {
        let spec = TypeSpec {
            ty: self.read_type_ref()?,
            primitive,
        };
        if !spec.is_valid() {
            return Err(CodecError::InvalidPrimitive(spec.ty.to_string()));
        }
        Ok(spec)
    }

    fn read_type_ref(&mut self) -> Result<TypeRef, CodecError> {
        self.enter()?;
        let id = self.input.get_varint_u32()?;
        let ty = match id {
            class::VOID => TypeRef::Void,
            class::ANY => TypeRef::Any,
            class::COLLECTION => {
                let tag = self.input.get_u8()?;
                TypeRef::Collection(CollectionKind::from_tag(tag).ok_or_else(|| {
                    CodecError::InvalidValue {
                        what: "collection kind",
                        value: tag.to_string(),
                    }
                })?)
            }
            class::MAP => {
                let tag = self.input.get_u8()?;
                TypeRef::Map(MapKind::from_tag(tag).ok_or_else(|| CodecError::InvalidValue {
                    what: "map kind",
                    value: tag.to_string(),
                })?)
            }
            class::VALUE_ARRAY | class::OBJECT_ARRAY => {
                let element = self.read_type_ref()?;
                check_array_element(id, &element)?;
                TypeRef::array(element)
            }
            id if id >= USER_BASE => {
                TypeRef::Registered(self.config.registry.by_class_id(id)?.name().clone())
            }
            id => value_type_of(id).ok_or(CodecError::UnexpectedClass {
                expected: "type reference",
                found: id,
            })?,
        };
        self.leave();
        Ok(ty)
    }

    // ========================================================================
    // Values
    // ========================================================================

    pub(crate) fn read_value(&mut self) -> Result<Value, CodecError> {
        match self.input.get_varint_u32()? {
            0 => Ok(Value::Null),
            tag => self.read_body(tag - 1),
        }
    }

    fn read_body(&mut self, class_id: u32) -> Result<Value, CodecError> {
        let kind = ValueKind::of_class(class_id, &self.config.registry)?;
        if kind == ValueKind::Comparator {
            return Err(CodecError::UnexpectedClass {
                expected: "value class",
                found: class_id,
            });
        }
        if !kind.tracks_references() {
            self.enter()?;
            let value = self.read_contents(class_id)?;
            self.leave();
            return Ok(value);
        }

        let marker = self.input.get_varint_u32()?;
        if marker > 0 {
            let id = marker - 1;
            return match self.refs.get(id as usize) {
                Some((written, _)) if *written != class_id => Err(CodecError::UnexpectedClass {
                    expected: "class of the referenced value",
                    found: class_id,
                }),
                Some((_, Some(value))) => Ok(value.clone()),
                Some((_, None)) => Err(CodecError::CyclicReference(id)),
                None => Err(CodecError::InvalidReference(id)),
            };
        }
        let slot = self.refs.len();
        self.refs.push((class_id, None));
        self.enter()?;
        let value = self.read_contents(class_id)?;
        self.leave();
        self.refs[slot].1 = Some(value.clone());
        Ok(value)
    }

    fn read_contents(&mut self, class_id: u32) -> Result<Value, CodecError> {
        let config = self.config;
        let value = match class_id {
            class::BOOL => match self.input.get_u8()? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => return Err(invalid("bool", other)),
            },
            class::BYTE => Value::Byte(self.input.get_u8()? as i8),
            class::SHORT => Value::Short(self.input.get_i16()?),
            class::INT => Value::Int(self.input.get_zigzag_i32()?),
            class::LONG => Value::Long(self.input.get_zigzag()?),
            class::FLOAT => Value::Float(self.input.get_f32()?),
            class::DOUBLE => Value::Double(self.input.get_f64()?),
            class::CHAR => {
                let code = self.input.get_varint_u32()?;
                Value::Char(char::from_u32(code).ok_or_else(|| invalid("char", code))?)
            }
            class::STRING => Value::String(self.input.get_string()?),
            class::BIG_INTEGER => Value::BigInteger(self.read_big_integer()?),
            class::BIG_DECIMAL => {
                let scale = self.input.get_zigzag_i32()?;
                Value::BigDecimal(BigDecimal::new(self.read_big_integer()?, scale))
            }
            class::UUID => Value::Uuid(Uuid::from_bytes(self.input.get_raw::<16>()?)),
            class::DATE => Value::Date(self.read_date()?),
            class::TIME => Value::Time(self.read_time()?),
            class::DATE_TIME => {
                let date = self.read_date()?;
                let time = self.read_time()?;
                Value::DateTime(NaiveDateTime::new(date, time))
            }
            class::INSTANT => {
                let secs = self.input.get_zigzag()?;
                let nanos = self.input.get_varint_u32()?;
                Value::Instant(
                    DateTime::from_timestamp(secs, nanos)
                        .ok_or_else(|| invalid("instant", format!("{}s {}ns", secs, nanos)))?,
                )
            }
            class::DURATION => {
                let secs = self.input.get_zigzag()?;
                let nanos = self.input.get_zigzag_i32()?;
                let duration = TimeDelta::try_seconds(secs)
                    .and_then(|d| d.checked_add(&TimeDelta::nanoseconds(i64::from(nanos))))
                    .ok_or_else(|| invalid("duration", format!("{}s {}ns", secs, nanos)))?;
                Value::Duration(duration)
            }
            class::CHARSET => Value::Charset(Charset::new(self.input.get_string()?)?),
            class::BYTES => Value::Bytes(self.input.get_bytes()?.to_vec()),
            class::VALUE_ARRAY | class::OBJECT_ARRAY => {
                let element = self.read_type_ref()?;
                check_array_element(class_id, &element)?;
                let items = self.read_elements()?;
                Value::Array(Arc::new(ArrayValue::new(element, items)?))
            }
            class::COLLECTION => {
                let tag = self.input.get_u8()?;
                match CollectionKind::from_tag(tag) {
                    Some(CollectionKind::List) => Value::List(Arc::new(self.read_elements()?)),
                    Some(CollectionKind::Set) => {
                        Value::Set(Arc::new(SetValue::from_decoded(self.read_elements()?)))
                    }
                    Some(CollectionKind::SortedSet) => {
                        let comparator = self.read_comparator()?;
                        let items = self.read_elements()?;
                        Value::SortedSet(Arc::new(SortedSetValue::new(comparator, items)))
                    }
                    None => return Err(invalid("collection kind", tag)),
                }
            }
            class::MAP => {
                let tag = self.input.get_u8()?;
                match MapKind::from_tag(tag) {
                    Some(MapKind::Map) => {
                        Value::Map(Arc::new(MapValue::from_decoded(self.read_entries()?)))
                    }
                    Some(MapKind::SortedMap) => {
                        let comparator = self.read_comparator()?;
                        let entries = self.read_entries()?;
                        Value::SortedMap(Arc::new(SortedMapValue::new(comparator, entries)))
                    }
                    None => return Err(invalid("map kind", tag)),
                }
            }
            id => match config.registry.by_class_id(id)? {
                ClassDescriptor::Object { name, fields } => {
                    let class = name.clone();
                    let count = fields.len();
                    let mut values = Vec::with_capacity(count.min(self.input.remaining()));
                    for _ in 0..count {
                        values.push(self.read_value()?);
                    }
                    Value::Object(Arc::new(ObjectValue {
                        class,
                        fields: values,
                    }))
                }
                ClassDescriptor::Enum { name, variants } => {
                    let class = name.clone();
                    let count = variants.len();
                    let ordinal = self.input.get_varint_u32()?;
                    if ordinal as usize >= count {
                        return Err(invalid("enum ordinal", format!("{}#{}", class, ordinal)));
                    }
                    Value::Enum(EnumValue { class, ordinal })
                }
            },
        };
        Ok(value)
    }

    fn read_big_integer(&mut self) -> Result<BigInteger, CodecError> {
        Ok(BigInteger::from_be_bytes(self.input.get_bytes()?))
    }

    fn read_date(&mut self) -> Result<NaiveDate, CodecError> {
        let days = self.input.get_zigzag_i32()?;
        NaiveDate::from_num_days_from_ce_opt(days).ok_or_else(|| invalid("date", days))
    }

    fn read_time(&mut self) -> Result<NaiveTime, CodecError> {
        let secs = self.input.get_varint_u32()?;
        let nanos = self.input.get_varint_u32()?;
        NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
            .ok_or_else(|| invalid("time", format!("{}s {}ns", secs, nanos)))
    }

    fn read_comparator(&mut self) -> Result<Comparator, CodecError> {
        let id = self.input.get_u8()?;
        let comparator = if id == CUSTOM_COMPARATOR_ID {
            Comparator::Custom(self.input.get_string()?)
        } else {
            Comparator::from_wire_id(id).ok_or_else(|| invalid("comparator id", id))?
        };
        self.config.comparators.check(&comparator)?;
        Ok(comparator)
    }

    fn read_elements(&mut self) -> Result<Vec<Value>, CodecError> {
        let len = self.input.get_len(1)?;
        if len == 0 {
            return Ok(Vec::new());
        }
        let element_tag = self.input.get_varint_u32()?;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(self.read_element(element_tag)?);
        }
        Ok(items)
    }

    fn read_entries(&mut self) -> Result<Vec<(Value, Value)>, CodecError> {
        let len = self.input.get_len(2)?;
        if len == 0 {
            return Ok(Vec::new());
        }
        let key_tag = self.input.get_varint_u32()?;
        let value_tag = self.input.get_varint_u32()?;
        let mut entries = Vec::with_capacity(len);
        for _ in 0..len {
            let key = self.read_element(key_tag)?;
            let value = self.read_element(value_tag)?;
            entries.push((key, value));
        }
        Ok(entries)
    }

    /// Reads one container element: fully tagged when the container is
    /// heterogeneous (`tag == 0`), otherwise a bare body of the shared class.
    fn read_element(&mut self, tag: u32) -> Result<Value, CodecError> {
        match tag {
            0 => self.read_value(),
            tag => self.read_body(tag - 1),
        }
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

fn invalid(what: &'static str, value: impl ToString) -> CodecError {
    CodecError::InvalidValue {
        what,
        value: value.to_string(),
    }
}

fn check_array_element(class_id: u32, element: &TypeRef) -> Result<(), CodecError> {
    let value_array = class_id == class::VALUE_ARRAY;
    if *element == TypeRef::Void || element.is_value_type() != value_array {
        return Err(invalid("array element type", element));
    }
    Ok(())
}

fn value_type_of(id: u32) -> Option<TypeRef> {
    let ty = match id {
        class::BOOL => TypeRef::Bool,
        class::BYTE => TypeRef::Byte,
        class::SHORT => TypeRef::Short,
        class::INT => TypeRef::Int,
        class::LONG => TypeRef::Long,
        class::FLOAT => TypeRef::Float,
        class::DOUBLE => TypeRef::Double,
        class::CHAR => TypeRef::Char,
        class::STRING => TypeRef::String,
        class::BIG_INTEGER => TypeRef::BigInteger,
        class::BIG_DECIMAL => TypeRef::BigDecimal,
        class::UUID => TypeRef::Uuid,
        class::DATE => TypeRef::Date,
        class::TIME => TypeRef::Time,
        class::DATE_TIME => TypeRef::DateTime,
        class::INSTANT => TypeRef::Instant,
        class::DURATION => TypeRef::Duration,
        class::CHARSET => TypeRef::Charset,
        class::BYTES => TypeRef::Bytes,
        _ => return None,
    };
    Some(ty)
}
