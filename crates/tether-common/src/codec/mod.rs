//! Tether Object-Graph Codec
//!
//! Encodes [`InvokeSpec`] and [`InvokeResult`] envelopes, and the [`Value`]
//! graphs they carry, into a compact binary form.
//!
//! # Layout
//!
//! Every value starts with a class tag: `0` for null, otherwise the class id
//! plus one. Built-in classes occupy the low ids; registered user classes
//! start at [`USER_BASE`].
//!
//! Containers and objects are reference-tracked: after the class tag comes a
//! marker that is `0` for a new instance or `n` for a back-reference to the
//! `n-1`th instance already written in this envelope. Scalars, strings,
//! temporal values, enums and value arrays are always written inline.
//!
//! A non-empty container writes its size and then one element class tag.
//! When every element is non-null and of the same class, that class is
//! written once and elements follow as bare bodies; otherwise the tag is `0`
//! and each element carries its own class tag. Maps do the same for keys and
//! values independently.
//!
//! # Safety
//!
//! Decoding untrusted input never panics. Unknown class ids, ordinals and
//! comparators, sizes larger than the remaining input, nesting beyond
//! [`CodecConfig::max_depth`], and trailing bytes are all reported as
//! [`CodecError`].

mod class;
mod comparator;
mod convert;
mod decode;
mod encode;
mod registry;
pub mod value;
mod wire;


use std::sync::Arc;

use bytes::Bytes;

pub use class::{ValueKind, USER_BASE};
pub use comparator::{Comparator, ComparatorPolicy};
pub use convert::{FromValue, IntoValue};
pub use registry::{ClassDescriptor, TypeRegistry, TypeRegistryBuilder};
pub use value::{
    ArrayValue, BigDecimal, BigInteger, Charset, EnumValue, MapValue, ObjectValue, SetValue,
    SortedMapValue, SortedSetValue, Value,
};

use crate::protocol::error::{CodecError, Result};
use crate::protocol::requests::InvokeSpec;
use crate::protocol::responses::InvokeResult;
use decode::Decoder;
use encode::Encoder;

/// Default nesting limit for decoded and encoded graphs.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Codec settings shared by both peers of a connection.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// User classes known to this peer
    pub registry: Arc<TypeRegistry>,
    /// Comparators accepted on sorted containers
    pub comparators: ComparatorPolicy,
    /// Maximum nesting of containers, objects and type references
    pub max_depth: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        CodecConfig {
            registry: Arc::new(TypeRegistry::default()),
            comparators: ComparatorPolicy::default(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl CodecConfig {
    pub fn with_registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_comparators(mut self, comparators: ComparatorPolicy) -> Self {
        self.comparators = comparators;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_depth == 0 {
            return Err("max_depth must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Encoder/decoder for invocation envelopes.
///
/// Cheap to clone; the registry is shared.
///
/// # Example
///
/// ```
/// use tether_common::{Codec, CodecConfig, InvokeResult, Value};
///
/// let codec = Codec::new(CodecConfig::default());
/// let result = InvokeResult::ok(42, Value::list([Value::Int(1), Value::Null]));
///
/// let body = codec.encode_result(&result).unwrap();
/// assert_eq!(codec.decode_result(&body).unwrap(), result);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Codec {
    config: CodecConfig,
}

impl Codec {
    pub fn new(config: CodecConfig) -> Self {
        Codec { config }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Encodes a request envelope. Either the whole body is produced or an
    /// error is returned; there is no partial output.
    pub fn encode_spec(&self, spec: &InvokeSpec) -> Result<Bytes> {
        let mut encoder = Encoder::new(&self.config);
        encoder.write_spec(spec)?;
        Ok(encoder.finish().freeze())
    }

    pub fn decode_spec(&self, data: &[u8]) -> Result<InvokeSpec> {
        let mut decoder = Decoder::new(data, &self.config);
        let spec = decoder.read_spec()?;
        decoder.finish()?;
        Ok(spec)
    }

    pub fn encode_result(&self, result: &InvokeResult) -> Result<Bytes> {
        let mut encoder = Encoder::new(&self.config);
        encoder.write_result(result)?;
        Ok(encoder.finish().freeze())
    }

    pub fn decode_result(&self, data: &[u8]) -> Result<InvokeResult> {
        let mut decoder = Decoder::new(data, &self.config);
        let result = decoder.read_result()?;
        decoder.finish()?;
        Ok(result)
    }

    /// Encodes a standalone value graph.
    pub fn encode_value(&self, value: &Value) -> std::result::Result<Bytes, CodecError> {
        let mut encoder = Encoder::new(&self.config);
        encoder.write_value(value)?;
        Ok(encoder.finish().freeze())
    }

    pub fn decode_value(&self, data: &[u8]) -> std::result::Result<Value, CodecError> {
        let mut decoder = Decoder::new(data, &self.config);
        let value = decoder.read_value()?;
        decoder.finish()?;
        Ok(value)
    }
}

impl From<CodecConfig> for Codec {
    fn from(config: CodecConfig) -> Self {
        Codec::new(config)
    }
}
