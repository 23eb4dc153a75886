//! Method signatures and type references.
//!
//! A [`MethodSignature`] travels inside every [`InvokeSpec`](super::InvokeSpec)
//! so the server can validate arguments before resolving the method, and the
//! client can check the declared return type of a result.

use std::fmt;
use std::sync::Arc;

use crate::codec::value::Value;

/// Kind of a collection container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    List,
    Set,
    SortedSet,
}

impl CollectionKind {
    pub(crate) const fn tag(self) -> u8 {
        match self {
            CollectionKind::List => 1,
            CollectionKind::Set => 2,
            CollectionKind::SortedSet => 3,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(CollectionKind::List),
            2 => Some(CollectionKind::Set),
            3 => Some(CollectionKind::SortedSet),
            _ => None,
        }
    }
}

/// Kind of a map container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapKind {
    Map,
    SortedMap,
}

impl MapKind {
    pub(crate) const fn tag(self) -> u8 {
        match self {
            MapKind::Map => 1,
            MapKind::SortedMap => 2,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(MapKind::Map),
            2 => Some(MapKind::SortedMap),
            _ => None,
        }
    }
}

/// A reference to a wire type, as it appears in a method signature or as
/// the element type of an array.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    /// No value; only meaningful as a return type
    Void,
    Bool,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Char,
    String,
    BigInteger,
    BigDecimal,
    Uuid,
    Date,
    Time,
    DateTime,
    Instant,
    Duration,
    Charset,
    Bytes,
    /// Any value at all
    Any,
    Collection(CollectionKind),
    Map(MapKind),
    Array(Box<TypeRef>),
    /// A user object or enum registered under this class name
    Registered(Arc<str>),
}

impl TypeRef {
    /// Shorthand for a registered user type.
    pub fn registered(name: impl Into<Arc<str>>) -> Self {
        TypeRef::Registered(name.into())
    }

    /// Shorthand for an array of `element`.
    pub fn array(element: TypeRef) -> Self {
        TypeRef::Array(Box::new(element))
    }

    /// Whether the type is an immutable value type: scalars, strings, numbers,
    /// temporal values, charsets and byte strings. Value types are never
    /// reference-tracked on the wire.
    pub fn is_value_type(&self) -> bool {
        matches!(
            self,
            TypeRef::Bool
                | TypeRef::Byte
                | TypeRef::Short
                | TypeRef::Int
                | TypeRef::Long
                | TypeRef::Float
                | TypeRef::Double
                | TypeRef::Char
                | TypeRef::String
                | TypeRef::BigInteger
                | TypeRef::BigDecimal
                | TypeRef::Uuid
                | TypeRef::Date
                | TypeRef::Time
                | TypeRef::DateTime
                | TypeRef::Instant
                | TypeRef::Duration
                | TypeRef::Charset
                | TypeRef::Bytes
        )
    }

    /// Whether a [`TypeSpec`] of this type may carry the primitive flag.
    pub fn supports_primitive(&self) -> bool {
        matches!(
            self,
            TypeRef::Void
                | TypeRef::Bool
                | TypeRef::Byte
                | TypeRef::Short
                | TypeRef::Int
                | TypeRef::Long
                | TypeRef::Float
                | TypeRef::Double
                | TypeRef::Char
        )
    }

    /// Whether `value` is assignable to this type.
    ///
    /// `Null` is assignable to every type. A plain set or map type also
    /// accepts its sorted variant, and `Array(Any)` accepts any array.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (TypeRef::Any, _) => true,
            (TypeRef::Void, _) => false,
            (TypeRef::Bool, Value::Bool(_))
            | (TypeRef::Byte, Value::Byte(_))
            | (TypeRef::Short, Value::Short(_))
            | (TypeRef::Int, Value::Int(_))
            | (TypeRef::Long, Value::Long(_))
            | (TypeRef::Float, Value::Float(_))
            | (TypeRef::Double, Value::Double(_))
            | (TypeRef::Char, Value::Char(_))
            | (TypeRef::String, Value::String(_))
            | (TypeRef::BigInteger, Value::BigInteger(_))
            | (TypeRef::BigDecimal, Value::BigDecimal(_))
            | (TypeRef::Uuid, Value::Uuid(_))
            | (TypeRef::Date, Value::Date(_))
            | (TypeRef::Time, Value::Time(_))
            | (TypeRef::DateTime, Value::DateTime(_))
            | (TypeRef::Instant, Value::Instant(_))
            | (TypeRef::Duration, Value::Duration(_))
            | (TypeRef::Charset, Value::Charset(_))
            | (TypeRef::Bytes, Value::Bytes(_)) => true,
            (TypeRef::Collection(CollectionKind::List), Value::List(_)) => true,
            (TypeRef::Collection(CollectionKind::Set), Value::Set(_) | Value::SortedSet(_)) => true,
            (TypeRef::Collection(CollectionKind::SortedSet), Value::SortedSet(_)) => true,
            (TypeRef::Map(MapKind::Map), Value::Map(_) | Value::SortedMap(_)) => true,
            (TypeRef::Map(MapKind::SortedMap), Value::SortedMap(_)) => true,
            (TypeRef::Array(element), Value::Array(array)) => {
                **element == TypeRef::Any || **element == array.element
            }
            (TypeRef::Registered(name), Value::Object(object)) => **name == *object.class,
            (TypeRef::Registered(name), Value::Enum(variant)) => **name == *variant.class,
            _ => false,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Void => f.write_str("void"),
            TypeRef::Bool => f.write_str("Bool"),
            TypeRef::Byte => f.write_str("Byte"),
            TypeRef::Short => f.write_str("Short"),
            TypeRef::Int => f.write_str("Int"),
            TypeRef::Long => f.write_str("Long"),
            TypeRef::Float => f.write_str("Float"),
            TypeRef::Double => f.write_str("Double"),
            TypeRef::Char => f.write_str("Char"),
            TypeRef::String => f.write_str("String"),
            TypeRef::BigInteger => f.write_str("BigInteger"),
            TypeRef::BigDecimal => f.write_str("BigDecimal"),
            TypeRef::Uuid => f.write_str("Uuid"),
            TypeRef::Date => f.write_str("Date"),
            TypeRef::Time => f.write_str("Time"),
            TypeRef::DateTime => f.write_str("DateTime"),
            TypeRef::Instant => f.write_str("Instant"),
            TypeRef::Duration => f.write_str("Duration"),
            TypeRef::Charset => f.write_str("Charset"),
            TypeRef::Bytes => f.write_str("Bytes"),
            TypeRef::Any => f.write_str("Any"),
            TypeRef::Collection(CollectionKind::List) => f.write_str("List"),
            TypeRef::Collection(CollectionKind::Set) => f.write_str("Set"),
            TypeRef::Collection(CollectionKind::SortedSet) => f.write_str("SortedSet"),
            TypeRef::Map(MapKind::Map) => f.write_str("Map"),
            TypeRef::Map(MapKind::SortedMap) => f.write_str("SortedMap"),
            TypeRef::Array(element) => write!(f, "{}[]", element),
            TypeRef::Registered(name) => f.write_str(name),
        }
    }
}

/// A declared parameter or return type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeSpec {
    pub ty: TypeRef,
    /// Unboxed primitive flag. Only legal for `Void`, booleans, integers,
    /// floats and chars; it is preserved on the wire and ignored by
    /// assignability checks.
    pub primitive: bool,
}

impl TypeSpec {
    pub fn boxed(ty: TypeRef) -> Self {
        TypeSpec {
            ty,
            primitive: false,
        }
    }

    pub fn primitive(ty: TypeRef) -> Self {
        TypeSpec {
            ty,
            primitive: true,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.primitive || self.ty.supports_primitive()
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.primitive {
            write!(f, "{}", self.ty.to_string().to_lowercase())
        } else {
            write!(f, "{}", self.ty)
        }
    }
}

/// Ordered parameter types plus the return type of a remote method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    pub returns: TypeSpec,
    pub params: Vec<TypeSpec>,
}

impl MethodSignature {
    /// Creates a signature with no parameters.
    pub fn new(returns: TypeSpec) -> Self {
        MethodSignature {
            returns,
            params: Vec::new(),
        }
    }

    /// Appends a parameter type.
    pub fn param(mut self, param: TypeSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn parameter_count(&self) -> usize {
        self.params.len()
    }

    /// Whether `args` matches the parameter list in arity and every non-null
    /// argument is assignable to its declared parameter type.
    pub fn is_match(&self, args: &[Value]) -> bool {
        args.len() == self.params.len()
            && self
                .params
                .iter()
                .zip(args)
                .all(|(param, arg)| param.ty.accepts(arg))
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, "){}", self.returns)
    }
}
