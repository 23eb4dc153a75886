use thiserror::Error;

use super::responses::StatusCode;

/// Errors raised by the object-graph codec.
///
/// Every decode failure is reported through this type; the decoder never
/// panics on malformed, truncated or hostile input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    // ========================================================================
    // Input errors
    // ========================================================================
    #[error("Unexpected end of input: needed {needed} more bytes")]
    UnexpectedEof { needed: usize },

    #[error("Malformed varint")]
    MalformedVarint,

    #[error("Invalid UTF-8 in string")]
    InvalidUtf8,

    #[error("Declared size {size} exceeds remaining input of {remaining} bytes")]
    SizeOutOfBounds { size: usize, remaining: usize },

    #[error("{0} trailing bytes after envelope")]
    TrailingBytes(usize),

    #[error("Nesting depth exceeds limit of {0}")]
    DepthExceeded(usize),

    // ========================================================================
    // Type errors
    // ========================================================================
    #[error("Unregistered class id: {0}")]
    UnregisteredClassId(u32),

    #[error("Unregistered type: {0}")]
    UnregisteredType(String),

    #[error("Unexpected class id {found}, expected {expected}")]
    UnexpectedClass { expected: &'static str, found: u32 },

    #[error("Invalid {what}: {value}")]
    InvalidValue { what: &'static str, value: String },

    #[error("Class {class} declares {expected} fields, found {found}")]
    FieldCount {
        class: String,
        expected: usize,
        found: usize,
    },

    #[error("Type {0} cannot be primitive")]
    InvalidPrimitive(String),

    #[error("Expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    // ========================================================================
    // Graph errors
    // ========================================================================
    #[error("Invalid back-reference: {0}")]
    InvalidReference(u32),

    #[error("Back-reference {0} points at an object still being decoded")]
    CyclicReference(u32),

    #[error("Comparator refused: {0}")]
    ComparatorRefused(String),

    #[error("Registry error: {0}")]
    Registry(String),
}

/// Top-level error type for tether.
#[derive(Error, Debug)]
pub enum TetherError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unknown frame magic: {0:#06x}")]
    BadMagic(u16),

    #[error("Frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Duplicated requestId: {0}")]
    DuplicateRequestId(u64),

    #[error("Remote call failed with {status}: {message}")]
    Remote { status: StatusCode, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Connecting failed over maximum limit: {0}")]
    ConnectAttemptsExceeded(u32),

    #[error("{0} already closed")]
    AlreadyClosed(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TetherError {
    /// Returns true when the error means the byte stream can no longer be
    /// trusted (bad framing or an undecodable body).
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            TetherError::Protocol(_)
                | TetherError::BadMagic(_)
                | TetherError::FrameTooLarge { .. }
                | TetherError::Codec(_)
        )
    }

    /// Builds the error handed to every call that was still pending when a
    /// connection failed with `self`.
    pub fn for_pending(&self) -> TetherError {
        match self {
            TetherError::Protocol(message) => TetherError::Protocol(message.clone()),
            TetherError::ConnectionClosed(reason) => TetherError::ConnectionClosed(reason.clone()),
            other if other.is_protocol() => TetherError::Protocol(other.to_string()),
            other => TetherError::ConnectionClosed(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, TetherError>;
