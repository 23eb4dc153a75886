//! Tether Response Types
//!
//! This module defines the invocation result envelope and its status codes.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{Result, TetherError};
use super::requests::{now_millis, RequestId};
use crate::codec::value::Value;

/// Outcome class of an invocation.
///
/// The wire form is the ordinal, in declaration order. Unknown ordinals are
/// rejected by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    /// The method ran and its result is in the payload
    Ok,
    /// The request or the stream could not be decoded
    ProtocolError,
    /// Arguments do not match the signature, or the request id is a duplicate
    ParameterError,
    /// No method is registered for the service, name and parameter types
    LookupError,
    /// The method failed or returned a value of the wrong type
    InvocationError,
    /// Anything else
    UnknownError,
}

impl StatusCode {
    const ALL: [StatusCode; 6] = [
        StatusCode::Ok,
        StatusCode::ProtocolError,
        StatusCode::ParameterError,
        StatusCode::LookupError,
        StatusCode::InvocationError,
        StatusCode::UnknownError,
    ];

    pub const fn ordinal(self) -> u32 {
        self as u32
    }

    pub fn from_ordinal(ordinal: u32) -> Option<StatusCode> {
        Self::ALL.get(ordinal as usize).copied()
    }

    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Ok => "OK",
            StatusCode::ProtocolError => "PROTOCOL_ERROR",
            StatusCode::ParameterError => "PARAMETER_ERROR",
            StatusCode::LookupError => "LOOKUP_ERROR",
            StatusCode::InvocationError => "INVOCATION_ERROR",
            StatusCode::UnknownError => "UNKNOWN_ERROR",
        };
        f.write_str(name)
    }
}

/// The answer to one [`InvokeSpec`](super::InvokeSpec).
///
/// # Example
///
/// ```
/// use tether_common::{InvokeResult, StatusCode, Value};
///
/// let ok = InvokeResult::ok(7, Value::Double(9.0));
/// assert_eq!(ok.into_payload().unwrap(), Value::Double(9.0));
///
/// let failed = InvokeResult::error(8, StatusCode::LookupError, "Method not found: \"sub\"");
/// assert!(failed.into_payload().is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeResult {
    /// Request identifier this result answers
    pub request_id: RequestId,
    /// Creation time in milliseconds since the Unix epoch
    pub timestamp: i64,
    pub status: StatusCode,
    /// Present when `status` is not OK
    pub error_message: Option<String>,
    /// Result value; `Null` for void methods and failures
    pub payload: Value,
}

impl InvokeResult {
    pub fn ok(request_id: RequestId, payload: Value) -> Self {
        InvokeResult {
            request_id,
            timestamp: now_millis(),
            status: StatusCode::Ok,
            error_message: None,
            payload,
        }
    }

    pub fn error(request_id: RequestId, status: StatusCode, message: impl Into<String>) -> Self {
        InvokeResult {
            request_id,
            timestamp: now_millis(),
            status,
            error_message: Some(message.into()),
            payload: Value::Null,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// Returns the payload, or [`TetherError::Remote`] when the status is not OK.
    pub fn into_payload(self) -> Result<Value> {
        if self.status.is_ok() {
            Ok(self.payload)
        } else {
            Err(TetherError::Remote {
                status: self.status,
                message: self.error_message.unwrap_or_default(),
            })
        }
    }
}
