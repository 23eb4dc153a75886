use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use super::signature::MethodSignature;
use crate::codec::value::Value;

pub type RequestId = u64;

static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Returns a process-wide unique, monotonically increasing request id.
///
/// Ids start at 1 and are never reused within a process.
pub fn next_request_id() -> RequestId {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst) + 1
}

/// Milliseconds since the Unix epoch, or 0 if the clock is before it.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A request to invoke `method_name` on `service_name`.
///
/// Construction does not check that `arguments` match `signature`; the
/// server does that on arrival and answers with `PARAMETER_ERROR` when they
/// differ. Use [`InvokeSpec::is_type_match`] to check locally.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeSpec {
    pub request_id: RequestId,
    /// Creation time in milliseconds since the Unix epoch
    pub timestamp: i64,
    pub service_name: String,
    pub method_name: String,
    pub signature: MethodSignature,
    pub arguments: Vec<Value>,
}

impl InvokeSpec {
    /// Creates a spec with a fresh request id and the current timestamp.
    ///
    /// # Example
    ///
    /// ```
    /// use tether_common::{InvokeSpec, MethodSignature, TypeRef, TypeSpec, Value};
    ///
    /// let signature = MethodSignature::new(TypeSpec::boxed(TypeRef::String))
    ///     .param(TypeSpec::boxed(TypeRef::String));
    /// let spec = InvokeSpec::new("EchoService", "echo", signature, vec![Value::from("hi")]);
    /// assert!(spec.is_type_match());
    /// ```
    pub fn new(
        service_name: impl Into<String>,
        method_name: impl Into<String>,
        signature: MethodSignature,
        arguments: Vec<Value>,
    ) -> Self {
        InvokeSpec {
            request_id: next_request_id(),
            timestamp: now_millis(),
            service_name: service_name.into(),
            method_name: method_name.into(),
            signature,
            arguments,
        }
    }

    /// Overrides the generated request id.
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    /// Whether the argument count equals the parameter count and every
    /// non-null argument is assignable to its parameter type.
    pub fn is_type_match(&self) -> bool {
        self.signature.is_match(&self.arguments)
    }

    /// Renders the arguments for log and error messages.
    pub fn arguments_display(&self) -> String {
        let rendered: Vec<String> = self.arguments.iter().map(|arg| arg.to_string()).collect();
        format!("[{}]", rendered.join(", "))
    }
}

impl fmt::Display for InvokeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {}.{}{}",
            self.request_id, self.service_name, self.method_name, self.signature
        )
    }
}
