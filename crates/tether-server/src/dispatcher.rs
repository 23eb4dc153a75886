//! Per-connection request dispatch.
//!
//! Every decoded [`InvokeSpec`] goes through these steps in order:
//!
//! 1. The arguments must match the request's own signature, or the answer
//!    is `PARAMETER_ERROR`.
//! 2. The request id must not already be in flight on this connection, or
//!    the answer is `PARAMETER_ERROR`.
//! 3. The method is resolved by service, name and parameter types, or the
//!    answer is `LOOKUP_ERROR`.
//! 4. The handler runs. A handler error, a panic or a result that does not
//!    match the declared return type answers `INVOCATION_ERROR`.
//! 5. The result is encoded and written. If that fails the answer is
//!    `UNKNOWN_ERROR`.
//!
//! Invocations on one connection run concurrently and their responses are
//! written as they complete. A framing or decode error on the connection is
//! fatal: every request still in flight is answered with `PROTOCOL_ERROR` (or
//! `UNKNOWN_ERROR` for non-protocol failures) and the connection is closed.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::FuturesUnordered;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tether_common::protocol::error::{Result, TetherError};
use tether_common::{
    Codec, FrameCodec, InvokeResult, InvokeSpec, RequestId, StatusCode, TypeRef, TypeSpec, Value,
};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::registry::MethodResolver;

/// Liveness of one connection, shared with the idle reaper.
#[derive(Debug)]
pub struct ConnectionActivity {
    last_response: Mutex<Instant>,
    in_flight: AtomicUsize,
}

impl ConnectionActivity {
    /// Starts the idle clock now.
    pub fn new() -> Self {
        Self {
            last_response: Mutex::new(Instant::now()),
            in_flight: AtomicUsize::new(0),
        }
    }

    fn touch(&self) {
        *self.last_response.lock() = Instant::now();
    }

    /// Time since the last response was written, or since the connection
    /// was accepted if none has been.
    pub fn idle_for(&self) -> Duration {
        self.last_response.lock().elapsed()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Whether the connection has nothing in flight and has not written a
    /// response within `keep_alive`.
    pub fn is_idle(&self, keep_alive: Duration) -> bool {
        self.in_flight() == 0 && self.idle_for() >= keep_alive
    }
}

impl Default for ConnectionActivity {
    fn default() -> Self {
        Self::new()
    }
}

type Writer = FramedWrite<OwnedWriteHalf, FrameCodec>;

/// Decodes, resolves and executes requests.
///
/// One dispatcher is shared by all connections of a server.
pub struct Dispatcher {
    resolver: Arc<dyn MethodResolver>,
    codec: Codec,
    max_frame_size: usize,
}

impl Dispatcher {
    pub fn new(resolver: Arc<dyn MethodResolver>, codec: Codec, max_frame_size: usize) -> Self {
        Self {
            resolver,
            codec,
            max_frame_size,
        }
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Runs steps 1, 3 and 4 for a single request.
    ///
    /// The in-flight check of step 2 belongs to a connection and is done by
    /// [`serve_connection`](Self::serve_connection).
    pub async fn dispatch(&self, spec: InvokeSpec) -> InvokeResult {
        match check_arguments(&spec) {
            Some(rejection) => rejection,
            None => self.invoke(spec).await,
        }
    }

    /// Resolves and runs `spec`, mapping every failure to a result.
    fn invoke(&self, spec: InvokeSpec) -> BoxFuture<'static, InvokeResult> {
        let request_id = spec.request_id;
        let Some(binding) =
            self.resolver
                .resolve(&spec.service_name, &spec.method_name, &spec.signature)
        else {
            tracing::warn!(request_id, call = %spec, "Method not found");
            return future::ready(InvokeResult::error(
                request_id,
                StatusCode::LookupError,
                format!(
                    "Method not found: {}.{}{}",
                    spec.service_name, spec.method_name, spec.signature
                ),
            ))
            .boxed();
        };

        tracing::debug!(request_id, call = %spec, "Invoking");
        let returns = spec.signature.returns;
        let method = format!("{}.{}", spec.service_name, spec.method_name);
        let arguments = spec.arguments;

        async move {
            let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| binding.invoke(arguments))) {
                Ok(call) => AssertUnwindSafe(call).catch_unwind().await,
                Err(panic) => Err(panic),
            };

            match outcome {
                Ok(Ok(value)) if return_matches(&returns, &value) => InvokeResult::ok(request_id, value),
                Ok(Ok(value)) => InvokeResult::error(
                    request_id,
                    StatusCode::InvocationError,
                    format!(
                        "{} declared {} but returned {}",
                        method,
                        returns,
                        value.type_name()
                    ),
                ),
                Ok(Err(e)) => {
                    tracing::debug!(request_id, error = %e, "Invocation failed");
                    InvokeResult::error(request_id, StatusCode::InvocationError, e.to_string())
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(request_id, method = %method, panic = %message, "Handler panicked");
                    InvokeResult::error(
                        request_id,
                        StatusCode::InvocationError,
                        format!("{} panicked: {}", method, message),
                    )
                }
            }
        }
        .boxed()
    }

    /// Serves one connection until the peer disconnects, `close` is
    /// cancelled or a fatal error occurs.
    ///
    /// # Errors
    ///
    /// Returns the fatal framing, decode or write error that ended the
    /// connection. A clean disconnect or cancellation returns `Ok(())`.
    pub async fn serve_connection(
        &self,
        stream: TcpStream,
        activity: &ConnectionActivity,
        close: CancellationToken,
    ) -> Result<()> {
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        let frame_codec = FrameCodec::new().with_max_size(self.max_frame_size);
        let mut reader = FramedRead::new(read_half, frame_codec.clone());
        let mut writer = FramedWrite::new(write_half, frame_codec);

        let mut in_flight: HashSet<RequestId> = HashSet::new();
        let mut running: FuturesUnordered<BoxFuture<'static, InvokeResult>> = FuturesUnordered::new();

        let fatal = loop {
            tokio::select! {
                _ = close.cancelled() => break None,
                Some(result) = running.next(), if !running.is_empty() => {
                    self.respond(&mut writer, result, true, &mut in_flight, activity).await?;
                }
                frame = reader.next() => match frame {
                    Some(Ok(body)) => match self.codec.decode_spec(&body) {
                        Ok(spec) => {
                            if let Some(rejection) = check_arguments(&spec) {
                                self.respond(&mut writer, rejection, false, &mut in_flight, activity).await?;
                            } else if in_flight.contains(&spec.request_id) {
                                tracing::warn!(request_id = spec.request_id, "Duplicated requestId");
                                let rejection = InvokeResult::error(
                                    spec.request_id,
                                    StatusCode::ParameterError,
                                    format!("Duplicated requestId: {}", spec.request_id),
                                );
                                self.respond(&mut writer, rejection, false, &mut in_flight, activity).await?;
                            } else {
                                in_flight.insert(spec.request_id);
                                activity.in_flight.store(in_flight.len(), Ordering::SeqCst);
                                running.push(self.invoke(spec));
                            }
                        }
                        Err(e) => break Some(e),
                    },
                    Some(Err(e)) => break Some(e),
                    None => break None,
                },
            }
        };

        let Some(fatal) = fatal else {
            let _ = writer.close().await;
            return Ok(());
        };

        let status = fatal_status(&fatal);
        tracing::error!(
            error = %fatal,
            in_flight = in_flight.len(),
            "Fatal connection error, failing in-flight requests"
        );

        let mut abandoned: Vec<RequestId> = in_flight.iter().copied().collect();
        abandoned.sort_unstable();
        for request_id in abandoned {
            let result = InvokeResult::error(request_id, status, fatal.to_string());
            if self
                .respond(&mut writer, result, true, &mut in_flight, activity)
                .await
                .is_err()
            {
                break;
            }
        }

        let _ = writer.close().await;
        Err(fatal)
    }

    /// Writes `result`. Admitted requests leave the in-flight set once
    /// their response is written.
    async fn respond(
        &self,
        writer: &mut Writer,
        result: InvokeResult,
        admitted: bool,
        in_flight: &mut HashSet<RequestId>,
        activity: &ConnectionActivity,
    ) -> Result<()> {
        let request_id = result.request_id;
        let body = self.encode_result(result);

        let written = writer.send(body).await;
        if admitted {
            in_flight.remove(&request_id);
            activity.in_flight.store(in_flight.len(), Ordering::SeqCst);
        }
        written?;

        activity.touch();
        Ok(())
    }

    /// Encodes `result`, degrading to `UNKNOWN_ERROR` if it cannot be sent.
    fn encode_result(&self, result: InvokeResult) -> bytes::Bytes {
        let request_id = result.request_id;
        let failure = match self.codec.encode_result(&result) {
            Ok(body) if body.len() <= self.max_frame_size => return body,
            Ok(body) => TetherError::FrameTooLarge {
                size: body.len(),
                max: self.max_frame_size,
            },
            Err(e) => e,
        };

        tracing::error!(request_id, error = %failure, "Failed to encode result");
        let fallback = InvokeResult::error(request_id, StatusCode::UnknownError, failure.to_string());
        match self.codec.encode_result(&fallback) {
            Ok(body) => body,
            // Plain error results always encode.
            Err(_) => self
                .codec
                .encode_result(&InvokeResult::error(request_id, StatusCode::UnknownError, ""))
                .unwrap_or_default(),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("max_frame_size", &self.max_frame_size)
            .finish()
    }
}

fn check_arguments(spec: &InvokeSpec) -> Option<InvokeResult> {
    if spec.is_type_match() {
        return None;
    }

    tracing::warn!(request_id = spec.request_id, call = %spec, "Parameter mismatch");
    Some(InvokeResult::error(
        spec.request_id,
        StatusCode::ParameterError,
        format!(
            "Arguments ({}) do not match {}.{}{}",
            spec.arguments_display(),
            spec.service_name,
            spec.method_name,
            spec.signature
        ),
    ))
}

/// Status sent to in-flight requests when the connection fails with `fatal`.
fn fatal_status(fatal: &TetherError) -> StatusCode {
    if fatal.is_protocol() {
        StatusCode::ProtocolError
    } else {
        StatusCode::UnknownError
    }
}

fn return_matches(returns: &TypeSpec, value: &Value) -> bool {
    if returns.primitive && returns.ty != TypeRef::Void && *value == Value::Null {
        return false;
    }
    returns.ty.accepts(value)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
