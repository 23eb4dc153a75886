//! Client session: many concurrent calls over one TCP connection.
//!
//! A session owns one connection and two tasks. The writer task frames and
//! writes encoded requests in the order `call()` queued them; the reader task
//! decodes responses and completes the matching pending call. Calls are
//! correlated by request id, so responses may arrive in any order.
//!
//! Every call completes exactly once, with whichever comes first of:
//! - the matching response
//! - the call timeout, armed once the request has been written
//! - the connection failing or being closed
//!
//! Timeouts are local. Nothing is sent to the server when a call times out,
//! and a response that arrives afterwards is dropped.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tether_common::protocol::error::{Result, TetherError};
use tether_common::{Codec, FrameCodec, InvokeResult, InvokeSpec, RequestId};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::scheduler::SchedulerHandle;

pub(crate) type CloseCallback = Box<dyn FnOnce() + Send + 'static>;

type Outcome = Result<InvokeResult>;

struct Slot {
    generation: u64,
    tx: oneshot::Sender<Outcome>,
}

#[derive(Default)]
struct PendingTable {
    closed: bool,
    close_reason: Option<String>,
    next_generation: u64,
    slots: HashMap<RequestId, Slot>,
}

struct Outbound {
    request_id: RequestId,
    generation: u64,
    body: Bytes,
}

struct Shared {
    peer_addr: SocketAddr,
    codec: Codec,
    config: ClientConfig,
    scheduler: SchedulerHandle,
    pending: Mutex<PendingTable>,
    outbound: mpsc::UnboundedSender<Outbound>,
    shutdown: CancellationToken,
    on_close: Mutex<Option<CloseCallback>>,
}

impl Shared {
    /// Removes the slot for `request_id` if it still belongs to `generation`.
    fn take_slot(&self, request_id: RequestId, generation: u64) -> Option<Slot> {
        let mut table = self.pending.lock();
        match table.slots.get(&request_id) {
            Some(slot) if slot.generation == generation => table.slots.remove(&request_id),
            _ => None,
        }
    }

    fn complete(&self, result: InvokeResult) {
        let slot = self.pending.lock().slots.remove(&result.request_id);
        match slot {
            Some(slot) => {
                tracing::debug!(request_id = result.request_id, status = %result.status, "Call completed");
                let _ = slot.tx.send(Ok(result));
            }
            None => {
                tracing::warn!(
                    request_id = result.request_id,
                    peer = %self.peer_addr,
                    "Dropping response for unknown or expired request"
                );
            }
        }
    }

    fn expire(&self, request_id: RequestId, generation: u64) {
        if let Some(slot) = self.take_slot(request_id, generation) {
            let millis = self.config.call_timeout.as_millis() as u64;
            tracing::debug!(request_id, timeout_ms = millis, "Call timed out");
            let _ = slot.tx.send(Err(TetherError::Timeout(millis)));
        }
    }

    fn arm_timeout(self: &Arc<Self>, request_id: RequestId, generation: u64) {
        let weak: Weak<Shared> = Arc::downgrade(self);
        let armed = self.scheduler.schedule(self.config.call_timeout, move || {
            if let Some(shared) = weak.upgrade() {
                shared.expire(request_id, generation);
            }
        });

        if !armed {
            tracing::warn!(request_id, "Timeout scheduler stopped, call will wait for its response");
        }
    }

    /// Marks the session closed and fails every pending call with `cause`.
    ///
    /// Returns `false` if the session was already closed.
    fn teardown(&self, cause: TetherError) -> bool {
        let drained = {
            let mut table = self.pending.lock();
            if table.closed {
                return false;
            }
            table.closed = true;
            table.close_reason = Some(match &cause {
                TetherError::ConnectionClosed(reason) => reason.clone(),
                other => other.to_string(),
            });
            std::mem::take(&mut table.slots)
        };

        if cause.is_protocol() {
            tracing::error!(peer = %self.peer_addr, error = %cause, "Session failed");
        } else {
            tracing::info!(peer = %self.peer_addr, reason = %cause, "Session closed");
        }

        for (_, slot) in drained {
            let _ = slot.tx.send(Err(cause.for_pending()));
        }

        self.shutdown.cancel();

        let callback = self.on_close.lock().take();
        if let Some(callback) = callback {
            callback();
        }
        true
    }
}

/// One client connection multiplexing concurrent calls.
///
/// Dropping the session closes it.
///
/// # Example
///
/// ```no_run
/// use tether_client::{ClientConfig, ClientSession, TimeoutScheduler};
/// use tether_common::{Codec, InvokeSpec, MethodSignature, TypeRef, TypeSpec, Value};
///
/// # #[tokio::main]
/// # async fn main() -> tether_common::Result<()> {
/// let scheduler = TimeoutScheduler::spawn();
/// let session = ClientSession::connect(
///     "127.0.0.1:9000",
///     ClientConfig::default(),
///     Codec::default(),
///     scheduler.handle(),
/// )
/// .await?;
///
/// let signature = MethodSignature::new(TypeSpec::boxed(TypeRef::Double))
///     .param(TypeSpec::boxed(TypeRef::Double))
///     .param(TypeSpec::boxed(TypeRef::Double));
/// let spec = InvokeSpec::new("DoubleService", "add", signature, vec![Value::Double(1.0), Value::Double(8.0)]);
///
/// let result = session.call(&spec).await?;
/// assert_eq!(result.payload, Value::Double(9.0));
/// # Ok(())
/// # }
/// ```
pub struct ClientSession {
    shared: Arc<Shared>,
}

impl ClientSession {
    /// Connects to `addr` within the configured connect timeout.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        config: ClientConfig,
        codec: Codec,
        scheduler: SchedulerHandle,
    ) -> Result<Self> {
        let stream = connect_stream(addr, config.connect_timeout).await?;
        Self::start(stream, config, codec, scheduler, None)
    }

    /// Wraps an already connected stream.
    pub fn from_stream(
        stream: TcpStream,
        config: ClientConfig,
        codec: Codec,
        scheduler: SchedulerHandle,
    ) -> Result<Self> {
        Self::start(stream, config, codec, scheduler, None)
    }

    pub(crate) fn start(
        stream: TcpStream,
        config: ClientConfig,
        codec: Codec,
        scheduler: SchedulerHandle,
        on_close: Option<CloseCallback>,
    ) -> Result<Self> {
        config.validate().map_err(TetherError::InvalidConfig)?;

        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let frame_codec = FrameCodec::new().with_max_size(config.max_frame_size);
        let reader = FramedRead::new(read_half, frame_codec.clone());
        let writer = FramedWrite::new(write_half, frame_codec);

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            peer_addr,
            codec,
            config,
            scheduler,
            pending: Mutex::new(PendingTable::default()),
            outbound,
            shutdown: CancellationToken::new(),
            on_close: Mutex::new(on_close),
        });

        tokio::spawn(read_loop(shared.clone(), reader));
        tokio::spawn(write_loop(shared.clone(), writer, outbound_rx));

        tracing::info!(peer = %peer_addr, "Session opened");
        Ok(Self { shared })
    }

    /// Sends `spec` and returns a handle resolving to its result.
    ///
    /// The request is queued before this returns. A non-OK status is not an
    /// error at this level: the [`InvokeResult`] carries it, and
    /// [`InvokeResult::into_payload`] turns it into [`TetherError::Remote`].
    ///
    /// If a call with the same request id is still pending, that earlier
    /// call fails with [`TetherError::DuplicateRequestId`].
    pub fn call(&self, spec: &InvokeSpec) -> PendingCall {
        let request_id = spec.request_id;
        let (tx, rx) = oneshot::channel();
        let pending = PendingCall { request_id, rx };

        let body = match self.shared.codec.encode_spec(spec) {
            Ok(body) => body,
            Err(e) => {
                let _ = tx.send(Err(e));
                return pending;
            }
        };

        let max = self.shared.config.max_frame_size;
        if body.len() > max {
            let _ = tx.send(Err(TetherError::FrameTooLarge {
                size: body.len(),
                max,
            }));
            return pending;
        }

        let generation = {
            let mut table = self.shared.pending.lock();
            if table.closed {
                let reason = table
                    .close_reason
                    .clone()
                    .unwrap_or_else(|| "session closed".to_string());
                let _ = tx.send(Err(TetherError::ConnectionClosed(reason)));
                return pending;
            }

            table.next_generation += 1;
            let generation = table.next_generation;
            if let Some(stale) = table.slots.insert(request_id, Slot { generation, tx }) {
                tracing::warn!(request_id, "Duplicate request id, failing the earlier call");
                let _ = stale.tx.send(Err(TetherError::DuplicateRequestId(request_id)));
            }
            generation
        };

        let queued = self.shared.outbound.send(Outbound {
            request_id,
            generation,
            body,
        });
        if queued.is_err() {
            if let Some(slot) = self.shared.take_slot(request_id, generation) {
                let _ = slot
                    .tx
                    .send(Err(TetherError::ConnectionClosed("writer stopped".into())));
            }
        }

        tracing::debug!(request_id, call = %spec, "Call queued");
        pending
    }

    /// Closes the connection and fails every pending call.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::AlreadyClosed`] if the session was already
    /// closed, by an earlier `close()` or by the connection failing.
    pub fn close(&self) -> Result<()> {
        if self
            .shared
            .teardown(TetherError::ConnectionClosed("session closed".into()))
        {
            Ok(())
        } else {
            Err(TetherError::AlreadyClosed("ClientSession"))
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.pending.lock().closed
    }

    /// Number of calls waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().slots.len()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.peer_addr
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.shared
            .teardown(TetherError::ConnectionClosed("session dropped".into()));
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("peer_addr", &self.shared.peer_addr)
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The eventual result of one call.
///
/// Dropping the handle does not cancel the request; the response is
/// discarded when it arrives.
#[derive(Debug)]
pub struct PendingCall {
    request_id: RequestId,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingCall {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }
}

impl Future for PendingCall {
    type Output = Result<InvokeResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(TetherError::ConnectionClosed(
                "session dropped".into(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub(crate) async fn connect_stream(addr: impl ToSocketAddrs, timeout: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(TetherError::Connection(e.to_string())),
        Err(_) => Err(TetherError::Connection(format!(
            "connect timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

async fn read_loop(shared: Arc<Shared>, mut reader: FramedRead<OwnedReadHalf, FrameCodec>) {
    let cause = loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            frame = reader.next() => match frame {
                Some(Ok(body)) => match shared.codec.decode_result(&body) {
                    Ok(result) => shared.complete(result),
                    Err(e) => break e,
                },
                Some(Err(e)) => break e,
                None => break TetherError::ConnectionClosed("connection closed by peer".into()),
            },
        }
    };

    shared.teardown(cause);
}

async fn write_loop(
    shared: Arc<Shared>,
    mut writer: FramedWrite<OwnedWriteHalf, FrameCodec>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    loop {
        let request = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            request = outbound.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        match writer.send(request.body).await {
            Ok(()) => shared.arm_timeout(request.request_id, request.generation),
            Err(e) => {
                tracing::error!(request_id = request.request_id, error = %e, "Failed to write request");
                if let Some(slot) = shared.take_slot(request.request_id, request.generation) {
                    let _ = slot.tx.send(Err(TetherError::Transport(e.to_string())));
                }
                shared.teardown(TetherError::ConnectionClosed(format!("write failed: {}", e)));
                break;
            }
        }
    }

    let _ = writer.close().await;
}
