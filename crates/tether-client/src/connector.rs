//! Lazy, shared connection management.
//!
//! A [`Connector`] hands out one [`ClientSession`] to every caller. The
//! session is created on first use. Callers arriving while a connect is in
//! progress wait for that same attempt instead of starting another one. When
//! the session closes the connector goes back to idle and the next caller
//! reconnects.
//!
//! ```text
//! Idle --session()--> Connecting --ok--> Ready --disconnect--> Idle
//!                          |
//!                          +--error--> Idle
//! ```
//!
//! Each initiated attempt is counted and a success resets the count. Once
//! `max_connect_attempts` attempts have failed in a row, `session()` fails
//! with [`TetherError::ConnectAttemptsExceeded`] without touching the network.

use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tether_common::protocol::error::{Result, TetherError};
use tether_common::{Codec, CodecConfig};

use crate::config::ClientConfig;
use crate::scheduler::{SchedulerHandle, TimeoutScheduler};
use crate::session::{connect_stream, ClientSession};

type ConnectAttempt = Shared<BoxFuture<'static, std::result::Result<Arc<ClientSession>, String>>>;

enum Phase {
    Idle,
    Connecting {
        generation: u64,
        attempt: ConnectAttempt,
    },
    Ready {
        generation: u64,
        session: Arc<ClientSession>,
    },
}

struct ConnectorState {
    phase: Phase,
    attempts: u32,
    generation: u64,
    closed: bool,
}

struct Inner {
    addr: String,
    config: ClientConfig,
    codec: Codec,
    scheduler: SchedulerHandle,
    state: Mutex<ConnectorState>,
}

/// Lazily connects to one server address and shares the session.
///
/// # Example
///
/// ```no_run
/// use tether_client::{ClientConfig, Connector};
/// use tether_common::CodecConfig;
///
/// # #[tokio::main]
/// # async fn main() -> tether_common::Result<()> {
/// let connector = Connector::new("127.0.0.1:9000", ClientConfig::default(), CodecConfig::default())?;
/// let session = connector.session().await?;
/// assert!(!session.is_closed());
/// # Ok(())
/// # }
/// ```
pub struct Connector {
    inner: Arc<Inner>,
}

impl Connector {
    /// Creates a connector whose sessions use the process-wide
    /// [`TimeoutScheduler::global`].
    ///
    /// No connection is made until the first [`session`](Self::session)
    /// call.
    pub fn new(
        addr: impl Into<String>,
        config: ClientConfig,
        codec_config: CodecConfig,
    ) -> Result<Self> {
        let scheduler = TimeoutScheduler::global()?;
        Self::with_scheduler(addr, config, codec_config, scheduler)
    }

    /// Creates a connector whose sessions use `scheduler`.
    pub fn with_scheduler(
        addr: impl Into<String>,
        config: ClientConfig,
        codec_config: CodecConfig,
        scheduler: SchedulerHandle,
    ) -> Result<Self> {
        let addr = addr.into();
        config.validate().map_err(TetherError::InvalidConfig)?;
        codec_config.validate().map_err(TetherError::InvalidConfig)?;

        Ok(Self {
            inner: Arc::new(Inner {
                addr,
                config,
                codec: Codec::new(codec_config),
                scheduler,
                state: Mutex::new(ConnectorState {
                    phase: Phase::Idle,
                    attempts: 0,
                    generation: 0,
                    closed: false,
                }),
            }),
        })
    }

    /// Returns the current session, connecting first if there is none.
    ///
    /// # Errors
    ///
    /// - [`TetherError::AlreadyClosed`] after [`close`](Self::close)
    /// - [`TetherError::ConnectAttemptsExceeded`] once the attempt limit is
    ///   reached
    /// - [`TetherError::Connection`] when the attempt this caller joined
    ///   failed
    pub async fn session(&self) -> Result<Arc<ClientSession>> {
        let (attempt, stale) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(TetherError::AlreadyClosed("Connector"));
            }

            match &state.phase {
                Phase::Ready { session, .. } if !session.is_closed() => {
                    return Ok(session.clone());
                }
                Phase::Connecting { attempt, .. } => (attempt.clone(), None),
                _ => {
                    if state.attempts >= self.inner.config.max_connect_attempts {
                        tracing::warn!(
                            addr = %self.inner.addr,
                            attempts = state.attempts,
                            "Connect attempts over limit"
                        );
                        return Err(TetherError::ConnectAttemptsExceeded(state.attempts));
                    }

                    state.attempts += 1;
                    state.generation += 1;
                    let generation = state.generation;
                    tracing::debug!(
                        addr = %self.inner.addr,
                        attempt = state.attempts,
                        "Connecting"
                    );

                    let attempt = connect_once(Arc::downgrade(&self.inner), generation)
                        .boxed()
                        .shared();
                    let stale = std::mem::replace(
                        &mut state.phase,
                        Phase::Connecting {
                            generation,
                            attempt: attempt.clone(),
                        },
                    );
                    (attempt, Some(stale))
                }
            }
        };
        // A replaced Ready phase may hold the last reference to a closed
        // session, whose drop must not run under the state lock.
        drop(stale);

        attempt.await.map_err(TetherError::Connection)
    }

    /// Stops the connector and closes its current session.
    ///
    /// A connect already in progress is discarded when it completes.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::AlreadyClosed`] if called more than once.
    pub fn close(&self) -> Result<()> {
        let previous = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(TetherError::AlreadyClosed("Connector"));
            }
            state.closed = true;
            std::mem::replace(&mut state.phase, Phase::Idle)
        };

        if let Phase::Ready { session, .. } = previous {
            let _ = session.close();
        }
        tracing::info!(addr = %self.inner.addr, "Connector closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Number of attempts made since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.inner.state.lock().attempts
    }

    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        let phase = match state.phase {
            Phase::Idle => "idle",
            Phase::Connecting { .. } => "connecting",
            Phase::Ready { .. } => "ready",
        };
        f.debug_struct("Connector")
            .field("addr", &self.inner.addr)
            .field("phase", &phase)
            .field("attempts", &state.attempts)
            .field("closed", &state.closed)
            .finish()
    }
}

async fn connect_once(
    inner: Weak<Inner>,
    generation: u64,
) -> std::result::Result<Arc<ClientSession>, String> {
    let Some(connector) = inner.upgrade() else {
        return Err("connector dropped".to_string());
    };

    let outcome = match connect_stream(connector.addr.as_str(), connector.config.connect_timeout).await {
        Ok(stream) => ClientSession::start(
            stream,
            connector.config.clone(),
            connector.codec.clone(),
            connector.scheduler.clone(),
            Some(on_session_close(inner.clone(), generation)),
        )
        .map(Arc::new),
        Err(e) => Err(e),
    };

    let mut state = connector.state.lock();
    let current = matches!(state.phase, Phase::Connecting { generation: g, .. } if g == generation);

    match outcome {
        Ok(session) if current && !state.closed => {
            state.attempts = 0;
            state.phase = Phase::Ready {
                generation,
                session: session.clone(),
            };
            drop(state);
            tracing::info!(addr = %connector.addr, peer = %session.peer_addr(), "Connected");
            Ok(session)
        }
        Ok(session) => {
            drop(state);
            let _ = session.close();
            Err("connector closed".to_string())
        }
        Err(e) => {
            if current {
                state.phase = Phase::Idle;
            }
            let attempts = state.attempts;
            drop(state);
            tracing::warn!(addr = %connector.addr, attempts, error = %e, "Connect failed");
            match e {
                TetherError::Connection(message) => Err(message),
                other => Err(other.to_string()),
            }
        }
    }
}

fn on_session_close(inner: Weak<Inner>, generation: u64) -> Box<dyn FnOnce() + Send + 'static> {
    Box::new(move || {
        let Some(connector) = inner.upgrade() else {
            return;
        };
        let previous = {
            let mut state = connector.state.lock();
            match state.phase {
                Phase::Ready { generation: g, .. } if g == generation => {
                    std::mem::replace(&mut state.phase, Phase::Idle)
                }
                _ => return,
            }
        };
        tracing::debug!(addr = %connector.addr, "Session closed, connector idle");
        drop(previous);
    })
}
