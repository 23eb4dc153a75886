//! Listening server: accept loop, connection table and idle reaper.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tether_common::protocol::error::{Result, TetherError};
use tether_common::{Codec, CodecConfig};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::dispatcher::{ConnectionActivity, Dispatcher};
use crate::registry::{ServiceBinding, ServiceRegistry};

/// Collects service bindings and settings for a [`Server`].
///
/// # Example
///
/// ```no_run
/// use tether_common::{CodecConfig, MethodSignature, TypeRef, TypeSpec, Value};
/// use tether_server::registry::{arg, ServiceBinding};
/// use tether_server::{ServerBuilder, ServerConfig};
///
/// # #[tokio::main]
/// # async fn main() -> tether_common::Result<()> {
/// let add = MethodSignature::new(TypeSpec::boxed(TypeRef::Double))
///     .param(TypeSpec::boxed(TypeRef::Double))
///     .param(TypeSpec::boxed(TypeRef::Double));
///
/// let server = ServerBuilder::new(ServerConfig::default(), CodecConfig::default())
///     .add_binding(ServiceBinding::new("DoubleService").method("add", add, |args: Vec<Value>| async move {
///         Ok(Value::Double(arg::<f64>(&args, 0)? + arg::<f64>(&args, 1)?))
///     }))
///     .build()?;
///
/// server.bind("0.0.0.0:9000").await?.serve().await
/// # }
/// ```
pub struct ServerBuilder {
    config: ServerConfig,
    codec_config: CodecConfig,
    bindings: Vec<ServiceBinding>,
}

impl ServerBuilder {
    pub fn new(config: ServerConfig, codec_config: CodecConfig) -> Self {
        Self {
            config,
            codec_config,
            bindings: Vec::new(),
        }
    }

    pub fn add_binding(mut self, binding: ServiceBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Validates the settings and freezes the bindings.
    ///
    /// # Errors
    ///
    /// [`TetherError::InvalidConfig`] if either configuration is invalid, no
    /// binding was added, two bindings share a service name, or a binding has
    /// no methods.
    pub fn build(self) -> Result<Server> {
        self.config.validate().map_err(TetherError::InvalidConfig)?;
        self.codec_config
            .validate()
            .map_err(TetherError::InvalidConfig)?;

        if self.bindings.is_empty() {
            return Err(TetherError::InvalidConfig(
                "at least one service binding is required".to_string(),
            ));
        }

        for binding in &self.bindings {
            tracing::info!(
                service = %binding.name(),
                methods = binding.method_count(),
                "Registering service binding"
            );
        }
        let registry = ServiceRegistry::new(self.bindings).map_err(TetherError::InvalidConfig)?;

        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            Codec::new(self.codec_config),
            self.config.max_frame_size,
        );

        Ok(Server {
            config: self.config,
            dispatcher: Arc::new(dispatcher),
        })
    }
}

/// A built server, ready to bind.
pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
}

impl Server {
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Binds the listening socket.
    pub async fn bind(self, addr: impl ToSocketAddrs) -> Result<BoundServer> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TetherError::Connection(format!("Failed to bind: {}", e)))?;
        let local_addr = listener.local_addr()?;

        tracing::info!(addr = %local_addr, "Server listening");

        Ok(BoundServer {
            listener,
            local_addr,
            config: self.config,
            dispatcher: self.dispatcher,
            connections: Arc::new(ConnectionTable::default()),
            shutdown: CancellationToken::new(),
        })
    }
}

/// A server with a bound listener.
pub struct BoundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    connections: Arc<ConnectionTable>,
    shutdown: CancellationToken,
}

impl BoundServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until shut down.
    ///
    /// Each connection runs on its own task. Idle connections are reaped on
    /// `scan_interval` unless `keep_alive` is zero.
    pub async fn serve(self) -> Result<()> {
        let reaper = self.config.reaping_enabled().then(|| {
            tokio::spawn(reap_idle(
                self.connections.clone(),
                self.config.clone(),
                self.shutdown.child_token(),
            ))
        });

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(e) => tracing::warn!(error = %e, "Failed to accept connection"),
                },
            }
        }

        if let Some(reaper) = reaper {
            reaper.abort();
        }
        let closed = self.connections.close_all();
        tracing::info!(addr = %self.local_addr, connections = closed, "Server stopped");
        Ok(())
    }

    /// Runs [`serve`](Self::serve) on a background task.
    pub fn spawn(self) -> ServerHandle {
        let local_addr = self.local_addr;
        let connections = self.connections.clone();
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(self.serve());

        ServerHandle {
            local_addr,
            connections,
            shutdown,
            task,
        }
    }

    fn spawn_connection(&self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        let close = self.shutdown.child_token();
        let activity = Arc::new(ConnectionActivity::new());
        let id = self.connections.insert(peer, activity.clone(), close.clone());
        let connections = self.connections.clone();
        let dispatcher = self.dispatcher.clone();

        tracing::info!(peer = %peer, "Connection opened");

        tokio::spawn(async move {
            match dispatcher.serve_connection(stream, &activity, close).await {
                Ok(()) => tracing::info!(peer = %peer, "Connection closed"),
                Err(e) => tracing::error!(peer = %peer, error = %e, "Connection failed"),
            }
            connections.remove(id);
        });
    }
}

/// Control handle for a server started with [`BoundServer::spawn`].
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    connections: Arc<ConnectionTable>,
    shutdown: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Stops accepting, stops the reaper and closes every connection.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.cancel();
        self.task
            .await
            .map_err(|e| TetherError::Transport(format!("server task failed: {}", e)))?
    }
}

#[derive(Debug)]
struct ConnectionEntry {
    peer: SocketAddr,
    activity: Arc<ConnectionActivity>,
    close: CancellationToken,
}

#[derive(Debug, Default)]
struct ConnectionTable {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, ConnectionEntry>>,
}

impl ConnectionTable {
    fn insert(&self, peer: SocketAddr, activity: Arc<ConnectionActivity>, close: CancellationToken) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(
            id,
            ConnectionEntry {
                peer,
                activity,
                close,
            },
        );
        id
    }

    fn remove(&self, id: u64) {
        self.entries.lock().remove(&id);
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Closes connections idle for at least `keep_alive`. Returns how many.
    fn reap(&self, keep_alive: std::time::Duration) -> usize {
        let entries = self.entries.lock();
        let mut reaped = 0;
        for entry in entries.values() {
            if !entry.close.is_cancelled() && entry.activity.is_idle(keep_alive) {
                tracing::warn!(
                    peer = %entry.peer,
                    idle_ms = entry.activity.idle_for().as_millis() as u64,
                    "Closing idle connection"
                );
                entry.close.cancel();
                reaped += 1;
            }
        }
        reaped
    }

    fn close_all(&self) -> usize {
        let entries = self.entries.lock();
        for entry in entries.values() {
            entry.close.cancel();
        }
        entries.len()
    }
}

async fn reap_idle(connections: Arc<ConnectionTable>, config: ServerConfig, stop: CancellationToken) {
    let mut interval = tokio::time::interval(config.scan_interval);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = interval.tick() => {
                let reaped = connections.reap(config.keep_alive);
                if reaped > 0 {
                    tracing::debug!(reaped, "Idle scan finished");
                }
            }
        }
    }
}
