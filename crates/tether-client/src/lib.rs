//! Tether Client
//!
//! Client side of the tether RPC framework.
//!
//! - [`ClientSession`]: one TCP connection carrying many concurrent calls,
//!   correlated by request id, each with a local timeout
//! - [`Connector`]: lazily creates and shares a session, coalescing
//!   concurrent connects and bounding failed attempts
//! - [`ServiceClient`] and [`RemoteService`]: typed call stubs over a connector
//! - [`TimeoutScheduler`]: the shared timer task driving call timeouts

pub mod client;
pub mod config;
pub mod connector;
pub mod scheduler;
pub mod session;

pub use client::{RemoteService, ServiceClient};
pub use config::ClientConfig;
pub use connector::Connector;
pub use scheduler::{SchedulerHandle, TimeoutScheduler};
pub use session::{ClientSession, PendingCall};
