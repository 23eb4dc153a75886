//! Tether Server
//!
//! Server side of the tether RPC framework. Services are bound as async
//! handlers, a [`Dispatcher`] decodes and executes requests on each
//! connection, and the [`Server`] accepts connections and closes idle ones.
//!
//! # Lifecycle
//!
//! ```text
//! ServerBuilder --build()--> Server --bind()--> BoundServer --serve()/spawn()
//! ```

pub mod config;
pub mod dispatcher;
pub mod registry;
pub mod server;

pub use config::ServerConfig;
pub use dispatcher::{ConnectionActivity, Dispatcher};
pub use registry::{
    arg, InvocationError, MethodBinding, MethodHandler, MethodResolver, ServiceBinding,
    ServiceRegistry,
};
pub use server::{BoundServer, Server, ServerBuilder, ServerHandle};
