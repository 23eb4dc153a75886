use std::sync::Arc;

use tether_common::protocol::error::{Result, TetherError};
use tether_common::{
    CodecConfig, FromValue, InvokeResult, InvokeSpec, MethodSignature, TypeRef, Value,
};

use crate::config::ClientConfig;
use crate::connector::Connector;

/// Tether client for making RPC calls
///
/// Cloning is cheap; clones share one connector and therefore one
/// connection.
///
/// # Example
///
/// ```no_run
/// use tether_client::{ClientConfig, ServiceClient};
/// use tether_common::{CodecConfig, MethodSignature, TypeRef, TypeSpec, Value};
///
/// # #[tokio::main]
/// # async fn main() -> tether_common::Result<()> {
/// let client = ServiceClient::new("127.0.0.1:9000", ClientConfig::default(), CodecConfig::default())?;
/// let doubles = client.service("DoubleService");
///
/// let signature = MethodSignature::new(TypeSpec::boxed(TypeRef::Double))
///     .param(TypeSpec::boxed(TypeRef::Double))
///     .param(TypeSpec::boxed(TypeRef::Double));
/// let sum: f64 = doubles
///     .invoke("add", signature, vec![Value::Double(1.0), Value::Double(8.0)])
///     .await?;
/// assert_eq!(sum, 9.0);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ServiceClient {
    connector: Arc<Connector>,
}

impl ServiceClient {
    /// Create a client for the server at `addr`
    ///
    /// Does not connect; the first call does.
    pub fn new(
        addr: impl Into<String>,
        config: ClientConfig,
        codec_config: CodecConfig,
    ) -> Result<Self> {
        Ok(Self::from_connector(Connector::new(addr, config, codec_config)?))
    }

    pub fn from_connector(connector: Connector) -> Self {
        Self {
            connector: Arc::new(connector),
        }
    }

    /// Send a prepared request and wait for its result
    ///
    /// The returned [`InvokeResult`] may carry a non-OK status.
    pub async fn call(&self, spec: &InvokeSpec) -> Result<InvokeResult> {
        let session = self.connector.session().await?;
        session.call(spec).await
    }

    /// Typed entry point for one remote service
    pub fn service(&self, name: impl Into<Arc<str>>) -> RemoteService {
        RemoteService {
            client: self.clone(),
            name: name.into(),
        }
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    /// Close the connector and its connection
    pub fn close(&self) -> Result<()> {
        self.connector.close()
    }
}

/// Calls methods of one named service.
///
/// This is the stub a generated or hand-written service wrapper builds on:
/// it turns a method call into an [`InvokeSpec`] and the [`InvokeResult`]
/// back into a Rust value.
#[derive(Clone)]
pub struct RemoteService {
    client: ServiceClient,
    name: Arc<str>,
}

impl RemoteService {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invokes `method` and converts the payload to `R`.
    ///
    /// # Errors
    ///
    /// - [`TetherError::Remote`] when the server answered with a non-OK status
    /// - [`TetherError::InvalidResponse`] when the payload does not match the
    ///   declared return type
    /// - [`TetherError::Codec`] when the payload cannot be converted to `R`
    /// - any transport, timeout or connector error of the call itself
    pub async fn invoke<R: FromValue>(
        &self,
        method: &str,
        signature: MethodSignature,
        args: Vec<Value>,
    ) -> Result<R> {
        let returns = signature.returns.clone();
        let spec = InvokeSpec::new(&*self.name, method, signature, args);
        let payload = self.client.call(&spec).await?.into_payload()?;

        let missing_primitive =
            returns.primitive && returns.ty != TypeRef::Void && payload == Value::Null;
        if missing_primitive || !returns.ty.accepts(&payload) {
            return Err(TetherError::InvalidResponse(format!(
                "{}.{} declared {} but returned {}",
                self.name,
                method,
                returns,
                payload.type_name()
            )));
        }

        Ok(R::from_value(payload)?)
    }
}

impl std::fmt::Debug for RemoteService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteService")
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_creation_does_not_connect() {
        let client =
            ServiceClient::new("127.0.0.1:1", ClientConfig::default(), CodecConfig::default());
        assert!(client.is_ok());
        assert_eq!(client.unwrap().connector().attempts(), 0);
    }

    #[tokio::test]
    async fn test_client_is_clonable() {
        let client =
            ServiceClient::new("127.0.0.1:8080", ClientConfig::default(), CodecConfig::default())
                .unwrap();
        let client2 = client.clone();
        assert_eq!(client.connector().addr(), client2.connector().addr());

        client.close().unwrap();
        assert!(client2.connector().is_closed());
    }

    #[tokio::test]
    async fn test_service_name() {
        let client =
            ServiceClient::new("127.0.0.1:8080", ClientConfig::default(), CodecConfig::default())
                .unwrap();
        assert_eq!(client.service("DoubleService").name(), "DoubleService");
    }
}
