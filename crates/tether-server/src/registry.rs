//! Service bindings and method resolution.
//!
//! A [`ServiceBinding`] maps method names and parameter types of one service
//! to async handlers. The [`ServiceRegistry`] built from all bindings is the
//! [`MethodResolver`] the dispatcher consults for every request; it is
//! immutable once the server is built.
//!
//! # Example
//!
//! ```
//! use tether_common::{MethodSignature, TypeRef, TypeSpec, Value};
//! use tether_server::registry::{arg, MethodResolver, ServiceBinding, ServiceRegistry};
//!
//! let add = MethodSignature::new(TypeSpec::boxed(TypeRef::Double))
//!     .param(TypeSpec::boxed(TypeRef::Double))
//!     .param(TypeSpec::boxed(TypeRef::Double));
//!
//! let binding = ServiceBinding::new("DoubleService").method("add", add.clone(), |args: Vec<Value>| async move {
//!     let a: f64 = arg(&args, 0)?;
//!     let b: f64 = arg(&args, 1)?;
//!     Ok(Value::Double(a + b))
//! });
//!
//! let registry = ServiceRegistry::new(vec![binding]).unwrap();
//! assert!(registry.resolve("DoubleService", "add", &add).is_some());
//! assert!(registry.resolve("DoubleService", "sub", &add).is_none());
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tether_common::{CodecError, FromValue, MethodSignature, TypeSpec, Value};
use thiserror::Error;

/// Error returned by a method handler.
///
/// Any of these is reported to the caller as `INVOCATION_ERROR` with the
/// error's message.
#[derive(Error, Debug)]
pub enum InvocationError {
    #[error("{0}")]
    Failed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Codec(#[from] CodecError),
}

impl InvocationError {
    pub fn failed(message: impl Into<String>) -> Self {
        InvocationError::Failed(message.into())
    }
}

pub type HandlerFuture = BoxFuture<'static, Result<Value, InvocationError>>;

/// An invocable method implementation.
///
/// Implemented for every `Fn(Vec<Value>) -> impl Future<Output =
/// Result<Value, InvocationError>>`, so async closures can be bound directly.
pub trait MethodHandler: Send + Sync + 'static {
    fn invoke(&self, args: Vec<Value>) -> HandlerFuture;
}

impl<F, Fut> MethodHandler for F
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, InvocationError>> + Send + 'static,
{
    fn invoke(&self, args: Vec<Value>) -> HandlerFuture {
        Box::pin(self(args))
    }
}

/// One resolved method: its declared signature and handler.
#[derive(Clone)]
pub struct MethodBinding {
    name: Arc<str>,
    signature: MethodSignature,
    handler: Arc<dyn MethodHandler>,
}

impl MethodBinding {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    pub fn invoke(&self, args: Vec<Value>) -> HandlerFuture {
        self.handler.invoke(args)
    }
}

impl std::fmt::Debug for MethodBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.name, self.signature)
    }
}

/// Methods are looked up by name and exact parameter types, so overloads
/// can coexist.
type MethodKey = (String, Vec<TypeSpec>);

/// The methods of one named service.
#[derive(Debug, Clone)]
pub struct ServiceBinding {
    name: String,
    methods: HashMap<MethodKey, MethodBinding>,
}

impl ServiceBinding {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    /// Binds the async function `handler` to `name` with `signature`.
    ///
    /// Binding the same name and parameter types again replaces the earlier
    /// handler.
    pub fn method<F, Fut>(self, name: impl Into<String>, signature: MethodSignature, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, InvocationError>> + Send + 'static,
    {
        self.method_handler(name, signature, handler)
    }

    /// Binds any [`MethodHandler`] implementation.
    pub fn method_handler<H: MethodHandler>(
        mut self,
        name: impl Into<String>,
        signature: MethodSignature,
        handler: H,
    ) -> Self {
        let name: String = name.into();
        let binding = MethodBinding {
            name: name.as_str().into(),
            signature: signature.clone(),
            handler: Arc::new(handler),
        };

        if self
            .methods
            .insert((name, signature.params), binding)
            .is_some()
        {
            tracing::warn!(service = %self.name, "Replacing existing method binding");
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodBinding> {
        self.methods.values()
    }

    fn lookup(&self, method: &str, signature: &MethodSignature) -> Option<&MethodBinding> {
        self.methods
            .get(&(method.to_string(), signature.params.clone()))
    }
}

/// Finds the binding for a request.
pub trait MethodResolver: Send + Sync + 'static {
    /// Returns the binding for `service.method` with the parameter types of
    /// `signature`, or `None` if there is none.
    fn resolve(
        &self,
        service: &str,
        method: &str,
        signature: &MethodSignature,
    ) -> Option<MethodBinding>;
}

/// All service bindings of one server.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, ServiceBinding>,
}

impl ServiceRegistry {
    /// Builds a registry from `bindings`.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if two bindings share a service
    /// name or a binding has no methods.
    pub fn new(bindings: Vec<ServiceBinding>) -> Result<Self, String> {
        let mut services = HashMap::with_capacity(bindings.len());
        for binding in bindings {
            if binding.methods.is_empty() {
                return Err(format!("service {} has no methods", binding.name));
            }
            if services.contains_key(&binding.name) {
                return Err(format!("duplicate service binding: {}", binding.name));
            }
            services.insert(binding.name.clone(), binding);
        }
        Ok(Self { services })
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn service(&self, name: &str) -> Option<&ServiceBinding> {
        self.services.get(name)
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceBinding> {
        self.services.values()
    }
}

impl MethodResolver for ServiceRegistry {
    fn resolve(
        &self,
        service: &str,
        method: &str,
        signature: &MethodSignature,
    ) -> Option<MethodBinding> {
        self.services
            .get(service)?
            .lookup(method, signature)
            .cloned()
    }
}

/// Converts the argument at `index`.
///
/// # Errors
///
/// [`InvocationError::InvalidArgument`] if there is no such argument, or
/// [`InvocationError::Codec`] if it cannot be converted to `T`.
pub fn arg<T: FromValue>(args: &[Value], index: usize) -> Result<T, InvocationError> {
    let value = args.get(index).cloned().ok_or_else(|| {
        InvocationError::InvalidArgument(format!(
            "missing argument {} of {}",
            index,
            args.len()
        ))
    })?;
    Ok(T::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_common::TypeRef;

    fn double_signature(params: usize) -> MethodSignature {
        (0..params).fold(
            MethodSignature::new(TypeSpec::boxed(TypeRef::Double)),
            |signature, _| signature.param(TypeSpec::boxed(TypeRef::Double)),
        )
    }

    fn add_binding() -> ServiceBinding {
        ServiceBinding::new("DoubleService").method(
            "add",
            double_signature(2),
            |args: Vec<Value>| async move {
                let a: f64 = arg(&args, 0)?;
                let b: f64 = arg(&args, 1)?;
                Ok(Value::Double(a + b))
            },
        )
    }

    #[tokio::test]
    async fn test_resolve_and_invoke() {
        let registry = ServiceRegistry::new(vec![add_binding()]).unwrap();
        let binding = registry
            .resolve("DoubleService", "add", &double_signature(2))
            .unwrap();

        assert_eq!(binding.name(), "add");
        let value = binding
            .invoke(vec![Value::Double(1.0), Value::Double(8.0)])
            .await
            .unwrap();
        assert_eq!(value, Value::Double(9.0));
    }

    #[test]
    fn test_resolution_uses_parameter_types() {
        let registry = ServiceRegistry::new(vec![add_binding()]).unwrap();

        assert!(registry.resolve("DoubleService", "add", &double_signature(3)).is_none());
        assert!(registry.resolve("DoubleService", "sub", &double_signature(2)).is_none());
        assert!(registry.resolve("IntService", "add", &double_signature(2)).is_none());

        let primitive = MethodSignature::new(TypeSpec::boxed(TypeRef::Double))
            .param(TypeSpec::primitive(TypeRef::Double))
            .param(TypeSpec::primitive(TypeRef::Double));
        assert!(registry.resolve("DoubleService", "add", &primitive).is_none());

        // The declared return type does not take part in resolution.
        let other_return = MethodSignature::new(TypeSpec::boxed(TypeRef::String))
            .param(TypeSpec::boxed(TypeRef::Double))
            .param(TypeSpec::boxed(TypeRef::Double));
        assert!(registry.resolve("DoubleService", "add", &other_return).is_some());
    }

    #[test]
    fn test_overloads_coexist() {
        let binding = add_binding().method("add", double_signature(3), |_args: Vec<Value>| async {
            Ok(Value::Null)
        });
        assert_eq!(binding.method_count(), 2);
    }

    #[test]
    fn test_duplicate_service_rejected() {
        let err = ServiceRegistry::new(vec![add_binding(), add_binding()]).unwrap_err();
        assert!(err.contains("duplicate"));
    }

    #[test]
    fn test_empty_service_rejected() {
        assert!(ServiceRegistry::new(vec![ServiceBinding::new("Empty")]).is_err());
    }

    #[test]
    fn test_arg_helper() {
        let args = vec![Value::Double(2.5), Value::from("x")];
        assert_eq!(arg::<f64>(&args, 0).unwrap(), 2.5);
        assert!(matches!(arg::<f64>(&args, 1), Err(InvocationError::Codec(_))));
        assert!(matches!(arg::<f64>(&args, 2), Err(InvocationError::InvalidArgument(_))));
    }
}
