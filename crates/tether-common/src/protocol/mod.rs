pub mod error;
pub mod requests;
pub mod responses;
pub mod signature;

#[cfg(test)]
mod tests;

pub use error::{CodecError, Result, TetherError};
pub use requests::{next_request_id, InvokeSpec, RequestId};
pub use responses::{InvokeResult, StatusCode};
pub use signature::{CollectionKind, MapKind, MethodSignature, TypeRef, TypeSpec};
