//! Tether Common Types, Codec and Framing
//!
//! This crate provides the protocol envelopes, the object-graph codec and the
//! stream framer shared by the tether client and server.
//!
//! # Overview
//!
//! Tether is a binary request/response RPC framework over TCP. A client sends
//! an [`InvokeSpec`] naming a service, a method and its typed signature; the
//! server answers with an [`InvokeResult`] carrying a status code and either a
//! payload or an error message. Many calls may be outstanding on a single
//! connection and responses may arrive in any order.
//!
//! - **Protocol Layer**: envelopes, status codes, method signatures and errors
//! - **Codec Layer**: a compact binary encoding of [`Value`] graphs with a
//!   registry of user types, reference tracking and a comparator policy
//! - **Transport Layer**: the magic-tagged, length-prefixed framer
//!
//! # Wire Format
//!
//! ```text
//! +----------------+----------------------+------------------+
//! | magic (u16 BE) | body length (u32 BE) | body (L bytes)   |
//! +----------------+----------------------+------------------+
//! ```
//!
//! The body is one encoded envelope. See [`codec`] for the body layout.
//!
//! # Example
//!
//! ```
//! use tether_common::{Codec, CodecConfig, InvokeSpec, MethodSignature, TypeRef, TypeSpec, Value};
//!
//! let codec = Codec::new(CodecConfig::default());
//! let signature = MethodSignature::new(TypeSpec::boxed(TypeRef::Double))
//!     .param(TypeSpec::boxed(TypeRef::Double))
//!     .param(TypeSpec::boxed(TypeRef::Double));
//! let spec = InvokeSpec::new("DoubleService", "add", signature, vec![Value::Double(1.0), Value::Double(8.0)]);
//!
//! let body = codec.encode_spec(&spec).unwrap();
//! let decoded = codec.decode_spec(&body).unwrap();
//! assert_eq!(decoded, spec);
//! ```

pub mod codec;
pub mod protocol;
pub mod transport;

pub use codec::{
    Codec, CodecConfig, Comparator, ComparatorPolicy, FromValue, IntoValue, TypeRegistry,
    TypeRegistryBuilder, Value,
};
pub use protocol::*;
pub use transport::FrameCodec;
