//! Tether Transport Layer
//!
//! This module provides the stream framer used on both ends of a TCP
//! connection. It plugs into `tokio_util::codec::{FramedRead, FramedWrite}`
//! over the socket halves.
//!
//! # Wire Format
//!
//! `[2-byte magic 1729 as u16 big-endian] + [4-byte body length as u32 big-endian] + [body]`
//!
//! # Message Size Limits
//!
//! Bodies larger than the configured limit (10 MiB by default) are rejected
//! on both encode and decode to prevent memory exhaustion.

pub mod frame;

pub use frame::{FrameCodec, DEFAULT_MAX_FRAME_SIZE, HEADER_LEN, MAGIC};
