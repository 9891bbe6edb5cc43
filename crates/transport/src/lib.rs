//! Transport contract for the nano web stack.
//!
//! The routing layer in `nano-web` sits above a transport engine that owns
//! sockets, TLS and HTTP/1.1 wire parsing. This crate pins down the seam
//! between the two:
//!
//! - [`Engine`]: pattern registration and listen-socket lifecycle
//! - [`RawRequest`] / [`RawResponse`]: the per-request surface an engine
//!   hands to each registered route callback
//! - [`Method`]: the registration vocabulary shared by both sides
//!
//! A wire engine is intentionally not part of this workspace. The
//! [`loopback`] module provides an in-process stand-in for tests and local
//! development.

mod engine;
mod method;
mod raw;

pub mod loopback;

pub use engine::Engine;
pub use method::Method;
pub use raw::{AbortCallback, BodyChunkCallback, RawRequest, RawResponse, ResponseWriter, RouteCallback};
