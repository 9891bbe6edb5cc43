//! The async nano web framework: a routing + middleware layer over a
//! pluggable transport engine.
//!
//! The transport engine (sockets, TLS, wire parsing, pattern matching)
//! lives behind the [`nano_transport::Engine`] contract. This crate owns
//! everything between that contract and user handlers:
//!
//! - the dispatch pipeline turning a route callback into a handler
//!   invocation with guarded response state
//! - single-response semantics: at most one terminal write per request,
//!   whatever the handler does with [`ResponseHandle::send`] and
//!   [`Next::pass`]
//! - content-type-aware request body decoding
//! - the uniform error-to-status mapping
//!
//! # Example
//!
//! ```
//! use nano_transport::loopback::{Call, LoopbackEngine};
//! use nano_web::{handler_fn, App, HandlerError};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut app = App::new(LoopbackEngine::new());
//! app.get("/", handler_fn(|_req, _res, _next| async { Ok::<_, HandlerError>("Hello World!") }));
//!
//! let recorded = app.engine().dispatch(Call::get("/")).await;
//! assert_eq!(recorded.status_line(), Some("200 OK"));
//! assert_eq!(recorded.body_str(), Some("Hello World!"));
//! # }
//! ```

mod app;
mod body;
mod dispatch;
mod error;
mod guard;
mod handler;
mod request;

pub use app::{App, AppConfig, Bound, EmptyReply, ListenError};
pub use body::{classify, decode, Body, BodyError};
pub use error::{BoxError, HandlerError, HttpError};
pub use guard::{Next, ResponseHandle};
pub use handler::{handler_fn, FnHandler, Handler, Reply};
pub use request::{QueryValue, Request};
