//! Application surface: configuration, registration, socket lifecycle.

use crate::dispatch::{route_callback, Shared};
use crate::handler::Handler;
use nano_transport::{Engine, Method};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// What a handler's empty resolution writes.
///
/// Frameworks in this family disagree here, so the behavior is explicit
/// configuration: synthesize an empty-success response, or leave the
/// connection untouched and let the transport's own idle handling close
/// things out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyReply {
    /// Write `204 No Content`, error-style.
    #[default]
    NoContent,
    /// Write nothing.
    Silent,
}

/// Constructor-time configuration. Fixed once the app is built; the
/// dispatch pipeline never consults ambient state.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Bind host. `localhost` is normalized to `127.0.0.1` at listen time.
    pub host: String,
    /// Bind port; 0 requests an ephemeral port.
    pub port: u16,
    pub empty_reply: EmptyReply,
    /// Emit a debug line when request-body decoding fails.
    pub log_decode_errors: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            empty_reply: EmptyReply::default(),
            log_decode_errors: false,
        }
    }
}

/// Bound address reported by [`App::listen`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Error)]
pub enum ListenError {
    #[error("already listening")]
    AlreadyListening,

    #[error("bind error: {source}")]
    Bind {
        #[from]
        source: io::Error,
    },
}

/// The routing application over a transport engine.
///
/// Registration methods are pass-throughs: each wraps the handler in the
/// dispatch pipeline and forwards `(method, pattern, callback)` to the
/// engine verbatim. No matching logic lives here.
pub struct App<E: Engine> {
    engine: E,
    config: AppConfig,
    shared: Arc<Shared>,
    socket: Option<E::Socket>,
    port: Option<u16>,
}

macro_rules! method_route {
    ($name:ident, $method:ident) => {
        #[doc = concat!("Registers a handler for [`Method::", stringify!($method), "`] requests on `pattern`.")]
        pub fn $name(&mut self, pattern: &str, handler: impl Handler + 'static) -> &mut Self {
            self.route(Method::$method, pattern, handler)
        }
    };
}

impl<E: Engine> App<E> {
    pub fn new(engine: E) -> Self {
        Self::with_config(engine, AppConfig::default())
    }

    pub fn with_config(engine: E, config: AppConfig) -> Self {
        let shared =
            Arc::new(Shared { empty_reply: config.empty_reply, log_decode_errors: config.log_decode_errors });
        Self { engine, config, shared, socket: None, port: None }
    }

    fn route(&mut self, method: Method, pattern: &str, handler: impl Handler + 'static) -> &mut Self {
        let callback = route_callback(Arc::new(handler), Arc::clone(&self.shared));
        self.engine.register(method, pattern, callback);
        self
    }

    method_route!(get, Get);
    method_route!(post, Post);
    method_route!(put, Put);
    method_route!(patch, Patch);
    method_route!(delete, Delete);
    method_route!(options, Options);
    method_route!(connect, Connect);
    method_route!(head, Head);

    /// Registers a catch-all handler, offered to requests of every method.
    pub fn any(&mut self, pattern: &str, handler: impl Handler + 'static) -> &mut Self {
        self.route(Method::Any, pattern, handler)
    }

    /// Binds the listen socket and resolves the effective port.
    pub async fn listen(&mut self) -> Result<Bound, ListenError> {
        if self.socket.is_some() {
            return Err(ListenError::AlreadyListening);
        }

        let host = normalize_host(&self.config.host).to_string();
        let socket = self.engine.bind(&host, self.config.port).await?;
        let port = self.engine.local_port(&socket);
        self.socket = Some(socket);
        self.port = Some(port);

        info!(host = %host, port, "listening");
        Ok(Bound { host, port })
    }

    /// Closes the listen socket. Idempotent; an app that never listened is
    /// a no-op.
    pub fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            self.engine.close(socket);
            self.port = None;
            info!("listen socket closed");
        }
    }

    /// The bound port, available once [`App::listen`] has completed.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }
}

fn normalize_host(host: &str) -> &str {
    if host == "localhost" { "127.0.0.1" } else { host }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use mockall::mock;
    use nano_transport::RouteCallback;

    mock! {
        pub Transport {}

        #[async_trait::async_trait]
        impl Engine for Transport {
            type Socket = u16;

            fn register(&mut self, method: Method, pattern: &str, callback: RouteCallback);
            async fn bind(&mut self, host: &str, port: u16) -> io::Result<u16>;
            fn local_port(&self, socket: &u16) -> u16;
            fn close(&mut self, socket: u16);
        }
    }

    fn noop() -> impl Handler + 'static {
        handler_fn(|_req, _res, _next| async { Ok(()) })
    }

    #[test]
    fn registration_forwards_method_and_pattern_verbatim() {
        let mut engine = MockTransport::new();
        engine
            .expect_register()
            .withf(|method, pattern, _callback| *method == Method::Get && pattern == "/users")
            .times(1)
            .return_const(());
        engine
            .expect_register()
            .withf(|method, pattern, _callback| *method == Method::Any && pattern == "/")
            .times(1)
            .return_const(());

        let mut app = App::new(engine);
        app.get("/users", noop()).any("/", noop());
    }

    #[tokio::test]
    async fn listen_binds_resolves_and_reports() {
        let mut engine = MockTransport::new();
        engine
            .expect_bind()
            .withf(|host, port| host == "0.0.0.0" && *port == 0)
            .times(1)
            .returning(|_, _| Ok(7));
        engine.expect_local_port().returning(|socket| 40000 + *socket);

        let mut app = App::new(engine);
        assert_eq!(app.port(), None);

        let bound = app.listen().await.unwrap();
        assert_eq!(bound, Bound { host: "0.0.0.0".to_string(), port: 40007 });
        assert_eq!(app.port(), Some(40007));

        assert!(matches!(app.listen().await.unwrap_err(), ListenError::AlreadyListening));
    }

    #[tokio::test]
    async fn localhost_normalizes_to_loopback() {
        let mut engine = MockTransport::new();
        engine.expect_bind().withf(|host, _| host == "127.0.0.1").times(1).returning(|_, port| Ok(port));
        engine.expect_local_port().returning(|socket| *socket);

        let config = AppConfig { host: "localhost".to_string(), port: 8080, ..AppConfig::default() };
        let mut app = App::with_config(engine, config);

        let bound = app.listen().await.unwrap();
        assert_eq!(bound.host, "127.0.0.1");
        assert_eq!(bound.port, 8080);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_clears_the_port() {
        let mut engine = MockTransport::new();
        engine.expect_bind().returning(|_, port| Ok(port));
        engine.expect_local_port().returning(|socket| *socket);
        engine.expect_close().times(1).return_const(());

        let config = AppConfig { port: 9000, ..AppConfig::default() };
        let mut app = App::with_config(engine, config);
        app.listen().await.unwrap();
        assert_eq!(app.port(), Some(9000));

        app.close();
        assert_eq!(app.port(), None);
        app.close();
    }

    #[test]
    fn close_without_listen_is_a_noop() {
        let engine = MockTransport::new();
        let mut app = App::new(engine);
        app.close();
    }
}
