use crate::{Method, RouteCallback};
use async_trait::async_trait;
use std::io;

/// The transport engine contract consumed by the routing layer.
///
/// An engine owns sockets and wire parsing; the routing layer hands it
/// pattern registrations and receives one [`RouteCallback`] invocation per
/// matched request. Registrations are ordered and immutable (there is no
/// unregister operation), and fallthrough between registrations matching
/// the same request follows registration order.
///
/// Pattern syntax and matching are entirely the engine's concern; the
/// routing layer passes patterns through verbatim.
#[async_trait]
pub trait Engine: Send {
    /// Listen-socket handle returned by [`Engine::bind`].
    type Socket: Send;

    fn register(&mut self, method: Method, pattern: &str, callback: RouteCallback);

    /// Binds the listen socket. Port 0 requests an ephemeral port; the
    /// effective port is resolved through [`Engine::local_port`].
    async fn bind(&mut self, host: &str, port: u16) -> io::Result<Self::Socket>;

    /// Resolves the bound port of an open listen socket.
    fn local_port(&self, socket: &Self::Socket) -> u16;

    /// Closes the listen socket. Draining in-flight requests is the
    /// engine's concern.
    fn close(&mut self, socket: Self::Socket);
}
