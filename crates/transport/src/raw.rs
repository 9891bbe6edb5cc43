use bytes::Bytes;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Body chunk subscription: invoked once per chunk in arrival order, with
/// the flag marking the final chunk. Bodyless requests deliver a single
/// empty final chunk.
pub type BodyChunkCallback = Box<dyn FnMut(Bytes, bool) + Send>;

/// Disconnect subscription: invoked at most once, possibly from another
/// task, when the peer goes away.
pub type AbortCallback = Box<dyn FnOnce() + Send>;

/// The per-route callback an engine drives once per matched request.
pub type RouteCallback =
    Arc<dyn Fn(Box<dyn RawRequest>, Box<dyn RawResponse>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Read side of one in-flight request, owned by the route callback.
pub trait RawRequest: Send {
    /// Request path, verbatim from the request line.
    fn url(&self) -> &str;

    /// Raw query string without the leading `?`; empty when absent.
    fn query(&self) -> &str;

    /// Visits every header pair in wire order, duplicates included.
    fn for_each_header(&self, f: &mut dyn FnMut(&str, &str));

    /// Subscribes to the body chunk stream.
    ///
    /// The engine delivers chunks in arrival order and exactly one
    /// invocation carries the last-chunk marker. Subscribing again restarts
    /// delivery from the first chunk.
    fn on_body(&mut self, callback: BodyChunkCallback);

    /// Asks the engine to offer this request to the next matching
    /// registration. Legal at any point before the route callback's future
    /// completes.
    fn yield_to_next(&mut self);
}

/// Low-level write surface of one in-flight response.
pub trait ResponseWriter {
    /// Writes the status line, e.g. `200 OK`.
    fn write_status(&mut self, line: &str);

    /// Writes one response header.
    fn write_header(&mut self, name: &str, value: &str);

    /// Writes the body and terminates the response.
    fn end(&mut self, body: &[u8]);
}

/// Write side of one in-flight response.
pub trait RawResponse: ResponseWriter + Send {
    /// Runs `write` inside the engine's grouped-write scope: everything
    /// written there reaches the wire as one unit, with no interleaving
    /// against other pending writes on the same connection.
    fn grouped(&mut self, write: &mut dyn FnMut(&mut dyn ResponseWriter));

    /// Registers a disconnect listener. It may fire at any suspension
    /// point; an engine whose peer is already gone fires it immediately.
    fn on_abort(&mut self, callback: AbortCallback);
}
