//! In-process engine for tests and local development.
//!
//! No sockets are involved: requests are injected with
//! [`LoopbackEngine::dispatch`] and everything the dispatched callbacks
//! write is captured in a [`Recorded`] transcript. Pattern matching is
//! literal path equality -- compiling `{id}`-style patterns belongs to a
//! real wire engine.

use crate::{
    AbortCallback, BodyChunkCallback, Engine, Method, RawRequest, RawResponse, ResponseWriter, RouteCallback,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;

const EPHEMERAL_BASE: u16 = 49152;

struct Registration {
    pattern: String,
    seq: usize,
    callback: RouteCallback,
}

/// In-memory [`Engine`] implementation.
///
/// Registrations live in one bucket per method; a dispatch merges the
/// request's method bucket with the `Any` bucket in registration order and
/// walks the matches, honoring the yield directive between them.
pub struct LoopbackEngine {
    routes: [Vec<Registration>; Method::COUNT],
    registered: usize,
    next_ephemeral: u16,
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self { routes: std::array::from_fn(|_| Vec::new()), registered: 0, next_ephemeral: EPHEMERAL_BASE }
    }

    /// Drives one request through the matching registrations and returns
    /// the recorded response.
    ///
    /// Each registration runs with a fresh request/response pair against
    /// the same recorded connection; after a callback's future resolves
    /// with the yield directive set, the next match runs. The first `end`
    /// on the connection wins, later writes are dropped.
    pub async fn dispatch(&self, call: Call) -> Recorded {
        let connection = Arc::new(Mutex::new(RecordedInner::default()));

        let mut matched: Vec<&Registration> = Vec::new();
        matched.extend(self.routes[call.method.index()].iter().filter(|r| r.pattern == call.path));
        if call.method != Method::Any {
            matched.extend(self.routes[Method::Any.index()].iter().filter(|r| r.pattern == call.path));
        }
        matched.sort_by_key(|r| r.seq);

        for registration in matched {
            let yielded = Arc::new(AtomicBool::new(false));
            let request = Box::new(LoopbackRequest {
                path: call.path.clone(),
                query: call.query.clone(),
                headers: call.headers.clone(),
                chunks: call.chunks.clone(),
                yielded: Arc::clone(&yielded),
            });
            let response =
                Box::new(LoopbackResponse { connection: Arc::clone(&connection), abort: call.abort.clone() });

            (registration.callback)(request, response).await;

            if !yielded.load(Ordering::SeqCst) {
                break;
            }
            trace!(pattern = %registration.pattern, "registration yielded, trying next match");
        }

        let inner = lock(&connection);
        Recorded {
            status: inner.status.clone(),
            headers: inner.headers.clone(),
            body: inner.body.clone(),
            groups: inner.groups,
        }
    }
}

#[async_trait]
impl Engine for LoopbackEngine {
    type Socket = LoopbackSocket;

    fn register(&mut self, method: Method, pattern: &str, callback: RouteCallback) {
        trace!(method = %method, pattern, "route registered");
        let seq = self.registered;
        self.registered += 1;
        self.routes[method.index()].push(Registration { pattern: pattern.to_string(), seq, callback });
    }

    async fn bind(&mut self, host: &str, port: u16) -> io::Result<LoopbackSocket> {
        let port = if port == 0 {
            let ephemeral = self.next_ephemeral;
            self.next_ephemeral += 1;
            ephemeral
        } else {
            port
        };
        Ok(LoopbackSocket { host: host.to_string(), port })
    }

    fn local_port(&self, socket: &LoopbackSocket) -> u16 {
        socket.port
    }

    fn close(&mut self, _socket: LoopbackSocket) {}
}

/// Fake listen-socket handle handed out by [`LoopbackEngine::bind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackSocket {
    host: String,
    port: u16,
}

impl LoopbackSocket {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// One injected request.
#[derive(Debug, Clone)]
pub struct Call {
    method: Method,
    path: String,
    query: String,
    headers: Vec<(String, String)>,
    chunks: Vec<Bytes>,
    abort: Option<AbortHandle>,
}

impl Call {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            query: String::new(),
            headers: Vec::new(),
            chunks: Vec::new(),
            abort: None,
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: &str) -> Self {
        Self::new(Method::Post, path)
    }

    /// Raw query string, without the leading `?`.
    pub fn query(mut self, query: &str) -> Self {
        self.query = query.to_string();
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Appends one body chunk; the last appended chunk carries the
    /// last-chunk marker on delivery.
    pub fn chunk(mut self, chunk: impl Into<Bytes>) -> Self {
        self.chunks.push(chunk.into());
        self
    }

    /// Single-chunk body convenience.
    pub fn body(self, body: impl Into<Bytes>) -> Self {
        self.chunk(body)
    }

    /// Attaches a disconnect simulator to this call.
    pub fn abort_handle(mut self, handle: &AbortHandle) -> Self {
        self.abort = Some(handle.clone());
        self
    }
}

/// Simulates a client disconnect for one call.
#[derive(Clone, Default)]
pub struct AbortHandle {
    inner: Arc<AbortState>,
}

#[derive(Default)]
struct AbortState {
    fired: AtomicBool,
    listeners: Mutex<Vec<AbortCallback>>,
}

impl std::fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortHandle").field("fired", &self.fired()).finish_non_exhaustive()
    }
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the disconnect. Listeners registered before the fire run now,
    /// listeners registered afterwards run at registration.
    pub fn fire(&self) {
        self.inner.fired.store(true, Ordering::SeqCst);
        let listeners = std::mem::take(&mut *lock(&self.inner.listeners));
        for listener in listeners {
            listener();
        }
    }

    pub fn fired(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    fn subscribe(&self, callback: AbortCallback) {
        if self.fired() {
            callback();
            return;
        }
        lock(&self.inner.listeners).push(callback);
    }
}

struct LoopbackRequest {
    path: String,
    query: String,
    headers: Vec<(String, String)>,
    chunks: Vec<Bytes>,
    yielded: Arc<AtomicBool>,
}

impl RawRequest for LoopbackRequest {
    fn url(&self) -> &str {
        &self.path
    }

    fn query(&self) -> &str {
        &self.query
    }

    fn for_each_header(&self, f: &mut dyn FnMut(&str, &str)) {
        for (name, value) in &self.headers {
            f(name, value);
        }
    }

    fn on_body(&mut self, mut callback: BodyChunkCallback) {
        // chunks are kept, not drained, so a re-subscription replays them
        if self.chunks.is_empty() {
            callback(Bytes::new(), true);
            return;
        }
        let last = self.chunks.len() - 1;
        for (position, chunk) in self.chunks.iter().enumerate() {
            callback(chunk.clone(), position == last);
        }
    }

    fn yield_to_next(&mut self) {
        self.yielded.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecordedInner {
    status: Option<String>,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
    groups: usize,
    ended: bool,
}

struct LoopbackResponse {
    connection: Arc<Mutex<RecordedInner>>,
    abort: Option<AbortHandle>,
}

impl ResponseWriter for LoopbackResponse {
    fn write_status(&mut self, line: &str) {
        let mut inner = lock(&self.connection);
        if !inner.ended {
            inner.status = Some(line.to_string());
        }
    }

    fn write_header(&mut self, name: &str, value: &str) {
        let mut inner = lock(&self.connection);
        if !inner.ended {
            inner.headers.push((name.to_string(), value.to_string()));
        }
    }

    fn end(&mut self, body: &[u8]) {
        let mut inner = lock(&self.connection);
        if !inner.ended {
            inner.body = Some(Bytes::copy_from_slice(body));
            inner.ended = true;
        }
    }
}

impl RawResponse for LoopbackResponse {
    fn grouped(&mut self, write: &mut dyn FnMut(&mut dyn ResponseWriter)) {
        lock(&self.connection).groups += 1;
        write(self);
    }

    fn on_abort(&mut self, callback: AbortCallback) {
        if let Some(handle) = &self.abort {
            handle.subscribe(callback);
        }
    }
}

/// Transcript of everything a dispatch wrote.
#[derive(Debug, Clone)]
pub struct Recorded {
    status: Option<String>,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
    groups: usize,
}

impl Recorded {
    /// True when any terminal bytes reached the connection.
    pub fn wrote(&self) -> bool {
        self.status.is_some() || self.body.is_some()
    }

    pub fn status_line(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Numeric code parsed off the status line.
    pub fn status_code(&self) -> Option<u16> {
        self.status.as_deref().and_then(|line| line.split(' ').next()).and_then(|code| code.parse().ok())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn body_str(&self) -> Option<&str> {
        self.body.as_deref().and_then(|body| std::str::from_utf8(body).ok())
    }

    /// Number of grouped-write scopes entered while producing this
    /// transcript.
    pub fn groups(&self) -> usize {
        self.groups
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use std::sync::atomic::AtomicUsize;

    fn write_callback(status: &'static str, body: &'static str) -> RouteCallback {
        Arc::new(move |_request, mut response| -> BoxFuture<'static, ()> {
            Box::pin(async move {
                response.grouped(&mut |writer| {
                    writer.write_status(status);
                    writer.end(body.as_bytes());
                });
            })
        })
    }

    fn yield_callback() -> RouteCallback {
        Arc::new(move |mut request, _response| -> BoxFuture<'static, ()> {
            Box::pin(async move {
                request.yield_to_next();
            })
        })
    }

    #[tokio::test]
    async fn dispatch_runs_first_matching_registration() {
        let mut engine = LoopbackEngine::new();
        engine.register(Method::Get, "/", write_callback("200 OK", "first"));
        engine.register(Method::Get, "/", write_callback("200 OK", "second"));

        let recorded = engine.dispatch(Call::get("/")).await;
        assert_eq!(recorded.status_line(), Some("200 OK"));
        assert_eq!(recorded.body_str(), Some("first"));
        assert_eq!(recorded.groups(), 1);
    }

    #[tokio::test]
    async fn yield_falls_through_in_registration_order() {
        let mut engine = LoopbackEngine::new();
        engine.register(Method::Get, "/", yield_callback());
        engine.register(Method::Any, "/", write_callback("200 OK", "catch-all"));

        let recorded = engine.dispatch(Call::get("/")).await;
        assert_eq!(recorded.body_str(), Some("catch-all"));
    }

    #[tokio::test]
    async fn unmatched_method_and_path_write_nothing() {
        let mut engine = LoopbackEngine::new();
        engine.register(Method::Post, "/submit", write_callback("200 OK", "posted"));

        assert!(!engine.dispatch(Call::get("/submit")).await.wrote());
        assert!(!engine.dispatch(Call::post("/other")).await.wrote());
    }

    #[tokio::test]
    async fn body_chunks_replay_on_resubscription() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        let callback: RouteCallback = Arc::new(move |mut request, _response| -> BoxFuture<'static, ()> {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                for _ in 0..2 {
                    let counter = Arc::clone(&counter);
                    request.on_body(Box::new(move |chunk, is_last| {
                        counter.fetch_add(chunk.len(), Ordering::SeqCst);
                        if is_last {
                            counter.fetch_add(100, Ordering::SeqCst);
                        }
                    }));
                }
            })
        });

        let mut engine = LoopbackEngine::new();
        engine.register(Method::Post, "/", callback);
        engine.dispatch(Call::post("/").chunk("ab").chunk("cd")).await;

        // two subscriptions, each seeing 4 bytes and one last-chunk marker
        assert_eq!(delivered.load(Ordering::SeqCst), 208);
    }

    #[tokio::test]
    async fn abort_handle_reaches_registered_listener() {
        let handle = AbortHandle::new();
        let seen = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&seen);
        let inner_handle = handle.clone();
        let callback: RouteCallback = Arc::new(move |_request, mut response| -> BoxFuture<'static, ()> {
            let flag = Arc::clone(&flag);
            let handle = inner_handle.clone();
            Box::pin(async move {
                response.on_abort(Box::new(move || flag.store(true, Ordering::SeqCst)));
                handle.fire();
            })
        });

        let mut engine = LoopbackEngine::new();
        engine.register(Method::Get, "/", callback);
        engine.dispatch(Call::get("/").abort_handle(&handle)).await;

        assert!(seen.load(Ordering::SeqCst));
        assert!(handle.fired());
    }

    #[tokio::test]
    async fn first_end_wins_on_a_connection() {
        let callback: RouteCallback = Arc::new(|_request, mut response| -> BoxFuture<'static, ()> {
            Box::pin(async move {
                response.write_status("200 OK");
                response.end(b"one");
                response.write_status("500 broken");
                response.end(b"two");
            })
        });

        let mut engine = LoopbackEngine::new();
        engine.register(Method::Get, "/", callback);
        let recorded = engine.dispatch(Call::get("/")).await;

        assert_eq!(recorded.status_line(), Some("200 OK"));
        assert_eq!(recorded.body_str(), Some("one"));
    }

    #[tokio::test]
    async fn bind_assigns_ephemeral_ports() {
        let mut engine = LoopbackEngine::new();
        let first = engine.bind("127.0.0.1", 0).await.unwrap();
        let second = engine.bind("127.0.0.1", 0).await.unwrap();
        let fixed = engine.bind("127.0.0.1", 8080).await.unwrap();

        assert_eq!(engine.local_port(&first), EPHEMERAL_BASE);
        assert_eq!(engine.local_port(&second), EPHEMERAL_BASE + 1);
        assert_eq!(fixed.port(), 8080);
        assert_eq!(fixed.host(), "127.0.0.1");

        engine.close(first);
    }
}
