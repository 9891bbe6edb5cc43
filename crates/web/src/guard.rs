//! Per-request response finalization.
//!
//! However many code paths try to respond -- an explicit send, the
//! handler's return value, the error path, the empty-reply synthesis -- at
//! most one terminal write reaches the wire. The state machine below owns
//! the raw response and funnels every attempt through one guard function.

use crate::error::HandlerError;
use crate::handler::Reply;
use bytes::Bytes;
use nano_transport::{RawResponse, ResponseWriter};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Terminal-write state of one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseState {
    /// No terminal transition yet; a write is allowed.
    Pending,
    /// Terminal bytes went to the wire; every later attempt is a no-op.
    Finalized,
    /// The handler passed the request on; this guard writes nothing.
    Yielded,
}

struct GuardInner {
    state: ResponseState,
    explicitly_sent: bool,
    response: Box<dyn RawResponse>,
}

pub(crate) struct ResponseGuard {
    inner: Mutex<GuardInner>,
    // set by the transport's disconnect callback, possibly from another
    // task, so it lives outside the critical section
    aborted: Arc<AtomicBool>,
}

impl ResponseGuard {
    pub(crate) fn new(response: Box<dyn RawResponse>, aborted: Arc<AtomicBool>) -> Self {
        Self {
            inner: Mutex::new(GuardInner { state: ResponseState::Pending, explicitly_sent: false, response }),
            aborted,
        }
    }

    fn lock(&self) -> MutexGuard<'_, GuardInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The single legal terminal transition.
    ///
    /// Checks, in order: transport-reported disconnect, an earlier terminal
    /// write, an earlier yield. A suppressed write is a resolved race, not
    /// a failure, so the outcome is reported but never an error.
    pub(crate) fn try_write(&self, payload: &Payload, explicit: bool) -> bool {
        if self.aborted.load(Ordering::SeqCst) {
            return false;
        }
        let mut inner = self.lock();
        match inner.state {
            ResponseState::Finalized | ResponseState::Yielded => false,
            ResponseState::Pending => {
                inner.state = ResponseState::Finalized;
                if explicit {
                    inner.explicitly_sent = true;
                }
                let GuardInner { response, .. } = &mut *inner;
                response.grouped(&mut |writer| {
                    writer.write_status(&payload.status_line);
                    if payload.json {
                        writer.write_header("Content-Type", "application/json");
                    }
                    writer.end(&payload.body);
                });
                true
            }
        }
    }

    /// Records the handler's yield. Only a pending response can yield: a
    /// finalized one already won that race and the yield is discarded.
    pub(crate) fn mark_yielded(&self) {
        let mut inner = self.lock();
        if inner.state == ResponseState::Pending {
            inner.state = ResponseState::Yielded;
        }
    }

    pub(crate) fn yielded(&self) -> bool {
        self.lock().state == ResponseState::Yielded
    }

    pub(crate) fn explicitly_sent(&self) -> bool {
        self.lock().explicitly_sent
    }
}

/// One fully-assembled terminal write.
pub(crate) struct Payload {
    status_line: String,
    json: bool,
    body: Bytes,
}

impl Payload {
    fn text(status_line: &str, body: impl Into<Bytes>) -> Self {
        Self { status_line: status_line.to_string(), json: false, body: body.into() }
    }

    pub(crate) fn from_reply(reply: Reply) -> Result<Payload, HandlerError> {
        match reply {
            Reply::None => Ok(Payload::text("200 OK", Bytes::new())),
            Reply::Text(text) => Ok(Payload::text("200 OK", text)),
            Reply::Json(value) => {
                let body = serde_json::to_vec(&value).map_err(HandlerError::other)?;
                Ok(Payload { status_line: "200 OK".to_string(), json: true, body: body.into() })
            }
        }
    }

    /// Error writes mirror the status line into the body.
    pub(crate) fn from_error(err: &HandlerError) -> Payload {
        let line = err.status_line();
        Payload { status_line: line.clone(), json: false, body: line.into() }
    }

    /// The synthesized empty-success outcome, rendered error-style.
    pub(crate) fn empty_success() -> Payload {
        Payload::text("204 No Content", "204 No Content")
    }
}

/// Handler-facing explicit send.
///
/// `send` is idempotent: after the first terminal write, later calls are
/// silent no-ops, as are calls after a disconnect or a yield.
#[derive(Clone)]
pub struct ResponseHandle {
    guard: Arc<ResponseGuard>,
}

impl ResponseHandle {
    pub(crate) fn new(guard: Arc<ResponseGuard>) -> Self {
        Self { guard }
    }

    /// Writes the value through the guarded terminal path.
    ///
    /// Returns `Err` only when the value fails JSON serialization -- a
    /// suppressed write is `Ok`, by design of the guard.
    pub fn send(&self, reply: impl Into<Reply>) -> Result<(), HandlerError> {
        let payload = Payload::from_reply(reply.into())?;
        self.guard.try_write(&payload, true);
        Ok(())
    }
}

impl fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseHandle")
    }
}

/// The handler's fallthrough signal.
#[derive(Clone)]
pub struct Next {
    guard: Arc<ResponseGuard>,
}

impl Next {
    pub(crate) fn new(guard: Arc<ResponseGuard>) -> Self {
        Self { guard }
    }

    /// Skips the current registration: the transport offers the request to
    /// the next matching one. Takes effect synchronously, so any write this
    /// handler attempts afterwards is already suppressed.
    pub fn pass(&self) {
        self.guard.mark_yielded();
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Next")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nano_transport::AbortCallback;

    #[derive(Clone, Default)]
    struct StubResponse {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl StubResponse {
        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    impl ResponseWriter for StubResponse {
        fn write_status(&mut self, line: &str) {
            self.log.lock().unwrap().push(format!("status:{line}"));
        }

        fn write_header(&mut self, name: &str, value: &str) {
            self.log.lock().unwrap().push(format!("header:{name}={value}"));
        }

        fn end(&mut self, body: &[u8]) {
            self.log.lock().unwrap().push(format!("end:{}", String::from_utf8_lossy(body)));
        }
    }

    impl RawResponse for StubResponse {
        fn grouped(&mut self, write: &mut dyn FnMut(&mut dyn ResponseWriter)) {
            self.log.lock().unwrap().push("group".to_string());
            write(self);
        }

        fn on_abort(&mut self, _callback: AbortCallback) {}
    }

    fn make_guard() -> (ResponseGuard, StubResponse, Arc<AtomicBool>) {
        let stub = StubResponse::default();
        let aborted = Arc::new(AtomicBool::new(false));
        (ResponseGuard::new(Box::new(stub.clone()), Arc::clone(&aborted)), stub, aborted)
    }

    #[test]
    fn first_write_wins_and_later_attempts_are_noops() {
        let (guard, stub, _) = make_guard();
        let payload = Payload::text("200 OK", "first");

        assert!(guard.try_write(&payload, false));
        assert!(!guard.try_write(&Payload::text("200 OK", "second"), false));
        assert_eq!(stub.log(), vec!["group", "status:200 OK", "end:first"]);
    }

    #[test]
    fn json_payload_carries_the_content_type_header() {
        let (guard, stub, _) = make_guard();
        let payload = Payload::from_reply(Reply::Json(serde_json::json!({"a": 1}))).unwrap();

        assert!(guard.try_write(&payload, false));
        assert_eq!(
            stub.log(),
            vec!["group", "status:200 OK", "header:Content-Type=application/json", r#"end:{"a":1}"#]
        );
    }

    #[test]
    fn yield_suppresses_writes_and_finalize_discards_a_late_yield() {
        let (guard, stub, _) = make_guard();

        guard.mark_yielded();
        assert!(guard.yielded());
        assert!(!guard.try_write(&Payload::text("200 OK", "late"), false));
        assert!(stub.log().is_empty());

        let (guard, _, _) = make_guard();
        assert!(guard.try_write(&Payload::text("200 OK", "body"), false));
        guard.mark_yielded();
        assert!(!guard.yielded());
    }

    #[test]
    fn abort_suppresses_every_write() {
        let (guard, stub, aborted) = make_guard();
        aborted.store(true, Ordering::SeqCst);

        assert!(!guard.try_write(&Payload::text("200 OK", "body"), false));
        assert!(!guard.try_write(&Payload::from_error(&HandlerError::other(std::fmt::Error)), false));
        assert!(stub.log().is_empty());
    }

    #[test]
    fn explicit_send_is_tracked() {
        let (guard, _, _) = make_guard();
        assert!(!guard.explicitly_sent());
        assert!(guard.try_write(&Payload::text("200 OK", "body"), true));
        assert!(guard.explicitly_sent());
    }

    #[test]
    fn error_payload_mirrors_the_status_line() {
        let (guard, stub, _) = make_guard();
        let err = HandlerError::from(crate::HttpError::new(418, "teapot"));

        assert!(guard.try_write(&Payload::from_error(&err), false));
        assert_eq!(stub.log(), vec!["group", "status:418 teapot", "end:418 teapot"]);
    }
}
