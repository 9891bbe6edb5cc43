//! The per-request dispatch pipeline.
//!
//! Wires a transport route callback into a handler invocation: the abort
//! listener goes in first, then the request view and the guarded response
//! state are built, the handler is awaited, and exactly one of
//! yield-directive / reply write / error write / empty-reply synthesis runs
//! against the guard.
//!
//! Scheduling is single-threaded cooperative per request: the pipeline
//! suspends only while awaiting the handler and inside body accumulation.
//! Requests never share a guard, so the guard's own flags are the only
//! synchronization this layer needs.

use crate::app::EmptyReply;
use crate::error::HandlerError;
use crate::guard::{Next, Payload, ResponseGuard, ResponseHandle};
use crate::handler::{Handler, Reply};
use crate::request::Request;
use futures::future::BoxFuture;
use nano_transport::{RawRequest, RawResponse, RouteCallback};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Constructor-time configuration shared by every dispatch of one app.
pub(crate) struct Shared {
    pub(crate) empty_reply: EmptyReply,
    pub(crate) log_decode_errors: bool,
}

/// Wraps a handler into the transport's route callback shape.
pub(crate) fn route_callback(handler: Arc<dyn Handler>, shared: Arc<Shared>) -> RouteCallback {
    Arc::new(move |raw_request, raw_response| -> BoxFuture<'static, ()> {
        let handler = Arc::clone(&handler);
        let shared = Arc::clone(&shared);
        Box::pin(dispatch(handler, shared, raw_request, raw_response))
    })
}

async fn dispatch(
    handler: Arc<dyn Handler>,
    shared: Arc<Shared>,
    raw_request: Box<dyn RawRequest>,
    mut raw_response: Box<dyn RawResponse>,
) {
    // The disconnect listener registers before anything else runs: it may
    // fire at any later suspension point and must be visible to every
    // write attempt.
    let aborted = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&aborted);
        raw_response.on_abort(Box::new(move || flag.store(true, Ordering::SeqCst)));
    }

    let guard = Arc::new(ResponseGuard::new(raw_response, aborted));
    let request = Request::from_raw(raw_request, Arc::clone(&shared));
    let source = request.source();

    let outcome = handler
        .handle(request, ResponseHandle::new(Arc::clone(&guard)), Next::new(Arc::clone(&guard)))
        .await;

    if guard.yielded() {
        // The flag was set synchronously inside `pass`, so every write the
        // handler attempted afterwards was already suppressed; only now is
        // the transport told to try the next registration.
        source.lock().await.yield_to_next();
        return;
    }

    match outcome {
        Ok(Reply::None) => {
            if !guard.explicitly_sent() {
                match shared.empty_reply {
                    EmptyReply::NoContent => {
                        guard.try_write(&Payload::empty_success(), false);
                    }
                    EmptyReply::Silent => {}
                }
            }
        }
        Ok(reply) => match Payload::from_reply(reply) {
            Ok(payload) => {
                guard.try_write(&payload, false);
            }
            Err(err) => write_error(&guard, &err),
        },
        Err(err) => write_error(&guard, &err),
    }
}

fn write_error(guard: &ResponseGuard, err: &HandlerError) {
    debug!(error = %err, "handler failed, writing error response");
    guard.try_write(&Payload::from_error(err), false);
}
