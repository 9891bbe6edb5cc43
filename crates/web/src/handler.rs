use crate::error::HandlerError;
use crate::guard::{Next, ResponseHandle};
use crate::request::Request;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;

/// What a handler resolves with.
///
/// `None` is the "no value" outcome; whether it writes a synthesized
/// `204 No Content` or nothing at all is decided by
/// [`EmptyReply`](crate::EmptyReply) configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    None,
    /// Written as-is with status `200 OK`.
    Text(String),
    /// Written with `Content-Type: application/json` and status `200 OK`.
    Json(Value),
}

impl Reply {
    /// Serializes any `Serialize` value into a JSON reply.
    pub fn json<T: Serialize>(value: &T) -> Result<Reply, HandlerError> {
        serde_json::to_value(value).map(Reply::Json).map_err(HandlerError::other)
    }
}

impl From<()> for Reply {
    fn from(_value: ()) -> Self {
        Reply::None
    }
}

impl From<&str> for Reply {
    fn from(value: &str) -> Self {
        Reply::Text(value.to_string())
    }
}

impl From<String> for Reply {
    fn from(value: String) -> Self {
        Reply::Text(value)
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Json(value)
    }
}

impl<T: Into<Reply>> From<Option<T>> for Reply {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(inner) => inner.into(),
            None => Reply::None,
        }
    }
}

// numbers write as their decimal text
macro_rules! impl_number_reply {
    ($($number:ty)*) => {$(
        impl From<$number> for Reply {
            fn from(value: $number) -> Self {
                Reply::Text(value.to_string())
            }
        }
    )*};
}

impl_number_reply! { i32 i64 u32 u64 f64 }

/// A route handler.
///
/// Resolves with a [`Reply`], fails into the uniform error-to-status
/// mapping, or drives the response itself through [`ResponseHandle::send`]
/// and [`Next::pass`] and resolves with nothing.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: Request, response: ResponseHandle, next: Next)
        -> Result<Reply, HandlerError>;
}

/// A plain async fn (or closure) adapted into a [`Handler`].
pub struct FnHandler<F, R> {
    f: F,
    _reply: PhantomData<fn() -> R>,
}

impl<F, R> std::fmt::Debug for FnHandler<F, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FnHandler")
    }
}

pub fn handler_fn<F, Fut, R>(f: F) -> FnHandler<F, R>
where
    F: Fn(Request, ResponseHandle, Next) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, HandlerError>> + Send,
    R: Into<Reply> + Send,
{
    FnHandler { f, _reply: PhantomData }
}

#[async_trait]
impl<F, Fut, R> Handler for FnHandler<F, R>
where
    F: Fn(Request, ResponseHandle, Next) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, HandlerError>> + Send,
    R: Into<Reply> + Send,
{
    async fn handle(
        &self,
        request: Request,
        response: ResponseHandle,
        next: Next,
    ) -> Result<Reply, HandlerError> {
        (self.f)(request, response, next).await.map(Into::into)
    }
}
