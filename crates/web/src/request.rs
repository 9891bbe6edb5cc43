//! Per-request read-only view handed to handlers.
//!
//! Built fresh for every dispatched request: the header mapping, the parsed
//! query and the verbatim url are snapshotted up front, while the body stays
//! behind a lazy accessor over the transport's chunk stream.

use crate::body::{classify, decode, Body, BodyError};
use crate::dispatch::Shared;
use bytes::{Bytes, BytesMut};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue};
use nano_transport::RawRequest;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

pub(crate) type BodySource = Arc<Mutex<Box<dyn RawRequest>>>;

/// Value side of the query mapping: single or repeated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    One(String),
    Many(Vec<String>),
}

impl QueryValue {
    /// First value, for the common single case.
    pub fn first(&self) -> &str {
        match self {
            QueryValue::One(value) => value,
            QueryValue::Many(values) => values.first().map(String::as_str).unwrap_or(""),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            QueryValue::One(first) => *self = QueryValue::Many(vec![std::mem::take(first), value]),
            QueryValue::Many(values) => values.push(value),
        }
    }
}

/// Read-only view of one incoming request.
pub struct Request {
    url: String,
    headers: HeaderMap,
    query: HashMap<String, QueryValue>,
    content_type: Option<String>,
    source: BodySource,
    shared: Arc<Shared>,
}

impl Request {
    pub(crate) fn from_raw(raw: Box<dyn RawRequest>, shared: Arc<Shared>) -> Self {
        let url = raw.url().to_string();
        let query = parse_query(raw.query());

        let mut headers = HeaderMap::new();
        raw.for_each_header(&mut |name, value| {
            match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
                // insert, not append: duplicates reported by the transport
                // are last-write-wins
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => debug!(header = name, "skipping malformed header"),
            }
        });

        let content_type = headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok()).map(str::to_string);

        Self { url, headers, query, content_type, source: Arc::new(Mutex::new(raw)), shared }
    }

    pub(crate) fn source(&self) -> BodySource {
        Arc::clone(&self.source)
    }

    /// Request path, verbatim from the transport.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Header mapping; names are case-insensitive.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// One header as text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Parsed query mapping. A key without `=` maps to the empty string;
    /// repeated keys accumulate in arrival order.
    pub fn query(&self) -> &HashMap<String, QueryValue> {
        &self.query
    }

    /// First value for one query key.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(QueryValue::first)
    }

    /// Collects the body chunk stream and decodes it by content-type.
    ///
    /// The accessor is memo-free: every call re-subscribes to the
    /// transport's chunk stream, and most transports deliver a body only
    /// once -- buffer the result instead of calling this twice.
    ///
    /// Failures surface here, to the caller; nothing is written to the
    /// response on the handler's behalf.
    pub async fn body(&self) -> Result<Body, BodyError> {
        let bytes = self.collect().await?;
        let decoded = decode(classify(self.content_type.as_deref()), bytes);
        if let Err(err) = &decoded {
            if self.shared.log_decode_errors {
                debug!(error = %err, url = %self.url, "request body decode failed");
            }
        }
        decoded
    }

    async fn collect(&self) -> Result<Bytes, BodyError> {
        let (sender, receiver) = oneshot::channel();
        {
            let mut source = self.source.lock().await;
            let mut buffer = BytesMut::new();
            let mut sender = Some(sender);
            source.on_body(Box::new(move |chunk, is_last| {
                buffer.extend_from_slice(&chunk);
                if is_last {
                    if let Some(sender) = sender.take() {
                        let _ = sender.send(buffer.split().freeze());
                    }
                }
            }));
        }
        receiver.await.map_err(|_| BodyError::Interrupted)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("url", &self.url)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

fn parse_query(raw: &str) -> HashMap<String, QueryValue> {
    if raw.is_empty() {
        return HashMap::new();
    }
    let pairs: Vec<(String, String)> = match serde_urlencoded::from_str(raw) {
        Ok(pairs) => pairs,
        Err(err) => {
            debug!(error = %err, "unparseable query string, treating as empty");
            return HashMap::new();
        }
    };

    let mut query: HashMap<String, QueryValue> = HashMap::new();
    for (key, value) in pairs {
        match query.entry(key) {
            Entry::Occupied(mut entry) => entry.get_mut().push(value),
            Entry::Vacant(entry) => {
                entry.insert(QueryValue::One(value));
            }
        }
    }
    query
}
