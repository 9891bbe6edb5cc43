//! Content-type-aware request body decoding.
//!
//! Classification is delegated to the `mime` crate: a raw `content-type`
//! header value either parses into a [`Mime`] or collapses into the
//! absent/unparseable sentinel (`None`). The sentinel is not the same thing
//! as a parseable-but-unsupported pair; the two fail differently.

use bytes::Bytes;
use mime::Mime;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// A decoded request body, tagged by the content-type that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// `text/plain` and `text/html`.
    Text(String),
    /// `application/json`.
    Json(Value),
    /// `application/x-www-form-urlencoded`; duplicate fields are
    /// last-write-wins.
    Form(HashMap<String, String>),
    /// Content-types the table knows but does not decode; the buffer
    /// passes through untouched.
    Bytes(Bytes),
}

#[derive(Debug, Error)]
pub enum BodyError {
    #[error("missing or unparseable content-type header")]
    InvalidContentType,

    #[error("unsupported content-type: {content_type}")]
    Unsupported { content_type: String },

    #[error("invalid {kind} body: {reason}")]
    Decode { kind: &'static str, reason: String },

    #[error("connection closed before the request body completed")]
    Interrupted,
}

impl BodyError {
    fn unsupported(mime: &Mime) -> Self {
        Self::Unsupported { content_type: format!("{}/{}", mime.type_(), mime.subtype()) }
    }

    fn decode<R: ToString>(kind: &'static str, reason: R) -> Self {
        Self::Decode { kind, reason: reason.to_string() }
    }
}

/// Structures a raw `content-type` header value.
///
/// Absence and unparseability collapse into the same sentinel by design.
pub fn classify(raw: Option<&str>) -> Option<Mime> {
    raw.and_then(|value| value.parse().ok())
}

enum Decoder {
    Text,
    Json,
    Form,
    /// Known pair, no decoding.
    Raw,
}

/// The (type, subtype) decision table.
///
/// `None` is the unsupported terminal; it is spelled out here rather than
/// left to a fallthrough in [`decode`]. Parameters (`charset=...`) never
/// participate in the lookup.
fn decoder_for(mime: &Mime) -> Option<Decoder> {
    match (mime.type_().as_str(), mime.subtype().as_str()) {
        ("text", "plain" | "html") => Some(Decoder::Text),
        ("application", "json") => Some(Decoder::Json),
        ("application", "x-www-form-urlencoded") => Some(Decoder::Form),
        ("application", "javascript" | "xml") => Some(Decoder::Raw),
        ("multipart", "form-data") => Some(Decoder::Raw),
        _ => None,
    }
}

/// Decodes a fully-assembled body buffer.
///
/// Called once per accumulated buffer, after the transport has delivered
/// the last chunk.
pub fn decode(classified: Option<Mime>, bytes: Bytes) -> Result<Body, BodyError> {
    let mime = classified.ok_or(BodyError::InvalidContentType)?;
    match decoder_for(&mime) {
        Some(Decoder::Text) => match String::from_utf8(bytes.into()) {
            Ok(text) => Ok(Body::Text(text)),
            Err(_) => Err(BodyError::decode("text", "request body is not utf8")),
        },
        Some(Decoder::Json) => {
            serde_json::from_slice(&bytes).map(Body::Json).map_err(|e| BodyError::decode("json", e))
        }
        Some(Decoder::Form) => serde_urlencoded::from_bytes::<Vec<(String, String)>>(&bytes)
            .map(|pairs| Body::Form(pairs.into_iter().collect()))
            .map_err(|e| BodyError::decode("form", e)),
        Some(Decoder::Raw) => Ok(Body::Bytes(bytes)),
        None => Err(BodyError::unsupported(&mime)),
    }
}
