use crate::body::BodyError;
use std::error::Error as StdError;
use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// An explicit user-thrown status.
///
/// Rendered verbatim as `"<code> <message>"` for both the status line and
/// the body; the generic-path defaults never apply to it.
#[derive(Debug, Error)]
#[error("{code} {message}")]
pub struct HttpError {
    code: u16,
    message: String,
}

impl HttpError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A failure flowing out of a handler.
///
/// Every variant funnels into the same single error write; the variants
/// exist because they render differently:
/// an [`HttpError`] carries its own status and message verbatim, a
/// [`Status`](HandlerError::Status) failure pairs a status code with its
/// cause's text, and everything else is a 500.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Http(#[from] HttpError),

    /// Generic failure tagged with a status code.
    #[error("{status} {cause}")]
    Status { status: u16, cause: BoxError },

    /// Body decoding failure propagated out of
    /// [`Request::body`](crate::Request::body).
    #[error("{0}")]
    Body(#[from] BodyError),

    #[error("{0}")]
    Other(BoxError),
}

impl From<BoxError> for HandlerError {
    fn from(cause: BoxError) -> Self {
        Self::Other(cause)
    }
}

impl HandlerError {
    pub fn other<E: Into<BoxError>>(cause: E) -> Self {
        Self::Other(cause.into())
    }

    /// Tags a generic failure with the status it should render under.
    pub fn with_status<E: Into<BoxError>>(status: u16, cause: E) -> Self {
        Self::Status { status, cause: cause.into() }
    }

    /// Status code and reason for the wire.
    ///
    /// The generic path defaults the code to 500 and the reason to the
    /// cause's text; `"Internal Server Error"` fills an empty reason only
    /// at exactly 500, every other code keeps its empty reason.
    pub fn status_and_reason(&self) -> (u16, String) {
        let (code, reason) = match self {
            Self::Http(err) => (err.code(), err.message().to_string()),
            Self::Status { status, cause } => (*status, cause.to_string()),
            Self::Body(err) => (500, err.to_string()),
            Self::Other(cause) => (500, cause.to_string()),
        };
        if code == 500 && reason.is_empty() { (code, "Internal Server Error".to_string()) } else { (code, reason) }
    }

    /// The wire status line: `"<code> <reason>"`, or the bare code when
    /// the reason is empty.
    pub fn status_line(&self) -> String {
        let (code, reason) = self.status_and_reason();
        if reason.is_empty() { code.to_string() } else { format!("{code} {reason}") }
    }
}
