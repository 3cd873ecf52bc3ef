//! Error types surfaced by the request context.

use http::StatusCode;
use thiserror::Error;

/// Boxed, thread-safe error used at trait seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias for handlers and context operations.
pub type ContextResult<T = ()> = Result<T, ContextError>;

/// Failures reported by a [`ResponseSink`](crate::transport::ResponseSink).
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("response sink is closed")]
    Closed,

    #[error("response write failed: {0}")]
    Io(#[source] BoxError),
}

/// Errors produced while serving a request through a [`Context`](crate::Context).
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("unsupported content type: {0}")]
    UnsupportedMediaType(String),

    #[error("request body is empty")]
    EmptyBody,

    #[error("malformed request body: {0}")]
    MalformedBody(#[source] BoxError),

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed to {op}: {source}")]
    TransportWriteFailure {
        op: &'static str,
        #[source]
        source: SinkError,
    },

    #[error("failed to encode response: {0}")]
    Encode(#[source] BoxError),

    #[error("streaming error: {0}")]
    Stream(#[source] BoxError),

    #[error("request canceled")]
    Canceled,

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// A failure that already carries the HTTP status it should map to.
    #[error("{message}")]
    Http { status: StatusCode, message: String },

    #[error("handler error: {0}")]
    Handler(#[source] BoxError),
}

impl ContextError {
    /// Shorthand for an [`ContextError::Http`] failure.
    pub fn http(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Wrap an arbitrary handler failure.
    pub fn handler(err: impl Into<BoxError>) -> Self {
        Self::Handler(err.into())
    }

    /// HTTP status a filter should answer with for this failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::EmptyBody | Self::MalformedBody(_) | Self::InvalidArgument(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            // nginx's "client closed request"
            Self::Canceled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            Self::Http { status, .. } => *status,
            Self::TransportWriteFailure { .. }
            | Self::Encode(_)
            | Self::Stream(_)
            | Self::Handler(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Static label for structured logs.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnsupportedMediaType(_) => "unsupported_media_type",
            Self::EmptyBody => "empty_body",
            Self::MalformedBody(_) => "malformed_body",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotFound(_) => "not_found",
            Self::TransportWriteFailure { .. } => "transport_write_failure",
            Self::Encode(_) => "encode_failure",
            Self::Stream(_) => "stream_failure",
            Self::Canceled => "canceled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Http { .. } => "http_error",
            Self::Handler(_) => "handler_error",
        }
    }

    /// Whether the failure was caused by the client rather than the server.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}
