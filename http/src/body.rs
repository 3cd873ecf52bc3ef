//! Request body formats.
//!
//! A format is selected by type. [`Context::body`](crate::Context::body)
//! tries the built-in formats against the request's `Content-Type`;
//! [`Context::body_as`](crate::Context::body_as) takes the format as a type
//! parameter, which is how new formats plug in.

use crate::error::BoxError;
use serde::de::DeserializeOwned;

/// A decodable request body encoding.
pub trait BodyFormat {
    /// Canonical media type, used in error messages.
    const MEDIA_TYPE: &'static str;

    /// Whether this format handles `content_type` (parameters included).
    fn matches(content_type: &str) -> bool;

    /// Decode the buffered body.
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, BoxError>;
}

/// Strip parameters and normalize case: `Application/JSON; charset=utf-8` → `application/json`.
pub fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// `application/json` and `application/*+json`.
pub struct Json;

impl BodyFormat for Json {
    const MEDIA_TYPE: &'static str = "application/json";

    fn matches(content_type: &str) -> bool {
        let essence = essence(content_type);
        essence == Self::MEDIA_TYPE
            || (essence.starts_with("application/") && essence.ends_with("+json"))
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, BoxError> {
        serde_json::from_slice(bytes).map_err(Into::into)
    }
}

/// `application/x-www-form-urlencoded`.
pub struct Form;

impl BodyFormat for Form {
    const MEDIA_TYPE: &'static str = "application/x-www-form-urlencoded";

    fn matches(content_type: &str) -> bool {
        essence(content_type) == Self::MEDIA_TYPE
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, BoxError> {
        serde_urlencoded::from_bytes(bytes).map_err(Into::into)
    }
}
