//! # Context: per-request state
//!
//! A `Context` is bound to one [`Inbound`] request and one [`ResponseSink`].
//! It carries path parameters, a key/value bag shared between chain
//! elements, the handler chain with its cursor, and the response state
//! (status, header-committed and written flags).
//!
//! ## Guarantees
//!
//! * The response head is written at most once. Status and header changes
//!   after that point are ignored.
//! * [`Context::next`] walks the chain strictly in order and is a no-op
//!   once the cursor has passed the last handler.
//! * [`Context::reset`] clears every per-request collection while keeping
//!   their allocations, so pooled contexts never leak state.

use crate::body::{BodyFormat, Form, Json};
use crate::cookie::{Cookie, find_cookie};
use crate::error::{BoxError, ContextError, ContextResult, SinkError};
use crate::handler::{BoxFuture, Chain, SharedHandler};
use crate::multipart::{self, FormFile, MultipartForm};
use crate::transport::{Inbound, RequestSignal, ResponseSink, detached_inbound, detached_sink};
use aegis_core::{ProxyTrust, ServerConfig};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::header::{self, HeaderName, HeaderValue};
use http::{Method, StatusCode, Uri};
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const MIME_JSON: &str = "application/json";
pub const MIME_TEXT: &str = "text/plain; charset=utf-8";
pub const MIME_HTML: &str = "text/html; charset=utf-8";

/// Value stored in the context's key/value bag.
pub type SharedValue = Arc<dyn Any + Send + Sync>;

/// Per-server knobs every context needs.
#[derive(Debug, Clone)]
pub struct ContextSettings {
    /// Policy for `X-Forwarded-For` / `X-Real-IP` in [`Context::client_ip`].
    pub proxy_trust: ProxyTrust,
    /// Upper bound on buffered request bodies.
    pub max_body_bytes: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            proxy_trust: ProxyTrust::All,
            max_body_bytes: 32 << 20,
        }
    }
}

impl From<&ServerConfig> for ContextSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            proxy_trust: config.proxy.clone(),
            max_body_bytes: config.max_body_bytes,
        }
    }
}

/// Request context passed through the handler chain.
pub struct Context {
    inbound: Arc<Inbound>,
    sink: Arc<dyn ResponseSink>,
    signal: RequestSignal,
    settings: Arc<ContextSettings>,
    params: RwLock<HashMap<String, String>>,
    values: RwLock<HashMap<String, SharedValue>>,
    handlers: Vec<SharedHandler>,
    /// `None` until the first `next()`; then the index of the running handler.
    cursor: Option<usize>,
    status: StatusCode,
    header_committed: bool,
    written: bool,
}

impl Context {
    pub fn new(inbound: Inbound, sink: Arc<dyn ResponseSink>) -> Self {
        Self::with_settings(inbound, sink, Arc::new(ContextSettings::default()))
    }

    pub fn with_settings(
        inbound: Inbound,
        sink: Arc<dyn ResponseSink>,
        settings: Arc<ContextSettings>,
    ) -> Self {
        Self {
            signal: inbound.signal().clone(),
            inbound: Arc::new(inbound),
            sink,
            settings,
            params: RwLock::new(HashMap::new()),
            values: RwLock::new(HashMap::new()),
            handlers: Vec::new(),
            cursor: None,
            status: StatusCode::OK,
            header_committed: false,
            written: false,
        }
    }

    /// Rebind to a new request and clear all per-request state.
    ///
    /// Map and chain allocations are kept for the next request.
    pub fn reset(&mut self, inbound: Inbound, sink: Arc<dyn ResponseSink>) {
        self.signal = inbound.signal().clone();
        self.inbound = Arc::new(inbound);
        self.sink = sink;
        self.clear_state();
    }

    /// Unbind the request and sink and clear all per-request state.
    ///
    /// An idle context holds no reference to the last request's body or
    /// connection.
    pub(crate) fn detach(&mut self) {
        self.inbound = detached_inbound();
        self.sink = detached_sink();
        self.signal = RequestSignal::new();
        self.clear_state();
    }

    /// Drop per-request state without rebinding the request.
    fn clear_state(&mut self) {
        self.status = StatusCode::OK;
        self.header_committed = false;
        self.written = false;
        self.cursor = None;
        self.params.get_mut().clear();
        self.values.get_mut().clear();
        self.handlers.clear();
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    // ============== Request identity ==============

    pub fn request(&self) -> &Inbound {
        &self.inbound
    }

    pub fn response(&self) -> &Arc<dyn ResponseSink> {
        &self.sink
    }

    pub fn method(&self) -> &Method {
        self.inbound.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inbound.uri()
    }

    pub fn path(&self) -> &str {
        self.inbound.uri().path()
    }

    /// `Host` header, falling back to the URI authority.
    pub fn host(&self) -> &str {
        self.get_header("host")
            .or_else(|| self.inbound.uri().authority().map(|a| a.as_str()))
            .unwrap_or_default()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inbound.remote_addr()
    }

    pub fn user_agent(&self) -> &str {
        self.get_header("user-agent").unwrap_or_default()
    }

    /// Best guess at the originating client address.
    ///
    /// When the peer is trusted by [`ContextSettings::proxy_trust`], the first
    /// `X-Forwarded-For` entry wins, then `X-Real-IP`. Otherwise, or when
    /// both are absent, the socket peer without its port.
    pub fn client_ip(&self) -> String {
        let peer = self.inbound.remote_addr();

        if self.settings.proxy_trust.trusts(peer.map(|addr| addr.ip())) {
            if let Some(forwarded) = self.get_header("x-forwarded-for").filter(|v| !v.is_empty()) {
                return forwarded
                    .split(',')
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_string();
            }
            if let Some(real_ip) = self.get_header("x-real-ip").filter(|v| !v.is_empty()) {
                return real_ip.trim().to_string();
            }
        }

        peer.map(|addr| addr.ip().to_string()).unwrap_or_default()
    }

    /// Request header value; `None` when absent or not valid UTF-8.
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.inbound.header(key)
    }

    pub fn is_websocket(&self) -> bool {
        self.get_header("upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
    }

    pub fn is_ajax(&self) -> bool {
        self.get_header("x-requested-with") == Some("XMLHttpRequest")
    }

    /// Whether `Accept` names `content_type` or `*/*`.
    pub fn accepts(&self, content_type: &str) -> bool {
        let accept = self.get_header("accept").unwrap_or_default();
        accept.contains(content_type) || accept.contains("*/*")
    }

    // ============== Parameters ==============

    /// Path parameter, or `""` when absent.
    pub fn param(&self, name: &str) -> String {
        self.params.read().get(name).cloned().unwrap_or_default()
    }

    /// Used by the router before dispatch.
    pub fn set_param(&self, name: impl Into<String>, value: impl Into<String>) {
        self.params.write().insert(name.into(), value.into());
    }

    pub fn set_params<I, K, V>(&self, params: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut guard = self.params.write();
        for (name, value) in params {
            guard.insert(name.into(), value.into());
        }
    }

    /// Copy of all path parameters.
    pub fn params(&self) -> HashMap<String, String> {
        self.params.read().clone()
    }

    /// First query value for `name`, or `""`.
    pub fn query(&self, name: &str) -> &str {
        self.inbound
            .query_pairs()
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .unwrap_or_default()
    }

    /// Query value, or `fallback` when absent or empty.
    pub fn query_default<'a>(&'a self, name: &str, fallback: &'a str) -> &'a str {
        match self.query(name) {
            "" => fallback,
            value => value,
        }
    }

    /// Every query value for `name`, in request order.
    pub fn query_array(&self, name: &str) -> Vec<String> {
        self.inbound
            .query_pairs()
            .iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
            .collect()
    }

    // ============== Body ==============

    /// Decode the request body with the format named by `Content-Type`.
    ///
    /// JSON and URL-encoded forms are recognized.
    pub async fn body<T: DeserializeOwned>(&self) -> ContextResult<T> {
        if !self.inbound.has_body() {
            return Err(ContextError::EmptyBody);
        }
        let content_type = self.get_header("content-type").unwrap_or_default();
        if Json::matches(content_type) {
            self.decode_with::<Json, T>().await
        } else if Form::matches(content_type) {
            self.decode_with::<Form, T>().await
        } else {
            Err(ContextError::UnsupportedMediaType(content_type.to_string()))
        }
    }

    /// Decode the request body with an explicit format.
    pub async fn body_as<F: BodyFormat, T: DeserializeOwned>(&self) -> ContextResult<T> {
        if !self.inbound.has_body() {
            return Err(ContextError::EmptyBody);
        }
        let content_type = self.get_header("content-type").unwrap_or_default();
        if !F::matches(content_type) {
            return Err(ContextError::UnsupportedMediaType(content_type.to_string()));
        }
        self.decode_with::<F, T>().await
    }

    async fn decode_with<F: BodyFormat, T: DeserializeOwned>(&self) -> ContextResult<T> {
        let bytes = self
            .inbound
            .read_body(self.settings.max_body_bytes)
            .await?
            .filter(|bytes| !bytes.is_empty())
            .ok_or(ContextError::EmptyBody)?;
        F::decode(&bytes).map_err(ContextError::MalformedBody)
    }

    /// Form field value.
    ///
    /// URL-encoded and multipart body fields of POST, PUT and PATCH requests
    /// take precedence over query parameters. Returns `""` when absent.
    pub async fn form_value(&self, key: &str) -> String {
        let content_type = self.get_header("content-type").unwrap_or_default();
        let form_method = matches!(*self.method(), Method::POST | Method::PUT | Method::PATCH);

        if self.inbound.has_body() && form_method {
            if Form::matches(content_type) {
                if let Ok(Some(bytes)) = self.inbound.read_body(self.settings.max_body_bytes).await {
                    if let Ok(pairs) = serde_urlencoded::from_bytes::<Vec<(String, String)>>(&bytes) {
                        if let Some((_, value)) = pairs.into_iter().find(|(k, _)| k == key) {
                            return value;
                        }
                    }
                }
            } else if let Ok(form) = self.multipart_form().await {
                if let Some(value) = form.value(key) {
                    return value.to_string();
                }
            }
        }
        self.query(key).to_string()
    }

    /// Parse a `multipart/form-data` body, at most `max_body_bytes` long.
    pub async fn multipart_form(&self) -> ContextResult<MultipartForm> {
        let content_type = self.get_header("content-type").unwrap_or_default();
        let boundary = multipart::boundary(content_type)?;
        let limit = self.settings.max_body_bytes;
        let bytes = self
            .inbound
            .read_body(limit)
            .await?
            .filter(|bytes| !bytes.is_empty())
            .ok_or(ContextError::EmptyBody)?;
        multipart::parse(bytes, boundary, limit).await
    }

    /// First file uploaded under `name`. `NotFound` when the form has none.
    pub async fn form_file(&self, name: &str) -> ContextResult<FormFile> {
        self.multipart_form()
            .await?
            .file(name)
            .cloned()
            .ok_or_else(|| ContextError::NotFound(format!("form file {name:?}")))
    }

    // ============== Values ==============

    /// Store a value for later chain elements. Replaces any previous value.
    pub fn set_value<V: Any + Send + Sync>(&self, key: impl Into<String>, value: V) {
        self.values.write().insert(key.into(), Arc::new(value));
    }

    /// Typed copy of a stored value; `None` when absent or of another type.
    pub fn get_value<V: Any + Clone>(&self, key: &str) -> Option<V> {
        self.values
            .read()
            .get(key)
            .and_then(|value| value.downcast_ref::<V>())
            .cloned()
    }

    /// The stored value without downcasting.
    pub fn value(&self, key: &str) -> Option<SharedValue> {
        self.values.read().get(key).cloned()
    }

    pub fn has_value(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }

    pub fn remove_value(&self, key: &str) -> Option<SharedValue> {
        self.values.write().remove(key)
    }

    pub fn value_count(&self) -> usize {
        self.values.read().len()
    }

    // ============== Cookies ==============

    /// Value of a request cookie.
    pub fn cookie(&self, name: &str) -> ContextResult<String> {
        find_cookie(self.inbound.headers(), name)
            .map(str::to_owned)
            .ok_or_else(|| ContextError::NotFound(format!("cookie {name:?}")))
    }

    /// Append a `Set-Cookie` header.
    pub fn set_cookie(&mut self, cookie: &Cookie) -> &mut Self {
        if self.header_committed {
            tracing::debug!(cookie = %cookie.name, "header already committed; cookie dropped");
            return self;
        }
        match HeaderValue::from_str(&cookie.to_header_value()) {
            Ok(value) => self.sink.append_header(header::SET_COOKIE, value),
            Err(_) => tracing::warn!(cookie = %cookie.name, "ignoring invalid cookie"),
        }
        self
    }

    // ============== Response head ==============

    /// Set the status to send. Ignored once the header is committed.
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        if self.header_committed {
            if status != self.status {
                tracing::debug!(
                    committed = %self.status,
                    requested = %status,
                    "header already committed; status change ignored"
                );
            }
            return self;
        }
        self.status = status;
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    /// Set a response header. Ignored once the header is committed.
    pub fn set_header(&mut self, key: &str, value: &str) -> &mut Self {
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => self.insert_header(name, value),
            _ => tracing::warn!(header = key, "ignoring invalid response header"),
        }
        self
    }

    /// Pending response header value.
    pub fn response_header(&self, key: &str) -> Option<String> {
        let name = HeaderName::from_bytes(key.as_bytes()).ok()?;
        self.sink
            .header(&name)
            .and_then(|v| v.to_str().ok().map(str::to_owned))
    }

    fn insert_header(&self, name: HeaderName, value: HeaderValue) {
        if self.header_committed {
            tracing::debug!(header = %name, "header already committed; change ignored");
            return;
        }
        self.sink.insert_header(name, value);
    }

    fn write_header_once(&mut self) {
        if !self.header_committed {
            self.sink.write_head(self.status);
            self.header_committed = true;
            tracing::trace!(status = %self.status, "response header committed");
        }
    }

    pub fn is_header_committed(&self) -> bool {
        self.header_committed
    }

    pub fn is_written(&self) -> bool {
        self.written
    }

    // ============== Response writers ==============

    async fn send(
        &mut self,
        status: StatusCode,
        content_type: Option<HeaderValue>,
        body: Bytes,
        op: &'static str,
    ) -> ContextResult {
        if let Some(content_type) = content_type {
            self.insert_header(header::CONTENT_TYPE, content_type);
        }
        self.status(status);
        self.write_header_once();

        if !body.is_empty() {
            self.sink
                .write(body)
                .await
                .map_err(|source| ContextError::TransportWriteFailure { op, source })?;
        }
        self.written = true;
        Ok(())
    }

    /// Serialize `data` as JSON.
    ///
    /// Serialization happens before the header is committed, so an
    /// unencodable value leaves the response untouched.
    pub async fn json<T: Serialize + ?Sized>(&mut self, status: StatusCode, data: &T) -> ContextResult {
        let body = serde_json::to_vec(data).map_err(|e| ContextError::Encode(e.into()))?;
        self.send(
            status,
            Some(HeaderValue::from_static(MIME_JSON)),
            Bytes::from(body),
            "write JSON response",
        )
        .await
    }

    pub async fn text(&mut self, status: StatusCode, body: impl Into<String>) -> ContextResult {
        self.send(
            status,
            Some(HeaderValue::from_static(MIME_TEXT)),
            Bytes::from(body.into()),
            "write string response",
        )
        .await
    }

    pub async fn html(&mut self, status: StatusCode, html: impl Into<String>) -> ContextResult {
        self.send(
            status,
            Some(HeaderValue::from_static(MIME_HTML)),
            Bytes::from(html.into()),
            "write HTML response",
        )
        .await
    }

    /// Raw bytes with a caller-chosen content type.
    pub async fn data(
        &mut self,
        status: StatusCode,
        content_type: &str,
        data: impl Into<Bytes>,
    ) -> ContextResult {
        let content_type = HeaderValue::from_str(content_type).map_err(|_| {
            ContextError::InvalidArgument(format!("invalid content type: {content_type:?}"))
        })?;
        self.send(status, Some(content_type), data.into(), "write data response")
            .await
    }

    /// Commit the header with no body.
    pub async fn no_content(&mut self, status: StatusCode) -> ContextResult {
        self.send(status, None, Bytes::new(), "write empty response")
            .await
    }

    /// Redirect to `location`. `status` must be in 300..=399.
    pub async fn redirect(&mut self, status: StatusCode, location: &str) -> ContextResult {
        if !status.is_redirection() {
            return Err(ContextError::InvalidArgument(format!(
                "invalid redirect status code: {}",
                status.as_u16()
            )));
        }
        let location = HeaderValue::from_str(location).map_err(|_| {
            ContextError::InvalidArgument(format!("invalid redirect location: {location:?}"))
        })?;
        self.insert_header(header::LOCATION, location);
        self.send(status, None, Bytes::new(), "write redirect").await
    }

    /// Raw body write. Commits the header as-is and returns the bytes written.
    pub async fn write(&mut self, data: impl Into<Bytes>) -> ContextResult<usize> {
        let data = data.into();
        let len = data.len();
        self.write_header_once();
        if len > 0 {
            self.sink
                .write(data)
                .await
                .map_err(|source| ContextError::TransportWriteFailure {
                    op: "write response body",
                    source,
                })?;
        }
        self.written = true;
        Ok(len)
    }

    fn begin_stream(&mut self, status: StatusCode, content_type: &str) -> ContextResult<BodyWriter> {
        let content_type = HeaderValue::from_str(content_type).map_err(|_| {
            ContextError::InvalidArgument(format!("invalid content type: {content_type:?}"))
        })?;
        self.insert_header(header::CONTENT_TYPE, content_type);
        self.insert_header(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        self.status(status);
        self.write_header_once();
        self.written = true;

        Ok(BodyWriter {
            sink: self.sink.clone(),
            signal: self.signal.clone(),
            bytes_written: 0,
        })
    }

    /// Stream a chunked response produced by `step`.
    ///
    /// `step` is called repeatedly with a writer until it returns
    /// [`StreamError::End`]. Any other error is returned as
    /// [`ContextError::Stream`]. Cancellation is checked between steps.
    pub async fn stream_body<F>(
        &mut self,
        status: StatusCode,
        content_type: &str,
        mut step: F,
    ) -> ContextResult
    where
        F: for<'w> FnMut(&'w mut BodyWriter) -> BoxFuture<'w, Result<(), StreamError>> + Send,
    {
        let mut writer = self.begin_stream(status, content_type)?;
        loop {
            if let Some(err) = self.signal.err() {
                return Err(err);
            }
            match step(&mut writer).await {
                Ok(()) => continue,
                Err(StreamError::End) => return Ok(()),
                Err(StreamError::Failed(e)) => return Err(ContextError::Stream(e)),
            }
        }
    }

    /// Stream a chunked response from a `Stream` of chunks.
    ///
    /// The stream ending is the end-of-stream signal.
    pub async fn stream<S, E>(&mut self, status: StatusCode, content_type: &str, chunks: S) -> ContextResult
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Into<BoxError>,
    {
        let mut writer = self.begin_stream(status, content_type)?;
        let mut chunks = std::pin::pin!(chunks);
        while let Some(chunk) = chunks.next().await {
            if let Some(err) = self.signal.err() {
                return Err(err);
            }
            let chunk = chunk.map_err(|e| ContextError::Stream(e.into()))?;
            writer
                .write(chunk)
                .await
                .map_err(|e| ContextError::Stream(e.into()))?;
        }
        Ok(())
    }

    // ============== Chain execution ==============

    /// Replace the handler chain and rewind the cursor.
    pub fn set_handlers(&mut self, chain: &Chain) {
        self.handlers.clear();
        self.handlers.extend(chain.handlers().iter().cloned());
        self.cursor = None;
    }

    pub fn handlers(&self) -> &[SharedHandler] {
        &self.handlers
    }

    /// Index of the handler most recently dispatched; `None` before the first.
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Run the next handler in the chain and return its result.
    ///
    /// Past the end of the chain this is a successful no-op, so the final
    /// handler may call it unconditionally.
    pub async fn next(&mut self) -> ContextResult {
        let len = self.handlers.len();
        let index = self.cursor.map_or(0, |cursor| cursor + 1).min(len);
        self.cursor = Some(index);

        match self.handlers.get(index).cloned() {
            Some(handler) => {
                tracing::trace!(handler = handler.name(), index, "dispatching handler");
                handler.handle(self).await
            }
            None => Ok(()),
        }
    }

    // ============== Cancellation ==============

    pub fn signal(&self) -> &RequestSignal {
        &self.signal
    }

    /// Current cancellation or deadline error, for polling.
    pub fn err(&self) -> Option<ContextError> {
        self.signal.err()
    }

    /// Start building an independent copy bound to a new signal.
    pub fn derive(&self) -> Derivation<'_> {
        Derivation {
            source: self,
            signal: self.signal.child(),
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("method", self.method())
            .field("path", &self.path())
            .field("status", &self.status)
            .field("cursor", &self.cursor)
            .field("handlers", &self.handlers.len())
            .field("header_committed", &self.header_committed)
            .field("written", &self.written)
            .finish()
    }
}

/// Builder for a context derived from another one.
///
/// The derived context shares the request identity and response sink. Its
/// params, values and chain are copies, so later mutations on either side
/// stay local. Stored values are shared by reference, not cloned.
pub struct Derivation<'a> {
    source: &'a Context,
    signal: RequestSignal,
}

impl Derivation<'_> {
    /// Bind a specific cancellation token, keeping the current deadline.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        let deadline = self.signal.deadline();
        self.signal = RequestSignal::from_token(token);
        if let Some(deadline) = deadline {
            self.signal = self.signal.with_deadline(deadline);
        }
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.signal = self.signal.with_deadline(deadline);
        self
    }

    pub fn with_signal(mut self, signal: RequestSignal) -> Self {
        self.signal = signal;
        self
    }

    pub fn build(self) -> Context {
        let source = self.source;
        Context {
            inbound: source.inbound.clone(),
            sink: source.sink.clone(),
            signal: self.signal,
            settings: source.settings.clone(),
            params: RwLock::new(source.params.read().clone()),
            values: RwLock::new(source.values.read().clone()),
            handlers: source.handlers.clone(),
            cursor: source.cursor,
            status: source.status,
            header_committed: source.header_committed,
            written: source.written,
        }
    }
}

// ============== Streaming ==============

/// How a streaming step ends.
#[derive(Debug)]
pub enum StreamError {
    /// The producer is done; not a failure.
    End,
    Failed(BoxError),
}

impl From<SinkError> for StreamError {
    fn from(err: SinkError) -> Self {
        StreamError::Failed(err.into())
    }
}

/// Direct handle on the response body used by streaming producers.
pub struct BodyWriter {
    sink: Arc<dyn ResponseSink>,
    signal: RequestSignal,
    bytes_written: usize,
}

impl BodyWriter {
    pub async fn write(&mut self, chunk: impl Into<Bytes>) -> Result<(), SinkError> {
        let chunk = chunk.into();
        let len = chunk.len();
        self.sink.write(chunk).await?;
        self.bytes_written += len;
        Ok(())
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    pub fn signal(&self) -> &RequestSignal {
        &self.signal
    }
}
