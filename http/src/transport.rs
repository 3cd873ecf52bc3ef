//! # Transport seam
//!
//! The request context never talks to sockets. It reads an immutable
//! [`Inbound`] request identity and writes through a [`ResponseSink`].
//! The hyper ingress provides both for live traffic; [`Recorder`] is the
//! in-memory sink used by tests.

use crate::error::{BoxError, ContextError, SinkError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::request::Parts;
use http::{Method, Request, StatusCode, Uri};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Type-erased request body stream.
pub type Body = UnsyncBoxBody<Bytes, BoxError>;

// ============== Cancellation ==============

/// Cooperative cancellation and deadline attached to a request.
///
/// The context never interrupts a running handler; handlers poll
/// [`RequestSignal::err`] or await [`RequestSignal::cancelled`].
#[derive(Debug, Clone, Default)]
pub struct RequestSignal {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// A signal canceled whenever this one is, keeping the same deadline.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The current cancellation or deadline error, if any.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the request is canceled or its deadline passes.
    pub async fn cancelled(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => ContextError::Canceled,
                _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                ContextError::Canceled
            }
        }
    }
}

// ============== Request identity ==============

enum BodyState {
    Absent,
    Pending(Body),
    Buffered(Bytes),
}

/// Immutable view of one incoming request.
///
/// The body stream is consumed at most once; the buffered bytes are kept so
/// later readers observe the same payload.
pub struct Inbound {
    parts: Parts,
    remote_addr: Option<SocketAddr>,
    signal: RequestSignal,
    has_body: bool,
    body: tokio::sync::Mutex<BodyState>,
    query: OnceLock<Vec<(String, String)>>,
}

impl Inbound {
    /// Wrap an `http::Request`, erasing its body type.
    pub fn from_request<B>(req: Request<B>) -> Self
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        let body = if body.is_end_stream() {
            None
        } else {
            Some(body.map_err(Into::into).boxed_unsync())
        };
        Self::from_parts(parts, body)
    }

    pub fn from_parts(parts: Parts, body: Option<Body>) -> Self {
        let (has_body, state) = match body {
            Some(body) => (true, BodyState::Pending(body)),
            None => (false, BodyState::Absent),
        };
        Self {
            parts,
            remote_addr: None,
            signal: RequestSignal::new(),
            has_body,
            body: tokio::sync::Mutex::new(state),
            query: OnceLock::new(),
        }
    }

    pub fn builder() -> InboundBuilder {
        InboundBuilder::default()
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn with_signal(mut self, signal: RequestSignal) -> Self {
        self.signal = signal;
        self
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn parts(&self) -> &Parts {
        &self.parts
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn signal(&self) -> &RequestSignal {
        &self.signal
    }

    /// First value of a request header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Decoded query pairs in their original order.
    pub fn query_pairs(&self) -> &[(String, String)] {
        self.query.get_or_init(|| {
            self.parts
                .uri
                .query()
                .and_then(|q| serde_urlencoded::from_str::<Vec<(String, String)>>(q).ok())
                .unwrap_or_default()
        })
    }

    /// Whether the request carried a body stream.
    pub fn has_body(&self) -> bool {
        self.has_body
    }

    /// Read the whole body, at most `limit` bytes. `None` when no body was sent.
    pub async fn read_body(&self, limit: usize) -> Result<Option<Bytes>, ContextError> {
        let mut state = self.body.lock().await;
        match std::mem::replace(&mut *state, BodyState::Absent) {
            BodyState::Absent => Ok(None),
            BodyState::Buffered(bytes) => {
                *state = BodyState::Buffered(bytes.clone());
                Ok(Some(bytes))
            }
            BodyState::Pending(mut body) => {
                let mut buf = BytesMut::new();
                while let Some(frame) = body.frame().await {
                    let frame = frame.map_err(ContextError::MalformedBody)?;
                    let Ok(data) = frame.into_data() else {
                        continue;
                    };
                    if buf.len() + data.len() > limit {
                        return Err(ContextError::PayloadTooLarge { limit });
                    }
                    buf.extend_from_slice(&data);
                }
                let bytes = buf.freeze();
                *state = BodyState::Buffered(bytes.clone());
                Ok(Some(bytes))
            }
        }
    }
}

/// Bodiless `GET /` bound to idle pooled contexts.
pub(crate) fn detached_inbound() -> Arc<Inbound> {
    static DETACHED: OnceLock<Arc<Inbound>> = OnceLock::new();
    DETACHED
        .get_or_init(|| {
            let (parts, ()) = Request::new(()).into_parts();
            Arc::new(Inbound::from_parts(parts, None))
        })
        .clone()
}

impl std::fmt::Debug for Inbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inbound")
            .field("method", &self.parts.method)
            .field("uri", &self.parts.uri)
            .field("remote_addr", &self.remote_addr)
            .field("has_body", &self.has_body)
            .finish()
    }
}

/// Builds synthetic requests without a socket.
#[derive(Default)]
pub struct InboundBuilder {
    request: http::request::Builder,
    body: Option<Bytes>,
    remote_addr: Option<SocketAddr>,
    signal: Option<RequestSignal>,
}

impl InboundBuilder {
    pub fn method(mut self, method: Method) -> Self {
        self.request = self.request.method(method);
        self
    }

    pub fn uri(mut self, uri: &str) -> Self {
        self.request = self.request.uri(uri);
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.request = self.request.header(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn signal(mut self, signal: RequestSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn build(self) -> Result<Inbound, http::Error> {
        let req = self
            .request
            .body(Full::new(self.body.unwrap_or_default()))?;
        let mut inbound = Inbound::from_request(req);
        inbound.remote_addr = self.remote_addr;
        if let Some(signal) = self.signal {
            inbound.signal = signal;
        }
        Ok(inbound)
    }
}

// ============== Response sink ==============

/// Write target for one response.
///
/// Implementations are internally synchronized so a sink can be shared by a
/// context and the contexts derived from it. The context guarantees it calls
/// [`ResponseSink::write_head`] at most once per request.
#[async_trait]
pub trait ResponseSink: Send + Sync + 'static {
    /// Replace a pending response header.
    fn insert_header(&self, name: HeaderName, value: HeaderValue);

    /// Add a pending response header without replacing existing values.
    fn append_header(&self, name: HeaderName, value: HeaderValue);

    /// Read back a pending response header.
    fn header(&self, name: &HeaderName) -> Option<HeaderValue>;

    /// Flush status and headers.
    fn write_head(&self, status: StatusCode);

    /// Write one chunk of body bytes.
    async fn write(&self, chunk: Bytes) -> Result<(), SinkError>;

    /// No more writes follow.
    fn close(&self) {}
}

/// Sink of an idle pooled context. Writes fail with [`SinkError::Closed`].
struct DetachedSink;

#[async_trait]
impl ResponseSink for DetachedSink {
    fn insert_header(&self, _name: HeaderName, _value: HeaderValue) {}

    fn append_header(&self, _name: HeaderName, _value: HeaderValue) {}

    fn header(&self, _name: &HeaderName) -> Option<HeaderValue> {
        None
    }

    fn write_head(&self, _status: StatusCode) {}

    async fn write(&self, _chunk: Bytes) -> Result<(), SinkError> {
        Err(SinkError::Closed)
    }
}

pub(crate) fn detached_sink() -> Arc<dyn ResponseSink> {
    static DETACHED: OnceLock<Arc<dyn ResponseSink>> = OnceLock::new();
    DETACHED.get_or_init(|| Arc::new(DetachedSink)).clone()
}

#[derive(Default)]
struct RecorderState {
    headers: HeaderMap,
    head: Option<(StatusCode, HeaderMap)>,
    head_calls: usize,
    body: BytesMut,
    chunks: usize,
    closed: bool,
    fail_writes: bool,
}

/// In-memory response sink.
///
/// Status and headers are snapshotted when the head is written, so header
/// changes made afterwards are not observable, matching a real transport.
#[derive(Default)]
pub struct Recorder {
    state: Mutex<RecorderState>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A recorder whose body writes always fail.
    pub fn failing() -> Self {
        let recorder = Self::default();
        recorder.state.lock().fail_writes = true;
        recorder
    }

    /// Committed status, if the head was written.
    pub fn status(&self) -> Option<StatusCode> {
        self.state.lock().head.as_ref().map(|(status, _)| *status)
    }

    /// Headers as committed with the head (empty before commit).
    pub fn committed_headers(&self) -> HeaderMap {
        self.state
            .lock()
            .head
            .as_ref()
            .map(|(_, headers)| headers.clone())
            .unwrap_or_default()
    }

    /// Committed header value as a string.
    pub fn committed_header(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .head
            .as_ref()
            .and_then(|(_, headers)| headers.get(name))
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    /// How many times `write_head` was invoked.
    pub fn head_calls(&self) -> usize {
        self.state.lock().head_calls
    }

    pub fn body(&self) -> Bytes {
        self.state.lock().body.clone().freeze()
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body()).into_owned()
    }

    pub fn chunks(&self) -> usize {
        self.state.lock().chunks
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[async_trait]
impl ResponseSink for Recorder {
    fn insert_header(&self, name: HeaderName, value: HeaderValue) {
        self.state.lock().headers.insert(name, value);
    }

    fn append_header(&self, name: HeaderName, value: HeaderValue) {
        self.state.lock().headers.append(name, value);
    }

    fn header(&self, name: &HeaderName) -> Option<HeaderValue> {
        self.state.lock().headers.get(name).cloned()
    }

    fn write_head(&self, status: StatusCode) {
        let mut state = self.state.lock();
        state.head_calls += 1;
        if state.head.is_none() {
            let snapshot = state.headers.clone();
            state.head = Some((status, snapshot));
        }
    }

    async fn write(&self, chunk: Bytes) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SinkError::Closed);
        }
        if state.fail_writes {
            return Err(SinkError::Io("connection reset by peer".into()));
        }
        if state.head.is_none() {
            let snapshot = state.headers.clone();
            state.head = Some((StatusCode::OK, snapshot));
        }
        state.body.extend_from_slice(&chunk);
        state.chunks += 1;
        Ok(())
    }

    fn close(&self) {
        self.state.lock().closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn body_is_buffered_once_and_reread() {
        let inbound = Inbound::builder()
            .method(Method::POST)
            .uri("/users")
            .body("hello")
            .build()
            .unwrap();

        assert!(inbound.has_body());
        let first = inbound.read_body(1024).await.unwrap();
        let second = inbound.read_body(1024).await.unwrap();
        assert_eq!(first, Some(Bytes::from("hello")));
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn empty_body_is_absent() {
        let inbound = Inbound::builder().uri("/").build().unwrap();
        assert!(!inbound.has_body());
        assert_eq!(inbound.read_body(1024).await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let inbound = Inbound::builder()
            .method(Method::POST)
            .uri("/upload")
            .body(vec![0u8; 64])
            .build()
            .unwrap();

        let err = inbound.read_body(16).await.unwrap_err();
        assert!(matches!(err, ContextError::PayloadTooLarge { limit: 16 }));
    }

    #[test]
    fn query_pairs_keep_order_and_decode() {
        let inbound = Inbound::builder()
            .uri("/search?tag=go&q=hello%20world&tag=web")
            .build()
            .unwrap();

        assert_eq!(
            inbound.query_pairs(),
            &[
                ("tag".to_string(), "go".to_string()),
                ("q".to_string(), "hello world".to_string()),
                ("tag".to_string(), "web".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn recorder_snapshots_headers_at_commit() {
        let recorder = Recorder::new();
        recorder.insert_header(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain"),
        );
        recorder.write_head(StatusCode::CREATED);
        recorder.insert_header(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/html"),
        );
        recorder.write_head(StatusCode::OK);
        recorder.write(Bytes::from("x")).await.unwrap();

        assert_eq!(recorder.status(), Some(StatusCode::CREATED));
        assert_eq!(
            recorder.committed_header("content-type").as_deref(),
            Some("text/plain")
        );
        assert_eq!(recorder.head_calls(), 2);
        assert_eq!(recorder.body_string(), "x");
    }

    #[tokio::test]
    async fn closed_recorder_rejects_writes() {
        let recorder = Recorder::new();
        recorder.close();
        assert!(matches!(
            recorder.write(Bytes::from("late")).await,
            Err(SinkError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn signal_reports_deadline_then_cancel() {
        let signal = RequestSignal::new().with_deadline(Instant::now() + Duration::from_secs(5));
        assert!(signal.err().is_none());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(matches!(signal.err(), Some(ContextError::DeadlineExceeded)));

        signal.cancel();
        assert!(matches!(signal.err(), Some(ContextError::Canceled)));
    }

    #[tokio::test]
    async fn child_signal_follows_parent() {
        let parent = RequestSignal::new();
        let child = parent.child();
        parent.cancel();
        assert!(matches!(child.cancelled().await, ContextError::Canceled));
    }
}
