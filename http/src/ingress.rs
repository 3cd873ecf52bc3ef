//! # Ingress: Hyper 1.0 adapter
//!
//! `HttpIngress` binds a listener, resolves each request to a handler
//! chain through `matchit`, and runs the chain against a pooled
//! [`Context`] whose response sink streams into the Hyper response.
//!
//! ## Request lifecycle
//!
//! 1. Route lookup: exact method match, `HEAD` falling back to `GET`, a
//!    405 chain when only the path matches, the fallback chain otherwise.
//! 2. The chain runs in its own task. The Hyper side waits for the response
//!    head, then streams body chunks from a bounded channel.
//! 3. After the chain returns, unhandled failures are written by
//!    [`JsonErrorFilter`], an untouched response is committed with its
//!    current status, the sink is closed and the context goes back to the
//!    pool.
//!
//! Dropping the response (client gone) cancels the request signal.

use crate::context::{Context, ContextSettings};
use crate::error::{BoxError, ContextError, ContextResult, SinkError};
use crate::handler::{Chain, Handler, SharedHandler};
use crate::hook::{Filter, JsonErrorFilter};
use crate::pool::ContextPool;
use crate::transport::{Inbound, RequestSignal, ResponseSink};
use aegis_core::ServerConfig;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use http_body::Frame;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::server::graceful::GracefulShutdown;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Instrument;

/// Body type of every response produced by the ingress.
pub type ResponseBody = UnsyncBoxBody<Bytes, Infallible>;

/// Context value key holding the generated request id.
pub const REQUEST_ID_KEY: &str = "request_id";

const BODY_CHANNEL_CAPACITY: usize = 16;

type Head = (StatusCode, HeaderMap);

// ============== Channel sink ==============

/// Response sink that forwards the head through a oneshot and body chunks
/// through a bounded channel.
pub struct ChannelSink {
    headers: Mutex<HeaderMap>,
    head_tx: Mutex<Option<oneshot::Sender<Head>>>,
    body_tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    write_timeout: Duration,
}

impl ChannelSink {
    pub fn new(write_timeout: Duration) -> (Self, oneshot::Receiver<Head>, mpsc::Receiver<Bytes>) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
        let sink = Self {
            headers: Mutex::new(HeaderMap::new()),
            head_tx: Mutex::new(Some(head_tx)),
            body_tx: Mutex::new(Some(body_tx)),
            write_timeout,
        };
        (sink, head_rx, body_rx)
    }
}

#[async_trait]
impl ResponseSink for ChannelSink {
    fn insert_header(&self, name: HeaderName, value: HeaderValue) {
        self.headers.lock().insert(name, value);
    }

    fn append_header(&self, name: HeaderName, value: HeaderValue) {
        self.headers.lock().append(name, value);
    }

    fn header(&self, name: &HeaderName) -> Option<HeaderValue> {
        self.headers.lock().get(name).cloned()
    }

    fn write_head(&self, status: StatusCode) {
        if let Some(tx) = self.head_tx.lock().take() {
            let headers = self.headers.lock().clone();
            if tx.send((status, headers)).is_err() {
                tracing::debug!("response dropped before head was sent");
            }
        }
    }

    async fn write(&self, chunk: Bytes) -> Result<(), SinkError> {
        self.write_head(StatusCode::OK);
        let tx = self.body_tx.lock().clone().ok_or(SinkError::Closed)?;
        match tokio::time::timeout(self.write_timeout, tx.send(chunk)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SinkError::Closed),
            Err(_) => Err(SinkError::Io("response write timed out".into())),
        }
    }

    fn close(&self) {
        self.head_tx.lock().take();
        self.body_tx.lock().take();
    }
}

fn body_stream(rx: mpsc::Receiver<Bytes>, guard: DropGuard) -> ResponseBody {
    let chunks = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let chunk = rx.recv().await?;
        Some((Ok::<_, Infallible>(Frame::data(chunk)), (rx, guard)))
    });
    StreamBody::new(chunks).boxed_unsync()
}

fn internal_error() -> Response<ResponseBody> {
    let mut response = Response::new(
        Full::new(Bytes::from_static(b"Internal Server Error")).boxed_unsync(),
    );
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

// ============== Built-in chain elements ==============

struct NotFound;

#[async_trait]
impl Handler for NotFound {
    async fn handle(&self, ctx: &mut Context) -> ContextResult {
        Err(ContextError::http(
            StatusCode::NOT_FOUND,
            format!("Cannot {} {}", ctx.method(), ctx.path()),
        ))
    }
}

struct MethodNotAllowed {
    allow: String,
}

#[async_trait]
impl Handler for MethodNotAllowed {
    async fn handle(&self, ctx: &mut Context) -> ContextResult {
        ctx.set_header("allow", &self.allow);
        Err(ContextError::http(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("Method {} not allowed for {}", ctx.method(), ctx.path()),
        ))
    }
}

/// Permissive CORS, answering preflight requests directly.
struct Cors;

#[async_trait]
impl Handler for Cors {
    async fn handle(&self, ctx: &mut Context) -> ContextResult {
        let origin = ctx.get_header("origin").unwrap_or("*").to_string();
        ctx.set_header("access-control-allow-origin", &origin);
        if origin != "*" {
            ctx.set_header("vary", "Origin");
        }

        let preflight = ctx.method() == Method::OPTIONS
            && ctx.get_header("access-control-request-method").is_some();
        if preflight {
            let requested = ctx
                .get_header("access-control-request-headers")
                .unwrap_or("*")
                .to_string();
            ctx.set_header(
                "access-control-allow-methods",
                "GET, POST, PUT, PATCH, DELETE, HEAD, OPTIONS",
            )
            .set_header("access-control-allow-headers", &requested)
            .set_header("access-control-max-age", "86400");
            return ctx.no_content(StatusCode::NO_CONTENT).await;
        }
        ctx.next().await
    }
}

// ============== Routing ==============

struct RouteSet {
    methods: HashMap<Method, Chain>,
    not_allowed: Chain,
}

struct Dispatcher {
    router: matchit::Router<RouteSet>,
    fallback: Chain,
    pool: ContextPool,
    request_timeout: Option<Duration>,
    write_timeout: Duration,
}

impl Dispatcher {
    fn resolve(&self, method: &Method, path: &str) -> (&Chain, Vec<(String, String)>) {
        let Ok(matched) = self.router.at(path) else {
            return (&self.fallback, Vec::new());
        };
        let params = matched
            .params
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        let routes = matched.value;
        let chain = routes
            .methods
            .get(method)
            .or_else(|| {
                if *method == Method::HEAD {
                    routes.methods.get(&Method::GET)
                } else {
                    None
                }
            })
            .unwrap_or(&routes.not_allowed);
        (chain, params)
    }

    /// Runs the chain and finalizes the response.
    async fn finish(self: Arc<Self>, mut ctx: Box<Context>, sink: Arc<ChannelSink>) {
        let started = std::time::Instant::now();

        if let Err(err) = ctx.next().await {
            if let Err(err) = JsonErrorFilter.catch(err, &mut ctx).await {
                tracing::warn!(
                    error = %err,
                    code = err.error_code(),
                    "request failed after the response was committed"
                );
            }
        }
        if !ctx.is_header_committed() {
            let status = ctx.status_code();
            if let Err(err) = ctx.no_content(status).await {
                tracing::debug!(error = %err, "failed to commit empty response");
            }
        }

        tracing::info!(
            status = ctx.status_code().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request completed"
        );
        sink.close();
        self.pool.release(ctx);
    }
}

async fn dispatch(
    dispatcher: Arc<Dispatcher>,
    req: Request<Incoming>,
    peer: SocketAddr,
) -> Response<ResponseBody> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!(
        "HTTPRequest",
        aegis.http.method = %method,
        aegis.http.path = %path,
        aegis.http.request_id = %request_id
    );

    async move {
        let token = CancellationToken::new();
        let mut signal = RequestSignal::from_token(token.clone());
        if let Some(timeout) = dispatcher.request_timeout {
            signal = signal.with_deadline(tokio::time::Instant::now() + timeout);
        }
        let inbound = Inbound::from_request(req)
            .with_remote_addr(peer)
            .with_signal(signal);

        let (sink, head_rx, body_rx) = ChannelSink::new(dispatcher.write_timeout);
        let sink = Arc::new(sink);
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            sink.insert_header(HeaderName::from_static("x-request-id"), value);
        }

        let mut ctx = dispatcher.pool.acquire(inbound, sink.clone());
        let (chain, params) = dispatcher.resolve(&method, &path);
        ctx.set_params(params);
        ctx.set_handlers(chain);
        ctx.set_value(REQUEST_ID_KEY, request_id);

        let guard = token.drop_guard();
        tokio::spawn(dispatcher.clone().finish(ctx, sink).in_current_span());

        match head_rx.await {
            Ok((status, headers)) => {
                let mut response = Response::new(body_stream(body_rx, guard));
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                response
            }
            Err(_) => {
                tracing::error!("handler chain aborted before writing a response");
                internal_error()
            }
        }
    }
    .instrument(span)
    .await
}

// ============== Builder ==============

/// HTTP ingress builder.
///
/// ```rust,ignore
/// HttpIngress::new()
///     .config(config)
///     .with_middleware(logger)
///     .get("/users/{id}", get_user)
///     .post("/users", create_user)
///     .run()
///     .await?;
/// ```
pub struct HttpIngress {
    addr: Option<String>,
    config: ServerConfig,
    middleware: Chain,
    routes: Vec<(Method, String, Chain)>,
    fallback: Option<Chain>,
}

impl HttpIngress {
    pub fn new() -> Self {
        Self {
            addr: None,
            config: ServerConfig::default(),
            middleware: Chain::new(),
            routes: Vec::new(),
            fallback: None,
        }
    }

    /// Override the bind address from the config. `":3000"` binds all interfaces.
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.addr = Some(addr.into());
        self
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Middleware prepended to every route and to the fallback.
    pub fn with_middleware(mut self, handler: SharedHandler) -> Self {
        self.middleware = self.middleware.then_shared(handler);
        self
    }

    /// Register a chain for `method` and a `matchit` path pattern such as
    /// `/users/{id}` or `/static/{*file}`.
    pub fn route(mut self, method: Method, path: impl Into<String>, chain: impl Into<Chain>) -> Self {
        self.routes.push((method, path.into(), chain.into()));
        self
    }

    pub fn get(self, path: impl Into<String>, chain: impl Into<Chain>) -> Self {
        self.route(Method::GET, path, chain)
    }

    pub fn post(self, path: impl Into<String>, chain: impl Into<Chain>) -> Self {
        self.route(Method::POST, path, chain)
    }

    pub fn put(self, path: impl Into<String>, chain: impl Into<Chain>) -> Self {
        self.route(Method::PUT, path, chain)
    }

    pub fn patch(self, path: impl Into<String>, chain: impl Into<Chain>) -> Self {
        self.route(Method::PATCH, path, chain)
    }

    pub fn delete(self, path: impl Into<String>, chain: impl Into<Chain>) -> Self {
        self.route(Method::DELETE, path, chain)
    }

    /// Chain for unmatched paths. Defaults to a JSON 404.
    pub fn fallback(mut self, chain: impl Into<Chain>) -> Self {
        self.fallback = Some(chain.into());
        self
    }

    fn build(self) -> Result<Dispatcher, BoxError> {
        self.config.validate()?;

        let mut prefix = Chain::new();
        if self.config.enable_cors {
            prefix = prefix.then(Cors);
        }
        let prefix = prefix.extend(&self.middleware);

        let mut order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, HashMap<Method, Chain>> = HashMap::new();
        for (method, path, chain) in self.routes {
            if !grouped.contains_key(&path) {
                order.push(path.clone());
            }
            let methods = grouped.entry(path.clone()).or_default();
            if methods.contains_key(&method) {
                return Err(format!("duplicate route: {method} {path}").into());
            }
            methods.insert(method, prefix.clone().extend(&chain));
        }

        let mut router = matchit::Router::new();
        for path in order {
            let methods = grouped.remove(&path).unwrap_or_default();
            let mut allow: Vec<&str> = methods.keys().map(Method::as_str).collect();
            allow.sort_unstable();
            let not_allowed = prefix.clone().then(MethodNotAllowed {
                allow: allow.join(", "),
            });
            router.insert(path, RouteSet { methods, not_allowed })?;
        }

        let fallback = prefix.extend(&self.fallback.unwrap_or_else(|| Chain::new().then(NotFound)));

        Ok(Dispatcher {
            router,
            fallback,
            pool: ContextPool::new(self.config.pool_capacity, ContextSettings::from(&self.config)),
            request_timeout: self.config.request_timeout_secs.map(Duration::from_secs),
            write_timeout: Duration::from_secs(self.config.write_timeout_secs),
        })
    }

    fn bind_addr(&self) -> String {
        match &self.addr {
            Some(addr) if addr.starts_with(':') => format!("0.0.0.0{addr}"),
            Some(addr) => addr.clone(),
            None => self.config.bind_addr(),
        }
    }

    /// Bind and serve until the process exits.
    pub async fn run(self) -> Result<(), BoxError> {
        self.run_until(std::future::pending()).await
    }

    /// Bind and serve until `shutdown` resolves, then drain open connections.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), BoxError>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind(self.bind_addr()).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), BoxError>
    where
        F: Future<Output = ()> + Send,
    {
        let read_timeout = Duration::from_secs(self.config.read_timeout_secs);
        let drain_timeout = Duration::from_secs(self.config.write_timeout_secs);
        let max_buf_size = self.config.max_header_bytes.max(8192);
        let dispatcher = Arc::new(self.build()?);

        let mut builder = http1::Builder::new();
        builder
            .timer(TokioTimer::new())
            .header_read_timeout(read_timeout)
            .max_buf_size(max_buf_size);

        let graceful = GracefulShutdown::new();
        let mut shutdown = std::pin::pin!(shutdown);
        tracing::info!("Aegis HTTP ingress listening on http://{}", listener.local_addr()?);

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to accept connection");
                        continue;
                    }
                },
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested; draining connections");
                    break;
                }
            };

            let io = TokioIo::new(stream);
            let dispatcher = dispatcher.clone();
            let service = service_fn(move |req: Request<Incoming>| {
                let dispatcher = dispatcher.clone();
                async move { Ok::<_, Infallible>(dispatch(dispatcher, req, peer).await) }
            });

            let conn = graceful.watch(builder.serve_connection(io, service));
            tokio::spawn(async move {
                if let Err(err) = conn.await {
                    tracing::debug!("Error serving connection: {:?}", err);
                }
            });
        }

        tokio::select! {
            _ = graceful.shutdown() => tracing::info!("all connections closed"),
            _ = tokio::time::sleep(drain_timeout) => {
                tracing::warn!("timed out waiting for connections to close");
            }
        }
        Ok(())
    }
}

impl Default for HttpIngress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;

    fn ok(name: &'static str) -> SharedHandler {
        handler_fn(name, |ctx| {
            Box::pin(async move { ctx.text(StatusCode::OK, "ok").await })
        })
    }

    #[test]
    fn resolves_routes_params_and_methods() {
        let dispatcher = HttpIngress::new()
            .with_middleware(ok("mw"))
            .get("/users/{id}", ok("get_user"))
            .delete("/users/{id}", ok("delete_user"))
            .build()
            .unwrap();

        let (chain, params) = dispatcher.resolve(&Method::GET, "/users/42");
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.handlers()[1].name(), "get_user");
        assert_eq!(params, vec![("id".to_string(), "42".to_string())]);

        let (chain, _) = dispatcher.resolve(&Method::HEAD, "/users/42");
        assert_eq!(chain.handlers()[1].name(), "get_user");

        let (chain, _) = dispatcher.resolve(&Method::POST, "/users/42");
        assert_eq!(chain.handlers()[1].name(), "MethodNotAllowed");

        let (chain, params) = dispatcher.resolve(&Method::GET, "/nowhere");
        assert_eq!(chain.handlers()[1].name(), "NotFound");
        assert!(params.is_empty());
    }

    #[test]
    fn duplicate_routes_are_rejected() {
        let result = HttpIngress::new()
            .get("/a", ok("one"))
            .get("/a", ok("two"))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn cors_is_prepended_when_enabled() {
        let config = ServerConfig {
            enable_cors: true,
            ..ServerConfig::default()
        };
        let dispatcher = HttpIngress::new()
            .config(config)
            .get("/", ok("index"))
            .build()
            .unwrap();
        let (chain, _) = dispatcher.resolve(&Method::GET, "/");
        assert_eq!(chain.handlers()[0].name(), "Cors");
    }

    #[test]
    fn colon_port_binds_all_interfaces() {
        assert_eq!(HttpIngress::new().bind(":8080").bind_addr(), "0.0.0.0:8080");
        assert_eq!(HttpIngress::new().bind_addr(), "0.0.0.0:3000");
    }

    #[tokio::test]
    async fn channel_sink_sends_head_once() {
        let (sink, head_rx, mut body_rx) = ChannelSink::new(Duration::from_secs(1));
        sink.insert_header(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain"),
        );
        sink.write_head(StatusCode::CREATED);
        sink.write_head(StatusCode::OK);
        sink.write(Bytes::from("hello")).await.unwrap();
        sink.close();

        let (status, headers) = head_rx.await.unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(headers["content-type"], "text/plain");
        assert_eq!(body_rx.recv().await, Some(Bytes::from("hello")));
        assert_eq!(body_rx.recv().await, None);
        assert!(matches!(
            sink.write(Bytes::from("late")).await,
            Err(SinkError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn channel_sink_times_out_slow_readers() {
        let (sink, _head_rx, _body_rx) = ChannelSink::new(Duration::from_millis(100));
        for _ in 0..BODY_CHANNEL_CAPACITY {
            sink.write(Bytes::from_static(b"x")).await.unwrap();
        }
        let err = sink.write(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, SinkError::Io(_)));
    }
}
