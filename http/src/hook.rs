//! Capability hooks: guards, pipes, exception filters and interceptors.
//!
//! Each hook is a small trait with one operation. The adapter functions
//! ([`guard`], [`pipe`], [`filter`], [`intercept`]) turn a hook into an
//! ordinary chain element, so hooks compose with any other [`Handler`].

use crate::context::Context;
use crate::error::{ContextError, ContextResult};
use crate::handler::{Handler, SharedHandler};
use async_trait::async_trait;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Decides whether a request may proceed.
#[async_trait]
pub trait Guard: Send + Sync + 'static {
    async fn can_activate(&self, ctx: &Context) -> ContextResult<bool>;
}

/// Where a pipe is being applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeMetadata {
    /// Parameter source, e.g. `"param"`.
    pub kind: &'static str,
    /// Parameter name.
    pub name: String,
}

/// Validates or rewrites a single input value.
pub trait Pipe: Send + Sync + 'static {
    fn transform(&self, value: String, metadata: &PipeMetadata) -> ContextResult<String>;
}

/// Turns a failure from downstream into a response.
#[async_trait]
pub trait Filter: Send + Sync + 'static {
    async fn catch(&self, err: ContextError, ctx: &mut Context) -> ContextResult;
}

/// Observes, and may replace, the outcome of the downstream chain.
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    async fn intercept(&self, ctx: &mut Context, outcome: ContextResult) -> ContextResult;
}

fn short_name<T: ?Sized>() -> &'static str {
    std::any::type_name::<T>()
        .rsplit("::")
        .next()
        .unwrap_or("hook")
}

// ============== Adapters ==============

struct GuardHandler<G>(G);

#[async_trait]
impl<G: Guard> Handler for GuardHandler<G> {
    async fn handle(&self, ctx: &mut Context) -> ContextResult {
        if self.0.can_activate(ctx).await? {
            return ctx.next().await;
        }
        tracing::debug!(guard = short_name::<G>(), path = %ctx.path(), "request denied by guard");
        Err(ContextError::http(StatusCode::FORBIDDEN, "Forbidden resource"))
    }

    fn name(&self) -> &str {
        short_name::<G>()
    }
}

/// Chain element that answers 403 unless `guard` allows the request.
pub fn guard<G: Guard>(guard: G) -> SharedHandler {
    Arc::new(GuardHandler(guard))
}

struct PipeHandler<P>(P);

#[async_trait]
impl<P: Pipe> Handler for PipeHandler<P> {
    async fn handle(&self, ctx: &mut Context) -> ContextResult {
        for (name, value) in ctx.params() {
            let metadata = PipeMetadata { kind: "param", name };
            let value = self.0.transform(value, &metadata)?;
            ctx.set_param(metadata.name, value);
        }
        ctx.next().await
    }

    fn name(&self) -> &str {
        short_name::<P>()
    }
}

/// Chain element that runs `pipe` over every path parameter.
pub fn pipe<P: Pipe>(pipe: P) -> SharedHandler {
    Arc::new(PipeHandler(pipe))
}

struct FilterHandler<F>(F);

#[async_trait]
impl<F: Filter> Handler for FilterHandler<F> {
    async fn handle(&self, ctx: &mut Context) -> ContextResult {
        match ctx.next().await {
            Ok(()) => Ok(()),
            Err(err) => self.0.catch(err, ctx).await,
        }
    }

    fn name(&self) -> &str {
        short_name::<F>()
    }
}

/// Chain element that hands downstream failures to `filter`.
pub fn filter<F: Filter>(filter: F) -> SharedHandler {
    Arc::new(FilterHandler(filter))
}

struct InterceptHandler<I>(I);

#[async_trait]
impl<I: Interceptor> Handler for InterceptHandler<I> {
    async fn handle(&self, ctx: &mut Context) -> ContextResult {
        let outcome = ctx.next().await;
        self.0.intercept(ctx, outcome).await
    }

    fn name(&self) -> &str {
        short_name::<I>()
    }
}

/// Chain element that runs `interceptor` after the downstream chain.
pub fn intercept<I: Interceptor>(interceptor: I) -> SharedHandler {
    Arc::new(InterceptHandler(interceptor))
}

// ============== Default error filter ==============

/// JSON body written for failed requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub status_code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn from_error(err: &ContextError, path: &str) -> Self {
        Self {
            status_code: err.status_code().as_u16(),
            message: err.to_string(),
            error: err.error_code().to_string(),
            path: path.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }
    }
}

/// Writes any downstream failure as an [`ErrorResponse`].
///
/// Server-side failures are reported with a generic message so internal
/// details stay in the logs. When the response is already committed the
/// error is passed through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonErrorFilter;

#[async_trait]
impl Filter for JsonErrorFilter {
    async fn catch(&self, err: ContextError, ctx: &mut Context) -> ContextResult {
        let status = err.status_code();
        if status.is_server_error() {
            tracing::error!(error = %err, code = err.error_code(), "request failed");
        } else {
            tracing::debug!(error = %err, code = err.error_code(), "request rejected");
        }

        if ctx.is_header_committed() {
            return Err(err);
        }

        let mut body = ErrorResponse::from_error(&err, ctx.path());
        if status.is_server_error() {
            body.message = status
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_string();
        }
        ctx.json(status, &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Chain, handler_fn};
    use crate::transport::{Inbound, Recorder};
    use parking_lot::Mutex;

    fn run_context(uri: &str, chain: &Chain) -> (Context, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::new());
        let mut ctx = Context::new(Inbound::builder().uri(uri).build().unwrap(), recorder.clone());
        ctx.set_handlers(chain);
        (ctx, recorder)
    }

    fn ok_handler() -> SharedHandler {
        handler_fn("ok", |ctx| {
            Box::pin(async move { ctx.text(StatusCode::OK, "ok").await })
        })
    }

    struct HeaderGuard;

    #[async_trait]
    impl Guard for HeaderGuard {
        async fn can_activate(&self, ctx: &Context) -> ContextResult<bool> {
            Ok(ctx.get_header("authorization").is_some())
        }
    }

    #[tokio::test]
    async fn guard_denies_with_forbidden() {
        let chain = Chain::new()
            .then_shared(guard(HeaderGuard))
            .then_shared(ok_handler());
        let (mut ctx, recorder) = run_context("/admin", &chain);

        let err = ctx.next().await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(recorder.head_calls(), 0);
    }

    #[tokio::test]
    async fn guard_allows_and_continues() {
        let chain = Chain::new()
            .then_shared(guard(HeaderGuard))
            .then_shared(ok_handler());
        let recorder = Arc::new(Recorder::new());
        let inbound = Inbound::builder()
            .uri("/admin")
            .header("authorization", "Bearer t")
            .build()
            .unwrap();
        let mut ctx = Context::new(inbound, recorder.clone());
        ctx.set_handlers(&chain);

        ctx.next().await.unwrap();
        assert_eq!(recorder.body_string(), "ok");
    }

    struct PositiveInt;

    impl Pipe for PositiveInt {
        fn transform(&self, value: String, metadata: &PipeMetadata) -> ContextResult<String> {
            match value.parse::<u64>() {
                Ok(n) if n > 0 => Ok(n.to_string()),
                _ => Err(ContextError::InvalidArgument(format!(
                    "{} {:?} must be a positive integer",
                    metadata.name, value
                ))),
            }
        }
    }

    #[tokio::test]
    async fn pipe_normalizes_params() {
        let chain = Chain::new().then_shared(pipe(PositiveInt)).then_shared(handler_fn(
            "echo",
            |ctx| {
                Box::pin(async move {
                    let id = ctx.param("id");
                    ctx.text(StatusCode::OK, id).await
                })
            },
        ));

        let (mut ctx, recorder) = run_context("/users/007", &chain);
        ctx.set_param("id", "007");
        ctx.next().await.unwrap();
        assert_eq!(recorder.body_string(), "7");

        let (mut ctx, _) = run_context("/users/abc", &chain);
        ctx.set_param("id", "abc");
        let err = ctx.next().await.unwrap_err();
        assert!(matches!(err, ContextError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn json_error_filter_writes_error_response() {
        let chain = Chain::new().then(FilterHandler(JsonErrorFilter)).then_shared(handler_fn(
            "missing",
            |ctx| {
                Box::pin(async move {
                    let _ = ctx.cookie("session")?;
                    Ok(())
                })
            },
        ));
        let (mut ctx, recorder) = run_context("/profile", &chain);

        ctx.next().await.unwrap();
        assert_eq!(recorder.status(), Some(StatusCode::NOT_FOUND));
        let body: ErrorResponse = serde_json::from_slice(&recorder.body()).unwrap();
        assert_eq!(body.status_code, 404);
        assert_eq!(body.error, "not_found");
        assert_eq!(body.path, "/profile");
        assert!(body.message.contains("session"));
        assert!(!body.timestamp.is_empty());
    }

    #[tokio::test]
    async fn json_error_filter_hides_server_details() {
        let chain = Chain::new().then_shared(filter(JsonErrorFilter)).then_shared(handler_fn(
            "boom",
            |_ctx| Box::pin(async move { Err(ContextError::handler("db password leaked")) }),
        ));
        let (mut ctx, recorder) = run_context("/", &chain);

        ctx.next().await.unwrap();
        let body: ErrorResponse = serde_json::from_slice(&recorder.body()).unwrap();
        assert_eq!(body.status_code, 500);
        assert_eq!(body.message, "Internal Server Error");
    }

    #[tokio::test]
    async fn json_error_filter_passes_through_after_commit() {
        let chain = Chain::new().then_shared(filter(JsonErrorFilter)).then_shared(handler_fn(
            "late",
            |ctx| {
                Box::pin(async move {
                    ctx.text(StatusCode::OK, "partial").await?;
                    Err(ContextError::handler("after commit"))
                })
            },
        ));
        let (mut ctx, recorder) = run_context("/", &chain);

        assert!(matches!(ctx.next().await, Err(ContextError::Handler(_))));
        assert_eq!(recorder.head_calls(), 1);
        assert_eq!(recorder.body_string(), "partial");
    }

    struct Recording {
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Interceptor for Recording {
        async fn intercept(&self, ctx: &mut Context, outcome: ContextResult) -> ContextResult {
            self.seen
                .lock()
                .push(format!("{} {}", ctx.status_code().as_u16(), outcome.is_ok()));
            outcome.or_else(|err| match err {
                ContextError::NotFound(_) => Ok(()),
                other => Err(other),
            })
        }
    }

    #[tokio::test]
    async fn interceptor_sees_and_rewrites_outcome() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::new()
            .then(InterceptHandler(Recording { seen: seen.clone() }))
            .then_shared(handler_fn("lookup", |ctx| {
                Box::pin(async move {
                    ctx.status(StatusCode::ACCEPTED);
                    Err(ContextError::NotFound("user".into()))
                })
            }));
        let (mut ctx, _) = run_context("/", &chain);

        ctx.next().await.unwrap();
        assert_eq!(*seen.lock(), vec!["202 false".to_string()]);
    }
}
