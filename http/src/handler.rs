//! Handler chain elements.
//!
//! Middleware and route handlers share one shape: a [`Handler`] receives the
//! context and either returns (short-circuit) or calls
//! [`Context::next`](crate::Context::next) to continue the chain.

use crate::context::Context;
use crate::error::ContextResult;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Type alias for boxed futures returned by closure handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Shared, type-erased chain element.
pub type SharedHandler = Arc<dyn Handler>;

/// A step in the handler chain.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, ctx: &mut Context) -> ContextResult;

    /// Label used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
            .rsplit("::")
            .next()
            .unwrap_or("handler")
    }
}

/// Closure adapter produced by [`handler_fn`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, ContextResult> + Send + Sync + 'static,
{
    async fn handle(&self, ctx: &mut Context) -> ContextResult {
        (self.f)(ctx).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Turn a closure into a chain element.
///
/// ```rust,ignore
/// let logger = handler_fn("logger", |ctx| Box::pin(async move {
///     tracing::info!(path = %ctx.path(), "before");
///     let result = ctx.next().await;
///     tracing::info!(status = %ctx.status_code(), "after");
///     result
/// }));
/// ```
pub fn handler_fn<F>(name: impl Into<String>, f: F) -> SharedHandler
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, ContextResult> + Send + Sync + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}

/// Ordered list of chain elements for one route.
#[derive(Clone, Default)]
pub struct Chain {
    handlers: Vec<SharedHandler>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append any handler.
    pub fn then<H: Handler>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Append an already shared handler.
    pub fn then_shared(mut self, handler: SharedHandler) -> Self {
        self.handlers.push(handler);
        self
    }

    /// This chain followed by `other`.
    pub fn extend(mut self, other: &Chain) -> Self {
        self.handlers.extend(other.handlers.iter().cloned());
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn handlers(&self) -> &[SharedHandler] {
        &self.handlers
    }
}

impl From<SharedHandler> for Chain {
    fn from(handler: SharedHandler) -> Self {
        Self {
            handlers: vec![handler],
        }
    }
}

impl From<Vec<SharedHandler>> for Chain {
    fn from(handlers: Vec<SharedHandler>) -> Self {
        Self { handlers }
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|h| h.name()))
            .finish()
    }
}
