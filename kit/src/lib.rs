//! Aegis facade crate.
//!
//! Re-exports the core and http crates behind a single entry point.
//! `Aegis::http()` returns the ingress builder.

pub use aegis_core as core;
pub use aegis_http as http;

pub use aegis_core::{ServerConfig, init_tracing};
pub use aegis_http::{Chain, Context, ContextError, ContextResult, Handler, HttpIngress, handler_fn};

use aegis_http::BoxError;

/// Framework entry point.
pub struct Aegis;

impl Aegis {
    /// Create an HTTP ingress builder.
    pub fn http() -> HttpIngress {
        HttpIngress::new()
    }
}

/// Initialize tracing from `config.log`, then serve `ingress` with
/// `config` until Ctrl-C.
pub async fn serve(config: ServerConfig, ingress: HttpIngress) -> Result<(), BoxError> {
    init_tracing(&config.log);
    tracing::info!(environment = %config.environment, "starting Aegis");
    ingress
        .config(config)
        .run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
}

pub mod prelude {
    pub use crate::Aegis;
    pub use aegis_core::{ProxyTrust, ServerConfig};
    pub use aegis_http::{
        BodyFormat, BodyWriter, Chain, Context, ContextError, ContextResult, Cookie, ErrorResponse,
        Filter, Form, FormFile, Guard, Handler, HttpIngress, Interceptor, Json, JsonErrorFilter,
        MultipartForm, Pipe, PipeMetadata, SameSite, SharedHandler, StreamError, filter, guard,
        handler_fn, intercept, pipe,
    };
}
