//! # Aegis HTTP
//!
//! Per-request [`Context`], the [`Handler`] chain that drives it, capability
//! hooks, a context pool and the Hyper 1.0 [`HttpIngress`].

pub mod body;
pub mod context;
pub mod cookie;
pub mod error;
pub mod handler;
pub mod hook;
pub mod ingress;
pub mod multipart;
pub mod pool;
pub mod transport;

pub use body::{BodyFormat, Form, Json};
pub use context::{BodyWriter, Context, ContextSettings, Derivation, StreamError};
pub use cookie::{Cookie, SameSite};
pub use error::{BoxError, ContextError, ContextResult, SinkError};
pub use handler::{BoxFuture, Chain, Handler, SharedHandler, handler_fn};
pub use hook::{
    ErrorResponse, Filter, Guard, Interceptor, JsonErrorFilter, Pipe, PipeMetadata, filter, guard,
    intercept, pipe,
};
pub use ingress::{ChannelSink, HttpIngress, REQUEST_ID_KEY, ResponseBody};
pub use multipart::{FormFile, MultipartForm};
pub use pool::{ContextPool, PoolStats};
pub use transport::{Inbound, InboundBuilder, Recorder, RequestSignal, ResponseSink};
