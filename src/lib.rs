//! # xstats
//!
//! Per-request metrics records for Rust services behind a reverse proxy.
//!
//! ## The contract
//!
//! Every finished HTTP response yields one [`Record`]: a small JSON-shaped
//! value with the request line, status, duration, client address and process
//! identity. Records go to the observers registered on a [`Registry`]. What
//! happens next (log lines, a queue, an aggregator) is the observer's
//! business. xstats does not persist, aggregate or ship anything.
//!
//! Instrumentation is invisible on failure. A record builder or observer that
//! errors or panics costs one record and a `WARN` log line, never the
//! response. With no observers registered, no record is built at all.
//!
//! What's in the box:
//!
//! - [`middleware::metrics::Interceptor`] — the metrics middleware
//! - [`Registry`] — observer list with ordered fan-out
//! - [`DispatchContext`] — optional RPC metadata, recorded as `loopback`
//! - A minimal host: radix-tree [`Router`] via [`matchit`], middleware stack,
//!   hyper [`Server`] with graceful shutdown
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use http::Method;
//! use xstats::middleware::metrics::Interceptor;
//! use xstats::{Registry, Request, Response, Router, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = Registry::new();
//!     registry.on_record(|record| {
//!         let json = serde_json::to_string(record)?;
//!         tracing::info!(%json, "request");
//!         Ok(())
//!     });
//!
//!     let app = Router::new()
//!         .layer(Interceptor::new(registry))
//!         .on(Method::GET, "/users/{id}", get_user);
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//!
//! async fn get_user(req: Request) -> Response {
//!     let id = req.param("id").unwrap_or("unknown");
//!     Response::json(format!(r#"{{"id":"{id}"}}"#).into_bytes())
//! }
//! ```

mod dispatch;
mod error;
mod handler;
mod observer;
mod record;
mod request;
mod response;
mod router;
mod server;

pub mod middleware;

pub use dispatch::{DispatchContext, MethodDescriptor};
pub use error::{BoxError, Error};
pub use handler::{BoxFuture, Handler};
pub use observer::{Observer, Registry};
pub use record::{Record, RecordBuilder, RequestInfo, ResponseInfo};
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder, ResponseHead};
pub use router::Router;
pub use server::Server;

/// Version of this crate, the default `version` field of every record.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Registers `observer` on the process-wide [`Registry::global`].
///
/// Records from interceptors built with [`Interceptor::default`] reach it.
///
/// [`Interceptor::default`]: middleware::metrics::Interceptor
pub fn on_record<F>(observer: F)
where
    F: Fn(&Record) -> Result<(), BoxError> + Send + Sync + 'static,
{
    Registry::global().on_record(observer);
}
