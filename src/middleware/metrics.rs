//! Metrics interceptor: one [`Record`](crate::Record) per finished response.
//!
//! ```rust,no_run
//! use http::Method;
//! use serde_json::json;
//! use xstats::middleware::metrics::Interceptor;
//! use xstats::{Registry, Request, Response, Router, Server};
//!
//! # async fn get_car(_: Request) -> Response { Response::text("") }
//! #[tokio::main]
//! async fn main() {
//!     let registry = Registry::new();
//!     registry.on_record(|record| {
//!         println!("{}", serde_json::to_string(record)?);
//!         Ok(())
//!     });
//!
//!     let metrics = Interceptor::builder(registry)
//!         .record_builder(|req, _res| Ok(json!({ "data": { "agent": req.headers().contains_key("user-agent") } })))
//!         .build();
//!
//!     let app = Router::new()
//!         .layer(metrics)
//!         .on(Method::GET, "/cars/{id}", get_car);
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//! ```
//!
//! # Failure isolation
//!
//! Building the record and notifying observers run inside one recover
//! boundary on the connection task. A record builder or observer that returns
//! an error or panics is logged at `WARN` and dropped; the response the
//! client sees is never affected. The first failing observer ends the
//! notification pass for that record.

use std::any::Any;
use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::warn;

use crate::error::{BoxError, Error};
use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::observer::Registry;
use crate::record::{self, Origin, RecordBuilder, RequestInfo, ResponseInfo};
use crate::request::Request;
use crate::response::ResponseHead;

/// Middleware that builds a metrics record when each response finishes and
/// hands it to a [`Registry`].
///
/// Cloning is cheap; clones share configuration.
#[derive(Clone)]
pub struct Interceptor {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,
    builder: Option<Box<RecordBuilder>>,
    origin: Origin,
    trust_forwarded: bool,
}

impl Interceptor {
    /// Interceptor feeding `registry`, without a record builder.
    pub fn new(registry: Registry) -> Self {
        Self::builder(registry).build()
    }

    pub fn builder(registry: Registry) -> InterceptorBuilder {
        InterceptorBuilder {
            registry,
            builder: None,
            origin: Origin::new(),
            trust_forwarded: false,
        }
    }
}

/// Feeds the process-wide [`Registry::global`].
impl Default for Interceptor {
    fn default() -> Self {
        Self::new(Registry::global().clone())
    }
}

impl Middleware for Interceptor {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        let started = req.received_at();
        let request = RequestInfo::capture(&req, self.inner.trust_forwarded);
        let inner = Arc::clone(&self.inner);

        let response = next.run(req);

        Box::pin(async move {
            let mut res = response.await;
            res.on_finish(move |head| inner.finish(&request, started, head));
            res
        })
    }
}

impl Inner {
    fn finish(&self, request: &RequestInfo, started: Instant, head: &ResponseHead) {
        let duration = started.elapsed();

        // Nobody is listening: skip building the record.
        if self.registry.is_empty() {
            return;
        }

        let response = ResponseInfo {
            status: head.status,
            headers: head.headers.clone(),
            duration,
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.report(request, &response)));
        let result = outcome.unwrap_or_else(|payload| Err(Error::Panicked(panic_message(&*payload))));

        if let Err(err) = result {
            warn!(
                method = %request.method(),
                url = request.url(),
                error = %err,
                detail = ?err,
                "xstats ignored error"
            );
        }
    }

    fn report(&self, request: &RequestInfo, response: &ResponseInfo) -> Result<(), Error> {
        let record = record::build_record(&self.origin, self.builder.as_deref(), request, response)?;
        self.registry.notify(&record)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

// ── InterceptorBuilder ────────────────────────────────────────────────────────

/// Configures an [`Interceptor`]. Obtain via [`Interceptor::builder`].
pub struct InterceptorBuilder {
    registry: Registry,
    builder: Option<Box<RecordBuilder>>,
    origin: Origin,
    trust_forwarded: bool,
}

impl InterceptorBuilder {
    /// Sets the function whose output is merged into every [`Record`](crate::Record).
    ///
    /// It runs only when at least one observer is registered.
    pub fn record_builder<F>(mut self, builder: F) -> Self
    where
        F: Fn(&RequestInfo, &ResponseInfo) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        self.builder = Some(Box::new(builder));
        self
    }

    /// Overrides the `version` field. Defaults to [`VERSION`](crate::VERSION).
    pub fn version(mut self, version: impl Into<Cow<'static, str>>) -> Self {
        self.origin.version = version.into();
        self
    }

    /// Sets `process.workerId` for multi-process deployments.
    pub fn worker_id(mut self, worker_id: u32) -> Self {
        self.origin.worker_id = Some(worker_id);
        self
    }

    /// Take `client.address` from the first `X-Forwarded-For` hop when the
    /// header is present. Only enable behind a proxy that sets it.
    pub fn trust_forwarded(mut self, trust: bool) -> Self {
        self.trust_forwarded = trust;
        self
    }

    pub fn build(self) -> Interceptor {
        Interceptor {
            inner: Arc::new(Inner {
                registry: self.registry,
                builder: self.builder,
                origin: self.origin,
                trust_forwarded: self.trust_forwarded,
            }),
        }
    }
}
