//! Middleware layer.
//!
//! Middleware intercepts requests and responses and is the right place for
//! cross-cutting concerns: metrics, request-id injection, header inspection.
//! It wraps every request the router sees, matched or not, so a `404` passes
//! through the same stack as a routed request.
//!
//! A middleware gets the request and a [`Next`], the rest of the chain. It
//! runs `next` to get the response and may look at or decorate that response
//! on the way out:
//!
//! ```rust,no_run
//! use xstats::middleware::Next;
//! use xstats::{Request, Response, Router};
//!
//! async fn log_finish(req: Request, next: Next) -> Response {
//!     let mut res = next.run(req).await;
//!     res.on_finish(|head| tracing::debug!(status = %head.status, "sent"));
//!     res
//! }
//!
//! let app = Router::new().layer(log_finish);
//! ```
//!
//! Built-in middleware:
//! - [`metrics::Interceptor`] — one metrics record per finished response

pub mod metrics;

use std::future::Future;
use std::sync::Arc;

use http::StatusCode;

use crate::handler::{BoxFuture, BoxedHandler};
use crate::request::Request;
use crate::response::Response;

/// A request/response interceptor.
///
/// Implemented for every `Fn(Request, Next) -> impl Future<Output = Response>`,
/// so plain `async fn`s work. Implement it by hand for middleware that carries
/// configuration.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, req: Request, next: Next) -> BoxFuture;
}

impl<F, Fut> Middleware for F
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        Box::pin((self)(req, next))
    }
}

pub(crate) type Stack = Arc<[Arc<dyn Middleware>]>;

/// The remainder of the middleware chain, ending in the route handler.
pub struct Next {
    stack: Stack,
    index: usize,
    endpoint: Option<BoxedHandler>,
}

impl Next {
    /// `endpoint` is `None` when no route matched; the chain then ends in
    /// `404 Not Found`.
    pub(crate) fn new(stack: Stack, endpoint: Option<BoxedHandler>) -> Self {
        Self { stack, index: 0, endpoint }
    }

    /// Passes `req` to the next middleware, or to the handler if none is left.
    pub fn run(self, req: Request) -> BoxFuture {
        if let Some(middleware) = self.stack.get(self.index).cloned() {
            let next = Next { index: self.index + 1, ..self };
            return middleware.handle(req, next);
        }

        match self.endpoint {
            Some(handler) => handler.call(req),
            None => Box::pin(async { Response::status(StatusCode::NOT_FOUND) }),
        }
    }
}
