//! Radix-tree request router with a middleware stack.
//!
//! One tree per HTTP method, O(path-length) lookup. Every request, routed or
//! not, runs through the middleware stack before reaching its handler (or the
//! built-in `404`).

use std::collections::HashMap;
use std::sync::Arc;

use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;

use crate::handler::{BoxedHandler, Handler};
use crate::middleware::{Middleware, Next, Stack};
use crate::request::Request;
use crate::response::Response;

/// The application router.
///
/// Build it once at startup and pass it to [`Server::serve`](crate::Server::serve).
/// Registrations return `self`, so they chain.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
    middleware: Stack,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new(), middleware: Vec::new().into() }
    }

    /// Register a handler for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax; `req.param("name")` retrieves them:
    ///
    /// ```rust,no_run
    /// # use http::Method;
    /// # use xstats::{Request, Response, Router};
    /// # async fn find_car(_: Request) -> Response { Response::text("") }
    /// # async fn update_car(_: Request) -> Response { Response::text("") }
    /// Router::new()
    ///     .on(Method::GET, "/cars/{id}", find_car)
    ///     .on(Method::PUT, "/cars/{id}", update_car);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with one already
    /// registered for `method`.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_handler())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    /// Appends a middleware. The first one added is the outermost: it sees the
    /// request first and the response last.
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        let mut stack = self.middleware.to_vec();
        stack.push(Arc::new(middleware));
        self.middleware = stack.into();
        self
    }

    /// Routes one request through the middleware stack to its handler.
    pub(crate) async fn handle(&self, mut req: Request) -> Response {
        let endpoint = match self.lookup(req.method(), req.path()) {
            Some((handler, params)) => {
                req.params = params;
                Some(handler)
            }
            None => None,
        };

        Next::new(Arc::clone(&self.middleware), endpoint).run(req).await
    }

    /// Answers `req` with `status` without routing it. The middleware stack
    /// still sees the request, so the rejection is recorded like any other.
    pub(crate) async fn reject(&self, req: Request, status: StatusCode) -> Response {
        let endpoint = (move |_: Request| async move { status }).into_boxed_handler();
        Next::new(Arc::clone(&self.middleware), Some(endpoint)).run(req).await
    }

    fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let handler = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::request::test_support::request;

    async fn echo_id(req: Request) -> String {
        req.param("id").unwrap_or("none").to_owned()
    }

    #[tokio::test]
    async fn routes_by_method_and_path() {
        let router = Router::new().on(Method::GET, "/cars/{id}", echo_id);

        let res = router.handle(request(Method::GET, "/cars/1234")).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.body(), b"1234");

        let res = router.handle(request(Method::DELETE, "/cars/1234")).await;
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn middleware_wraps_matched_and_unmatched_requests_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let outer = Arc::clone(&order);
        let inner = Arc::clone(&order);
        let router = Router::new()
            .layer(move |req: Request, next: Next| {
                let order = Arc::clone(&outer);
                async move {
                    order.lock().unwrap().push("outer");
                    next.run(req).await
                }
            })
            .layer(move |req: Request, next: Next| {
                let order = Arc::clone(&inner);
                async move {
                    order.lock().unwrap().push("inner");
                    next.run(req).await
                }
            })
            .on(Method::GET, "/cars/{id}", echo_id);

        router.handle(request(Method::GET, "/cars/1")).await;
        let res = router.handle(request(Method::GET, "/nowhere")).await;

        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(*order.lock().unwrap(), vec!["outer", "inner", "outer", "inner"]);
    }

    #[tokio::test]
    async fn rejected_requests_pass_through_middleware() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let router = Router::new()
            .layer(move |req: Request, next: Next| {
                let seen = Arc::clone(&sink);
                async move {
                    let res = next.run(req).await;
                    seen.lock().unwrap().push(res.status_code());
                    res
                }
            })
            .on(Method::POST, "/cars", echo_id);

        let res = router.reject(request(Method::POST, "/cars"), StatusCode::BAD_REQUEST).await;

        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(*seen.lock().unwrap(), vec![StatusCode::BAD_REQUEST]);
    }
}
