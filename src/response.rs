//! Outgoing HTTP response type, the [`IntoResponse`] conversion trait, and
//! the response-finished hook.
//!
//! # When is a response finished?
//!
//! Handing a [`Response`] back from a handler does not mean the client has it.
//! hyper still has to write the body. The server wraps the body in
//! [`FinishBody`], which runs the response's finish hooks when hyper releases
//! it **after** the last byte was handed over. A connection that dies before
//! that point never fires the hooks.
//!
//! ```text
//! handler → Response ─ into_inner ─▶ http::Response<FinishBody> ─▶ hyper
//!                                                                  │ writes body
//!                                              drop(FinishBody) ◀──┘
//!                                                  │ body fully consumed?
//!                                                  └─▶ run finish hooks
//! ```

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use http_body::{Body, Frame, SizeHint};
use http_body_util::Full;

type FinishHook = Box<dyn FnOnce(&ResponseHead) + Send + 'static>;

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// # Shortcuts (200 OK, no custom headers needed)
///
/// ```rust
/// use http::StatusCode;
/// use xstats::Response;
///
/// Response::json(br#"{"id":1}"#.to_vec());
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
/// ```
///
/// # Builder (custom status or headers)
///
/// ```rust
/// use http::{HeaderValue, StatusCode, header};
/// use xstats::Response;
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header(header::LOCATION, HeaderValue::from_static("/users/42"))
///     .json(br#"{"id":42}"#.to_vec());
/// ```
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    finish: Vec<FinishHook>,
}

impl Response {
    /// `200 OK` — `application/json`.
    pub fn json(body: Vec<u8>) -> Self {
        Self::builder().json(body)
    }

    /// `200 OK` — `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self::builder().status(code).no_body()
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: HeaderMap::new(), status: StatusCode::OK }
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Registers a one-shot hook run once the response has been fully written.
    ///
    /// Hooks run in registration order on the connection task. They must not
    /// block and should not panic.
    pub fn on_finish(&mut self, hook: impl FnOnce(&ResponseHead) + Send + 'static) {
        self.finish.push(Box::new(hook));
    }

    /// Converts into the hyper-facing response.
    ///
    /// A response to `HEAD` keeps its `content-length` but sends no body;
    /// hyper never polls it, and an empty body counts as finished when
    /// released.
    pub(crate) fn into_inner(self, head_request: bool) -> http::Response<FinishBody> {
        let Self { status, mut headers, body, finish } = self;

        let body = if head_request {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
            Bytes::new()
        } else {
            body
        };

        let head = (!finish.is_empty())
            .then(|| ResponseHead { status, headers: headers.clone() });

        let mut response = http::Response::new(FinishBody {
            inner: Full::new(body),
            head,
            hooks: finish,
        });
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`.
/// Terminated by a typed body method.
pub struct ResponseBuilder {
    headers: HeaderMap,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    /// Appends a header; repeated names are kept.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json(self, body: Vec<u8>) -> Response {
        self.finish(HeaderValue::from_static("application/json"), body.into())
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        let body: String = body.into();
        self.finish(HeaderValue::from_static("text/plain; charset=utf-8"), Bytes::from(body))
    }

    /// Terminate with no body (e.g. `204 No Content`, `301 Moved Permanently`).
    pub fn no_body(self) -> Response {
        Response { status: self.status, headers: self.headers, body: Bytes::new(), finish: Vec::new() }
    }

    fn finish(mut self, content_type: HeaderValue, body: Bytes) -> Response {
        self.headers.insert(CONTENT_TYPE, content_type);
        Response { status: self.status, headers: self.headers, body, finish: Vec::new() }
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Implement on your own types to return them directly from handlers.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

/// Return a status directly from a handler: `return StatusCode::NOT_FOUND`
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

// ── Finish hook plumbing ──────────────────────────────────────────────────────

/// Status and headers of a response that finished, passed to finish hooks.
#[derive(Clone, Debug)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Response body handed to hyper. Fires the finish hooks on release once the
/// body was consumed to the end.
pub(crate) struct FinishBody {
    inner: Full<Bytes>,
    head: Option<ResponseHead>,
    hooks: Vec<FinishHook>,
}

impl Body for FinishBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for FinishBody {
    fn drop(&mut self) {
        if !self.inner.is_end_stream() {
            return;
        }
        let Some(head) = self.head.take() else { return };
        for hook in self.hooks.drain(..) {
            hook(&head);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use http_body_util::BodyExt;

    use super::*;

    fn recording(response: &mut Response) -> Arc<Mutex<Vec<StatusCode>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        response.on_finish(move |head| sink.lock().unwrap().push(head.status));
        seen
    }

    #[tokio::test]
    async fn hooks_fire_after_the_body_is_consumed() {
        let mut response = Response::builder().status(StatusCode::CREATED).text("hello");
        let seen = recording(&mut response);

        let body = response.into_inner(false).into_body();
        assert!(seen.lock().unwrap().is_empty());

        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"hello");
        assert_eq!(*seen.lock().unwrap(), vec![StatusCode::CREATED]);
    }

    #[test]
    fn abandoned_body_does_not_fire() {
        let mut response = Response::text("never sent");
        let seen = recording(&mut response);

        drop(response.into_inner(false));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn empty_and_head_bodies_fire_on_release() {
        let mut empty = Response::status(StatusCode::NO_CONTENT);
        let seen = recording(&mut empty);
        drop(empty.into_inner(false));
        assert_eq!(*seen.lock().unwrap(), vec![StatusCode::NO_CONTENT]);

        let mut head = Response::text("hello");
        let seen = recording(&mut head);
        let inner = head.into_inner(true);
        assert_eq!(inner.headers()[CONTENT_LENGTH], "5");
        drop(inner);
        assert_eq!(*seen.lock().unwrap(), vec![StatusCode::OK]);
    }
}
