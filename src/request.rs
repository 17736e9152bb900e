//! Incoming HTTP request type.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::request::Parts;
use http::{HeaderMap, Method, Uri};

use crate::dispatch::{DispatchContext, DispatchSlot};

/// An incoming HTTP request with its body fully read.
pub struct Request {
    pub(crate) parts: Parts,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
    pub(crate) remote_addr: SocketAddr,
    pub(crate) dispatch: DispatchSlot,
    pub(crate) received_at: Instant,
}

impl Request {
    /// `received_at` is when the request head arrived, before the body was read.
    pub(crate) fn new(parts: Parts, body: Bytes, remote_addr: SocketAddr, received_at: Instant) -> Self {
        Self {
            parts,
            body,
            params: HashMap::new(),
            remote_addr,
            dispatch: Arc::default(),
            received_at,
        }
    }

    pub fn method(&self) -> &Method { &self.parts.method }
    pub fn uri(&self) -> &Uri { &self.parts.uri }
    pub fn path(&self) -> &str { self.parts.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.parts.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// The socket peer address of the connection the request arrived on.
    pub fn remote_addr(&self) -> SocketAddr { self.remote_addr }

    /// When the server received the request head. Upload time counts from here.
    pub fn received_at(&self) -> Instant { self.received_at }

    /// Case-insensitive header lookup. Non-UTF-8 values are skipped.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name)?.to_str().ok()
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Records which remote method this request dispatches to.
    ///
    /// Only the first context sticks; later calls are ignored. Metrics
    /// middleware that saw this request picks it up when the response
    /// finishes.
    pub fn set_dispatch(&self, ctx: DispatchContext) {
        let _ = self.dispatch.set(ctx);
    }

    pub fn dispatch(&self) -> Option<&DispatchContext> {
        self.dispatch.get()
    }

    pub(crate) fn dispatch_slot(&self) -> DispatchSlot {
        Arc::clone(&self.dispatch)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A request as the server would hand it to the router.
    pub(crate) fn request(method: Method, uri: &str) -> Request {
        let (parts, ()) = http::Request::builder()
            .method(method)
            .uri(uri)
            .body(())
            .unwrap()
            .into_parts();
        Request::new(parts, Bytes::new(), "127.0.0.1:50000".parse().unwrap(), Instant::now())
    }
}
