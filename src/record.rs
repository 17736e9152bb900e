//! The per-request metrics record and how it is built.
//!
//! A [`Record`] is an open map of section name to JSON value. The base
//! sections are always present:
//!
//! ```text
//! {
//!   "version":   "0.1.0",
//!   "timestamp": 1760000000000,
//!   "client":    { "address": "127.0.0.1", "id": null, "username": null },
//!   "request":   { "method": "GET", "url": "/bytes?with=query" },
//!   "response":  { "status": 200, "duration": 3, "bytes": null },
//!   "process":   { "pid": 4242, "workerId": null },
//!   "data":      {}
//! }
//! ```
//!
//! `null` marks a field xstats cannot resolve: the response size and the
//! client identity are never computed. A record builder may fill them in.
//!
//! A `loopback` section is added when the request carries a
//! [`DispatchContext`](crate::DispatchContext).

use std::borrow::Cow;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use http::{HeaderMap, Method, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::dispatch::{self, DispatchContext, DispatchSlot};
use crate::error::{BoxError, Error};
use crate::request::Request;

/// Caller-supplied function that returns custom record fields.
///
/// The returned value is merged into the base record section by section; see
/// [`Record`] for the rule. Return `Value::Null` to add nothing.
pub type RecordBuilder =
    dyn Fn(&RequestInfo, &ResponseInfo) -> Result<Value, BoxError> + Send + Sync + 'static;

// ── Record ────────────────────────────────────────────────────────────────────

/// One metrics record, built when a response finishes.
///
/// # Merge rule for custom fields
///
/// For every top-level key the record builder returns:
///
/// - object into an object section: shallow, field by field, last writer
///   wins. Fields the builder does not mention are kept.
/// - key not present in the record: added as a new section.
/// - anything else: the builder's value replaces the base value.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Returns a top-level section or field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns a section that holds an object, e.g. `"client"` or `"data"`.
    pub fn section(&self, name: &str) -> Option<&Map<String, Value>> {
        self.0.get(name)?.as_object()
    }

    pub fn version(&self) -> Option<&str> {
        self.0.get("version")?.as_str()
    }

    /// Milliseconds since the Unix epoch at which the record was built.
    pub fn timestamp(&self) -> Option<u64> {
        self.0.get("timestamp")?.as_u64()
    }

    pub(crate) fn insert(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_owned(), value);
    }

    pub(crate) fn merge(&mut self, custom: Value) {
        let Value::Object(custom) = custom else { return };

        for (key, value) in custom {
            match value {
                Value::Object(fields) => match self.0.get_mut(&key) {
                    Some(Value::Object(base)) => base.extend(fields),
                    _ => {
                        self.0.insert(key, Value::Object(fields));
                    }
                },
                value => {
                    self.0.insert(key, value);
                }
            }
        }
    }
}

// ── Captured request / finished response ─────────────────────────────────────

/// What the interceptor remembers about a request between its arrival and
/// the moment the response finishes.
///
/// The handler owns the [`Request`] once the pipeline runs, so this snapshot
/// is taken up front. The dispatch context is the exception: it is read at
/// completion, since an RPC layer attaches it while handling the request.
#[derive(Debug)]
pub struct RequestInfo {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) headers: HeaderMap,
    pub(crate) remote_addr: SocketAddr,
    pub(crate) client_address: Option<String>,
    pub(crate) dispatch: DispatchSlot,
}

impl RequestInfo {
    pub(crate) fn capture(req: &Request, trust_forwarded: bool) -> Self {
        let forwarded = if trust_forwarded { forwarded_for(req.headers()) } else { None };
        let client_address = forwarded.unwrap_or_else(|| req.remote_addr().ip().to_string());

        Self {
            method: req.method().clone(),
            url: req.uri().to_string(),
            headers: req.headers().clone(),
            remote_addr: req.remote_addr(),
            client_address: Some(client_address),
            dispatch: req.dispatch_slot(),
        }
    }

    pub fn method(&self) -> &Method { &self.method }

    /// The request target as received, path and query.
    pub fn url(&self) -> &str { &self.url }

    pub fn headers(&self) -> &HeaderMap { &self.headers }

    /// The socket peer address.
    pub fn remote_addr(&self) -> SocketAddr { self.remote_addr }

    /// The originating address recorded as `client.address`.
    pub fn client_address(&self) -> Option<&str> { self.client_address.as_deref() }

    pub fn dispatch(&self) -> Option<&DispatchContext> { self.dispatch.get() }
}

/// First hop of `X-Forwarded-For`, as set by the reverse proxy.
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("x-forwarded-for")?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_owned())
}

/// The finished response, as seen by the record builder.
#[derive(Debug)]
pub struct ResponseInfo {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) duration: Duration,
}

impl ResponseInfo {
    pub fn status(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }

    /// Time between the request arriving and the response finishing.
    pub fn duration(&self) -> Duration { self.duration }

    /// [`duration`](Self::duration) in whole milliseconds.
    pub fn duration_ms(&self) -> u64 {
        u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX)
    }
}

// ── Construction ──────────────────────────────────────────────────────────────

/// Per-interceptor fields copied into every record.
#[derive(Clone, Debug)]
pub(crate) struct Origin {
    pub(crate) version: Cow<'static, str>,
    pub(crate) pid: u32,
    pub(crate) worker_id: Option<u32>,
}

impl Origin {
    pub(crate) fn new() -> Self {
        Self {
            version: Cow::Borrowed(crate::VERSION),
            pid: std::process::id(),
            worker_id: None,
        }
    }
}

/// Builds the record for one finished request.
///
/// Errors from `builder` are returned untouched (wrapped as
/// [`Error::Builder`]); catching them is the caller's job.
pub(crate) fn build_record(
    origin: &Origin,
    builder: Option<&RecordBuilder>,
    request: &RequestInfo,
    response: &ResponseInfo,
) -> Result<Record, Error> {
    let mut record = base_record(origin, request, response);

    dispatch::enrich(&mut record, request.dispatch());

    if let Some(builder) = builder {
        let custom = builder(request, response).map_err(Error::Builder)?;
        record.merge(custom);
    }

    Ok(record)
}

fn base_record(origin: &Origin, request: &RequestInfo, response: &ResponseInfo) -> Record {
    let mut record = Record::default();
    record.insert("version", Value::String(origin.version.clone().into_owned()));
    record.insert("timestamp", json!(now_ms()));
    record.insert("client", json!({
        "address":  request.client_address,
        "id":       null,
        "username": null,
    }));
    record.insert("request", json!({
        "method": request.method.as_str(),
        "url":    request.url,
    }));
    record.insert("response", json!({
        "status":   response.status.as_u16(),
        "duration": response.duration_ms(),
        "bytes":    null,
    }));
    record.insert("process", json!({
        "pid":      origin.pid,
        "workerId": origin.worker_id,
    }));
    record.insert("data", Value::Object(Map::new()));
    record
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, OnceLock};

    use serde_json::json;

    use super::*;
    use crate::dispatch::MethodDescriptor;

    fn request_info(url: &str) -> RequestInfo {
        RequestInfo {
            method: Method::GET,
            url: url.to_owned(),
            headers: HeaderMap::new(),
            remote_addr: "127.0.0.1:50000".parse().unwrap(),
            client_address: Some("127.0.0.1".to_owned()),
            dispatch: Arc::new(OnceLock::new()),
        }
    }

    fn response_info(status: StatusCode) -> ResponseInfo {
        ResponseInfo { status, headers: HeaderMap::new(), duration: Duration::from_millis(12) }
    }

    fn boxed<F>(builder: F) -> Box<RecordBuilder>
    where
        F: Fn(&RequestInfo, &ResponseInfo) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        Box::new(builder)
    }

    #[test]
    fn base_record_has_every_section() {
        let record = build_record(
            &Origin::new(),
            None,
            &request_info("/bytes?with=query"),
            &response_info(StatusCode::OK),
        )
        .unwrap();

        assert_eq!(record.version(), Some(crate::VERSION));
        assert!(record.timestamp().is_some());
        assert_eq!(
            record.get("client"),
            Some(&json!({ "address": "127.0.0.1", "id": null, "username": null })),
        );
        assert_eq!(
            record.get("request"),
            Some(&json!({ "method": "GET", "url": "/bytes?with=query" })),
        );
        assert_eq!(
            record.get("response"),
            Some(&json!({ "status": 200, "duration": 12, "bytes": null })),
        );
        assert_eq!(
            record.get("process"),
            Some(&json!({ "pid": std::process::id(), "workerId": null })),
        );
        assert_eq!(record.get("data"), Some(&json!({})));
        assert!(record.get("loopback").is_none());
    }

    #[test]
    fn builder_fields_merge_per_section() {
        let builder = boxed(|req, res| {
            Ok(json!({
                "client": { "id": "test-app" },
                "data": { "url": req.url(), "status": res.status().as_u16() },
                "tenant": "acme",
            }))
        });

        let record = build_record(
            &Origin::new(),
            Some(builder.as_ref()),
            &request_info("/does-not-exist"),
            &response_info(StatusCode::NOT_FOUND),
        )
        .unwrap();

        assert_eq!(
            record.get("client"),
            Some(&json!({ "address": "127.0.0.1", "id": "test-app", "username": null })),
        );
        assert_eq!(record.get("data"), Some(&json!({ "url": "/does-not-exist", "status": 404 })));
        assert_eq!(record.get("tenant"), Some(&json!("acme")));
    }

    #[test]
    fn non_object_builder_output_merges_nothing() {
        let mut record = Record::default();
        record.insert("data", json!({}));
        let before = record.clone();

        record.merge(Value::Null);
        record.merge(json!(42));
        assert_eq!(record, before);
    }

    #[test]
    fn builder_error_is_returned() {
        let builder = boxed(|_, _| Err("expected test error".into()));

        let err = build_record(
            &Origin::new(),
            Some(builder.as_ref()),
            &request_info("/"),
            &response_info(StatusCode::OK),
        )
        .unwrap_err();

        assert!(matches!(err, Error::Builder(_)));
    }

    #[test]
    fn dispatch_context_is_read_at_build_time() {
        let request = request_info("/cars");
        request
            .dispatch
            .set(DispatchContext::new(MethodDescriptor::static_method("find").on_model("Car")))
            .unwrap();

        let record =
            build_record(&Origin::new(), None, &request, &response_info(StatusCode::OK)).unwrap();
        assert_eq!(
            record.get("loopback"),
            Some(&json!({ "modelName": "Car", "remoteMethod": "find" })),
        );
    }

    #[test]
    fn forwarded_for_takes_the_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.7, 10.0.0.1".parse().unwrap());
        assert_eq!(forwarded_for(&headers).as_deref(), Some("10.0.0.7"));

        headers.insert("x-forwarded-for", " ".parse().unwrap());
        assert_eq!(forwarded_for(&HeaderMap::new()), None);
        assert_eq!(forwarded_for(&headers), None);
    }
}
