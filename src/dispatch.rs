//! RPC dispatch context and the `loopback` record section.
//!
//! An RPC layer sitting behind the router (a REST-to-model bridge, for
//! example) knows which remote method a request resolves to. It describes
//! that with a [`DispatchContext`] and attaches it to the request:
//!
//! ```rust,no_run
//! use xstats::{DispatchContext, MethodDescriptor, Request, Response};
//!
//! async fn update_car(req: Request) -> Response {
//!     let id: i64 = req.param("id").and_then(|id| id.parse().ok()).unwrap_or_default();
//!     req.set_dispatch(
//!         DispatchContext::new(MethodDescriptor::instance("updateAttributes").on_model("Car"))
//!             .ctor_arg("id", id),
//!     );
//!     Response::json(b"{}".to_vec())
//! }
//! ```
//!
//! When the metrics record for that request is built, the context becomes its
//! `loopback` section:
//!
//! | method                          | `remoteMethod`               | `instanceId`       |
//! |---------------------------------|------------------------------|--------------------|
//! | instance `updateAttributes`     | `prototype.updateAttributes` | ctor arg `id`      |
//! | static `findById`, `deleteById` | `findById`, `deleteById`     | arg `id`           |
//! | any other static method         | the name                     | *(key absent)*     |

use std::sync::{Arc, OnceLock};

use serde_json::{Map, Value};

use crate::record::Record;

/// Shared between a [`Request`](crate::Request) and the interceptor that
/// captured it. Written at most once, by whoever dispatches the request.
pub(crate) type DispatchSlot = Arc<OnceLock<DispatchContext>>;

/// The remote method a request dispatches to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDescriptor {
    name: String,
    model_name: Option<String>,
    is_static: bool,
}

impl MethodDescriptor {
    /// A static (model-level) method such as `find` or `findById`.
    pub fn static_method(name: impl Into<String>) -> Self {
        Self { name: name.into(), model_name: None, is_static: true }
    }

    /// An instance (prototype) method such as `updateAttributes`.
    pub fn instance(name: impl Into<String>) -> Self {
        Self { name: name.into(), model_name: None, is_static: false }
    }

    /// Sets the declaring type name.
    pub fn on_model(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn model_name(&self) -> Option<&str> { self.model_name.as_deref() }
    pub fn is_static(&self) -> bool { self.is_static }
}

/// Describes which remote method a request invokes and with which arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchContext {
    method: MethodDescriptor,
    args: Map<String, Value>,
    ctor_args: Map<String, Value>,
}

impl DispatchContext {
    pub fn new(method: MethodDescriptor) -> Self {
        Self { method, args: Map::new(), ctor_args: Map::new() }
    }

    /// Adds a named dispatch argument.
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    /// Adds a constructor argument, used to identify the instance an instance
    /// method runs on.
    pub fn ctor_arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ctor_args.insert(name.into(), value.into());
        self
    }

    pub fn method(&self) -> &MethodDescriptor { &self.method }
    pub fn args(&self) -> &Map<String, Value> { &self.args }
    pub fn ctor_args(&self) -> &Map<String, Value> { &self.ctor_args }

    /// The fields of the `loopback` record section for this context.
    pub fn loopback_fields(&self) -> Map<String, Value> {
        let method = &self.method;
        let mut fields = Map::new();

        fields.insert(
            "modelName".to_owned(),
            method.model_name.clone().map_or(Value::Null, Value::String),
        );

        let instance_id = if method.is_static {
            fields.insert("remoteMethod".to_owned(), Value::String(method.name.clone()));
            method
                .name
                .ends_with("ById")
                .then(|| self.args.get("id").cloned().unwrap_or(Value::Null))
        } else {
            fields.insert(
                "remoteMethod".to_owned(),
                Value::String(format!("prototype.{}", method.name)),
            );
            Some(self.ctor_args.get("id").cloned().unwrap_or(Value::Null))
        };

        if let Some(id) = instance_id {
            fields.insert("instanceId".to_owned(), id);
        }
        fields
    }
}

/// Adds the `loopback` section to `record` when a dispatch context is present.
pub(crate) fn enrich(record: &mut Record, dispatch: Option<&DispatchContext>) {
    if let Some(ctx) = dispatch {
        record.insert("loopback", Value::Object(ctx.loopback_fields()));
    }
}
