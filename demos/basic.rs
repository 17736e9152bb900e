//! Minimal xstats example: a small model API with per-request metrics logged
//! as JSON.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/cars/42
//!   curl -X PUT http://localhost:3000/cars/42 -H 'content-type: application/json' -d '{"color":"red"}'
//!   curl http://localhost:3000/nowhere

use http::{Method, StatusCode};
use serde_json::json;
use xstats::middleware::metrics::Interceptor;
use xstats::{DispatchContext, MethodDescriptor, Registry, Request, Response, Router, Server};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let registry = Registry::new();
    registry.on_record(|record| {
        let json = serde_json::to_string(record)?;
        tracing::info!(record = %json, "request finished");
        Ok(())
    });

    let metrics = Interceptor::builder(registry)
        .worker_id(1)
        .record_builder(|req, _res| {
            let agent = req.headers().get("user-agent").and_then(|v| v.to_str().ok());
            Ok(json!({ "data": { "userAgent": agent } }))
        })
        .build();

    let app = Router::new()
        .layer(metrics)
        .on(Method::GET, "/cars/{id}", get_car)
        .on(Method::PUT, "/cars/{id}", update_car);

    Server::bind("0.0.0.0:3000")
        .serve(app)
        .await
        .expect("server error");
}

fn car_id(req: &Request) -> Option<i64> {
    req.param("id")?.parse().ok()
}

// GET /cars/{id}
async fn get_car(req: Request) -> Response {
    let Some(id) = car_id(&req) else {
        return Response::status(StatusCode::BAD_REQUEST);
    };
    req.set_dispatch(
        DispatchContext::new(MethodDescriptor::static_method("findById").on_model("Car")).arg("id", id),
    );
    Response::json(format!(r#"{{"id":{id},"color":"blue"}}"#).into_bytes())
}

// PUT /cars/{id}
async fn update_car(req: Request) -> Response {
    let Some(id) = car_id(&req) else {
        return Response::status(StatusCode::BAD_REQUEST);
    };
    if req.header("content-type") != Some("application/json") {
        return Response::status(StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
    req.set_dispatch(
        DispatchContext::new(MethodDescriptor::instance("updateAttributes").on_model("Car"))
            .ctor_arg("id", id),
    );
    Response::json(req.body().to_vec())
}
