use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::metrics_middleware::track_metrics;
use crate::sinks::EventSink;
use crate::store::{EventBatchStore, MetricsStore};
use crate::time::TimeSource;
use crate::{event_endpoint, metrics_endpoint};

const EVENT_BODY_SIZE: usize = 256 * 1024; // 256KiB
const BULK_BODY_SIZE: usize = 5 * 1024 * 1024; // 5MiB

#[derive(Clone)]
pub struct State {
    pub sink: Arc<dyn EventSink + Send + Sync>,
    pub events: Arc<dyn EventBatchStore + Send + Sync>,
    pub metrics: Arc<dyn MetricsStore + Send + Sync>,
    pub timesource: Arc<dyn TimeSource + Send + Sync>,
    pub request_timeout: Duration,
}

pub fn router<TZ, SK, ES, MS>(
    timesource: TZ,
    sink: SK,
    events: ES,
    metrics: MS,
    request_timeout: Duration,
) -> Router
where
    TZ: TimeSource + Send + Sync + 'static,
    SK: EventSink + Send + Sync + 'static,
    ES: EventBatchStore + Send + Sync + 'static,
    MS: MetricsStore + Send + Sync + 'static,
{
    let state = State {
        sink: Arc::new(sink),
        events: Arc::new(events),
        metrics: Arc::new(metrics),
        timesource: Arc::new(timesource),
        request_timeout,
    };

    let event_router = Router::new()
        .route("/events", post(event_endpoint::event))
        .layer(DefaultBodyLimit::max(EVENT_BODY_SIZE));

    let bulk_router = Router::new()
        .route("/events/bulk", post(event_endpoint::bulk))
        .layer(DefaultBodyLimit::max(BULK_BODY_SIZE));

    let metrics_router = Router::new().route("/metrics", get(metrics_endpoint::metrics));

    let status_router = Router::new().route("/healthz", get(healthz));

    Router::new()
        .merge(event_router)
        .merge(bulk_router)
        .merge(metrics_router)
        .merge(status_router)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Clone, Copy)]
struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "panic".to_string()
    };
    tracing::error!(panic = %detail, "request handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal error" })),
    )
        .into_response()
}
