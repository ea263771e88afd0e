use crate::features::instance_registry::controller::InstanceRegistryController;
use crate::features::notifications::controller::NotificationController;
use crate::features::observability::controller::ObservabilityController;
use axum::extract::{MatchedPath, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use snoozer_core::{ErrorResponse, Instance};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Shared state of the operator HTTP surface.
pub struct OperatorState {
    pub registry: Arc<InstanceRegistryController>,
    pub notifications: Arc<NotificationController>,
    pub metrics: Arc<ObservabilityController>,
}

pub struct ApiError(ErrorResponse);

impl From<ErrorResponse> for ApiError {
    fn from(error: ErrorResponse) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.error_code.as_str() {
            "INSTANCE_NOT_FOUND" => StatusCode::NOT_FOUND,
            "INVALID_REQUEST" | "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "TIMEOUT" => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self.0)).into_response()
    }
}

pub fn router(state: Arc<OperatorState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/instances", get(list_instances))
        .route("/instances/:id", get(get_instance))
        .route("/instances/:id/stop", post(stop_instance))
        .route("/metrics", get(render_metrics))
        .route_layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn track_requests(
    State(state): State<Arc<OperatorState>>,
    request: Request,
    next: Next,
) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    state.metrics.record_api_request(
        &endpoint,
        response.status().as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_instances(
    State(state): State<Arc<OperatorState>>,
) -> Result<Json<Vec<Instance>>, ApiError> {
    Ok(Json(state.registry.list_instances().await?))
}

async fn get_instance(
    State(state): State<Arc<OperatorState>>,
    Path(id): Path<String>,
) -> Result<Json<Instance>, ApiError> {
    Ok(Json(state.registry.get_instance(&id).await?))
}

/// Queues a stop for delivery with the instance's next heartbeat.
async fn stop_instance(
    State(state): State<Arc<OperatorState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let instance = state.registry.request_stop(&id).await?;

    let failures = state
        .notifications
        .notify_scheduled_action(&instance, "stop", "requested by operator")
        .await;
    if !failures.is_empty() {
        warn!(
            instance_id = %id,
            failures = failures.len(),
            "Stop queued but some notifications were not delivered"
        );
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "instance_id": instance.instance_id,
            "command": "stop",
            "status": "queued",
        })),
    ))
}

async fn render_metrics(State(state): State<Arc<OperatorState>>) -> Response {
    match state.metrics.render_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(error) => {
            warn!(error = %error, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, error).into_response()
        }
    }
}
