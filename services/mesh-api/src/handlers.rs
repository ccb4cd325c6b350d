//! HTTP surface of the payment request plane

use crate::dispatcher::{ChargeOutcome, ChargeRequest};
use crate::error::ApiError;
use crate::metrics::METRICS;
use crate::AppState;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use mesh_core::{ErrorCode, ErrorResponse};
use serde::Deserialize;
use tracing::warn;

/// Intent registration / revocation body.
#[derive(Debug, Deserialize)]
pub struct PaymentKeyRequest {
    /// Caller order/reference id
    pub id: String,
    /// Amount in minor units
    pub amount: i64,
}

/// `POST /paymentKey` — idempotent intent registration.
pub async fn create_payment_key(
    State(state): State<AppState>,
    Json(req): Json<PaymentKeyRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.id.is_empty() {
        return Err(ApiError::invalid_request("id is required"));
    }
    if req.amount <= 0 {
        return Err(ApiError::invalid_request("amount must be greater than zero"));
    }

    let (payment_id, reused) = state
        .intents
        .register(&req.id, req.amount)
        .await
        .map_err(|e| ApiError::internal(format!("failed to register intent: {e}")))?;

    METRICS
        .intents_total
        .with_label_values(&[if reused { "true" } else { "false" }])
        .inc();

    Ok(Json(serde_json::json!({ "payment_id": payment_id })))
}

/// `DELETE /paymentKey` — revoke an intent mapping.
pub async fn delete_payment_key(
    State(state): State<AppState>,
    Json(req): Json<PaymentKeyRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let payment_id = state.intents.revoke(&req.id, req.amount).await.map_err(|e| {
        match e {
            crate::store::StoreError::NotFound => ApiError::new(
                StatusCode::NOT_FOUND,
                ErrorCode::PaymentKeyNotFound,
                "payment key not found",
            ),
            other => ApiError::internal(format!("failed to delete payment key: {other}")),
        }
    })?;

    Ok(Json(serde_json::json!({
        "message": "payment key deleted successfully",
        "payment_id": payment_id,
    })))
}

/// `POST /payment` — submit a charge.
///
/// First valid call answers "processing started" and continues async;
/// replays of terminal payments return the cached blob with
/// `X-Idempotent-Replay: true`.
pub async fn payment(
    State(state): State<AppState>,
    Json(req): Json<ChargeRequest>,
) -> Result<Response, ApiError> {
    match state.dispatcher.charge(req).await? {
        ChargeOutcome::Accepted(envelope) => Ok(Json(envelope).into_response()),
        ChargeOutcome::Replay(cached) => Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/json"),
                (header::HeaderName::from_static("x-idempotent-replay"), "true"),
            ],
            cached,
        )
            .into_response()),
    }
}

/// `GET /metrics` — JSON dump of provider summaries and shedding stats.
pub async fn metrics_json(State(state): State<AppState>) -> Json<serde_json::Value> {
    let providers: Vec<_> = state
        .registry
        .all_payment_providers()
        .iter()
        .map(|p| p.metrics.summary())
        .collect();

    Json(serde_json::json!({
        "providers": providers,
        "provider_count": providers.len(),
        "provider_registry": state.registry.status_dump(),
        "load_shedding": state.shedder.stats(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// `GET /metrics/prometheus` — Prometheus text exposition.
pub async fn metrics_prometheus() -> Result<String, ApiError> {
    METRICS
        .export()
        .map_err(|e| ApiError::internal(format!("failed to export metrics: {e}")))
}

/// `GET /health` — overall health with per-dependency checks.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let store_ok = state.kv.ping().await.is_ok();
    let healthy_providers = state.registry.healthy_provider_count();
    let healthy = store_ok && healthy_providers > 0;

    let body = serde_json::json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "service": "paymesh-api",
        "version": env!("CARGO_PKG_VERSION"),
        "checks": {
            "key_value_store": store_ok,
            "healthy_providers": healthy_providers,
        },
    });

    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(body))
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    payment_id: Option<String>,
}

/// `GET /ws?payment_id=<id>` — subscribe to result notifications.
pub async fn ws_subscribe(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    upgrade: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let Some(payment_id) = query.payment_id.filter(|id| !id.is_empty()) else {
        return Err(ApiError::invalid_request("payment_id is required"));
    };

    Ok(upgrade.on_upgrade(move |socket| async move {
        let cached = state.results.fetch(&payment_id).await;
        state.ws.run_socket(socket, payment_id, cached).await;
    }))
}

/// Admission-control middleware wrapping the payment routes.
pub async fn shed_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if let Some(reason) = state.shedder.should_shed() {
        warn!(reason, "load shedding activated");
        METRICS.requests_shed_total.inc();

        let body = ErrorResponse::new(ErrorCode::RateLimited, "system overloaded, please retry")
            .with_status("REJECTED")
            .with_details(reason);
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::RETRY_AFTER, "5")],
            Json(body),
        )
            .into_response();
    }

    let _guard = state.shedder.begin();
    METRICS.http_requests_total.inc();
    METRICS.requests_in_flight.inc();
    let response = next.run(req).await;
    METRICS.requests_in_flight.dec();
    response
}
