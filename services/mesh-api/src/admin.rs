//! Administrative provider controls

use crate::error::ApiError;
use crate::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use mesh_core::ErrorCode;
use mesh_providers::Error as ProviderLayerError;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ProviderQuery {
    provider: Option<String>,
}

fn require_provider(query: &ProviderQuery) -> Result<&str, ApiError> {
    query
        .provider
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::invalid_request("provider name required"))
}

fn map_registry_error(err: ProviderLayerError) -> ApiError {
    match err {
        ProviderLayerError::ProviderNotFound(name) => ApiError::new(
            StatusCode::NOT_FOUND,
            ErrorCode::NoHealthyServers,
            format!("provider '{name}' not found"),
        ),
        other => ApiError::internal(other.to_string()),
    }
}

/// `GET /admin/providers` — full registry status.
pub async fn list_providers(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.registry.status_dump())
}

/// `POST /admin/providers/enable?provider=<name>`.
pub async fn enable_provider(
    State(state): State<AppState>,
    Query(query): Query<ProviderQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let name = require_provider(&query)?;
    state.registry.enable_provider(name).map_err(map_registry_error)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "provider enabled successfully",
        "provider": name,
    })))
}

/// `POST /admin/providers/disable?provider=<name>`.
pub async fn disable_provider(
    State(state): State<AppState>,
    Query(query): Query<ProviderQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let name = require_provider(&query)?;
    state.registry.disable_provider(name).map_err(map_registry_error)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "provider disabled successfully",
        "provider": name,
    })))
}

/// `POST /admin/circuit-breaker/reset?provider=<name>`.
pub async fn reset_breaker(
    State(state): State<AppState>,
    Query(query): Query<ProviderQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let name = require_provider(&query)?;
    state.registry.reset_breaker(name).map_err(map_registry_error)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "circuit breaker reset successfully",
        "provider": name,
    })))
}
