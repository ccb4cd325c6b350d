//! # Paymesh API
//!
//! The deployable mesh service: a uniform payment API in front of multiple
//! payment/BNPL/compliance gateways. Hosts the intent surface, the charge
//! dispatcher, load shedding, admin controls, and the live WebSocket result
//! channel.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod admin;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod shedding;
pub mod store;
pub mod ws;

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::shedding::LoadShedder;
use crate::store::{IntentStore, KeyValue, ResultCache};
use crate::ws::WsManager;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use mesh_providers::ProviderRegistry;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration
    pub config: Config,
    /// Provider registry
    pub registry: Arc<ProviderRegistry>,
    /// Charge orchestrator
    pub dispatcher: Arc<Dispatcher>,
    /// Intent fingerprint store
    pub intents: Arc<IntentStore>,
    /// Terminal result cache
    pub results: Arc<ResultCache>,
    /// WebSocket subscriber registry
    pub ws: Arc<WsManager>,
    /// Admission control
    pub shedder: Arc<LoadShedder>,
    /// Shared key-value backend
    pub kv: Arc<dyn KeyValue>,
}

/// Build the HTTP router over prepared state.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let shed_layer = middleware::from_fn_with_state(state.clone(), handlers::shed_middleware);

    Router::new()
        .route(
            "/paymentKey",
            post(handlers::create_payment_key).delete(handlers::delete_payment_key),
        )
        .route("/payment", post(handlers::payment))
        .layer(shed_layer)
        .route("/metrics", get(handlers::metrics_json))
        .route("/metrics/prometheus", get(handlers::metrics_prometheus))
        .route("/health", get(handlers::health))
        .route("/ws", get(handlers::ws_subscribe))
        .route("/admin/providers", get(admin::list_providers))
        .route("/admin/providers/enable", post(admin::enable_provider))
        .route("/admin/providers/disable", post(admin::disable_provider))
        .route("/admin/circuit-breaker/reset", post(admin::reset_breaker))
        .layer(cors)
        .with_state(state)
}
