// Paymesh API Service - payment integration mesh entry point
// Fronts multiple payment/BNPL/compliance gateways behind one uniform API

use mesh_api::config::Config;
use mesh_api::dispatcher::{Dispatcher, DispatcherConfig};
use mesh_api::shedding::LoadShedder;
use mesh_api::store::{IntentStore, KeyValue, KvAffinityStore, RedisStore, ResultCache};
use mesh_api::ws::WsManager;
use mesh_api::{build_router, AppState};
use mesh_core::{RetryPolicy, StateStore};
use mesh_providers::gateway::{HttpComplianceProvider, HttpGatewayProvider};
use mesh_providers::latency::LatencyWindow;
use mesh_providers::registry::{ProviderPriority, ProviderSpec, SlaConfig};
use mesh_providers::scoring::ScoringConfig;
use mesh_providers::{ProviderRegistry, ProviderSelector, Strategy};
use std::sync::Arc;
use tracing::info;

fn build_registry(config: &Config) -> anyhow::Result<Arc<ProviderRegistry>> {
    let registry = ProviderRegistry::new();
    let base = &config.gateway_base;

    registry.register_payment_provider(ProviderSpec {
        provider: Arc::new(HttpGatewayProvider::stripe(format!("{base}/stripe"))?),
        enabled: true,
        priority: ProviderPriority::Primary,
        sla: SlaConfig { max_latency_p95_ms: 500, min_success_rate: 0.95 },
        breaker_config: None,
    })?;

    registry.register_payment_provider(ProviderSpec {
        provider: Arc::new(HttpGatewayProvider::razorpay(format!("{base}/razorpay"))?),
        enabled: true,
        priority: ProviderPriority::Secondary,
        sla: SlaConfig { max_latency_p95_ms: 600, min_success_rate: 0.90 },
        breaker_config: None,
    })?;

    registry.register_payment_provider(ProviderSpec {
        provider: Arc::new(HttpGatewayProvider::klarna(format!("{base}/klarna"))?),
        enabled: true,
        priority: ProviderPriority::Tertiary,
        sla: SlaConfig { max_latency_p95_ms: 700, min_success_rate: 0.85 },
        breaker_config: None,
    })?;

    registry.register_compliance_provider(
        Arc::new(HttpComplianceProvider::new("onfido", format!("{base}/onfido"))?),
        true,
    )?;

    Ok(Arc::new(registry))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .json()
        .init();

    info!("starting Paymesh API service");

    let config = Config::from_env();

    info!(redis = %config.redis_url, "connecting to key-value store");
    let kv: Arc<dyn KeyValue> = Arc::new(RedisStore::connect(&config.redis_url).await?);

    let registry = build_registry(&config)?;
    info!(
        payment_providers = registry.all_payment_providers().len(),
        strategy = ?config.strategy,
        "provider registry initialized"
    );

    let scoring = ScoringConfig::default();
    let _scorer = registry.spawn_score_updater(scoring);

    let mut selector = ProviderSelector::new(registry.clone(), config.strategy);
    if config.strategy == Strategy::Affinity {
        selector = selector.with_affinity_store(Arc::new(KvAffinityStore::new(kv.clone())));
    }

    let global_latency = Arc::new(LatencyWindow::new(mesh_providers::DEFAULT_LATENCY_WINDOW_SAMPLES));
    let shedder = Arc::new(LoadShedder::new(
        config.shedding.clone(),
        global_latency.clone(),
        registry.clone(),
    ));

    let intents = Arc::new(IntentStore::new(kv.clone()));
    let results = Arc::new(ResultCache::new(kv.clone()));
    let ws = Arc::new(WsManager::new());

    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        Arc::new(selector),
        RetryPolicy::new(config.retry.clone()),
        Arc::new(StateStore::new()),
        intents.clone(),
        results.clone(),
        ws.clone(),
        global_latency,
        DispatcherConfig {
            compliance_threshold: config.compliance_threshold,
            dispatch_timeout: config.dispatch_timeout,
        },
    ));

    let state = AppState {
        config: config.clone(),
        registry,
        dispatcher,
        intents,
        results,
        ws,
        shedder,
        kv,
    };

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "Paymesh API listening");

    axum::serve(listener, app).await?;
    Ok(())
}
