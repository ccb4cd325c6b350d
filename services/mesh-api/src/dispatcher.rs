//! Charge orchestration
//!
//! One dispatcher call drives a payment end to end: validation, idempotent
//! replay, the compliance gate, the atomic move into PROCESSING, and the
//! asynchronous provider leg with breaker-guarded selection, retries, and
//! terminal publication. The PROCESSING gate guarantees at most one
//! concurrent dispatch per payment id.

use crate::error::ApiError;
use crate::metrics::METRICS;
use crate::store::{IntentStore, ResultCache};
use crate::ws::WsManager;
use axum::http::StatusCode;
use mesh_core::{
    ComplianceCheckRequest, ComplianceCheckType, ComplianceStatus, ErrorCode, ErrorResponse,
    PaymentRequest, PaymentState, RetryPolicy, StateStore, SuccessResponse,
};
use mesh_providers::latency::LatencyWindow;
use mesh_providers::metrics::ErrorKind;
use mesh_providers::registry::RegisteredProvider;
use mesh_providers::{Error as ProviderLayerError, ProviderRegistry, ProviderSelector};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Charge request body.
#[derive(Debug, Clone, Deserialize)]
pub struct ChargeRequest {
    /// Caller order/reference id (intent key)
    pub id: String,
    /// Amount in minor units (intent key)
    pub amount: i64,
    /// Payment id minted at intent registration
    #[serde(default)]
    pub payment_id: String,
    /// ISO 4217 currency; defaults to USD
    #[serde(default)]
    pub currency: String,
    /// End-user id; enables the compliance gate and affinity routing
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Outcome of the synchronous half of a charge.
#[derive(Debug)]
pub enum ChargeOutcome {
    /// Dispatch accepted; the async leg is running
    Accepted(SuccessResponse),
    /// Terminal payment replayed from cache (raw cached JSON)
    Replay(String),
}

/// Dispatcher tunables.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Amount at or above which the compliance gate runs
    pub compliance_threshold: i64,
    /// End-to-end deadline for the async leg
    pub dispatch_timeout: Duration,
}

/// Orchestrates charges against the provider plane.
pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    selector: Arc<ProviderSelector>,
    retry: RetryPolicy,
    states: Arc<StateStore>,
    intents: Arc<IntentStore>,
    results: Arc<ResultCache>,
    ws: Arc<WsManager>,
    global_latency: Arc<LatencyWindow>,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Wire a dispatcher over its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        selector: Arc<ProviderSelector>,
        retry: RetryPolicy,
        states: Arc<StateStore>,
        intents: Arc<IntentStore>,
        results: Arc<ResultCache>,
        ws: Arc<WsManager>,
        global_latency: Arc<LatencyWindow>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            selector,
            retry,
            states,
            intents,
            results,
            ws,
            global_latency,
            config,
        }
    }

    /// The state store backing this dispatcher.
    pub fn states(&self) -> &Arc<StateStore> {
        &self.states
    }

    /// Synchronous half of a charge. On acceptance the async leg continues
    /// in a background task and the caller gets "processing started".
    pub async fn charge(self: &Arc<Self>, req: ChargeRequest) -> Result<ChargeOutcome, ApiError> {
        let req = self.validate(req)?;
        let payment_id = req.payment_id.clone();

        // intent binding must exist and match
        let registered = self
            .intents
            .lookup(&req.id, req.amount)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
        let Some(registered) = registered else {
            return Err(ApiError::new(
                StatusCode::UNAUTHORIZED,
                ErrorCode::PaymentKeyNotFound,
                "payment key not found or expired",
            )
            .with_details("please register a new payment intent"));
        };
        if registered != payment_id {
            let state = self.states.force_fail(&payment_id);
            return Err(ApiError::new(
                StatusCode::UNAUTHORIZED,
                ErrorCode::PaymentIdMismatch,
                "payment id does not match",
            )
            .with_state(state.to_string())
            .with_details("the provided payment id does not match the registered intent"));
        }

        // terminal payments replay their cached result
        match self.states.get(&payment_id) {
            Some(state) if state.is_terminal() => {
                if let Some(cached) = self.results.fetch(&payment_id).await {
                    return Ok(ChargeOutcome::Replay(cached));
                }
                let envelope = SuccessResponse::new(
                    state.to_string(),
                    payment_id,
                    serde_json::json!({"message": "payment already processed"}),
                );
                return Ok(ChargeOutcome::Replay(
                    serde_json::to_string(&envelope)
                        .map_err(|e| ApiError::internal(e.to_string()))?,
                ));
            }
            Some(PaymentState::Processing) => {
                return Err(ApiError::new(
                    StatusCode::CONFLICT,
                    ErrorCode::InternalError,
                    "payment is currently being processed",
                )
                .with_state(PaymentState::Processing.to_string())
                .with_details("wait for the current dispatch to complete"));
            }
            _ => {}
        }

        // compliance gate for high-value transactions
        if req.amount >= self.config.compliance_threshold {
            if let Some(user_id) = req.user_id.clone() {
                self.run_compliance_gate(&payment_id, &user_id).await?;
            }
        }

        // single atomic step into PROCESSING; losing a race lands here too
        if self.states.begin_processing(&payment_id).is_err() {
            return Err(ApiError::new(
                StatusCode::CONFLICT,
                ErrorCode::InternalError,
                "payment is currently being processed",
            )
            .with_state(self.states.get(&payment_id).map(|s| s.to_string()).unwrap_or_default()));
        }

        let accepted = SuccessResponse::new(
            PaymentState::Processing.to_string(),
            payment_id.clone(),
            serde_json::json!({"message": "payment processing started"}),
        );

        self.spawn_async_leg(req);
        Ok(ChargeOutcome::Accepted(accepted))
    }

    fn validate(&self, mut req: ChargeRequest) -> Result<ChargeRequest, ApiError> {
        if req.amount <= 0 {
            return Err(ApiError::invalid_request("amount must be greater than zero"));
        }
        if req.currency.is_empty() {
            req.currency = "USD".to_string();
        }
        if req.currency.len() != 3 || !req.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ApiError::invalid_request("currency must be a 3-letter code"));
        }
        if req.payment_id.is_empty() {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                ErrorCode::PaymentIdRequired,
                "payment id is required",
            ));
        }
        if req.id.is_empty() {
            return Err(ApiError::invalid_request("id is required"));
        }
        Ok(req)
    }

    async fn run_compliance_gate(&self, payment_id: &str, user_id: &str) -> Result<(), ApiError> {
        info!(payment_id, user_id, "high-value transaction, running compliance check");

        let check = ComplianceCheckRequest {
            user_id: user_id.to_string(),
            check_type: ComplianceCheckType::Kyc,
            document_data: None,
            idempotency_key: format!("{payment_id}_kyc"),
        };

        let outcome = self.registry.perform_compliance_check(&check).await;
        match outcome {
            Ok(resp) if resp.status == ComplianceStatus::Approved => {
                METRICS.compliance_checks_total.with_label_values(&["approved"]).inc();
                info!(payment_id, check_id = %resp.check_id, "compliance check passed");
                Ok(())
            }
            other => {
                METRICS.compliance_checks_total.with_label_values(&["rejected"]).inc();
                if let Err(e) = &other {
                    warn!(payment_id, error = %e, "compliance check errored");
                }
                let state = self.states.force_fail(payment_id);
                Err(ApiError::new(
                    StatusCode::FORBIDDEN,
                    ErrorCode::KycRequired,
                    "compliance check failed or required",
                )
                .with_state(state.to_string())
                .with_details("KYC verification is required for high-value transactions"))
            }
        }
    }

    fn spawn_async_leg(self: &Arc<Self>, req: ChargeRequest) {
        let dispatcher = Arc::clone(self);
        let payment_id = req.payment_id.clone();

        let leg = tokio::spawn(async move {
            dispatcher.run_dispatch(req).await;
        });

        // a panicking leg must still finalize the payment and notify
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(join_err) = leg.await {
                error!(payment_id = %payment_id, error = %join_err, "async dispatch aborted");
                let state = dispatcher.states.force_fail(&payment_id);
                let envelope = ErrorResponse::new(ErrorCode::InternalError, "payment failed")
                    .with_status(state.to_string())
                    .with_details("internal processing error");
                if let Ok(json) = serde_json::to_string(&envelope) {
                    dispatcher.results.store(&payment_id, &json).await;
                }
                dispatcher.ws.notify(&payment_id, &envelope);
            }
        });
    }

    /// The asynchronous provider leg. Always commits a terminal state and
    /// publishes the result before returning.
    async fn run_dispatch(self: Arc<Self>, req: ChargeRequest) {
        let payment_id = req.payment_id.clone();
        let deadline = Instant::now() + self.config.dispatch_timeout;

        let provider_req = PaymentRequest {
            id: req.id.clone(),
            amount: req.amount,
            currency: req.currency.clone(),
            description: None,
            metadata: None,
            idempotency_key: payment_id.clone(),
            user_id: req.user_id.clone(),
            email: None,
        };

        let mut last_provider: Option<String> = None;
        let mut last_latency = Duration::ZERO;
        let mut last_error: Option<(ErrorCode, String)> = None;

        'attempts: for attempt in 0..self.retry.max_attempts() {
            if Instant::now() >= deadline {
                warn!(payment_id = %payment_id, attempt, "dispatch deadline exhausted");
                last_error = Some((ErrorCode::Timeout, "dispatch deadline exceeded".into()));
                break 'attempts;
            }

            let candidates = match self.selector.candidates(&provider_req).await {
                Ok(candidates) => candidates,
                Err(ProviderLayerError::NoEligibleProviders) => {
                    warn!(payment_id = %payment_id, "no eligible providers");
                    last_error = Some((
                        ErrorCode::NoEligibleProviders,
                        "no eligible providers for this request".into(),
                    ));
                    break 'attempts;
                }
                Err(e) => {
                    last_error = Some((e.code(), e.to_string()));
                    break 'attempts;
                }
            };

            // breaker guard: fall through to the next candidate inside the
            // same attempt budget
            let mut selected: Option<Arc<RegisteredProvider>> = None;
            for candidate in candidates {
                match candidate.breaker.before_request() {
                    Ok(()) => {
                        selected = Some(candidate);
                        break;
                    }
                    Err(e) => {
                        info!(
                            payment_id = %payment_id,
                            provider = %candidate.name(),
                            "breaker rejected candidate: {e}"
                        );
                    }
                }
            }
            let Some(entry) = selected else {
                last_error = Some((ErrorCode::CircuitOpen, "all candidate breakers open".into()));
                break 'attempts;
            };

            info!(
                payment_id = %payment_id,
                provider = %entry.name(),
                attempt = attempt + 1,
                reason = %self.selector.routing_reason(&entry),
                "routing payment"
            );

            let remaining = deadline.saturating_duration_since(Instant::now());
            let start = Instant::now();
            entry.metrics.inc_active_connections();
            let outcome = tokio::time::timeout(remaining, entry.provider.charge(&provider_req)).await;
            entry.metrics.dec_active_connections();
            let latency = start.elapsed();

            last_provider = Some(entry.name().to_string());
            last_latency = latency;
            self.global_latency.record(latency);
            METRICS
                .provider_request_duration_seconds
                .with_label_values(&[entry.name()])
                .observe(latency.as_secs_f64());

            let failure = match outcome {
                Ok(Ok(_response)) => {
                    entry.metrics.record_request(latency, true);
                    entry.breaker.after_request(true, None);
                    METRICS
                        .provider_requests_total
                        .with_label_values(&[entry.name(), "success"])
                        .inc();

                    if let Err(e) = self.states.transition(&payment_id, PaymentState::Success) {
                        error!(payment_id = %payment_id, error = %e, "terminal transition rejected");
                    }
                    info!(
                        payment_id = %payment_id,
                        provider = %entry.name(),
                        latency_ms = latency.as_millis() as i64,
                        "payment successful"
                    );
                    last_error = None;
                    break 'attempts;
                }
                Ok(Err(e)) => (e.code(), e.retry_after(), e.to_string()),
                Err(_elapsed) => (
                    ErrorCode::Timeout,
                    None,
                    format!("provider call exceeded deadline after {}ms", latency.as_millis()),
                ),
            };

            let (code, retry_after, message) = failure;
            entry.metrics.record_request(latency, false);
            entry.metrics.record_error(error_kind(code), message.clone());
            entry.breaker.after_request(false, Some(&message));
            METRICS
                .provider_requests_total
                .with_label_values(&[entry.name(), "failure"])
                .inc();

            warn!(
                payment_id = %payment_id,
                provider = %entry.name(),
                error_code = %code,
                latency_ms = latency.as_millis() as i64,
                "provider charge failed: {message}"
            );

            last_error = Some((code, message));

            let decision = self.retry.evaluate(attempt, code, retry_after);
            if !decision.should_retry {
                info!(payment_id = %payment_id, reason = decision.reason, "not retrying");
                break 'attempts;
            }

            info!(
                payment_id = %payment_id,
                backoff_ms = decision.backoff.as_millis() as u64,
                reason = decision.reason,
                "retrying after backoff"
            );
            tokio::time::sleep(decision.backoff).await;
        }

        // whatever happened above, the payment ends terminal
        let final_state = match self.states.get(&payment_id) {
            Some(state) if state.is_terminal() => state,
            _ => self.states.force_fail(&payment_id),
        };

        self.publish_result(&payment_id, final_state, last_provider, last_latency, last_error)
            .await;
    }

    async fn publish_result(
        &self,
        payment_id: &str,
        state: PaymentState,
        provider: Option<String>,
        latency: Duration,
        error: Option<(ErrorCode, String)>,
    ) {
        METRICS.payments_total.with_label_values(&[state.as_str()]).inc();

        let mut data = serde_json::json!({
            "provider": provider,
            "latency_ms": latency.as_millis() as i64,
        });
        if let Some((code, message)) = error {
            data["error_code"] = serde_json::json!(code);
            data["error_message"] = serde_json::json!(message);
        }

        let envelope = SuccessResponse::new(state.to_string(), payment_id, data);
        match serde_json::to_string(&envelope) {
            Ok(json) => self.results.store(payment_id, &json).await,
            Err(e) => error!(payment_id, error = %e, "failed to serialize result blob"),
        }

        self.ws.notify(payment_id, &envelope);
        info!(payment_id, state = %state, "dispatch finished");
    }
}

/// Which metrics bucket a canonical failure code lands in.
fn error_kind(code: ErrorCode) -> ErrorKind {
    match code {
        ErrorCode::ProviderError
        | ErrorCode::GatewayUnavailable
        | ErrorCode::GatewayTimeout
        | ErrorCode::MalformedResponse
        | ErrorCode::InternalError
        | ErrorCode::CircuitOpen
        | ErrorCode::ProviderDegraded => ErrorKind::Gateway,

        ErrorCode::InsufficientFunds
        | ErrorCode::CardDeclined
        | ErrorCode::AuthenticationFailed
        | ErrorCode::ComplianceFailed
        | ErrorCode::KycRequired => ErrorKind::Bank,

        ErrorCode::NetworkError
        | ErrorCode::ConnectionReset
        | ErrorCode::ConnectionTimeout
        | ErrorCode::DnsError
        | ErrorCode::Timeout
        | ErrorCode::ProviderTimeout
        | ErrorCode::ProviderDown
        | ErrorCode::RateLimited => ErrorKind::Network,

        ErrorCode::InvalidRequest
        | ErrorCode::PaymentIdRequired
        | ErrorCode::PaymentKeyNotFound
        | ErrorCode::PaymentIdMismatch
        | ErrorCode::NoHealthyServers
        | ErrorCode::NoEligibleProviders => ErrorKind::Client,
    }
}
