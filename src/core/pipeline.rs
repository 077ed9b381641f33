use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use hyper::{HeaderMap, StatusCode};
use tokio::sync::RwLock;

use crate::config::RateLimitKeyMode;
use crate::core::request::GatewayRequest;
use crate::core::resolver::{self, RouteResolution};
use crate::core::response::GatewayResponse;
use crate::error::{ConfigError, GatewayError, RoutingError};
use crate::models::RuntimeConfig;
use crate::policy::cors::CorsOutcome;
use crate::policy::rate_limit::{RateLimitDecision, RateLimitKey, RateLimiter};
use crate::policy::{Directive, EffectivePolicy};
use crate::proxy::{select_backend, Forwarder};
use crate::telemetry::RequestEvent;

/// One activated configuration: the resolved graph plus the per-backend
/// clients built from it. Swapped as a unit so requests never see a
/// graph and a client set from different snapshots.
pub struct Activation {
    pub runtime: Arc<RuntimeConfig>,
    pub forwarder: Forwarder,
}

impl Activation {
    pub fn new(runtime: RuntimeConfig) -> Result<Self, ConfigError> {
        let forwarder = Forwarder::new(&runtime.backends, runtime.settings.server.min_tls_version)?;
        Ok(Self {
            runtime: Arc::new(runtime),
            forwarder,
        })
    }
}

/// Policy pipeline: drives one request through the staged state machine
/// `Inbound -> Routed -> BackendCall -> Outbound -> Done`, diverting to
/// `OnError` when a stage fails.
///
/// Every per-request error is converted to a client response here;
/// nothing propagates past the pipeline boundary.
pub struct PolicyPipeline {
    active: RwLock<Arc<Activation>>,
    rate_limiter: Arc<RateLimiter>,
}

impl PolicyPipeline {
    pub fn new(runtime: RuntimeConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            active: RwLock::new(Arc::new(Activation::new(runtime)?)),
            rate_limiter: Arc::new(RateLimiter::new()),
        })
    }

    /// Atomically activate a new configuration snapshot. In-flight
    /// requests keep the activation they started with.
    pub async fn reload(&self, runtime: RuntimeConfig) -> Result<(), ConfigError> {
        let next = Arc::new(Activation::new(runtime)?);
        let mut active = self.active.write().await;
        *active = next;
        Ok(())
    }

    pub async fn activation(&self) -> Arc<Activation> {
        self.active.read().await.clone()
    }

    /// The shared rate-limit counter store, for the housekeeping task
    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.rate_limiter)
    }

    /// Execute the pipeline for one request
    pub async fn execute(&self, request: GatewayRequest) -> GatewayResponse {
        let started = Instant::now();
        let activation = self.activation().await;
        let runtime = Arc::clone(&activation.runtime);

        // Resolution happens up front so the inbound stage runs the
        // operation's merged policy; routing failures are reported in
        // the Routed stage, after inbound CORS, so preflight requests
        // are answered even for unroutable paths.
        let route = resolver::resolve(&runtime, &request.method, request.uri.path());
        let names: Option<(String, String)> = route
            .as_ref()
            .ok()
            .map(|r| (r.api.name.clone(), r.operation.operation_id.clone()));
        let operation = route.as_ref().ok().map(|r| Arc::clone(&r.operation));
        // policy in effect: the operation's merged policy when routing
        // succeeded, the base-path API's policy when only the operation
        // failed to resolve, the global policy otherwise
        let policy: &EffectivePolicy = match operation.as_ref() {
            Some(op) => &op.policy,
            None => resolver::find_api_for_path(&runtime, request.uri.path())
                .map(|api| &api.api_policy)
                .unwrap_or(&runtime.global_policy),
        };

        // Inbound: CORS. Preflight short-circuits to Done and never
        // reaches the rate limiter or the backend selector.
        let mut cors_headers: Option<HeaderMap> = None;
        if let Some(cors) = policy.cors() {
            let outcome = cors.evaluate(
                &request.method,
                request.origin().as_deref(),
                request
                    .header("access-control-request-method")
                    .as_deref(),
            );
            match outcome {
                CorsOutcome::Preflight(headers) => {
                    let mut response =
                        GatewayResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::new());
                    response.apply_headers(&headers);
                    return finish(response, &request, names.as_ref(), "preflight", started);
                }
                CorsOutcome::Allowed(headers) => cors_headers = Some(headers),
                CorsOutcome::Denied => {
                    // non-fatal: the request proceeds, the response
                    // omits Access-Control-Allow-Origin and the browser
                    // enforces the block
                    tracing::debug!(
                        request_id = %request.request_id,
                        "Origin not allowed by CORS policy"
                    );
                }
                CorsOutcome::NotApplicable => {}
            }
        }

        match self.run(&activation, &request, route, policy).await {
            Ok(mut response) => {
                if let Some(headers) = cors_headers {
                    response.apply_headers(&headers);
                }
                finish(response, &request, names.as_ref(), "success", started)
            }
            Err(error) => {
                let outcome = error.outcome();
                let mut response = on_error(error, policy, &request);
                if let Some(headers) = cors_headers {
                    response.apply_headers(&headers);
                }
                finish(response, &request, names.as_ref(), outcome, started)
            }
        }
    }

    /// The failable stages: remaining inbound checks, Routed,
    /// BackendCall, Outbound
    async fn run(
        &self,
        activation: &Activation,
        request: &GatewayRequest,
        route: Result<RouteResolution, RoutingError>,
        policy: &EffectivePolicy,
    ) -> Result<GatewayResponse, GatewayError> {
        let runtime = &activation.runtime;

        // Inbound: subscription gate, then rate limits. Rejected calls
        // never consume backend capacity.
        if let Ok(resolution) = &route {
            if resolution.api.subscription_required
                && request
                    .subscription_key(&runtime.settings.subscription_key_header)
                    .is_none()
            {
                return Err(GatewayError::SubscriptionRequired);
            }
        }
        self.enforce_rate_limits(runtime, request, policy)?;

        // Routed
        let resolution = route.map_err(GatewayError::Routing)?;

        // BackendCall
        let backend = select_backend(
            &resolution.api,
            policy,
            &resolution.operation.operation_id,
        )?;
        let mut response = activation
            .forwarder
            .forward(&backend, request, &resolution.remainder)
            .await?;

        // Outbound: header injection only, body passes through
        for directive in &policy.outbound {
            match directive {
                Directive::SetHeader { name, value } => response.set_header(name, value),
                Directive::Trace { message } => {
                    tracing::info!(request_id = %request.request_id, "{}", message)
                }
                _ => {}
            }
        }

        Ok(response)
    }

    fn enforce_rate_limits(
        &self,
        runtime: &RuntimeConfig,
        request: &GatewayRequest,
        policy: &EffectivePolicy,
    ) -> Result<(), GatewayError> {
        for (calls, renewal_period, scope) in policy.rate_limits() {
            let identity = match runtime.settings.rate_limit_key {
                RateLimitKeyMode::Subscription => request
                    .subscription_key(&runtime.settings.subscription_key_header)
                    .unwrap_or_else(|| request.client_identity()),
                RateLimitKeyMode::ClientIp => request.client_identity(),
            };
            let key = RateLimitKey::new(identity, scope);

            if let RateLimitDecision::Rejected { retry_after } =
                self.rate_limiter.admit(&key, calls, renewal_period)
            {
                let retry_after_seconds = (retry_after.as_secs_f64().ceil() as u64).max(1);
                return Err(GatewayError::RateLimitExceeded {
                    retry_after_seconds,
                });
            }
        }
        Ok(())
    }
}

/// OnError stage: always runs the on-error directives, then returns the
/// client-visible result. Directives here are infallible by
/// construction (header injection ignores invalid values, tracing does
/// not fail), so this stage can never itself fail.
fn on_error(
    error: GatewayError,
    policy: &EffectivePolicy,
    request: &GatewayRequest,
) -> GatewayResponse {
    let mut response = match &error {
        GatewayError::RateLimitExceeded {
            retry_after_seconds,
        } => GatewayResponse::rate_limited(*retry_after_seconds),
        // the transport detail stays in the log; the client body never
        // carries backend addresses
        GatewayError::BackendUnavailable(detail) => {
            tracing::warn!(
                request_id = %request.request_id,
                error = %detail,
                "Backend call failed"
            );
            GatewayResponse::error(StatusCode::BAD_GATEWAY, "Backend unavailable")
        }
        // configuration and internal errors are operational alerts;
        // the client sees a generic body, never backend detail
        GatewayError::Config(_) | GatewayError::Internal(_) | GatewayError::Io(_) => {
            tracing::error!(
                request_id = %request.request_id,
                error = %error,
                "Configuration error surfaced during request handling"
            );
            GatewayResponse::error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
        other => GatewayResponse::error(
            StatusCode::from_u16(other.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            &other.to_string(),
        ),
    };

    for directive in &policy.on_error {
        match directive {
            Directive::Trace { message } => {
                tracing::warn!(
                    request_id = %request.request_id,
                    outcome = error.outcome(),
                    "{}",
                    message
                );
            }
            Directive::SetHeader { name, value } => response.set_header(name, value),
            _ => {}
        }
    }

    response
}

fn finish(
    response: GatewayResponse,
    request: &GatewayRequest,
    names: Option<&(String, String)>,
    outcome: &str,
    started: Instant,
) -> GatewayResponse {
    let latency_ms = started.elapsed().as_millis() as u64;
    let response = response.with_processing_time(latency_ms);

    RequestEvent {
        request_id: &request.request_id,
        api: names.map(|(api, _)| api.as_str()),
        operation: names.map(|(_, operation)| operation.as_str()),
        outcome,
        status: response.status.as_u16(),
        latency_ms,
    }
    .emit();

    response
}
