use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::LoggingConfig;

/// Initialize the tracing system.
///
/// RUST_LOG takes precedence over the configured level so operators can
/// raise verbosity without touching the configuration snapshot.
pub fn init_tracing(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    if config.json_format {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::ChronoUtc::rfc_3339())
            .json();
        Registry::default().with(env_filter).with(fmt_layer).init();
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::ChronoUtc::rfc_3339());
        Registry::default().with(env_filter).with(fmt_layer).init();
    }

    tracing::info!("Tracing initialized");
}

/// Structured completion event emitted once per request.
///
/// This is the record the external diagnostics/log-export collaborator
/// consumes: resolved API and operation, outcome, status, latency.
#[derive(Debug)]
pub struct RequestEvent<'a> {
    pub request_id: &'a str,
    pub api: Option<&'a str>,
    pub operation: Option<&'a str>,
    pub outcome: &'a str,
    pub status: u16,
    pub latency_ms: u64,
}

impl RequestEvent<'_> {
    pub fn emit(&self) {
        tracing::info!(
            target: "apim_gateway::request",
            request_id = %self.request_id,
            api = self.api.unwrap_or("-"),
            operation = self.operation.unwrap_or("-"),
            outcome = self.outcome,
            status = self.status,
            latency_ms = self.latency_ms,
            "Request completed"
        );
    }
}
