use thiserror::Error;

/// Gateway error types
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Routing failed: {0}")]
    Routing(#[from] RoutingError),

    #[error("Rate limit exceeded, retry after {retry_after_seconds}s")]
    RateLimitExceeded { retry_after_seconds: u64 },

    #[error("Subscription key required")]
    SubscriptionRequired,

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend call timed out")]
    BackendTimeout,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP status code mapping for gateway errors
impl GatewayError {
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Routing(_) => 404,
            GatewayError::RateLimitExceeded { .. } => 429,
            GatewayError::SubscriptionRequired => 401,
            GatewayError::BackendUnavailable(_) => 502,
            GatewayError::BackendTimeout => 504,
            GatewayError::Config(_) => 500,
            GatewayError::Internal(_) => 500,
            GatewayError::Io(_) => 500,
        }
    }

    /// Short outcome label for the per-request telemetry event
    pub fn outcome(&self) -> &'static str {
        match self {
            GatewayError::Routing(RoutingError::NotFound(_)) => "not_found",
            GatewayError::Routing(RoutingError::UnknownVersion { .. }) => "unknown_version",
            GatewayError::Routing(RoutingError::OperationNotFound { .. }) => "operation_not_found",
            GatewayError::RateLimitExceeded { .. } => "rate_limited",
            GatewayError::SubscriptionRequired => "subscription_required",
            GatewayError::BackendUnavailable(_) => "backend_unavailable",
            GatewayError::BackendTimeout => "backend_timeout",
            GatewayError::Config(_) => "configuration_error",
            GatewayError::Internal(_) | GatewayError::Io(_) => "internal_error",
        }
    }
}

/// Routing specific errors
///
/// All three classes surface to the client as HTTP 404; the distinction
/// is kept for telemetry and the on-error stage.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("No API matches path {0}")]
    NotFound(String),

    #[error("API {api} has no version '{version}'")]
    UnknownVersion { api: String, version: String },

    #[error("API {api} has no operation for {method} {path}")]
    OperationNotFound {
        api: String,
        method: String,
        path: String,
    },
}

/// Configuration specific errors
///
/// Detected at load/activation time wherever possible. A configuration
/// error first observed at request time is logged as an operational
/// alert and returned as a plain 500.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Unresolved reference: {kind} '{id}'")]
    UnresolvedReference { kind: &'static str, id: String },

    #[error("No backend configured for operation {0}")]
    MissingBackend(String),
}
