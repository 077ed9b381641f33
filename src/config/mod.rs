use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::ConfigError;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Whether HTTP/2 is enabled on the frontend
    #[serde(default = "default_true")]
    pub enable_http2: bool,

    /// Minimum TLS version on both frontend and backend legs.
    /// Anything below 1.2 is not representable.
    #[serde(default)]
    pub min_tls_version: TlsVersion,
}

fn default_max_connections() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_connections: 1024,
            enable_http2: true,
            min_tls_version: TlsVersion::default(),
        }
    }
}

/// Minimum TLS version for frontend and backend connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TlsVersion {
    #[default]
    #[serde(rename = "1.2")]
    Tls12,
    #[serde(rename = "1.3")]
    Tls13,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Whether to log in JSON format
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Identity used as the rate-limit counter key.
///
/// The provisioning layer does not disambiguate this, so it is an
/// explicit operator choice rather than a built-in assumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RateLimitKeyMode {
    /// Key on the subscription key header, falling back to client IP
    /// for requests that carry no key
    #[default]
    Subscription,

    /// Key on the caller's network identity only
    ClientIp,
}

/// Transport protocol an API or backend speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

/// Versioning scheme for a version set.
///
/// Only path-segment versioning is supported: the version label is the
/// path component following the API base path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersioningScheme {
    Segment,
}

/// Version set definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionSetDefinition {
    /// Version set ID
    pub id: String,

    /// Display name
    pub display_name: String,

    /// Versioning scheme
    pub versioning_scheme: VersioningScheme,
}

/// Backend service definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendDefinition {
    /// Backend ID
    pub id: String,

    /// Backend protocol
    pub protocol: Protocol,

    /// Target URL
    pub url: String,

    /// Whether the certificate chain is validated on TLS connections
    #[serde(default = "default_true")]
    pub validate_certificate_chain: bool,

    /// Whether the certificate hostname is validated on TLS connections
    #[serde(default = "default_true")]
    pub validate_certificate_name: bool,

    /// Backend call timeout in seconds
    #[serde(default = "default_backend_timeout")]
    pub timeout_seconds: u64,
}

fn default_backend_timeout() -> u64 {
    30
}

/// Product definition grouping APIs under shared subscription rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductDefinition {
    /// Product ID
    pub id: String,

    /// Display name
    pub display_name: String,

    /// Whether the product is visible to callers
    pub published: bool,

    /// Whether calls require a subscription key
    pub subscription_required: bool,

    /// Whether subscriptions require operator approval
    #[serde(default)]
    pub approval_required: bool,

    /// Member API names
    pub apis: Vec<String>,
}

/// Operation definition within an API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationDefinition {
    /// Operation ID
    pub operation_id: String,

    /// HTTP method
    pub method: String,

    /// URL template relative to the API base path, with fixed segments
    /// and single named `{param}` segments
    pub url_template: String,

    /// Opaque reference to the request schema from the OpenAPI import
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_schema: Option<String>,

    /// Operation-scope policy override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyDefinition>,
}

/// API definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiDefinition {
    /// API name (identity)
    pub name: String,

    /// Display name
    pub display_name: String,

    /// Base path, e.g. "/stock"
    pub path: String,

    /// Supported protocols; must include https
    pub protocols: Vec<Protocol>,

    /// Version label of this API within its version set, e.g. "v1"
    pub version: String,

    /// Version set this API belongs to
    pub version_set_id: String,

    /// Default backend when no policy selects one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_backend_id: Option<String>,

    /// API-scope policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyDefinition>,

    /// Ordered operations
    pub operations: Vec<OperationDefinition>,
}

/// Policy document: ordered directives per stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyDefinition {
    #[serde(default)]
    pub inbound: Vec<DirectiveDefinition>,

    #[serde(default)]
    pub backend: Vec<DirectiveDefinition>,

    #[serde(default)]
    pub outbound: Vec<DirectiveDefinition>,

    #[serde(default)]
    pub on_error: Vec<DirectiveDefinition>,
}

/// A single policy directive
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DirectiveDefinition {
    /// Inheritance marker: the parent scope's directives for the same
    /// stage run at this position. A no-op when there is no parent.
    Base,

    /// CORS rule
    Cors {
        allowed_origins: Vec<String>,
        allowed_methods: Vec<String>,
        allowed_headers: Vec<String>,
    },

    /// Fixed-window rate limit
    RateLimit {
        calls: i64,
        renewal_period_seconds: u64,
    },

    /// Route the backend stage to the referenced backend
    SetBackendService { backend_id: String },

    /// Inject a response header
    SetHeader { name: String, value: String },

    /// Logging hook
    Trace { message: String },
}

/// Main gateway configuration: the immutable snapshot supplied by the
/// provisioning layer for one activation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rate-limit key granularity
    #[serde(default)]
    pub rate_limit_key: RateLimitKeyMode,

    /// Header carrying the subscription key
    #[serde(default = "default_subscription_key_header")]
    pub subscription_key_header: String,

    /// Version sets
    #[serde(default)]
    pub version_sets: Vec<VersionSetDefinition>,

    /// Backends
    #[serde(default)]
    pub backends: Vec<BackendDefinition>,

    /// Products
    #[serde(default)]
    pub products: Vec<ProductDefinition>,

    /// APIs
    #[serde(default)]
    pub apis: Vec<ApiDefinition>,

    /// Global-scope policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_policy: Option<PolicyDefinition>,
}

fn default_subscription_key_header() -> String {
    "X-Subscription-Key".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            rate_limit_key: RateLimitKeyMode::default(),
            subscription_key_header: default_subscription_key_header(),
            version_sets: Vec::new(),
            backends: Vec::new(),
            products: Vec::new(),
            apis: Vec::new(),
            global_policy: None,
        }
    }
}

impl GatewayConfig {
    /// Load a configuration snapshot from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::LoadError(format!("{}: {}", path.as_ref().display(), e)))?;
        let config: GatewayConfig = serde_json::from_str(&contents)
            .map_err(|e| ConfigError::LoadError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the declarative snapshot.
    ///
    /// Reference resolution happens when the runtime graph is built;
    /// this checks only shape-level invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for api in &self.apis {
            if !api.protocols.contains(&Protocol::Https) {
                return Err(ConfigError::ValidationError(format!(
                    "API '{}' must support https",
                    api.name
                )));
            }
            if !api.path.starts_with('/') {
                return Err(ConfigError::ValidationError(format!(
                    "API '{}' base path '{}' must start with '/'",
                    api.name, api.path
                )));
            }
            if api.version.is_empty() || api.version.contains('/') {
                return Err(ConfigError::ValidationError(format!(
                    "API '{}' has invalid version label '{}'",
                    api.name, api.version
                )));
            }
        }
        Ok(())
    }
}

/// Configuration manager trait
#[async_trait]
pub trait ConfigManager: Send + Sync {
    /// Get the current configuration
    async fn get_config(&self) -> GatewayConfig;

    /// Load configuration from file, replacing the current one
    async fn load_from_file(&self, path: &Path) -> Result<(), ConfigError>;

    /// Replace the current configuration
    async fn update_config(&self, config: GatewayConfig) -> Result<(), ConfigError>;
}

/// Basic implementation of the ConfigManager
pub struct BasicConfigManager {
    config: Arc<RwLock<GatewayConfig>>,
}

impl BasicConfigManager {
    /// Create a new BasicConfigManager with default configuration
    pub fn new() -> Self {
        Self {
            config: Arc::new(RwLock::new(GatewayConfig::default())),
        }
    }

    /// Create a new BasicConfigManager with the given configuration
    pub fn with_config(config: GatewayConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
        }
    }
}

impl Default for BasicConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigManager for BasicConfigManager {
    async fn get_config(&self) -> GatewayConfig {
        self.config.read().await.clone()
    }

    async fn load_from_file(&self, path: &Path) -> Result<(), ConfigError> {
        let config = GatewayConfig::from_file(path)?;
        self.update_config(config).await
    }

    async fn update_config(&self, config: GatewayConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let mut current = self.config.write().await;
        *current = config;
        Ok(())
    }
}
