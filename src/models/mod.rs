//! Resolved runtime configuration graph.
//!
//! The declarative snapshot from the provisioning layer references
//! resources by name. Resolution runs once at load/activation time and
//! turns every reference into a direct handle; request handling never
//! re-resolves names or re-merges policy documents.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use hyper::Method;

use crate::config::{
    GatewayConfig, LoggingConfig, Protocol, RateLimitKeyMode, ServerConfig, VersioningScheme,
};
use crate::core::resolver::PathTemplate;
use crate::error::ConfigError;
use crate::policy::EffectivePolicy;

/// Backend service a request can be forwarded to
#[derive(Debug)]
pub struct Backend {
    /// Backend ID
    pub id: String,

    /// Backend protocol
    pub protocol: Protocol,

    /// Target URL
    pub url: String,

    /// Whether the certificate chain is validated
    pub validate_certificate_chain: bool,

    /// Whether the certificate hostname is validated
    pub validate_certificate_name: bool,

    /// Backend call timeout
    pub timeout: Duration,
}

/// Product grouping APIs under shared subscription rules
#[derive(Debug)]
pub struct Product {
    pub id: String,
    pub display_name: String,
    pub published: bool,
    pub subscription_required: bool,
    pub approval_required: bool,
}

/// Version set an API belongs to
#[derive(Debug)]
pub struct VersionSet {
    pub id: String,
    pub display_name: String,
    pub scheme: VersioningScheme,

    /// Member version labels in declaration order
    pub versions: Vec<String>,
}

/// One routable operation
#[derive(Debug)]
pub struct OperationRuntime {
    /// Operation ID
    pub operation_id: String,

    /// HTTP method, matched exactly
    pub method: Method,

    /// Compiled URL template
    pub template: PathTemplate,

    /// Opaque request-schema reference from the OpenAPI import
    pub request_schema: Option<String>,

    /// Flattened effective policy for this operation
    pub policy: EffectivePolicy,
}

/// One API version with every reference resolved
#[derive(Debug)]
pub struct ApiRuntime {
    pub name: String,
    pub display_name: String,
    pub base_path: String,
    pub version: String,
    pub version_set: Arc<VersionSet>,
    pub operations: Vec<Arc<OperationRuntime>>,
    pub default_backend: Option<Arc<Backend>>,
    pub products: Vec<Arc<Product>>,

    /// Global and API scopes flattened without an operation scope.
    /// Applied to requests that match this API's base path but fail to
    /// resolve an operation, so API-level CORS still answers preflight
    /// requests for unroutable paths.
    pub api_policy: EffectivePolicy,

    /// Whether any published product exposes this API. Configurations
    /// with no product declarations run without the product gate.
    pub exposed: bool,

    /// Whether calls must carry a subscription key
    pub subscription_required: bool,
}

/// Engine-level settings carried alongside the resolved graph
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub rate_limit_key: RateLimitKeyMode,
    pub subscription_key_header: String,
}

/// The immutable configuration graph for one activation
#[derive(Debug)]
pub struct RuntimeConfig {
    pub settings: RuntimeSettings,
    pub apis: Vec<Arc<ApiRuntime>>,
    pub backends: Vec<Arc<Backend>>,

    /// Global-scope policy flattened on its own, applied when a request
    /// fails routing before an operation policy is known
    pub global_policy: EffectivePolicy,
}

impl RuntimeConfig {
    /// Build the resolved graph from a declarative snapshot.
    ///
    /// Every unresolved reference, ambiguous operation template, or
    /// invalid policy parameter is a load-time error; nothing is left
    /// to fail at request time.
    pub fn resolve(config: &GatewayConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let backends = resolve_backends(config)?;
        let products: HashMap<String, Arc<Product>> = config
            .products
            .iter()
            .map(|p| {
                (
                    p.id.clone(),
                    Arc::new(Product {
                        id: p.id.clone(),
                        display_name: p.display_name.clone(),
                        published: p.published,
                        subscription_required: p.subscription_required,
                        approval_required: p.approval_required,
                    }),
                )
            })
            .collect();

        // product membership by API name; member names must resolve
        let mut products_by_api: HashMap<&str, Vec<Arc<Product>>> = HashMap::new();
        for product in &config.products {
            for api_name in &product.apis {
                if !config.apis.iter().any(|a| &a.name == api_name) {
                    return Err(ConfigError::UnresolvedReference {
                        kind: "api",
                        id: api_name.clone(),
                    });
                }
                products_by_api
                    .entry(api_name.as_str())
                    .or_default()
                    .push(Arc::clone(&products[&product.id]));
            }
        }

        let version_sets = resolve_version_sets(config)?;

        let mut apis = Vec::with_capacity(config.apis.len());
        for api_def in &config.apis {
            let version_set = Arc::clone(version_sets.get(&api_def.version_set_id).ok_or(
                ConfigError::UnresolvedReference {
                    kind: "version_set",
                    id: api_def.version_set_id.clone(),
                },
            )?);

            let default_backend = api_def
                .default_backend_id
                .as_ref()
                .map(|id| {
                    backends
                        .get(id)
                        .cloned()
                        .ok_or(ConfigError::UnresolvedReference {
                            kind: "backend",
                            id: id.clone(),
                        })
                })
                .transpose()?;

            let mut operations = Vec::with_capacity(api_def.operations.len());
            for op_def in &api_def.operations {
                let method = Method::from_str(&op_def.method).map_err(|_| {
                    ConfigError::ValidationError(format!(
                        "operation '{}' has invalid method '{}'",
                        op_def.operation_id, op_def.method
                    ))
                })?;
                let template = PathTemplate::parse(&op_def.url_template)?;
                let policy = EffectivePolicy::flatten(
                    config.global_policy.as_ref(),
                    api_def.policy.as_ref(),
                    op_def.policy.as_ref(),
                    &api_def.name,
                    &op_def.operation_id,
                    &backends,
                )?;

                operations.push(Arc::new(OperationRuntime {
                    operation_id: op_def.operation_id.clone(),
                    method,
                    template,
                    request_schema: op_def.request_schema.clone(),
                    policy,
                }));
            }

            // ambiguous templates are a configuration error, not a
            // runtime tie-break
            for (i, a) in operations.iter().enumerate() {
                for b in operations.iter().skip(i + 1) {
                    if a.method == b.method && a.template.overlaps(&b.template) {
                        return Err(ConfigError::ValidationError(format!(
                            "API '{}': operations '{}' and '{}' have ambiguous templates",
                            api_def.name, a.operation_id, b.operation_id
                        )));
                    }
                }
            }

            let api_policy = EffectivePolicy::flatten(
                config.global_policy.as_ref(),
                api_def.policy.as_ref(),
                None,
                &api_def.name,
                "",
                &backends,
            )?;

            let api_products = products_by_api
                .get(api_def.name.as_str())
                .cloned()
                .unwrap_or_default();
            let exposed = config.products.is_empty()
                || api_products.iter().any(|p| p.published);
            let subscription_required = api_products
                .iter()
                .any(|p| p.published && p.subscription_required);

            apis.push(Arc::new(ApiRuntime {
                name: api_def.name.clone(),
                display_name: api_def.display_name.clone(),
                base_path: api_def.path.clone(),
                version: api_def.version.clone(),
                version_set,
                operations,
                default_backend,
                products: api_products,
                api_policy,
                exposed,
                subscription_required,
            }));
        }

        let global_policy = EffectivePolicy::flatten(
            config.global_policy.as_ref(),
            None,
            None,
            "",
            "",
            &backends,
        )?;

        Ok(Self {
            settings: RuntimeSettings {
                server: config.server.clone(),
                logging: config.logging.clone(),
                rate_limit_key: config.rate_limit_key,
                subscription_key_header: config.subscription_key_header.clone(),
            },
            apis,
            backends: backends.into_values().collect(),
            global_policy,
        })
    }
}

fn resolve_backends(
    config: &GatewayConfig,
) -> Result<HashMap<String, Arc<Backend>>, ConfigError> {
    let mut backends = HashMap::new();
    for def in &config.backends {
        let uri: hyper::Uri = def.url.parse().map_err(|_| {
            ConfigError::ValidationError(format!(
                "backend '{}' has invalid URL '{}'",
                def.id, def.url
            ))
        })?;
        let expected_scheme = match def.protocol {
            Protocol::Http => "http",
            Protocol::Https => "https",
        };
        if uri.scheme_str() != Some(expected_scheme) {
            return Err(ConfigError::ValidationError(format!(
                "backend '{}' URL scheme does not match declared protocol {}",
                def.id, expected_scheme
            )));
        }

        backends.insert(
            def.id.clone(),
            Arc::new(Backend {
                id: def.id.clone(),
                protocol: def.protocol,
                url: def.url.trim_end_matches('/').to_string(),
                validate_certificate_chain: def.validate_certificate_chain,
                validate_certificate_name: def.validate_certificate_name,
                timeout: Duration::from_secs(def.timeout_seconds),
            }),
        );
    }
    Ok(backends)
}

fn resolve_version_sets(
    config: &GatewayConfig,
) -> Result<HashMap<String, Arc<VersionSet>>, ConfigError> {
    let mut version_sets = HashMap::new();
    for set_def in &config.version_sets {
        let members: Vec<_> = config
            .apis
            .iter()
            .filter(|a| a.version_set_id == set_def.id)
            .collect();

        // members share one base path and differ only by version segment
        let mut versions = Vec::with_capacity(members.len());
        for member in &members {
            if member.path != members[0].path {
                return Err(ConfigError::ValidationError(format!(
                    "version set '{}': members '{}' and '{}' disagree on base path",
                    set_def.id, members[0].name, member.name
                )));
            }
            if versions.contains(&member.version) {
                return Err(ConfigError::ValidationError(format!(
                    "version set '{}': duplicate version label '{}'",
                    set_def.id, member.version
                )));
            }
            versions.push(member.version.clone());
        }

        version_sets.insert(
            set_def.id.clone(),
            Arc::new(VersionSet {
                id: set_def.id.clone(),
                display_name: set_def.display_name.clone(),
                scheme: set_def.versioning_scheme,
                versions,
            }),
        );
    }
    Ok(version_sets)
}
