pub mod cors;
pub mod rate_limit;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{DirectiveDefinition, PolicyDefinition};
use crate::error::ConfigError;
use crate::models::Backend;
use crate::policy::cors::CorsPolicy;

/// A runtime directive with every by-name reference resolved to a handle
#[derive(Debug, Clone)]
pub enum Directive {
    /// CORS rule
    Cors(CorsPolicy),

    /// Fixed-window rate limit. The scope key separates counter spaces
    /// of limiters declared at different scopes.
    RateLimit {
        calls: u32,
        renewal_period: Duration,
        scope_key: String,
    },

    /// Route the backend call to this backend
    SetBackendService(Arc<Backend>),

    /// Inject a response header
    SetHeader { name: String, value: String },

    /// Logging hook
    Trace { message: String },
}

/// One flattened directive sequence per pipeline stage, produced from
/// the global/API/operation scopes at configuration-load time
#[derive(Debug, Clone, Default)]
pub struct EffectivePolicy {
    pub inbound: Vec<Directive>,
    pub backend: Vec<Directive>,
    pub outbound: Vec<Directive>,
    pub on_error: Vec<Directive>,
}

impl EffectivePolicy {
    /// Flatten the three policy scopes into one effective policy.
    ///
    /// A narrower scope's directives before its `base` marker run before
    /// the inherited directives, those after run after. A scope without
    /// a `base` marker replaces the parent entirely; a scope with no
    /// policy document inherits the parent unchanged. A `base` marker
    /// with no parent scope is a no-op.
    pub fn flatten(
        global: Option<&PolicyDefinition>,
        api: Option<&PolicyDefinition>,
        operation: Option<&PolicyDefinition>,
        api_name: &str,
        operation_id: &str,
        backends: &HashMap<String, Arc<Backend>>,
    ) -> Result<Self, ConfigError> {
        let scopes = [
            ("global".to_string(), global),
            (api_name.to_string(), api),
            (format!("{}/{}", api_name, operation_id), operation),
        ];

        Ok(Self {
            inbound: flatten_stage(&scopes, |p| &p.inbound, backends)?,
            backend: flatten_stage(&scopes, |p| &p.backend, backends)?,
            outbound: flatten_stage(&scopes, |p| &p.outbound, backends)?,
            on_error: flatten_stage(&scopes, |p| &p.on_error, backends)?,
        })
    }

    /// The CORS rule in effect, if any (first inbound match wins)
    pub fn cors(&self) -> Option<&CorsPolicy> {
        self.inbound.iter().find_map(|d| match d {
            Directive::Cors(policy) => Some(policy),
            _ => None,
        })
    }

    /// All rate limits in effect, in execution order
    pub fn rate_limits(&self) -> impl Iterator<Item = (u32, Duration, &str)> {
        self.inbound.iter().filter_map(|d| match d {
            Directive::RateLimit {
                calls,
                renewal_period,
                scope_key,
            } => Some((*calls, *renewal_period, scope_key.as_str())),
            _ => None,
        })
    }

    /// The backend selected by the backend stage, if any.
    /// When several directives set the backend, the last one wins.
    pub fn backend_override(&self) -> Option<&Arc<Backend>> {
        self.backend.iter().rev().find_map(|d| match d {
            Directive::SetBackendService(backend) => Some(backend),
            _ => None,
        })
    }
}

fn flatten_stage(
    scopes: &[(String, Option<&PolicyDefinition>)],
    stage: impl Fn(&PolicyDefinition) -> &Vec<DirectiveDefinition>,
    backends: &HashMap<String, Arc<Backend>>,
) -> Result<Vec<Directive>, ConfigError> {
    let mut inherited: Vec<Directive> = Vec::new();

    for (scope_key, policy) in scopes {
        let Some(policy) = policy else {
            // no document at this scope: inherit the parent unchanged
            continue;
        };

        let mut merged = Vec::new();
        for def in stage(policy) {
            match def {
                DirectiveDefinition::Base => merged.extend(inherited.iter().cloned()),
                other => merged.push(convert(other, scope_key, backends)?),
            }
        }
        inherited = merged;
    }

    Ok(inherited)
}

fn convert(
    def: &DirectiveDefinition,
    scope_key: &str,
    backends: &HashMap<String, Arc<Backend>>,
) -> Result<Directive, ConfigError> {
    match def {
        DirectiveDefinition::Base => unreachable!("base markers are spliced by flatten_stage"),
        DirectiveDefinition::Cors {
            allowed_origins,
            allowed_methods,
            allowed_headers,
        } => Ok(Directive::Cors(CorsPolicy::new(
            allowed_origins.clone(),
            allowed_methods.clone(),
            allowed_headers.clone(),
        ))),
        DirectiveDefinition::RateLimit {
            calls,
            renewal_period_seconds,
        } => {
            if *calls <= 0 {
                return Err(ConfigError::ValidationError(format!(
                    "rate-limit at scope '{}' has non-positive call budget {}",
                    scope_key, calls
                )));
            }
            if *renewal_period_seconds == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "rate-limit at scope '{}' has zero renewal period",
                    scope_key
                )));
            }
            Ok(Directive::RateLimit {
                calls: *calls as u32,
                renewal_period: Duration::from_secs(*renewal_period_seconds),
                scope_key: scope_key.to_string(),
            })
        }
        DirectiveDefinition::SetBackendService { backend_id } => {
            let backend = backends.get(backend_id).cloned().ok_or_else(|| {
                ConfigError::UnresolvedReference {
                    kind: "backend",
                    id: backend_id.clone(),
                }
            })?;
            Ok(Directive::SetBackendService(backend))
        }
        DirectiveDefinition::SetHeader { name, value } => Ok(Directive::SetHeader {
            name: name.clone(),
            value: value.clone(),
        }),
        DirectiveDefinition::Trace { message } => Ok(Directive::Trace {
            message: message.clone(),
        }),
    }
}
