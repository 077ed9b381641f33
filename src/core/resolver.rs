use std::sync::Arc;

use hyper::Method;
use regex::Regex;

use crate::error::{ConfigError, RoutingError};
use crate::models::{ApiRuntime, OperationRuntime, RuntimeConfig};

/// Path parameter extracted from a template match
#[derive(Debug, Clone)]
pub struct PathParam {
    /// Parameter name
    pub name: String,

    /// Parameter value
    pub value: String,
}

/// One segment of an operation URL template
#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplateSegment {
    Literal(String),
    Param(String),
}

/// Compiled operation URL template.
///
/// Templates support fixed segments and single named `{param}` segments;
/// a parameter matches exactly one path segment.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    /// Original template string
    template: String,

    /// Compiled regex for matching
    regex: Regex,

    /// Parsed segments, used for the ambiguity check
    segments: Vec<TemplateSegment>,

    /// Parameter names in order of appearance
    param_names: Vec<String>,
}

impl PathTemplate {
    /// Compile a template string such as "/limitation" or "/quote/{symbol}"
    pub fn parse(template: &str) -> Result<Self, ConfigError> {
        if !template.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "operation template '{}' must start with '/'",
                template
            )));
        }

        let mut segments = Vec::new();
        let mut param_names = Vec::new();
        let mut regex_pattern = "^".to_string();

        for part in template.split('/').skip(1) {
            regex_pattern.push('/');

            if part.starts_with('{') && part.ends_with('}') && part.len() > 2 {
                let name = part[1..part.len() - 1].to_string();
                if param_names.contains(&name) {
                    return Err(ConfigError::ValidationError(format!(
                        "operation template '{}' repeats parameter '{}'",
                        template, name
                    )));
                }
                param_names.push(name.clone());
                segments.push(TemplateSegment::Param(name));
                regex_pattern.push_str(r"([^/]+)");
            } else if part.contains('{') || part.contains('}') {
                return Err(ConfigError::ValidationError(format!(
                    "operation template '{}' has malformed segment '{}'",
                    template, part
                )));
            } else {
                segments.push(TemplateSegment::Literal(part.to_string()));
                regex_pattern.push_str(&regex::escape(part));
            }
        }

        regex_pattern.push('$');

        let regex = Regex::new(&regex_pattern).map_err(|e| {
            ConfigError::ValidationError(format!("invalid operation template '{}': {}", template, e))
        })?;

        Ok(Self {
            template: template.to_string(),
            regex,
            segments,
            param_names,
        })
    }

    /// The original template string
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Check whether this template matches the given path and extract
    /// its parameters
    pub fn matches(&self, path: &str) -> Option<Vec<PathParam>> {
        let captures = self.regex.captures(path)?;

        let mut params = Vec::new();
        for (i, name) in self.param_names.iter().enumerate() {
            if let Some(value) = captures.get(i + 1) {
                params.push(PathParam {
                    name: name.clone(),
                    value: value.as_str().to_string(),
                });
            }
        }

        Some(params)
    }

    /// Whether some path could match both this template and `other`.
    /// Two templates overlap when they have the same segment count and
    /// every position is either equal literals or a parameter on at
    /// least one side.
    pub fn overlaps(&self, other: &PathTemplate) -> bool {
        if self.segments.len() != other.segments.len() {
            return false;
        }
        self.segments
            .iter()
            .zip(other.segments.iter())
            .all(|(a, b)| match (a, b) {
                (TemplateSegment::Literal(x), TemplateSegment::Literal(y)) => x == y,
                _ => true,
            })
    }
}

/// A resolved route: the API version and operation a request maps to
#[derive(Debug, Clone)]
pub struct RouteResolution {
    /// Matched API version
    pub api: Arc<ApiRuntime>,

    /// Matched operation
    pub operation: Arc<OperationRuntime>,

    /// Extracted template parameters
    pub params: Vec<PathParam>,

    /// Path remainder forwarded to the backend (operation-relative,
    /// version segment stripped)
    pub remainder: String,
}

/// Best-effort API lookup by base path, used to pick the policy in
/// effect when full resolution fails (so API-level CORS still answers
/// preflight requests for unroutable paths). Prefers the member whose
/// version segment matches; falls back to the first member on the
/// matched base path.
pub fn find_api_for_path<'a>(
    runtime: &'a RuntimeConfig,
    path: &str,
) -> Option<&'a Arc<ApiRuntime>> {
    let base_path = runtime
        .apis
        .iter()
        .filter(|api| api.exposed)
        .map(|api| api.base_path.as_str())
        .filter(|base| {
            path == *base
                || (path.starts_with(*base) && path.as_bytes().get(base.len()) == Some(&b'/'))
        })
        .max_by_key(|base| base.len())?
        .to_string();

    let version = path[base_path.len()..]
        .trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or("")
        .to_string();

    let mut fallback = None;
    for api in runtime
        .apis
        .iter()
        .filter(|api| api.exposed && api.base_path == base_path)
    {
        if api.version == version {
            return Some(api);
        }
        if fallback.is_none() {
            fallback = Some(api);
        }
    }
    fallback
}

/// Resolve a request path and method against the configuration snapshot.
///
/// The path shape is `{basePath}/{versionSegment}/{operationPath}`: the
/// longest matching base path selects the version set, the next segment
/// selects the member API by exact case-sensitive version label, and the
/// remaining path and method select the operation, first declared match
/// wins.
pub fn resolve(
    runtime: &RuntimeConfig,
    method: &Method,
    path: &str,
) -> Result<RouteResolution, RoutingError> {
    // longest base-path prefix on a segment boundary
    let base_path = runtime
        .apis
        .iter()
        .filter(|api| api.exposed)
        .map(|api| api.base_path.as_str())
        .filter(|base| {
            path == *base
                || (path.starts_with(*base) && path.as_bytes().get(base.len()) == Some(&b'/'))
        })
        .max_by_key(|base| base.len())
        .ok_or_else(|| RoutingError::NotFound(path.to_string()))?
        .to_string();

    let members: Vec<&Arc<ApiRuntime>> = runtime
        .apis
        .iter()
        .filter(|api| api.exposed && api.base_path == base_path)
        .collect();

    let rest = path[base_path.len()..].trim_start_matches('/');
    let version = rest.split('/').next().unwrap_or("");

    let api = members
        .iter()
        .find(|api| api.version == version)
        .ok_or_else(|| RoutingError::UnknownVersion {
            api: members[0].name.clone(),
            version: version.to_string(),
        })?;

    let after_version = &rest[version.len()..];
    let remainder = if after_version.is_empty() {
        "/".to_string()
    } else {
        after_version.to_string()
    };

    for operation in &api.operations {
        if &operation.method != method {
            continue;
        }
        if let Some(params) = operation.template.matches(&remainder) {
            return Ok(RouteResolution {
                api: Arc::clone(api),
                operation: Arc::clone(operation),
                params,
                remainder,
            });
        }
    }

    Err(RoutingError::OperationNotFound {
        api: api.name.clone(),
        method: method.to_string(),
        path: remainder,
    })
}
