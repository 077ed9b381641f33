use std::collections::HashMap;
use std::sync::Arc;

use hyper::header::{HeaderMap, CONTENT_LENGTH, HOST};
use reqwest::redirect::Policy;
use reqwest::Client;

use crate::config::TlsVersion;
use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::error::{ConfigError, GatewayError};
use crate::models::{ApiRuntime, Backend};
use crate::policy::EffectivePolicy;

/// Hop-by-hop headers, never forwarded on either leg
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Select the backend for a resolved operation.
///
/// A `set-backend-service` directive in the merged policy wins over the
/// API's default backend. Absence of both is a configuration error:
/// surfaced as a 500 with an internal diagnostic, never as backend
/// detail to the client.
pub fn select_backend(
    api: &ApiRuntime,
    policy: &EffectivePolicy,
    operation_id: &str,
) -> Result<Arc<Backend>, GatewayError> {
    if let Some(backend) = policy.backend_override() {
        return Ok(Arc::clone(backend));
    }
    if let Some(backend) = &api.default_backend {
        return Ok(Arc::clone(backend));
    }
    Err(GatewayError::Config(ConfigError::MissingBackend(format!(
        "{}/{}",
        api.name, operation_id
    ))))
}

/// Forwarder performing the backend leg of a request.
///
/// One HTTP client is built per configured backend at activation time,
/// so each backend's TLS validation flags and the TLS 1.2 floor are
/// baked into its connector. Calls are single-attempt: connection
/// errors and timeouts are reported upstream, never retried.
pub struct Forwarder {
    clients: HashMap<String, Client>,
}

impl Forwarder {
    /// Build per-backend clients from the resolved configuration
    pub fn new(backends: &[Arc<Backend>], min_tls: TlsVersion) -> Result<Self, ConfigError> {
        let min_version = match min_tls {
            TlsVersion::Tls12 => reqwest::tls::Version::TLS_1_2,
            TlsVersion::Tls13 => reqwest::tls::Version::TLS_1_3,
        };

        let mut clients = HashMap::with_capacity(backends.len());
        for backend in backends {
            let client = Client::builder()
                .danger_accept_invalid_certs(!backend.validate_certificate_chain)
                .danger_accept_invalid_hostnames(!backend.validate_certificate_name)
                .min_tls_version(min_version)
                .redirect(Policy::none())
                .build()
                .map_err(|e| {
                    ConfigError::ValidationError(format!(
                        "failed to build client for backend '{}': {}",
                        backend.id, e
                    ))
                })?;
            clients.insert(backend.id.clone(), client);
        }

        Ok(Self { clients })
    }

    /// Forward the request to the backend and return its response.
    ///
    /// `remainder` is the operation-relative path produced by the
    /// resolver; the original query string is carried over unchanged.
    pub async fn forward(
        &self,
        backend: &Backend,
        request: &GatewayRequest,
        remainder: &str,
    ) -> Result<GatewayResponse, GatewayError> {
        let client = self.clients.get(&backend.id).ok_or_else(|| {
            GatewayError::Internal(format!("no client for backend '{}'", backend.id))
        })?;

        let mut url = format!("{}{}", backend.url, remainder);
        if let Some(query) = request.uri.query() {
            url.push('?');
            url.push_str(query);
        }

        tracing::debug!(
            request_id = %request.request_id,
            backend = %backend.id,
            url = %url,
            "Forwarding to backend"
        );

        let response = client
            .request(request.method.clone(), &url)
            .headers(filter_forwarded_headers(&request.headers))
            .body(request.body.clone())
            .timeout(backend.timeout)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let headers = filter_response_headers(response.headers());
        let body = response.bytes().await.map_err(map_transport_error)?;

        Ok(GatewayResponse::new(status, headers, body)
            .with_backend_id(backend.id.clone()))
    }
}

/// Strip hop-by-hop headers plus Host (the client sets its own) from
/// the forwarded request
fn filter_forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::new();
    for (name, value) in headers {
        if HOP_BY_HOP_HEADERS.contains(&name.as_str()) || name == &HOST || name == &CONTENT_LENGTH
        {
            continue;
        }
        filtered.insert(name.clone(), value.clone());
    }
    filtered
}

/// Strip hop-by-hop headers from the backend response
fn filter_response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::new();
    for (name, value) in headers {
        if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        filtered.insert(name.clone(), value.clone());
    }
    filtered
}

/// Map a transport failure to the error taxonomy: timeouts become 504,
/// everything else on the backend leg (refused, reset, TLS failure)
/// becomes 502
fn map_transport_error(error: reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        GatewayError::BackendTimeout
    } else {
        GatewayError::BackendUnavailable(error.to_string())
    }
}
