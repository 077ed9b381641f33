use std::net::IpAddr;
use std::time::SystemTime;

use bytes::Bytes;
use hyper::{HeaderMap, Method, Uri};

/// Represents a request entering the gateway
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// HTTP method
    pub method: Method,

    /// Request URI
    pub uri: Uri,

    /// HTTP headers
    pub headers: HeaderMap,

    /// Request body
    pub body: Bytes,

    /// Client IP address
    pub client_ip: Option<IpAddr>,

    /// Request timestamp
    pub timestamp: SystemTime,

    /// Request ID for tracing
    pub request_id: String,
}

impl GatewayRequest {
    /// Create a new GatewayRequest
    pub fn new(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        client_ip: Option<IpAddr>,
    ) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
            client_ip,
            timestamp: SystemTime::now(),
            request_id: generate_request_id(),
        }
    }

    /// Get a header value as a string
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    /// The Origin header, present on cross-origin requests
    pub fn origin(&self) -> Option<String> {
        self.header("origin")
    }

    /// The subscription key, read from the configured header
    pub fn subscription_key(&self, header_name: &str) -> Option<String> {
        self.header(header_name).filter(|k| !k.is_empty())
    }

    /// Caller identity for rate limiting when keyed by network identity
    pub fn client_identity(&self) -> String {
        self.client_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Generate a unique request ID
fn generate_request_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::UNIX_EPOCH;

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let counter = COUNTER.fetch_add(1, Ordering::SeqCst);

    format!("{:x}-{:x}", timestamp, counter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;
    use std::net::Ipv4Addr;

    fn request_with_headers(headers: HeaderMap) -> GatewayRequest {
        GatewayRequest::new(
            Method::GET,
            Uri::from_static("http://gateway.example/stock/v1/limitation"),
            headers,
            Bytes::new(),
            Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))),
        )
    }

    #[test]
    fn test_header_lookup() {
        let mut headers = HeaderMap::new();
        headers.insert("origin", HeaderValue::from_static("https://foo.example"));

        let request = request_with_headers(headers);
        assert_eq!(request.origin(), Some("https://foo.example".to_string()));
        assert_eq!(request.header("non-existent"), None);
        assert!(!request.request_id.is_empty());
    }

    #[test]
    fn test_subscription_key_ignores_empty_values() {
        let mut headers = HeaderMap::new();
        headers.insert("x-subscription-key", HeaderValue::from_static(""));

        let request = request_with_headers(headers);
        assert_eq!(request.subscription_key("x-subscription-key"), None);

        let mut headers = HeaderMap::new();
        headers.insert("x-subscription-key", HeaderValue::from_static("abc123"));
        let request = request_with_headers(headers);
        assert_eq!(
            request.subscription_key("x-subscription-key"),
            Some("abc123".to_string())
        );
    }

    #[test]
    fn test_client_identity_falls_back_when_ip_unknown() {
        let mut request = request_with_headers(HeaderMap::new());
        assert_eq!(request.client_identity(), "192.168.1.1");

        request.client_ip = None;
        assert_eq!(request.client_identity(), "unknown");
    }
}
