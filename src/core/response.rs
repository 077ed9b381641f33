use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue, RETRY_AFTER};
use hyper::{HeaderMap, StatusCode};

/// Represents a response leaving the gateway
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    /// HTTP status code
    pub status: StatusCode,

    /// HTTP headers
    pub headers: HeaderMap,

    /// Response body
    pub body: Bytes,

    /// Backend that served the request, if one was called
    pub backend_id: Option<String>,

    /// Time taken to process the request in milliseconds
    pub processing_time_ms: u64,
}

impl GatewayResponse {
    /// Create a new GatewayResponse
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            backend_id: None,
            processing_time_ms: 0,
        }
    }

    /// Create a new error response with a JSON body
    pub fn error(status: StatusCode, message: &str) -> Self {
        let body = format!("{{\"error\":\"{}\"}}", message.replace('\"', "\\\""));

        let mut headers = HeaderMap::new();
        headers.insert(
            hyper::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        Self::new(status, headers, Bytes::from(body))
    }

    /// Create a rate-limit rejection with a Retry-After header
    pub fn rate_limited(retry_after_seconds: u64) -> Self {
        let mut response = Self::error(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded");
        if let Ok(value) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
            response.headers.insert(RETRY_AFTER, value);
        }
        response
    }

    /// Set the backend that served this response
    pub fn with_backend_id(mut self, backend_id: String) -> Self {
        self.backend_id = Some(backend_id);
        self
    }

    /// Set processing time for this response
    pub fn with_processing_time(mut self, processing_time_ms: u64) -> Self {
        self.processing_time_ms = processing_time_ms;
        self
    }

    /// Merge headers into this response, overwriting existing values
    pub fn apply_headers(&mut self, headers: &HeaderMap) {
        for (name, value) in headers {
            self.headers.insert(name.clone(), value.clone());
        }
    }

    /// Insert a single header by name, ignoring invalid values
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
    }
}
