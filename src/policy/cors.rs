use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};
use hyper::{HeaderMap, Method};

/// Declared CORS rule from the merged policy
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    /// Allowed origins; `*` allows any origin but suppresses
    /// credentialed-request headers
    allowed_origins: Vec<String>,

    /// Allowed methods, uppercase
    allowed_methods: Vec<String>,

    /// Allowed request headers
    allowed_headers: Vec<String>,
}

/// Result of evaluating a request against a CORS rule
#[derive(Debug)]
pub enum CorsOutcome {
    /// No Origin header; CORS does not apply
    NotApplicable,

    /// Preflight request, answered entirely by the gateway. The header
    /// map is empty when the preflight fails the check; the browser
    /// treats the missing headers as a denial.
    Preflight(HeaderMap),

    /// Cross-origin request allowed; headers to merge into the response
    Allowed(HeaderMap),

    /// Origin not allowed. The request still proceeds to the backend,
    /// but the response omits Access-Control-Allow-Origin and the
    /// browser blocks it. Non-fatal from the gateway's perspective.
    Denied,
}

impl CorsPolicy {
    pub fn new(
        allowed_origins: Vec<String>,
        allowed_methods: Vec<String>,
        allowed_headers: Vec<String>,
    ) -> Self {
        Self {
            allowed_origins,
            allowed_methods: allowed_methods
                .into_iter()
                .map(|m| m.to_ascii_uppercase())
                .collect(),
            allowed_headers,
        }
    }

    fn wildcard_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        self.wildcard_origin() || self.allowed_origins.iter().any(|o| o == origin)
    }

    fn method_allowed(&self, method: &str) -> bool {
        self.allowed_methods.iter().any(|m| m == "*")
            || self
                .allowed_methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(method))
    }

    /// Evaluate a request against this rule.
    ///
    /// `requested_method` is the Access-Control-Request-Method header
    /// carried by preflight requests.
    pub fn evaluate(
        &self,
        method: &Method,
        origin: Option<&str>,
        requested_method: Option<&str>,
    ) -> CorsOutcome {
        let Some(origin) = origin else {
            return CorsOutcome::NotApplicable;
        };

        if *method == Method::OPTIONS {
            let allowed = self.origin_allowed(origin)
                && requested_method.map_or(true, |m| self.method_allowed(m));
            let headers = if allowed {
                let mut headers = self.allow_headers(origin);
                if let Ok(value) = HeaderValue::from_str(&self.allowed_methods.join(", ")) {
                    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, value);
                }
                if !self.allowed_headers.is_empty() {
                    if let Ok(value) = HeaderValue::from_str(&self.allowed_headers.join(", ")) {
                        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, value);
                    }
                }
                headers
            } else {
                HeaderMap::new()
            };
            return CorsOutcome::Preflight(headers);
        }

        if self.origin_allowed(origin) {
            CorsOutcome::Allowed(self.allow_headers(origin))
        } else {
            CorsOutcome::Denied
        }
    }

    fn allow_headers(&self, origin: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if self.wildcard_origin() {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        } else {
            if let Ok(value) = HeaderValue::from_str(origin) {
                headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
            }
            headers.insert(
                ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        headers
    }
}
