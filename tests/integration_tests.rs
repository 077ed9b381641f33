use std::time::Duration;

use apim_gateway::config::{
    ApiDefinition, BackendDefinition, DirectiveDefinition, GatewayConfig, OperationDefinition,
    PolicyDefinition, Protocol, ServerConfig, VersionSetDefinition, VersioningScheme,
};
use apim_gateway::core::gateway::{ApiGateway, Gateway};

use axum::extract::{Path, RawQuery};
use axum::response::Json;
use axum::routing::get;
use axum::Router as AxumRouter;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Test backend server for integration tests
struct TestBackend {
    name: String,
    handle: Option<JoinHandle<()>>,
}

impl TestBackend {
    async fn new(port: u16, name: &str) -> Self {
        let mut backend = Self {
            name: name.to_string(),
            handle: None,
        };
        backend.start(port).await;
        backend
    }

    async fn start(&mut self, port: u16) {
        let name = self.name.clone();
        let quote_name = name.clone();
        let echo_name = name.clone();

        let app = AxumRouter::new()
            .route(
                "/limitation",
                get(move || async move {
                    Json(json!({
                        "server": name,
                        "path": "/limitation",
                        "timestamp": chrono::Utc::now().to_rfc3339()
                    }))
                }),
            )
            .route(
                "/quote/:symbol",
                get(move |Path(symbol): Path<String>| async move {
                    Json(json!({
                        "server": quote_name,
                        "symbol": symbol
                    }))
                }),
            )
            .route(
                "/echo",
                get(move |RawQuery(query): RawQuery| async move {
                    Json(json!({
                        "server": echo_name,
                        "query": query
                    }))
                }),
            )
            .route(
                "/delay/:ms",
                get(move |Path(ms): Path<u64>| async move {
                    sleep(Duration::from_millis(ms)).await;
                    Json(json!({ "message": format!("Delayed {}ms", ms) }))
                }),
            );

        let addr = format!("127.0.0.1:{}", port).parse().unwrap();
        let handle = tokio::spawn(async move {
            axum::Server::bind(&addr)
                .serve(app.into_make_service())
                .await
                .unwrap();
        });

        // Give the server time to start
        sleep(Duration::from_millis(100)).await;
        self.handle = Some(handle);
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TestBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

fn backend_definition(id: &str, port: u16) -> BackendDefinition {
    BackendDefinition {
        id: id.to_string(),
        protocol: Protocol::Http,
        url: format!("http://127.0.0.1:{}", port),
        validate_certificate_chain: true,
        validate_certificate_name: true,
        timeout_seconds: 30,
    }
}

fn stock_operations() -> Vec<OperationDefinition> {
    vec![
        OperationDefinition {
            operation_id: "get-limitation".to_string(),
            method: "GET".to_string(),
            url_template: "/limitation".to_string(),
            request_schema: None,
            policy: None,
        },
        OperationDefinition {
            operation_id: "get-quote".to_string(),
            method: "GET".to_string(),
            url_template: "/quote/{symbol}".to_string(),
            request_schema: None,
            policy: None,
        },
        OperationDefinition {
            operation_id: "get-echo".to_string(),
            method: "GET".to_string(),
            url_template: "/echo".to_string(),
            request_schema: None,
            policy: None,
        },
        OperationDefinition {
            operation_id: "get-delay".to_string(),
            method: "GET".to_string(),
            url_template: "/delay/{ms}".to_string(),
            request_schema: None,
            policy: None,
        },
    ]
}

/// Helper to create a gateway configuration in front of one backend
fn create_test_config(gateway_port: u16, backend_port: u16) -> GatewayConfig {
    GatewayConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: gateway_port,
            ..Default::default()
        },
        version_sets: vec![VersionSetDefinition {
            id: "stock-versions".to_string(),
            display_name: "Stock API versions".to_string(),
            versioning_scheme: VersioningScheme::Segment,
        }],
        backends: vec![backend_definition("stock-service-backend", backend_port)],
        apis: vec![ApiDefinition {
            name: "stock".to_string(),
            display_name: "Stock API".to_string(),
            path: "/stock".to_string(),
            protocols: vec![Protocol::Https],
            version: "v1".to_string(),
            version_set_id: "stock-versions".to_string(),
            default_backend_id: Some("stock-service-backend".to_string()),
            policy: Some(PolicyDefinition {
                inbound: vec![DirectiveDefinition::Cors {
                    allowed_origins: vec!["*".to_string()],
                    allowed_methods: vec!["GET".to_string(), "OPTIONS".to_string()],
                    allowed_headers: vec!["Content-Type".to_string()],
                }],
                ..Default::default()
            }),
            operations: stock_operations(),
        }],
        ..Default::default()
    }
}

async fn start_gateway(config: &GatewayConfig) -> ApiGateway {
    let gateway = ApiGateway::new(config).unwrap();
    gateway.start().await.unwrap();
    sleep(Duration::from_millis(100)).await;
    gateway
}

#[tokio::test]
async fn test_request_proxied_to_default_backend() {
    let _backend = TestBackend::new(18081, "backend-a").await;
    let config = create_test_config(18080, 18081);
    let gateway = start_gateway(&config).await;

    let response = reqwest::get("http://127.0.0.1:18080/stock/v1/limitation")
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["server"], "backend-a");
    assert_eq!(body["path"], "/limitation");

    gateway.stop().await.unwrap();
}

#[tokio::test]
async fn test_path_parameters_and_query_forwarded() {
    let _backend = TestBackend::new(18083, "backend-a").await;
    let config = create_test_config(18082, 18083);
    let gateway = start_gateway(&config).await;

    let response = reqwest::get("http://127.0.0.1:18082/stock/v1/quote/MSFT")
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["symbol"], "MSFT");

    let response = reqwest::get("http://127.0.0.1:18082/stock/v1/echo?window=daily&full=1")
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["query"], "window=daily&full=1");

    gateway.stop().await.unwrap();
}

#[tokio::test]
async fn test_set_backend_service_routes_to_override() {
    let _backend_a = TestBackend::new(18085, "backend-a").await;
    let _backend_b = TestBackend::new(18086, "stock-service").await;

    let mut config = create_test_config(18084, 18085);
    config
        .backends
        .push(backend_definition("stock-service-override", 18086));
    config.apis[0].operations[0].policy = Some(PolicyDefinition {
        backend: vec![DirectiveDefinition::SetBackendService {
            backend_id: "stock-service-override".to_string(),
        }],
        ..Default::default()
    });

    let gateway = start_gateway(&config).await;

    // the overridden operation goes to the override backend
    let response = reqwest::get("http://127.0.0.1:18084/stock/v1/limitation")
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["server"], "stock-service");

    // other operations keep the API default
    let response = reqwest::get("http://127.0.0.1:18084/stock/v1/quote/MSFT")
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["server"], "backend-a");

    gateway.stop().await.unwrap();
}

#[tokio::test]
async fn test_backend_timeout_maps_to_504() {
    let _backend = TestBackend::new(18088, "backend-a").await;
    let mut config = create_test_config(18087, 18088);
    config.backends[0].timeout_seconds = 1;

    let gateway = start_gateway(&config).await;

    let response = reqwest::get("http://127.0.0.1:18087/stock/v1/delay/3000")
        .await
        .unwrap();
    assert_eq!(response.status(), 504);

    gateway.stop().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_backend_maps_to_502() {
    // no backend listening on the target port
    let config = create_test_config(18089, 18090);
    let gateway = start_gateway(&config).await;

    let response = reqwest::get("http://127.0.0.1:18089/stock/v1/limitation")
        .await
        .unwrap();
    assert_eq!(response.status(), 502);

    gateway.stop().await.unwrap();
}

#[tokio::test]
async fn test_routing_failures_are_404_over_the_wire() {
    let _backend = TestBackend::new(18092, "backend-a").await;
    let config = create_test_config(18091, 18092);
    let gateway = start_gateway(&config).await;

    // version set has no v2
    let response = reqwest::get("http://127.0.0.1:18091/stock/v2/limitation")
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // no API on this base path
    let response = reqwest::get("http://127.0.0.1:18091/weather/v1/now")
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // no such operation on v1
    let response = reqwest::get("http://127.0.0.1:18091/stock/v1/nonexistent")
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    gateway.stop().await.unwrap();
}

#[tokio::test]
async fn test_preflight_answered_without_backend_call() {
    // no backend running: a preflight answered with 200 proves the
    // gateway never tried to forward it
    let config = create_test_config(18093, 18094);
    let gateway = start_gateway(&config).await;

    let client = reqwest::Client::new();
    let response = client
        .request(
            reqwest::Method::OPTIONS,
            "http://127.0.0.1:18093/stock/v1/limitation",
        )
        .header("Origin", "https://foo.example")
        .header("Access-Control-Request-Method", "GET")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );

    gateway.stop().await.unwrap();
}

#[tokio::test]
async fn test_cors_headers_on_proxied_response() {
    let _backend = TestBackend::new(18096, "backend-a").await;
    let config = create_test_config(18095, 18096);
    let gateway = start_gateway(&config).await;

    let client = reqwest::Client::new();
    let response = client
        .get("http://127.0.0.1:18095/stock/v1/limitation")
        .header("Origin", "https://foo.example")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );

    gateway.stop().await.unwrap();
}

#[tokio::test]
async fn test_rate_limit_enforced_before_backend() {
    let _backend = TestBackend::new(18098, "backend-a").await;
    let mut config = create_test_config(18097, 18098);
    config.apis[0].operations[0].policy = Some(PolicyDefinition {
        inbound: vec![DirectiveDefinition::RateLimit {
            calls: 2,
            renewal_period_seconds: 60,
        }],
        ..Default::default()
    });

    let gateway = start_gateway(&config).await;

    for _ in 0..2 {
        let response = reqwest::get("http://127.0.0.1:18097/stock/v1/limitation")
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    let response = reqwest::get("http://127.0.0.1:18097/stock/v1/limitation")
        .await
        .unwrap();
    assert_eq!(response.status(), 429);
    let retry_after: u64 = response
        .headers()
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 60);

    // the limiter is scoped to the operation: a different operation
    // under the same API is not throttled
    let response = reqwest::get("http://127.0.0.1:18097/stock/v1/quote/MSFT")
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    gateway.stop().await.unwrap();
}

#[tokio::test]
async fn test_outbound_header_injection() {
    let _backend = TestBackend::new(18100, "backend-a").await;
    let mut config = create_test_config(18099, 18100);
    config.apis[0].policy = Some(PolicyDefinition {
        outbound: vec![DirectiveDefinition::SetHeader {
            name: "x-gateway".to_string(),
            value: "apim".to_string(),
        }],
        ..Default::default()
    });

    let gateway = start_gateway(&config).await;

    let response = reqwest::get("http://127.0.0.1:18099/stock/v1/limitation")
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers().get("x-gateway").unwrap(), "apim");

    gateway.stop().await.unwrap();
}

#[tokio::test]
async fn test_configuration_reload_without_restart() {
    let _backend = TestBackend::new(18102, "backend-a").await;
    let config = create_test_config(18101, 18102);
    let gateway = start_gateway(&config).await;

    let response = reqwest::get("http://127.0.0.1:18101/stock/v2/limitation")
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let mut updated = create_test_config(18101, 18102);
    let mut v2 = updated.apis[0].clone();
    v2.name = "stock-v2".to_string();
    v2.version = "v2".to_string();
    updated.apis.push(v2);
    gateway.reload(&updated).await.unwrap();

    let response = reqwest::get("http://127.0.0.1:18101/stock/v2/limitation")
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    gateway.stop().await.unwrap();
}
