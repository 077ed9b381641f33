use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::config::{GatewayConfig, ServerConfig};
use crate::core::pipeline::PolicyPipeline;
use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::error::{ConfigError, GatewayError};
use crate::models::RuntimeConfig;

/// Core API Gateway trait that defines the main functionality
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Process an incoming request and return the final response.
    /// Per-request failures are converted inside the policy pipeline;
    /// this never errors.
    async fn process_request(&self, request: GatewayRequest) -> GatewayResponse;

    /// Start the gateway server
    async fn start(&self) -> Result<(), GatewayError>;

    /// Stop the gateway server
    async fn stop(&self) -> Result<(), GatewayError>;

    /// Check if the gateway is healthy
    async fn health_check(&self) -> bool;
}

/// Server state that can be mutated
struct ServerState {
    /// Server handle for graceful shutdown
    server_handle: Option<tokio::task::JoinHandle<()>>,
    /// Shutdown signal sender
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    /// Rate-limit counter housekeeping task
    purge_handle: Option<tokio::task::JoinHandle<()>>,
}

/// The gateway engine: one policy pipeline execution per request
pub struct ApiGateway {
    /// Policy pipeline holding the active configuration
    pipeline: Arc<PolicyPipeline>,
    /// Bind settings, captured at activation
    server: ServerConfig,
    /// Server state (handle and shutdown sender)
    server_state: Arc<tokio::sync::Mutex<ServerState>>,
}

impl ApiGateway {
    /// Create a gateway from a declarative configuration snapshot.
    /// All reference resolution and policy merging happens here; an
    /// invalid snapshot never becomes an activation.
    pub fn new(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let runtime = RuntimeConfig::resolve(config)?;
        let server = runtime.settings.server.clone();
        Ok(Self {
            pipeline: Arc::new(PolicyPipeline::new(runtime)?),
            server,
            server_state: Arc::new(tokio::sync::Mutex::new(ServerState {
                server_handle: None,
                shutdown_tx: None,
                purge_handle: None,
            })),
        })
    }

    /// Atomically activate a new configuration snapshot without
    /// restarting the server. In-flight requests finish on the
    /// snapshot they started with.
    pub async fn reload(&self, config: &GatewayConfig) -> Result<(), ConfigError> {
        self.pipeline.reload(RuntimeConfig::resolve(config)?).await
    }

    /// The policy pipeline driving this gateway
    pub fn pipeline(&self) -> Arc<PolicyPipeline> {
        Arc::clone(&self.pipeline)
    }
}

#[async_trait]
impl Gateway for ApiGateway {
    async fn process_request(&self, request: GatewayRequest) -> GatewayResponse {
        self.pipeline.execute(request).await
    }

    async fn start(&self) -> Result<(), GatewayError> {
        let mut server_state = self.server_state.lock().await;
        if server_state.server_handle.is_some() {
            return Err(GatewayError::Internal(
                "Server is already running".to_string(),
            ));
        }

        let pipeline = Arc::clone(&self.pipeline);

        let app = axum::Router::new()
            .route("/health", axum::routing::get(|| async { "OK" }))
            // every API request goes through the policy pipeline
            .fallback(move |req: axum::http::Request<axum::body::Body>| {
                let pipeline = pipeline.clone();
                async move {
                    let (parts, body) = req.into_parts();
                    let body_bytes = match hyper::body::to_bytes(body).await {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            tracing::error!("Failed to read request body: {}", e);
                            return axum::http::Response::builder()
                                .status(500)
                                .body(axum::body::Body::from("Failed to read request body"))
                                .unwrap();
                        }
                    };

                    let client_ip = parts
                        .headers
                        .get("x-forwarded-for")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.split(',').next())
                        .and_then(|s| s.trim().parse().ok());

                    let request = GatewayRequest::new(
                        parts.method,
                        parts.uri,
                        parts.headers,
                        body_bytes,
                        client_ip,
                    );

                    let response = pipeline.execute(request).await;

                    let mut builder = axum::http::Response::builder().status(response.status);
                    for (name, value) in response.headers.iter() {
                        builder = builder.header(name, value);
                    }
                    builder.body(axum::body::Body::from(response.body)).unwrap()
                }
            })
            .layer(tower_http::trace::TraceLayer::new_for_http());

        let addr = format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| GatewayError::Internal(format!("Invalid address: {}", e)))?;

        tracing::info!("Starting gateway server on {}", addr);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let enable_http2 = self.server.enable_http2;
        let server_config = self.server.clone();

        let server_handle = tokio::spawn(async move {
            let builder = axum::Server::bind(&addr);
            let builder = if enable_http2 {
                builder
            } else {
                builder.http1_only(true)
            };
            let server = builder.serve(app.into_make_service());

            let graceful = server.with_graceful_shutdown(async {
                shutdown_rx.await.ok();
                tracing::info!("Shutdown signal received, starting graceful shutdown");
            });

            if let Err(e) = graceful.await {
                tracing::error!("Server error: {}", e);
            }

            tracing::info!(
                "Server on {}:{} has been shut down",
                server_config.host,
                server_config.port
            );
        });

        // periodically drop rate-limit counters whose window ended
        let limiter = self.pipeline.rate_limiter();
        let purge_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = limiter.purge_expired(Instant::now());
                if removed > 0 {
                    tracing::debug!("Purged {} expired rate-limit windows", removed);
                }
            }
        });

        server_state.server_handle = Some(server_handle);
        server_state.shutdown_tx = Some(shutdown_tx);
        server_state.purge_handle = Some(purge_handle);

        tracing::info!("Gateway server started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), GatewayError> {
        let mut server_state = self.server_state.lock().await;

        if server_state.server_handle.is_none() {
            return Err(GatewayError::Internal("Server is not running".to_string()));
        }

        if let Some(handle) = server_state.purge_handle.take() {
            handle.abort();
        }

        if let Some(tx) = server_state.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::info!("Shutdown signal sent to server");
        }

        if let Some(handle) = server_state.server_handle.take() {
            match handle.await {
                Ok(_) => {
                    tracing::info!("Server has been shut down gracefully");
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("Error while shutting down server: {}", e);
                    Err(GatewayError::Internal(format!(
                        "Error while shutting down server: {}",
                        e
                    )))
                }
            }
        } else {
            Err(GatewayError::Internal(
                "Server handle not found".to_string(),
            ))
        }
    }

    async fn health_check(&self) -> bool {
        true
    }
}
