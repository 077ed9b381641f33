mod config;
mod core;
mod error;
mod models;
mod policy;
mod proxy;
mod telemetry;

use tokio::signal;

use crate::config::{
    ApiDefinition, BackendDefinition, BasicConfigManager, ConfigManager, DirectiveDefinition,
    GatewayConfig, OperationDefinition, PolicyDefinition, Protocol, VersionSetDefinition,
    VersioningScheme,
};
use crate::core::gateway::{ApiGateway, Gateway};
use crate::error::GatewayError;

#[tokio::main]
async fn main() -> Result<(), GatewayError> {
    // Load configuration: path from the command line, or a small
    // built-in snapshot for local runs
    let config_manager = BasicConfigManager::new();
    let config = match std::env::args().nth(1) {
        Some(path) => {
            config_manager
                .load_from_file(std::path::Path::new(&path))
                .await?;
            config_manager.get_config().await
        }
        None => {
            eprintln!("No configuration file given, using built-in demo snapshot");
            demo_config()
        }
    };

    telemetry::init_tracing(&config.logging);

    let gateway = ApiGateway::new(&config)?;
    gateway.start().await?;

    tracing::info!("Gateway running, press Ctrl+C to stop");
    signal::ctrl_c()
        .await
        .map_err(|e| GatewayError::Internal(format!("Failed to listen for shutdown: {}", e)))?;

    tracing::info!("Shutting down");
    gateway.stop().await?;

    Ok(())
}

/// Demo snapshot: one versioned API in front of a local backend
fn demo_config() -> GatewayConfig {
    GatewayConfig {
        version_sets: vec![VersionSetDefinition {
            id: "stock-versions".to_string(),
            display_name: "Stock API versions".to_string(),
            versioning_scheme: VersioningScheme::Segment,
        }],
        backends: vec![BackendDefinition {
            id: "stock-service-backend".to_string(),
            protocol: Protocol::Http,
            url: "http://localhost:8081".to_string(),
            validate_certificate_chain: true,
            validate_certificate_name: true,
            timeout_seconds: 30,
        }],
        apis: vec![ApiDefinition {
            name: "stock".to_string(),
            display_name: "Stock API".to_string(),
            path: "/stock".to_string(),
            protocols: vec![Protocol::Https],
            version: "v1".to_string(),
            version_set_id: "stock-versions".to_string(),
            default_backend_id: Some("stock-service-backend".to_string()),
            policy: Some(PolicyDefinition {
                inbound: vec![
                    DirectiveDefinition::Cors {
                        allowed_origins: vec!["*".to_string()],
                        allowed_methods: vec!["GET".to_string(), "POST".to_string()],
                        allowed_headers: vec!["Content-Type".to_string()],
                    },
                    DirectiveDefinition::RateLimit {
                        calls: 5,
                        renewal_period_seconds: 60,
                    },
                ],
                ..Default::default()
            }),
            operations: vec![
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
            ],
        }],
        ..Default::default()
    }
}
