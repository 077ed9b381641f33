// Policy-execution engine for a managed API gateway

pub mod config;
pub mod core;
pub mod error;
pub mod models;
pub mod policy;
pub mod proxy;
pub mod telemetry;

// Re-export commonly used types
pub use config::{GatewayConfig, RateLimitKeyMode};
pub use core::{
    gateway::{ApiGateway, Gateway},
    pipeline::PolicyPipeline,
    request::GatewayRequest,
    response::GatewayResponse,
};
pub use error::{ConfigError, GatewayError, RoutingError};
pub use models::RuntimeConfig;
