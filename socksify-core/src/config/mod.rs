//! Configuration management for the gateway

pub mod loader;
pub mod schema;
pub mod validator;

pub use loader::ConfigLoader;
pub use schema::{GatewayConfig, LoggingConfig, ProxyConfig, RuleConfig};
pub use validator::ConfigValidator;
