//! Process-aware SOCKS5 routing gateway
//!
//! Owns the configured upstream proxies and the per-process routing rules,
//! decides for every intercepted connection whether it is proxied, bypassed
//! or blocked, and batches routing events to subscribers.

pub mod config;
pub mod error;
pub mod gateway;
pub mod log;
pub mod policy;
pub mod registry;
pub mod relay;
pub mod router;

// Re-export commonly used types
pub use config::{ConfigLoader, ConfigValidator, GatewayConfig};
pub use error::{GatewayError, Result, ValidationError};
pub use gateway::{Gateway, GatewayOptions, GatewayState};
pub use log::{LogEntry, LogEvent, LogLevel, LogPayload, LogPipeline, LogSubscriber};
pub use policy::{CidrSet, LanBypass, PolicyTable, ProcessRule};
pub use registry::{Credentials, Protocol, Proxy, ProxyHandle, ProxyRegistry, ProxyState, SupportedProtocols};
pub use relay::{NoopRelay, ProxyRelay};
pub use router::{BlockReason, Decision, ProxyRoute, Router};
