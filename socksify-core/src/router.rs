//! Routing decision engine

use crate::log::{LogLevel, LogPipeline};
use crate::policy::{LanBypass, PolicyTable};
use crate::registry::{Credentials, Protocol, ProxyHandle, ProxyRegistry};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::debug;

/// Everything the relay layer needs to hand a connection to an upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    pub handle: ProxyHandle,
    pub endpoint: SocketAddr,
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// The assigned proxy does not carry this protocol
    ProtocolMismatch,
    /// The assigned proxy is no longer registered
    ProxyUnavailable,
}

/// Verdict for one connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Connect directly
    Bypass,
    /// Relay through the given upstream
    Proxy(ProxyRoute),
    /// Drop the attempt
    Block(BlockReason),
}

impl Decision {
    pub fn proxy_handle(&self) -> Option<ProxyHandle> {
        match self {
            Decision::Proxy(route) => Some(route.handle),
            _ => None,
        }
    }

    pub fn is_bypass(&self) -> bool {
        matches!(self, Decision::Bypass)
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Decision::Block(_))
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Bypass => f.write_str("bypass"),
            Decision::Proxy(route) => write!(f, "proxy via {} ({})", route.handle, route.endpoint),
            Decision::Block(BlockReason::ProtocolMismatch) => f.write_str("block (protocol not supported by proxy)"),
            Decision::Block(BlockReason::ProxyUnavailable) => f.write_str("block (proxy unavailable)"),
        }
    }
}

/// Decides how each intercepted connection is routed
///
/// Cheap to clone; every interception worker can hold its own copy. Reads
/// only snapshots of the registry and policy table and never waits on log
/// delivery.
#[derive(Debug, Clone)]
pub struct Router {
    registry: Arc<ProxyRegistry>,
    policy: Arc<PolicyTable>,
    lan: Arc<LanBypass>,
    log: Arc<LogPipeline>,
}

impl Router {
    pub fn new(
        registry: Arc<ProxyRegistry>,
        policy: Arc<PolicyTable>,
        lan: Arc<LanBypass>,
        log: Arc<LogPipeline>,
    ) -> Self {
        Self {
            registry,
            policy,
            lan,
            log,
        }
    }

    /// Route a connection from `process` to `destination`
    ///
    /// First match wins: LAN bypass, unknown process, excluded process,
    /// destination outside the include list, destination in the exclude
    /// list, then the assigned proxy (blocked if it cannot carry `protocol`
    /// or is gone). A process without a proxy is bypassed.
    pub fn decide(&self, process: &str, destination: SocketAddr, protocol: Protocol) -> Decision {
        let decision = self.evaluate(process, destination.ip().to_canonical(), protocol);

        debug!("{} {} {} -> {}", process, protocol, destination, decision);
        if self.log.log_level().allows(LogLevel::Debug) {
            self.log.message(
                LogLevel::Debug,
                format!("{} {} {} -> {}", process, protocol, destination, decision),
            );
        }
        decision
    }

    fn evaluate(&self, process: &str, ip: IpAddr, protocol: Protocol) -> Decision {
        if self.lan.should_bypass(ip) {
            return Decision::Bypass;
        }

        let Some(rule) = self.policy.lookup(process) else {
            return Decision::Bypass;
        };

        if rule.excluded {
            return Decision::Bypass;
        }

        if !rule.include.is_empty() && !rule.include.contains(ip) {
            return Decision::Bypass;
        }

        if rule.exclude.contains(ip) {
            return Decision::Bypass;
        }

        let Some(handle) = rule.proxy else {
            return Decision::Bypass;
        };

        match self.registry.lookup(handle) {
            None => Decision::Block(BlockReason::ProxyUnavailable),
            Some(proxy) if !proxy.protocols.supports(protocol) => {
                Decision::Block(BlockReason::ProtocolMismatch)
            }
            Some(proxy) => Decision::Proxy(ProxyRoute {
                handle: proxy.handle,
                endpoint: proxy.endpoint,
                credentials: proxy.credentials,
            }),
        }
    }
}
