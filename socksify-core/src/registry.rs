//! Registry of upstream SOCKS5 proxies

use crate::error::{GatewayError, Result};
use crate::log::{LogEvent, LogLevel, LogPipeline};
use crate::relay::ProxyRelay;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Opaque identifier of a registered proxy, never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyHandle(u64);

impl ProxyHandle {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProxyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proxy#{}", self.0)
    }
}

impl From<ProxyHandle> for u64 {
    fn from(handle: ProxyHandle) -> Self {
        handle.0
    }
}

/// Username/password authentication for an upstream proxy
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Build credentials from optional parts; an empty username means none
    pub fn from_parts(username: Option<&str>, password: Option<&str>) -> Option<Self> {
        match username {
            Some(user) if !user.is_empty() => Some(Self::new(user, password.unwrap_or_default())),
            _ => None,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Transport protocol of an intercepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(format!("unknown protocol: {}", other)),
        }
    }
}

/// Protocols an upstream proxy is willing to carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportedProtocols {
    #[serde(alias = "TCP")]
    Tcp,
    #[serde(alias = "UDP")]
    Udp,
    #[default]
    #[serde(alias = "BOTH")]
    Both,
}

impl SupportedProtocols {
    pub fn supports(self, protocol: Protocol) -> bool {
        matches!(
            (self, protocol),
            (SupportedProtocols::Both, _)
                | (SupportedProtocols::Tcp, Protocol::Tcp)
                | (SupportedProtocols::Udp, Protocol::Udp)
        )
    }
}

impl fmt::Display for SupportedProtocols {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupportedProtocols::Tcp => f.write_str("tcp"),
            SupportedProtocols::Udp => f.write_str("udp"),
            SupportedProtocols::Both => f.write_str("tcp+udp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Stopped,
    Running,
}

/// A configured upstream proxy
#[derive(Debug, Clone)]
pub struct Proxy {
    pub handle: ProxyHandle,
    pub endpoint: SocketAddr,
    pub credentials: Option<Credentials>,
    pub protocols: SupportedProtocols,
    pub state: ProxyState,
    /// Started on registration and on every gateway start
    pub autostart: bool,
}

/// Parse a `host:port` proxy endpoint
///
/// The host must be an IP literal (IPv6 in brackets); port 0 is rejected.
pub fn parse_endpoint(endpoint: &str) -> Option<SocketAddr> {
    endpoint
        .trim()
        .parse::<SocketAddr>()
        .ok()
        .filter(|addr| addr.port() != 0)
}

/// Thread-safe store of upstream proxies keyed by handle
///
/// Lookups share a read lock and only ever see fully inserted entries. Relay
/// start/stop calls run outside that lock, serialized among themselves.
pub struct ProxyRegistry {
    next_handle: AtomicU64,
    proxies: RwLock<HashMap<ProxyHandle, Proxy>>,
    lifecycle: Mutex<()>,
    relay: Arc<dyn ProxyRelay>,
    log: Arc<LogPipeline>,
}

impl ProxyRegistry {
    pub fn new(relay: Arc<dyn ProxyRelay>, log: Arc<LogPipeline>) -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            proxies: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(()),
            relay,
            log,
        }
    }

    /// Register a proxy, optionally starting it right away
    ///
    /// A start failure leaves the proxy registered in the stopped state and is
    /// reported as `ProxyStartFailed` carrying the new handle.
    pub fn add(
        &self,
        endpoint: &str,
        protocols: SupportedProtocols,
        credentials: Option<Credentials>,
        start: bool,
    ) -> Result<ProxyHandle> {
        let handle = self.register(endpoint, protocols, credentials, start)?;
        if start {
            self.start(handle)?;
        }
        Ok(handle)
    }

    /// Register a proxy in the stopped state without starting it
    ///
    /// `autostart` marks it for `start_pending`.
    pub fn register(
        &self,
        endpoint: &str,
        protocols: SupportedProtocols,
        credentials: Option<Credentials>,
        autostart: bool,
    ) -> Result<ProxyHandle> {
        let addr = parse_endpoint(endpoint).ok_or_else(|| GatewayError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
        })?;

        let handle = ProxyHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let proxy = Proxy {
            handle,
            endpoint: addr,
            credentials,
            protocols,
            state: ProxyState::Stopped,
            autostart,
        };
        self.proxies.write().insert(handle, proxy);

        info!("Registered SOCKS5 proxy {} at {} ({})", handle, addr, protocols);
        self.log.message(
            LogLevel::Info,
            format!("Added SOCKS5 proxy {} at {} ({})", handle, addr, protocols),
        );
        Ok(handle)
    }

    /// Start the relay for a registered proxy; no-op if already running
    pub fn start(&self, handle: ProxyHandle) -> Result<()> {
        let _guard = self.lifecycle.lock();

        let proxy = self
            .lookup(handle)
            .ok_or(GatewayError::UnknownProxy { handle })?;
        if proxy.state == ProxyState::Running {
            return Ok(());
        }

        match self.relay.start(&proxy) {
            Ok(()) => {
                if let Some(entry) = self.proxies.write().get_mut(&handle) {
                    entry.state = ProxyState::Running;
                }
                info!("Proxy {} running at {}", handle, proxy.endpoint);
                self.log.append(LogLevel::Info, LogEvent::Connected, handle.get());
                Ok(())
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                error!("Failed to start proxy {} at {}: {}", handle, proxy.endpoint, reason);
                self.log.message(
                    LogLevel::Error,
                    format!("Failed to start proxy {} at {}: {}", handle, proxy.endpoint, reason),
                );
                Err(GatewayError::ProxyStartFailed { handle, reason })
            }
        }
    }

    /// Start every autostart proxy that is not running
    ///
    /// Every proxy is attempted; the failures are returned.
    pub fn start_pending(&self) -> Vec<GatewayError> {
        let pending: Vec<ProxyHandle> = self
            .proxies()
            .into_iter()
            .filter(|p| p.autostart && p.state == ProxyState::Stopped)
            .map(|p| p.handle)
            .collect();

        pending
            .into_iter()
            .filter_map(|handle| self.start(handle).err())
            .collect()
    }

    /// Stop every running proxy, returning how many were stopped
    pub fn stop_all(&self) -> usize {
        let _guard = self.lifecycle.lock();

        let running: Vec<Proxy> = self
            .proxies()
            .into_iter()
            .filter(|p| p.state == ProxyState::Running)
            .collect();

        for proxy in &running {
            self.relay.stop(proxy);
            if let Some(entry) = self.proxies.write().get_mut(&proxy.handle) {
                entry.state = ProxyState::Stopped;
            }
            debug!("Proxy {} stopped", proxy.handle);
            self.log.append(LogLevel::Info, LogEvent::Disconnected, proxy.handle.get());
        }
        running.len()
    }

    pub fn lookup(&self, handle: ProxyHandle) -> Option<Proxy> {
        self.proxies.read().get(&handle).cloned()
    }

    pub fn contains(&self, handle: ProxyHandle) -> bool {
        self.proxies.read().contains_key(&handle)
    }

    /// Snapshot of every proxy ordered by handle
    pub fn proxies(&self) -> Vec<Proxy> {
        let mut proxies: Vec<Proxy> = self.proxies.read().values().cloned().collect();
        proxies.sort_by_key(|p| p.handle);
        proxies
    }

    pub fn len(&self) -> usize {
        self.proxies.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ProxyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyRegistry")
            .field("proxies", &self.proxies())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::NoopRelay;
    use anyhow::anyhow;

    struct FailingRelay;

    impl ProxyRelay for FailingRelay {
        fn start(&self, _proxy: &Proxy) -> anyhow::Result<()> {
            Err(anyhow!("connection refused"))
        }

        fn stop(&self, _proxy: &Proxy) {}
    }

    fn registry_with(relay: impl ProxyRelay + 'static) -> (ProxyRegistry, Arc<LogPipeline>) {
        let log = Arc::new(LogPipeline::new(LogLevel::All));
        (ProxyRegistry::new(Arc::new(relay), Arc::clone(&log)), log)
    }

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            parse_endpoint("198.51.100.10:1080"),
            Some("198.51.100.10:1080".parse().unwrap())
        );
        assert!(parse_endpoint("[2001:db8::1]:1080").is_some());
        assert!(parse_endpoint("198.51.100.10").is_none());
        assert!(parse_endpoint("198.51.100.10:0").is_none());
        assert!(parse_endpoint("proxy.example.com:1080").is_none());
        assert!(parse_endpoint("").is_none());
    }

    #[test]
    fn test_add_assigns_unique_handles() {
        let (registry, _) = registry_with(NoopRelay);
        let first = registry.add("198.51.100.10:1080", SupportedProtocols::Tcp, None, false).unwrap();
        let second = registry.add("198.51.100.11:1080", SupportedProtocols::Both, None, false).unwrap();

        assert_ne!(first, second);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lookup(first).unwrap().state, ProxyState::Stopped);
    }

    #[test]
    fn test_add_rejects_invalid_endpoint() {
        let (registry, _) = registry_with(NoopRelay);
        let result = registry.add("not-an-endpoint", SupportedProtocols::Tcp, None, true);

        assert!(matches!(result, Err(GatewayError::InvalidEndpoint { .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_add_and_start() {
        let (registry, log) = registry_with(NoopRelay);
        let credentials = Credentials::new("u", "p");
        let handle = registry
            .add("198.51.100.10:1080", SupportedProtocols::Tcp, Some(credentials.clone()), true)
            .unwrap();

        let proxy = registry.lookup(handle).unwrap();
        assert_eq!(proxy.state, ProxyState::Running);
        assert_eq!(proxy.credentials, Some(credentials));

        let batch = log.take_batch();
        assert!(batch
            .iter()
            .any(|e| e.event == LogEvent::Connected && e.data() == Some(handle.get())));
    }

    #[test]
    fn test_start_failure_keeps_proxy_registered() {
        let (registry, log) = registry_with(FailingRelay);
        let result = registry.add("198.51.100.10:1080", SupportedProtocols::Tcp, None, true);

        let handle = match result {
            Err(GatewayError::ProxyStartFailed { handle, reason }) => {
                assert!(reason.contains("connection refused"));
                handle
            }
            other => panic!("unexpected result: {:?}", other),
        };
        assert_eq!(registry.lookup(handle).unwrap().state, ProxyState::Stopped);
        assert!(log
            .take_batch()
            .iter()
            .any(|e| e.description().is_some_and(|d| d.contains("Failed to start"))));
    }

    #[test]
    fn test_start_unknown_handle() {
        let (registry, _) = registry_with(NoopRelay);
        let result = registry.start(ProxyHandle(99));
        assert!(matches!(result, Err(GatewayError::UnknownProxy { .. })));
    }

    #[test]
    fn test_stop_all_and_restart_pending() {
        let (registry, _) = registry_with(NoopRelay);
        let auto = registry.add("198.51.100.10:1080", SupportedProtocols::Both, None, true).unwrap();
        let manual = registry.add("198.51.100.11:1080", SupportedProtocols::Both, None, false).unwrap();

        assert_eq!(registry.stop_all(), 1);
        assert_eq!(registry.lookup(auto).unwrap().state, ProxyState::Stopped);

        assert!(registry.start_pending().is_empty());
        assert_eq!(registry.lookup(auto).unwrap().state, ProxyState::Running);
        assert_eq!(registry.lookup(manual).unwrap().state, ProxyState::Stopped);
    }

    #[test]
    fn test_supported_protocols() {
        assert!(SupportedProtocols::Tcp.supports(Protocol::Tcp));
        assert!(!SupportedProtocols::Tcp.supports(Protocol::Udp));
        assert!(SupportedProtocols::Udp.supports(Protocol::Udp));
        assert!(!SupportedProtocols::Udp.supports(Protocol::Tcp));
        assert!(SupportedProtocols::Both.supports(Protocol::Tcp));
        assert!(SupportedProtocols::Both.supports(Protocol::Udp));
    }

    #[test]
    fn test_credentials_from_parts() {
        assert!(Credentials::from_parts(None, Some("p")).is_none());
        assert!(Credentials::from_parts(Some(""), Some("p")).is_none());
        let credentials = Credentials::from_parts(Some("u"), None).unwrap();
        assert_eq!(credentials.username(), "u");
        assert_eq!(credentials.password(), "");
        assert!(!format!("{:?}", Credentials::new("u", "secret")).contains("secret"));
    }
}
