//! Gateway lifecycle
//!
//! A `Gateway` owns the proxy registry, policy table, LAN filter and event
//! log, and runs the log drain worker while started. One process-wide
//! instance is available through [`Gateway::instance`]; independent gateways
//! can be built with [`Gateway::new`] and passed around explicitly.

use crate::config::{ConfigValidator, GatewayConfig};
use crate::error::{GatewayError, Result};
use crate::log::{
    DrainWorker, LogEntry, LogEvent, LogLevel, LogMirror, LogPayload, LogPipeline, LogSubscriber,
    DEFAULT_LOG_EVENT_INTERVAL, DEFAULT_LOG_LIMIT,
};
use crate::policy::{LanBypass, PolicyTable, ProcessRule};
use crate::registry::{Credentials, Protocol, Proxy, ProxyHandle, ProxyRegistry, SupportedProtocols};
use crate::relay::{NoopRelay, ProxyRelay};
use crate::router::{Decision, Router};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tracing::{info, warn};

/// Longest `stop` waits for the drain worker before abandoning it
const DRAIN_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Created,
    Started,
    Stopped,
}

/// Construction parameters for a gateway
#[derive(Clone)]
pub struct GatewayOptions {
    pub log_level: LogLevel,
    pub log_limit: usize,
    pub log_event_interval: Duration,
    pub bypass_lan: bool,
    pub relay: Arc<dyn ProxyRelay>,
}

impl GatewayOptions {
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_relay(mut self, relay: Arc<dyn ProxyRelay>) -> Self {
        self.relay = relay;
        self
    }
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            log_limit: DEFAULT_LOG_LIMIT,
            log_event_interval: DEFAULT_LOG_EVENT_INTERVAL,
            bypass_lan: false,
            relay: Arc::new(NoopRelay),
        }
    }
}

static INSTANCE: OnceLock<Mutex<Weak<Gateway>>> = OnceLock::new();

fn instance_slot() -> &'static Mutex<Weak<Gateway>> {
    INSTANCE.get_or_init(|| Mutex::new(Weak::new()))
}

/// Transparent SOCKS5 routing gateway
///
/// Dropping the gateway stops it, so the drain worker and running relays are
/// released on every exit path.
pub struct Gateway {
    state: Mutex<GatewayState>,
    log: Arc<LogPipeline>,
    registry: Arc<ProxyRegistry>,
    policy: Arc<PolicyTable>,
    lan: Arc<LanBypass>,
    router: Router,
    drain: Mutex<Option<DrainWorker>>,
}

impl Gateway {
    pub fn new(options: GatewayOptions) -> Self {
        let log = Arc::new(LogPipeline::new(options.log_level));
        log.set_log_limit(options.log_limit);
        log.set_log_event_interval(options.log_event_interval);

        let registry = Arc::new(ProxyRegistry::new(options.relay, Arc::clone(&log)));
        let policy = Arc::new(PolicyTable::new(Arc::clone(&log)));
        let lan = Arc::new(LanBypass::new(options.bypass_lan));
        let router = Router::new(
            Arc::clone(&registry),
            Arc::clone(&policy),
            Arc::clone(&lan),
            Arc::clone(&log),
        );

        Self {
            state: Mutex::new(GatewayState::Created),
            log,
            registry,
            policy,
            lan,
            router,
            drain: Mutex::new(None),
        }
    }

    /// Get the process-wide gateway, creating it with `log_level` if none is live
    ///
    /// `log_level` is ignored when a live instance already exists.
    pub fn instance(log_level: LogLevel) -> Arc<Gateway> {
        Self::instance_with(GatewayOptions::default().with_log_level(log_level))
    }

    /// Like [`Gateway::instance`] with full options, also ignored if live
    pub fn instance_with(options: GatewayOptions) -> Arc<Gateway> {
        let mut slot = instance_slot().lock();
        if let Some(gateway) = slot.upgrade() {
            return gateway;
        }

        let gateway = Arc::new(Gateway::new(options));
        *slot = Arc::downgrade(&gateway);
        gateway
    }

    /// The live process-wide gateway, if any
    pub fn current() -> Option<Arc<Gateway>> {
        instance_slot().lock().upgrade()
    }

    /// Build a gateway from a validated configuration
    ///
    /// Proxies are registered but not started; those with `start = true` are
    /// started by [`Gateway::start`].
    pub fn from_config(config: &GatewayConfig, relay: Arc<dyn ProxyRelay>) -> Result<Self> {
        ConfigValidator::validate(config)?;

        let gateway = Gateway::new(GatewayOptions {
            log_level: config.logging.level,
            log_limit: config.logging.limit,
            log_event_interval: config.logging.event_interval(),
            bypass_lan: config.bypass_lan,
            relay,
        });

        if let Some(path) = &config.logging.mirror {
            gateway.set_log_mirror(path)?;
        }

        for proxy in &config.proxies {
            let handle = gateway.registry.register(
                &proxy.endpoint,
                proxy.protocols,
                proxy.credentials(),
                proxy.start,
            )?;
            for process in &proxy.processes {
                gateway.policy.associate(process, handle, &gateway.registry)?;
            }
        }

        for process in &config.excludes {
            gateway.policy.exclude(process)?;
        }

        for rule in &config.rules {
            for cidr in &rule.include_cidrs {
                gateway.policy.include_destination_cidr(&rule.process, cidr)?;
            }
            for cidr in &rule.exclude_cidrs {
                gateway.policy.exclude_destination_cidr(&rule.process, cidr)?;
            }
        }

        Ok(gateway)
    }

    pub fn state(&self) -> GatewayState {
        *self.state.lock()
    }

    /// Start the drain worker and every autostart proxy
    ///
    /// Proxies that fail to start do not abort the start; their errors are
    /// logged and returned.
    pub fn start(&self) -> Result<Vec<GatewayError>> {
        let mut state = self.state.lock();
        if *state == GatewayState::Started {
            return Err(GatewayError::AlreadyRunning);
        }

        let worker = self.log.spawn_drain()?;
        *self.drain.lock() = Some(worker);

        info!(
            "Starting gateway: {} proxies, {} process rules, LAN bypass {}",
            self.registry.len(),
            self.policy.len(),
            if self.lan.is_enabled() { "on" } else { "off" }
        );

        let failures = self.registry.start_pending();
        for failure in &failures {
            warn!("Gateway started without proxy: {}", failure);
        }

        *state = GatewayState::Started;
        self.log.message(
            LogLevel::Info,
            format!("Gateway started ({} proxy start failures)", failures.len()),
        );
        Ok(failures)
    }

    /// Stop every running proxy and the drain worker after a final batch
    ///
    /// Calling `stop` on a gateway that is not running does nothing.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != GatewayState::Started {
            return Ok(());
        }

        let stopped = self.registry.stop_all();
        self.log.message(
            LogLevel::Info,
            format!("Gateway stopped, {} proxies torn down", stopped),
        );

        if let Some(worker) = self.drain.lock().take() {
            if !worker.shutdown(DRAIN_SHUTDOWN_GRACE) {
                warn!("Log drain worker abandoned during stop");
            }
        }

        *state = GatewayState::Stopped;
        info!("Gateway stopped");
        Ok(())
    }

    /// A cloneable decision handle for interception workers
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn decide(&self, process: &str, destination: SocketAddr, protocol: Protocol) -> Decision {
        self.router.decide(process, destination, protocol)
    }

    /// Register an upstream SOCKS5 proxy, starting it now if `start` is set
    pub fn add_proxy(
        &self,
        endpoint: &str,
        protocols: SupportedProtocols,
        credentials: Option<Credentials>,
        start: bool,
    ) -> Result<ProxyHandle> {
        self.registry.add(endpoint, protocols, credentials, start)
    }

    pub fn proxy(&self, handle: ProxyHandle) -> Option<Proxy> {
        self.registry.lookup(handle)
    }

    pub fn proxies(&self) -> Vec<Proxy> {
        self.registry.proxies()
    }

    pub fn associate_process_to_proxy(&self, process: &str, proxy: ProxyHandle) -> Result<()> {
        self.policy.associate(process, proxy, &self.registry)
    }

    pub fn exclude_process(&self, process: &str) -> Result<()> {
        self.policy.exclude(process)
    }

    pub fn include_process_destination_cidr(&self, process: &str, cidr: &str) -> Result<()> {
        self.policy.include_destination_cidr(process, cidr)
    }

    pub fn remove_process_destination_cidr(&self, process: &str, cidr: &str) -> Result<()> {
        self.policy.remove_destination_cidr(process, cidr)
    }

    pub fn exclude_process_destination_cidr(&self, process: &str, cidr: &str) -> Result<()> {
        self.policy.exclude_destination_cidr(process, cidr)
    }

    pub fn remove_process_excluded_destination_cidr(&self, process: &str, cidr: &str) -> Result<()> {
        self.policy.remove_excluded_destination_cidr(process, cidr)
    }

    pub fn process_rule(&self, process: &str) -> Option<ProcessRule> {
        self.policy.lookup(process).map(|rule| (*rule).clone())
    }

    pub fn process_rules(&self) -> Vec<ProcessRule> {
        self.policy.rules()
    }

    /// Toggle LAN bypass; decisions already made are unaffected
    pub fn set_bypass_lan(&self, enabled: bool) {
        self.lan.set_enabled(enabled);
        self.log.message(
            LogLevel::Info,
            format!("LAN bypass {}", if enabled { "enabled" } else { "disabled" }),
        );
    }

    pub fn bypass_lan(&self) -> bool {
        self.lan.is_enabled()
    }

    /// Record a terminal event reported by the interception layer
    pub fn report(&self, event: LogEvent, payload: impl Into<LogPayload>) -> bool {
        let level = match event {
            LogEvent::AddressError | LogEvent::NdisError => LogLevel::Error,
            LogEvent::Connected | LogEvent::Disconnected | LogEvent::Message => LogLevel::Info,
        };
        self.log.append(level, event, payload)
    }

    pub fn subscribe<S>(&self, subscriber: S)
    where
        S: LogSubscriber + 'static,
    {
        self.log.subscribe(subscriber);
    }

    /// Ask the drain worker to deliver pending entries now
    pub fn flush_log(&self) {
        self.log.flush();
    }

    /// Pull pending entries directly, bypassing subscribers
    pub fn read_log(&self) -> Vec<LogEntry> {
        self.log.take_batch()
    }

    pub fn log_limit(&self) -> usize {
        self.log.log_limit()
    }

    pub fn set_log_limit(&self, limit: usize) {
        self.log.set_log_limit(limit);
    }

    pub fn log_event_interval(&self) -> Duration {
        self.log.log_event_interval()
    }

    pub fn set_log_event_interval(&self, interval: Duration) {
        self.log.set_log_event_interval(interval);
    }

    pub fn log_level(&self) -> LogLevel {
        self.log.log_level()
    }

    pub fn set_log_level(&self, level: LogLevel) {
        self.log.set_log_level(level);
    }

    /// Mirror every accepted entry into an append-only file
    pub fn set_log_mirror(&self, path: impl AsRef<Path>) -> Result<()> {
        let mirror = LogMirror::open(path)?;
        self.log.set_mirror(Some(mirror));
        Ok(())
    }

    pub fn log(&self) -> &Arc<LogPipeline> {
        &self.log
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("state", &self.state())
            .field("registry", &self.registry)
            .field("policy", &self.policy)
            .field("bypass_lan", &self.lan.is_enabled())
            .field("log", &self.log)
            .finish()
    }
}
