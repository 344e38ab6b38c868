//! Seam to the subsystem that runs SOCKS5 relays

use crate::registry::Proxy;

/// Starts and stops the relay behind a registered proxy
///
/// Called from the administrative path only, never while registry locks are
/// held, so implementations may block on I/O.
pub trait ProxyRelay: Send + Sync {
    /// Bring up the relay for `proxy`
    fn start(&self, proxy: &Proxy) -> anyhow::Result<()>;

    /// Tear down the relay for `proxy`
    fn stop(&self, proxy: &Proxy);
}

/// Relay that accepts every start request and does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRelay;

impl ProxyRelay for NoopRelay {
    fn start(&self, _proxy: &Proxy) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop(&self, _proxy: &Proxy) {}
}
