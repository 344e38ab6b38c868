//! Relay that checks an upstream SOCKS5 server is reachable

use anyhow::Context;
use socksify_core::{Proxy, ProxyRelay};
use std::net::TcpStream;
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Treats a proxy as started once its endpoint accepts a TCP connection
#[derive(Debug, Default)]
pub struct TcpProbeRelay;

impl ProxyRelay for TcpProbeRelay {
    fn start(&self, proxy: &Proxy) -> anyhow::Result<()> {
        let stream = TcpStream::connect_timeout(&proxy.endpoint, PROBE_TIMEOUT)
            .with_context(|| format!("SOCKS5 server {} unreachable", proxy.endpoint))?;
        tracing::debug!(
            "Probe to {} for {} succeeded from {:?}",
            proxy.endpoint,
            proxy.handle,
            stream.local_addr().ok()
        );
        Ok(())
    }

    fn stop(&self, proxy: &Proxy) {
        tracing::debug!("Released relay for {}", proxy.handle);
    }
}
