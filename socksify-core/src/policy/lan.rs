//! LAN bypass filter

use ipnet::Ipv4Net;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};

/// Reserved ranges that are never proxied while LAN bypass is on
pub const LAN_RANGES: [&str; 5] = [
    "10.0.0.0/8",     // private class A
    "172.16.0.0/12",  // private class B
    "192.168.0.0/16", // private class C
    "224.0.0.0/4",    // multicast
    "169.254.0.0/16", // link-local
];

/// Process-independent bypass for private, multicast and link-local traffic
#[derive(Debug)]
pub struct LanBypass {
    enabled: AtomicBool,
    ranges: Vec<Ipv4Net>,
}

impl LanBypass {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            ranges: LAN_RANGES.iter().filter_map(|r| r.parse().ok()).collect(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Toggle the filter; affects decisions made after the call
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Check if an address is in a reserved range, regardless of the flag
    ///
    /// IPv4-mapped IPv6 addresses are checked as IPv4; other IPv6 addresses
    /// are never LAN.
    pub fn is_lan(&self, ip: IpAddr) -> bool {
        match ip.to_canonical() {
            IpAddr::V4(v4) => self.ranges.iter().any(|net| net.contains(&v4)),
            IpAddr::V6(_) => false,
        }
    }

    /// Check if a connection to `ip` must bypass the proxies
    pub fn should_bypass(&self, ip: IpAddr) -> bool {
        self.is_enabled() && self.is_lan(ip)
    }
}

impl Default for LanBypass {
    fn default() -> Self {
        Self::new(false)
    }
}
