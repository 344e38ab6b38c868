//! Destination CIDR matching

use ipnet::IpNet;
use std::net::IpAddr;

/// Parse `a.b.c.d/prefix` (or an IPv6 equivalent) into a normalized network
///
/// Host bits are cleared, so `10.1.2.3/8` and `10.0.0.0/8` are the same range.
pub fn parse_cidr(cidr: &str) -> Option<IpNet> {
    cidr.trim().parse::<IpNet>().ok().map(|net| net.trunc())
}

/// Set of destination ranges, IPv4 and IPv6 alike
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CidrSet {
    ranges: Vec<IpNet>,
}

impl CidrSet {
    /// Create a new empty set
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Add a range; returns false if it was already present
    pub fn insert(&mut self, range: IpNet) -> bool {
        let range = range.trunc();
        if self.ranges.contains(&range) {
            return false;
        }
        self.ranges.push(range);
        true
    }

    /// Remove a range; returns false if it was not present
    pub fn remove(&mut self, range: &IpNet) -> bool {
        let range = range.trunc();
        let before = self.ranges.len();
        self.ranges.retain(|r| *r != range);
        self.ranges.len() != before
    }

    /// Check if an address falls inside any range
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.ranges.iter().any(|net| net.contains(&ip))
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IpNet> {
        self.ranges.iter()
    }
}

impl FromIterator<IpNet> for CidrSet {
    fn from_iter<I: IntoIterator<Item = IpNet>>(iter: I) -> Self {
        let mut set = CidrSet::new();
        for range in iter {
            set.insert(range);
        }
        set
    }
}
