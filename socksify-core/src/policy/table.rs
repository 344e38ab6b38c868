//! Per-process routing rules

use super::matcher::{parse_cidr, CidrSet};
use crate::error::{GatewayError, Result};
use crate::log::{LogLevel, LogPipeline};
use crate::registry::{ProxyHandle, ProxyRegistry};
use arc_swap::ArcSwap;
use ipnet::IpNet;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Routing rule for one process name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessRule {
    /// Name as first given by the caller
    pub name: String,
    pub proxy: Option<ProxyHandle>,
    /// Bypass every connection from this process
    pub excluded: bool,
    /// When non-empty, only these destinations are eligible for proxying
    pub include: CidrSet,
    /// Destinations never proxied
    pub exclude: CidrSet,
}

impl ProcessRule {
    fn new(name: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            ..Default::default()
        }
    }
}

type RuleMap = HashMap<String, Arc<ProcessRule>>;

fn rule_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Case-insensitive table of process rules
///
/// Readers load an immutable snapshot without locking; writers serialize on a
/// mutex, copy the map, edit one rule and publish the new map atomically.
/// A rule is never observed half-updated.
pub struct PolicyTable {
    rules: ArcSwap<RuleMap>,
    writer: Mutex<()>,
    log: Arc<LogPipeline>,
}

impl PolicyTable {
    pub fn new(log: Arc<LogPipeline>) -> Self {
        Self {
            rules: ArcSwap::from_pointee(RuleMap::new()),
            writer: Mutex::new(()),
            log,
        }
    }

    /// Route `process` through `proxy`, keeping its exclusion flag and CIDR sets
    pub fn associate(&self, process: &str, proxy: ProxyHandle, registry: &ProxyRegistry) -> Result<()> {
        if !registry.contains(proxy) {
            return Err(GatewayError::UnknownProxy { handle: proxy });
        }
        self.update(process, |rule| {
            rule.proxy = Some(proxy);
            Ok(())
        })?;
        self.record(format!("Associated process {} with {}", process, proxy));
        Ok(())
    }

    /// Bypass every connection from `process`; any assignment is kept
    pub fn exclude(&self, process: &str) -> Result<()> {
        self.update(process, |rule| {
            rule.excluded = true;
            Ok(())
        })?;
        self.record(format!("Excluded process {}", process));
        Ok(())
    }

    /// Add `cidr` to the destinations `process` may be proxied to
    pub fn include_destination_cidr(&self, process: &str, cidr: &str) -> Result<()> {
        let range = Self::parse(cidr)?;
        self.update(process, |rule| {
            rule.include.insert(range);
            Ok(())
        })?;
        self.record(format!("Included destination {} for process {}", range, process));
        Ok(())
    }

    /// Remove `cidr` from the destinations `process` may be proxied to
    pub fn remove_destination_cidr(&self, process: &str, cidr: &str) -> Result<()> {
        let range = Self::parse(cidr)?;
        self.update(process, |rule| {
            if rule.include.remove(&range) {
                Ok(())
            } else {
                Err(GatewayError::NotFound {
                    process: process.to_string(),
                    cidr: range.to_string(),
                })
            }
        })?;
        self.record(format!("Removed included destination {} for process {}", range, process));
        Ok(())
    }

    /// Never proxy connections from `process` to `cidr`
    pub fn exclude_destination_cidr(&self, process: &str, cidr: &str) -> Result<()> {
        let range = Self::parse(cidr)?;
        self.update(process, |rule| {
            rule.exclude.insert(range);
            Ok(())
        })?;
        self.record(format!("Excluded destination {} for process {}", range, process));
        Ok(())
    }

    pub fn remove_excluded_destination_cidr(&self, process: &str, cidr: &str) -> Result<()> {
        let range = Self::parse(cidr)?;
        self.update(process, |rule| {
            if rule.exclude.remove(&range) {
                Ok(())
            } else {
                Err(GatewayError::NotFound {
                    process: process.to_string(),
                    cidr: range.to_string(),
                })
            }
        })?;
        self.record(format!("Removed excluded destination {} for process {}", range, process));
        Ok(())
    }

    /// Look up the rule for `process`; `None` means default policy
    pub fn lookup(&self, process: &str) -> Option<Arc<ProcessRule>> {
        self.rules.load().get(&rule_key(process)).cloned()
    }

    /// All rules ordered by name
    pub fn rules(&self) -> Vec<ProcessRule> {
        let mut rules: Vec<ProcessRule> = self.rules.load().values().map(|r| (**r).clone()).collect();
        rules.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        rules
    }

    pub fn len(&self) -> usize {
        self.rules.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn parse(cidr: &str) -> Result<IpNet> {
        parse_cidr(cidr).ok_or_else(|| GatewayError::InvalidCidr {
            cidr: cidr.to_string(),
        })
    }

    /// Apply `edit` to a copy of the rule and publish it; an error publishes nothing
    fn update<F>(&self, process: &str, edit: F) -> Result<()>
    where
        F: FnOnce(&mut ProcessRule) -> Result<()>,
    {
        let _guard = self.writer.lock();
        let key = rule_key(process);
        let current = self.rules.load_full();

        let mut rule = current
            .get(&key)
            .map(|r| (**r).clone())
            .unwrap_or_else(|| ProcessRule::new(process));
        edit(&mut rule)?;

        let mut next = RuleMap::clone(&current);
        next.insert(key, Arc::new(rule));
        self.rules.store(Arc::new(next));
        Ok(())
    }

    fn record(&self, message: String) {
        debug!("{}", message);
        self.log.message(LogLevel::Info, message);
    }
}

impl std::fmt::Debug for PolicyTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyTable").field("rules", &self.rules()).finish()
    }
}
