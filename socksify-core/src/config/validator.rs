//! Configuration validation

use super::schema::GatewayConfig;
use crate::error::{Result, ValidationError};
use crate::policy::parse_cidr;
use crate::registry::parse_endpoint;
use std::collections::HashMap;

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate an entire configuration before any of it is applied
    pub fn validate(config: &GatewayConfig) -> Result<()> {
        Self::validate_logging(config)?;
        Self::validate_endpoints(config)?;
        Self::validate_cidrs(config)?;
        Self::check_associations(config)?;
        Ok(())
    }

    fn validate_logging(config: &GatewayConfig) -> Result<()> {
        if config.logging.limit == 0 {
            return Err(ValidationError::InvalidLogLimit.into());
        }
        Ok(())
    }

    fn validate_endpoints(config: &GatewayConfig) -> Result<()> {
        for proxy in &config.proxies {
            if parse_endpoint(&proxy.endpoint).is_none() {
                return Err(ValidationError::InvalidEndpoint {
                    endpoint: proxy.endpoint.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn validate_cidrs(config: &GatewayConfig) -> Result<()> {
        for rule in &config.rules {
            for cidr in rule.include_cidrs.iter().chain(&rule.exclude_cidrs) {
                if parse_cidr(cidr).is_none() {
                    return Err(ValidationError::InvalidCidr {
                        cidr: format!("{} for process {}", cidr, rule.process),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// A process may be routed through one proxy only
    fn check_associations(config: &GatewayConfig) -> Result<()> {
        let mut owners: HashMap<String, usize> = HashMap::new();
        for (index, proxy) in config.proxies.iter().enumerate() {
            for process in &proxy.processes {
                let key = process.trim().to_lowercase();
                match owners.get(&key) {
                    Some(&owner) if owner != index => {
                        return Err(ValidationError::ConflictingAssociation {
                            process: process.clone(),
                        }
                        .into());
                    }
                    _ => {
                        owners.insert(key, index);
                    }
                }
            }
        }
        Ok(())
    }
}
