//! Configuration file loading

use super::schema::GatewayConfig;
use crate::error::{GatewayError, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        // Priority order:
        // 1. $SOCKSIFY_CONFIG
        // 2. $XDG_CONFIG_HOME/socksify/config.toml
        // 3. ~/.config/socksify/config.toml

        if let Ok(path) = env::var("SOCKSIFY_CONFIG") {
            return PathBuf::from(path);
        }

        if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join("socksify/config.toml");
        }

        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home).join(".config/socksify/config.toml");
        }

        PathBuf::from("socksify.toml")
    }

    /// Load config from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<GatewayConfig> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| GatewayError::ConfigLoad {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<GatewayConfig> {
        let config: GatewayConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Load config from an explicit path, or the default path if it exists
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load_or_default(path: Option<PathBuf>) -> Result<GatewayConfig> {
        if let Some(p) = path {
            return Self::load_from_file(p);
        }

        let path = Self::default_config_path();
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Ok(GatewayConfig::default())
        }
    }
}
