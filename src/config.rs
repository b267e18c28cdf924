use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::chain::builder::DEFAULT_MAX_APPEND_RETRIES;
use crate::chain::verify::VerifyMode;
use crate::error::{LedgerError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
    pub max_append_retries: u32,
    pub default_verify_mode: VerifyMode,
    pub server_host: String,
    pub server_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_url: "sqlite://review-ledger.db".to_string(),
            max_connections: 5,
            busy_timeout_secs: 5,
            max_append_retries: DEFAULT_MAX_APPEND_RETRIES,
            default_verify_mode: VerifyMode::Exhaustive,
            server_host: "127.0.0.1".to_string(),
            server_port: 3000,
        }
    }
}

impl AppConfig {
    /// Defaults overridden by environment variables
    pub fn load() -> Result<Self> {
        let mut config = AppConfig::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// TOML file, then environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            LedgerError::ConfigError(format!("Failed to read {:?}: {}", path, e))
        })?;
        let mut config: AppConfig = toml::from_str(&contents).map_err(|e| {
            LedgerError::ConfigError(format!("Failed to parse {:?}: {}", path, e))
        })?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = env::var("DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(v) = parse_env("LEDGER_MAX_CONNECTIONS")? {
            self.max_connections = v;
        }
        if let Some(v) = parse_env("LEDGER_BUSY_TIMEOUT_SECS")? {
            self.busy_timeout_secs = v;
        }
        if let Some(v) = parse_env("LEDGER_MAX_APPEND_RETRIES")? {
            self.max_append_retries = v;
        }
        if let Ok(mode) = env::var("LEDGER_VERIFY_MODE") {
            self.default_verify_mode = mode.parse()?;
        }
        if let Ok(host) = env::var("SERVER_HOST") {
            self.server_host = host;
        }
        if let Some(v) = parse_env("SERVER_PORT")? {
            self.server_port = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(LedgerError::ConfigError("database_url is empty".to_string()));
        }
        if self.max_connections == 0 {
            return Err(LedgerError::ConfigError(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.max_append_retries == 0 {
            return Err(LedgerError::ConfigError(
                "max_append_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| LedgerError::ConfigError(format!("Invalid {}={:?}: {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}
