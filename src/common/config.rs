//! Configuration for the minifs controller
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `MINIFS_*` environment variables. The binary applies command-line flags
//! last.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Address the controller listens on for nodes and clients
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Target number of replicas per file (R)
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,

    /// Remove acknowledgment timeout, also bounds rebalance probes
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Seconds between rebalance cycles
    #[serde(default = "default_rebalance_period")]
    pub rebalance_period_secs: u64,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 12345))
}
fn default_replication_factor() -> usize {
    3
}
fn default_timeout_ms() -> u64 {
    1000
}
fn default_rebalance_period() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            replication_factor: default_replication_factor(),
            timeout_ms: default_timeout_ms(),
            rebalance_period_secs: default_rebalance_period(),
            log_level: default_log_level(),
        }
    }
}

impl ControllerConfig {
    /// Load from an optional TOML file and `MINIFS_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Self = builder
            .add_source(config::Environment::with_prefix("MINIFS"))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.replication_factor == 0 {
            return Err(Error::InvalidConfig(
                "replication_factor must be at least 1".into(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfig("timeout_ms must be positive".into()));
        }
        if self.rebalance_period_secs == 0 {
            return Err(Error::InvalidConfig(
                "rebalance_period_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn rebalance_period(&self) -> Duration {
        Duration::from_secs(self.rebalance_period_secs)
    }
}
