// src/config.rs

//! Loads the static, per-run configuration: etcd connection, clusterdata
//! key, step timeouts, and the agent endpoint list.

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::time::Duration;

/// The complete configuration for one failover run, read from a TOML file.
///
/// Every duration field is written in TOML as a human-readable string
/// (`"5s"`, `"2m"`) via `humantime_serde`, matching the convention already
/// used for per-master timeouts elsewhere in this crate's configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FailoverConfig {
    /// The KV path holding the Stolon cluster manager's JSON snapshot.
    pub clusterdata_key: String,

    /// etcd endpoints this orchestrator connects to.
    pub etcd_endpoints: Vec<String>,

    /// Proxy agent endpoints (e.g. `http://10.0.1.4:7070`).
    #[serde(default)]
    pub agents: Vec<String>,

    #[serde(with = "humantime_serde", default = "default_health_check_timeout")]
    pub health_check_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_lock_timeout")]
    pub lock_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_pause_timeout")]
    pub pause_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_pause_expiry")]
    pub pause_expiry: Duration,

    #[serde(with = "humantime_serde", default = "default_resume_timeout")]
    pub resume_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_stolonctl_timeout")]
    pub stolonctl_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,

    #[serde(with = "humantime_serde", default = "default_get_timeout")]
    pub get_timeout: Duration,

    /// TTL of the etcd lease backing the failover lock's session.
    #[serde(default = "default_lock_lease_ttl_secs")]
    pub lock_lease_ttl_secs: i64,
}

fn default_health_check_timeout() -> Duration {
    Duration::from_secs(3)
}
fn default_lock_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_pause_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_pause_expiry() -> Duration {
    Duration::from_secs(60)
}
fn default_resume_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_stolonctl_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}
fn default_get_timeout() -> Duration {
    Duration::from_secs(3)
}
fn default_lock_lease_ttl_secs() -> i64 {
    30
}

impl FailoverConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at '{path}'"))?;
        let config: FailoverConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse TOML from '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.clusterdata_key.trim().is_empty() {
            return Err(anyhow!("clusterdata_key cannot be empty"));
        }
        if self.etcd_endpoints.is_empty() {
            return Err(anyhow!("etcd_endpoints cannot be empty"));
        }
        if self.agents.is_empty() {
            return Err(anyhow!("agents cannot be empty"));
        }
        if self.pause_expiry <= self.pause_timeout {
            return Err(anyhow!(
                "pause_expiry must be greater than pause_timeout, or agents may self-resume mid-failover"
            ));
        }
        Ok(())
    }
}
