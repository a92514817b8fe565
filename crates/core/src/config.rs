//! Configuration management for Sovledger.
//!
//! Every section carries serde defaults, so a partial TOML file only needs to
//! name the values it changes.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub reputation: ReputationConfig,
    #[serde(default)]
    pub crisis: CrisisConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite database file
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/ledger.db"),
            busy_timeout_ms: 5000,
        }
    }
}

impl LedgerConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on every store round-trip made by a commit
    pub store_timeout_ms: u64,
    /// Appends retried after losing a race for the chain tip
    pub max_append_attempts: u32,
    /// Actions only the root authority may commit
    pub privileged_actions: Vec<String>,
    /// Threat level broadcast when the durable store fails
    pub persistence_failure_severity: f64,
    pub max_tags: usize,
    pub max_tag_len: usize,
    pub max_action_len: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: 5000,
            max_append_attempts: 64,
            privileged_actions: vec!["SENSORY_BURST".to_string()],
            persistence_failure_severity: 80.0,
            max_tags: 20,
            max_tag_len: 32,
            max_action_len: 128,
        }
    }
}

impl PipelineConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationConfig {
    pub failure_penalty: f64,
    pub success_credit: f64,
    pub crisis_threshold: f64,
    pub lockdown_threshold: f64,
    /// Records expire after this many seconds without activity
    pub ttl_secs: u64,
    pub key_prefix: String,
    pub op_timeout_ms: u64,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            failure_penalty: 12.5,
            success_credit: 1.0,
            crisis_threshold: 75.0,
            lockdown_threshold: 95.0,
            ttl_secs: 3600,
            key_prefix: "reputation:".to_string(),
            op_timeout_ms: 2000,
        }
    }
}

impl ReputationConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrisisConfig {
    /// Channel name used when events are relayed to Redis
    pub topic: String,
    pub capacity: usize,
    /// Severity at or above which an event is a lockdown
    pub lockdown_severity: f64,
    pub max_severity: f64,
}

impl Default for CrisisConfig {
    fn default() -> Self {
        Self {
            topic: "ledger:crisis".to_string(),
            capacity: 1024,
            lockdown_severity: 95.0,
            max_severity: 100.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// The single root authority identifier
    pub root_did: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            root_did: "did:sovledger:root".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub listen_addr: String,
    pub max_body_bytes: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8088".to_string(),
            max_body_bytes: 65536,
        }
    }
}

impl Config {
    #[cfg(feature = "toml")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self::default()
    }

    /// Reject policy combinations the pipeline cannot honor.
    pub fn validate(&self) -> Result<()> {
        let rep = &self.reputation;
        if rep.failure_penalty <= 0.0 || rep.success_credit <= 0.0 {
            return Err(CoreError::Config(
                "reputation penalty and credit must be positive".to_string(),
            ));
        }
        if rep.crisis_threshold >= rep.lockdown_threshold {
            return Err(CoreError::Config(format!(
                "crisis threshold {} must be below lockdown threshold {}",
                rep.crisis_threshold, rep.lockdown_threshold
            )));
        }
        if self.pipeline.max_append_attempts == 0 {
            return Err(CoreError::Config(
                "max_append_attempts must be at least 1".to_string(),
            ));
        }
        if self.identity.root_did.trim().is_empty() {
            return Err(CoreError::Config("root_did cannot be empty".to_string()));
        }
        if self.crisis.capacity == 0 {
            return Err(CoreError::Config("crisis capacity must be non-zero".to_string()));
        }
        Ok(())
    }
}
