// NODE CONFIGURATION
// Defaults, then an optional TOML file, then KEEL__-prefixed environment
// variables, validated before anything is started

use std::path::Path;

use config::{Config, Environment, File};
use keel_consensus::LoadMonitorConfig;
use keel_p2p::GossipConfig;
use keel_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_PREFIX: &str = "KEEL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Identity of this node in the cluster configuration.
    pub member_id: String,
    /// Initial cluster members. Empty means the node starts uninitialized
    /// and learns the topology through gossip.
    pub members: Vec<String>,
    /// Defer compaction while under high load.
    pub dynamic_compaction: bool,
    pub scheduler: SchedulerConfig,
    pub load_monitor: LoadMonitorConfig,
    pub gossip: GossipConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            member_id: "node-0".to_string(),
            members: Vec::new(),
            dynamic_compaction: true,
            scheduler: SchedulerConfig::default(),
            load_monitor: LoadMonitorConfig::default(),
            gossip: GossipConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Loads and validates the node configuration. A missing `path` only
    /// applies defaults and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    pub fn load_with_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config: NodeConfig = builder
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("members")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.member_id.trim().is_empty() {
            return Err(ConfigError::Invalid("member_id must not be empty".to_string()));
        }
        if !self.members.is_empty() && !self.members.contains(&self.member_id) {
            return Err(ConfigError::Invalid(format!(
                "member_id {} is not one of the configured members",
                self.member_id
            )));
        }
        self.scheduler
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.load_monitor
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.gossip
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}
