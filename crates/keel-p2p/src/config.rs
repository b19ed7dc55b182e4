use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GossipError;

/// Gossiper timing and fan-out. An interval of 0 disables the matching
/// periodic timer; rounds can then only be driven explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    pub gossip_interval_ms: u64,
    pub sync_interval_ms: u64,
    /// Peers contacted per push round.
    pub gossip_fanout: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        GossipConfig {
            gossip_interval_ms: 1000,
            sync_interval_ms: 10_000,
            gossip_fanout: 2,
        }
    }
}

impl GossipConfig {
    /// No periodic timers; for tests and callers that drive rounds.
    pub fn manual(gossip_fanout: usize) -> Self {
        GossipConfig {
            gossip_interval_ms: 0,
            sync_interval_ms: 0,
            gossip_fanout,
        }
    }

    pub fn gossip_interval(&self) -> Option<Duration> {
        (self.gossip_interval_ms > 0).then(|| Duration::from_millis(self.gossip_interval_ms))
    }

    pub fn sync_interval(&self) -> Option<Duration> {
        (self.sync_interval_ms > 0).then(|| Duration::from_millis(self.sync_interval_ms))
    }

    pub fn validate(&self) -> Result<(), GossipError> {
        if self.gossip_fanout == 0 {
            return Err(GossipError::InvalidConfig(
                "gossip_fanout must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
