// GOSSIP WIRE FORMAT
// bincode envelope around the optional configuration document

use serde::{Deserialize, Serialize};

use crate::error::GossipError;
use crate::topology::ClusterConfiguration;

/// The message exchanged by pushes, sync requests and sync replies.
/// `None` means the sender has not been initialized yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipState {
    pub configuration: Option<ClusterConfiguration>,
}

impl GossipState {
    pub fn of(configuration: &ClusterConfiguration) -> Self {
        GossipState {
            configuration: (!configuration.is_uninitialized()).then(|| configuration.clone()),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, GossipError> {
        bincode::serialize(self).map_err(GossipError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, GossipError> {
        bincode::deserialize(bytes).map_err(GossipError::Decode)
    }
}
