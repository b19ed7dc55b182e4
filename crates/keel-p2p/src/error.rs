use thiserror::Error;

use crate::topology::MemberId;

#[derive(Debug, Error)]
pub enum GossipError {
    #[error("Failed to encode gossip state: {0}")]
    Encode(#[source] bincode::Error),

    #[error("Failed to decode gossip state: {0}")]
    Decode(#[source] bincode::Error),

    #[error("Peer {0} is unreachable")]
    Unreachable(MemberId),

    #[error("Invalid gossip configuration: {0}")]
    InvalidConfig(String),
}
