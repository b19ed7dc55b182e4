//! Epidemic dissemination of the cluster configuration.
//!
//! Every node runs a [`ConfigurationGossiper`] actor that owns its copy of
//! the [`ClusterConfiguration`]. Copies are exchanged by periodic pushes to
//! a few random peers and by occasional pull syncs, and combined with
//! [`Crdt::join`], so all nodes converge on the same document regardless of
//! message order, loss or duplication.

pub mod codec;
pub mod config;
pub mod error;
pub mod gossiper;
pub mod topology;
pub mod transport;

pub use codec::GossipState;
pub use config::GossipConfig;
pub use error::GossipError;
pub use gossiper::{ConfigurationGossiper, GossiperHandle};
pub use topology::{
    ClusterConfiguration, Crdt, MemberId, MemberState, MemberStatus, PartitionId, PartitionState,
    PartitionStatus,
};
pub use transport::{GossipTransport, InMemoryNetwork};
