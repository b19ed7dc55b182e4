//! keel: the replication and coordination core beneath a multi-partition,
//! Raft-style log.
//!
//! The workspace crates provide the pieces:
//!
//! - [`keel_scheduler`]: cooperative actor runtime everything else runs on
//! - [`keel_consensus`]: quorum aggregation, load monitoring, candidacy
//! - [`keel_state`]: snapshot/log consistency at partition bootstrap and
//!   load-aware compaction
//! - [`keel_p2p`]: gossip of the cluster configuration document
//!
//! This crate wires them into a [`ClusterNode`] driven by a [`NodeConfig`].

pub mod config;
pub mod logging;
pub mod node;

pub use config::{ConfigError, NodeConfig};
pub use node::{ClusterNode, PartitionHandle, PartitionReplica};

pub use keel_consensus;
pub use keel_p2p;
pub use keel_scheduler;
pub use keel_state;
