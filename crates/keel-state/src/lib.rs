//! Partition bootstrap for the replicated log.
//!
//! [`PartitionBootstrap::open`] reconciles the newest durable snapshot with
//! the first retained log entry before anything may write to the log. After
//! that, [`CompactionGate`] decides when entries covered by a snapshot are
//! dropped, backing off while the node is saturated.

pub mod bootstrap;
pub mod compaction;
pub mod consistency;
pub mod error;
pub mod log_store;

pub type PartitionId = u32;

pub use bootstrap::{PartitionBootstrap, WritablePartition};
pub use compaction::{CompactionDecision, CompactionGate, ResourcePressure};
pub use consistency::{no_gap_exists, verify_snapshot_log_consistent, ConsistencyOutcome};
pub use error::StateError;
pub use log_store::{InMemoryLog, InMemorySnapshotStore, LogEntry, PartitionLog, SnapshotStore};
