// PARTITION BOOTSTRAP
// Turns a recovered log plus snapshot position into a writable partition
//
// SAFETY INVARIANTS:
// 1. The consistency guard runs exactly once, before the log is handed out
// 2. A WritablePartition only exists for a log that passed the guard
// 3. Repairs go through PartitionLog::reset, never by editing indices

use log::info;

use crate::consistency::{verify_snapshot_log_consistent, ConsistencyOutcome};
use crate::error::StateError;
use crate::log_store::{PartitionLog, SnapshotStore};
use crate::PartitionId;

pub struct PartitionBootstrap;

impl PartitionBootstrap {
    pub fn open<L, S>(
        partition_id: PartitionId,
        mut log: L,
        snapshots: &S,
    ) -> Result<WritablePartition<L>, StateError>
    where
        L: PartitionLog,
        S: SnapshotStore + ?Sized,
    {
        let snapshot_index = snapshots.latest_snapshot_index();
        let outcome = verify_snapshot_log_consistent(
            partition_id,
            snapshot_index,
            log.first_index(),
            log.is_empty(),
            |next_index| log.reset(next_index),
        )?;

        info!(
            "Partition {} is writable: snapshot {}, log [{}, {}]",
            partition_id,
            snapshot_index,
            log.first_index(),
            log.last_index()
        );
        Ok(WritablePartition {
            partition_id,
            snapshot_index,
            outcome,
            log,
        })
    }
}

/// A partition whose log passed the snapshot/log consistency check.
pub struct WritablePartition<L> {
    partition_id: PartitionId,
    snapshot_index: u64,
    outcome: ConsistencyOutcome,
    log: L,
}

impl<L: PartitionLog> WritablePartition<L> {
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub fn snapshot_index(&self) -> u64 {
        self.snapshot_index
    }

    pub fn outcome(&self) -> ConsistencyOutcome {
        self.outcome
    }

    pub fn append(&mut self, term: u64, data: Vec<u8>) -> Result<u64, StateError> {
        self.log.append(term, data)
    }

    /// Records a newer snapshot position, e.g. after the state machine
    /// persisted one. Compaction may then drop entries below it.
    pub fn snapshot_taken(&mut self, index: u64) {
        self.snapshot_index = self.snapshot_index.max(index);
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut L {
        &mut self.log
    }

    pub fn into_log(self) -> L {
        self.log
    }
}
