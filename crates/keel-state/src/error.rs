use thiserror::Error;

use crate::PartitionId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// The newest snapshot does not reach the oldest retained log entry
    /// and the log still holds entries. Usually a corrupted snapshot.
    #[error(
        "Partition {partition_id}: gap between snapshot index {snapshot_index} and first log index \
         {log_first_index}; the snapshot may be corrupted"
    )]
    SnapshotLogGap {
        partition_id: PartitionId,
        snapshot_index: u64,
        log_first_index: u64,
    },

    #[error("Log reset target must be at least 1, got {0}")]
    InvalidResetIndex(u64),
}
