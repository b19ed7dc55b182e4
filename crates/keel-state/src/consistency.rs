// SNAPSHOT/LOG CONSISTENCY GUARD
// Runs once at partition bootstrap, before any writer is attached to the log
//
// SAFETY INVARIANTS:
// 1. A partition becomes writable only if first_index == 1 or the newest
//    snapshot reaches the first retained entry (snapshot_index + 1 >= first_index)
// 2. A gap in a non-empty log is fatal and is never repaired automatically
// 3. A gap in an empty log is a crash artifact: the log restarts at
//    snapshot_index + 1 and the repair is logged at warn level

use log::{error, warn};
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::PartitionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsistencyOutcome {
    Consistent,
    /// The empty log was reset to start at `new_first_index`.
    Repaired { new_first_index: u64 },
}

pub fn no_gap_exists(snapshot_index: u64, log_first_index: u64) -> bool {
    log_first_index == 1 || (snapshot_index > 0 && snapshot_index.saturating_add(1) >= log_first_index)
}

/// Checks the snapshot/log position pair of `partition_id`.
///
/// `on_repair` is only invoked for the empty-log case, with the index the
/// log must restart at.
pub fn verify_snapshot_log_consistent<F>(
    partition_id: PartitionId,
    snapshot_index: u64,
    log_first_index: u64,
    is_log_empty: bool,
    on_repair: F,
) -> Result<ConsistencyOutcome, StateError>
where
    F: FnOnce(u64) -> Result<(), StateError>,
{
    if no_gap_exists(snapshot_index, log_first_index) {
        return Ok(ConsistencyOutcome::Consistent);
    }

    if !is_log_empty {
        error!(
            "Partition {}: snapshot index {} does not reach first log index {}; refusing to open",
            partition_id, snapshot_index, log_first_index
        );
        return Err(StateError::SnapshotLogGap {
            partition_id,
            snapshot_index,
            log_first_index,
        });
    }

    let new_first_index = snapshot_index.saturating_add(1);
    warn!(
        "Partition {}: empty log starts at {} but the latest snapshot is at {}; \
         assuming a crash during snapshot commit and resetting the log to start at {}",
        partition_id, log_first_index, snapshot_index, new_first_index
    );
    on_repair(new_first_index)?;
    Ok(ConsistencyOutcome::Repaired { new_first_index })
}
