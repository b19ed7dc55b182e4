// COMPACTION GATE
// Decides whether log compaction after a snapshot runs now or waits
//
// SAFETY INVARIANTS:
// 1. Forced compaction and resource pressure always compact
// 2. Only an otherwise optional compaction is deferred, and only under
//    high load
// 3. Compaction never removes entries above the latest snapshot

use log::debug;
use serde::{Deserialize, Serialize};

use keel_consensus::LoadMonitor;

use crate::bootstrap::WritablePartition;
use crate::log_store::PartitionLog;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePressure {
    pub memory: bool,
    pub disk: bool,
}

impl ResourcePressure {
    pub fn any(&self) -> bool {
        self.memory || self.disk
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionDecision {
    CompactNow,
    Defer,
}

#[derive(Debug, Clone, Copy)]
pub struct CompactionGate {
    dynamic: bool,
}

impl Default for CompactionGate {
    fn default() -> Self {
        CompactionGate { dynamic: true }
    }
}

impl CompactionGate {
    /// With `dynamic` off every request compacts immediately.
    pub fn new(dynamic: bool) -> Self {
        CompactionGate { dynamic }
    }

    pub fn decide(
        &self,
        force: bool,
        pressure: ResourcePressure,
        load: &mut LoadMonitor,
    ) -> CompactionDecision {
        if !force && self.dynamic && !pressure.any() && load.is_under_high_load() {
            debug!("Deferring compaction due to high load");
            return CompactionDecision::Defer;
        }
        CompactionDecision::CompactNow
    }

    /// Compacts `partition` up to its latest snapshot unless the gate defers.
    /// Returns the number of removed entries.
    pub fn maybe_compact<L: PartitionLog>(
        &self,
        partition: &mut WritablePartition<L>,
        force: bool,
        pressure: ResourcePressure,
        load: &mut LoadMonitor,
    ) -> Option<usize> {
        match self.decide(force, pressure, load) {
            CompactionDecision::Defer => None,
            CompactionDecision::CompactNow => {
                let up_to = partition.snapshot_index();
                let removed = partition.log_mut().compact(up_to);
                debug!(
                    "Compacted partition {} below index {}: {} entries removed",
                    partition.partition_id(),
                    up_to,
                    removed
                );
                Some(removed)
            }
        }
    }
}
