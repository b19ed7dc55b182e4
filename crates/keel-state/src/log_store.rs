// PERSISTENCE COLLABORATORS
// The slice of the log and snapshot stores that partition bootstrap needs
//
// SAFETY INVARIANTS:
// 1. Log indices are contiguous: last_index == first_index + len - 1
// 2. An empty log still has a first index: the index of the next append
// 3. compact() never removes entries at or above the requested index

use std::collections::VecDeque;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::StateError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub data: Vec<u8>,
}

/// A replicated partition log as seen by bootstrap and compaction.
pub trait PartitionLog: Send {
    /// Index of the oldest retained entry, or of the next append when empty.
    fn first_index(&self) -> u64;

    /// Index of the newest entry; `first_index() - 1` when empty.
    fn last_index(&self) -> u64;

    fn is_empty(&self) -> bool;

    /// Discards every entry and restarts the log at `next_index`.
    fn reset(&mut self, next_index: u64) -> Result<(), StateError>;

    /// Appends an entry and returns its index.
    fn append(&mut self, term: u64, data: Vec<u8>) -> Result<u64, StateError>;

    /// Removes entries below `index`. Returns how many were removed.
    fn compact(&mut self, index: u64) -> usize;
}

/// Source of the newest durable snapshot position. 0 means no snapshot.
pub trait SnapshotStore {
    fn latest_snapshot_index(&self) -> u64;
}

#[derive(Debug, Clone)]
pub struct InMemoryLog {
    first_index: u64,
    entries: VecDeque<LogEntry>,
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLog {
    /// A virgin log starting at index 1.
    pub fn new() -> Self {
        InMemoryLog {
            first_index: 1,
            entries: VecDeque::new(),
        }
    }

    /// An empty log whose next append lands at `first_index`, as left behind
    /// by an earlier compaction or reset.
    pub fn starting_at(first_index: u64) -> Self {
        InMemoryLog {
            first_index: first_index.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn entry(&self, index: u64) -> Option<&LogEntry> {
        let offset = index.checked_sub(self.first_index)?;
        self.entries.get(offset as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl PartitionLog for InMemoryLog {
    fn first_index(&self) -> u64 {
        self.first_index
    }

    fn last_index(&self) -> u64 {
        self.first_index + self.entries.len() as u64 - 1
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn reset(&mut self, next_index: u64) -> Result<(), StateError> {
        if next_index == 0 {
            return Err(StateError::InvalidResetIndex(next_index));
        }
        debug!(
            "Resetting log from [{}, {}] to start at {}",
            self.first_index,
            self.last_index(),
            next_index
        );
        self.entries.clear();
        self.first_index = next_index;
        Ok(())
    }

    fn append(&mut self, term: u64, data: Vec<u8>) -> Result<u64, StateError> {
        let index = self.last_index() + 1;
        self.entries.push_back(LogEntry { index, term, data });
        Ok(index)
    }

    fn compact(&mut self, index: u64) -> usize {
        let mut removed = 0;
        while self.entries.front().is_some_and(|e| e.index < index) {
            self.entries.pop_front();
            self.first_index += 1;
            removed += 1;
        }
        removed
    }
}

/// Snapshot store that only remembers the newest snapshot position.
#[derive(Debug, Clone, Copy, Default)]
pub struct InMemorySnapshotStore {
    latest: u64,
}

impl InMemorySnapshotStore {
    pub fn new(latest: u64) -> Self {
        InMemorySnapshotStore { latest }
    }

    /// Records a newer snapshot; older positions are ignored.
    pub fn persist(&mut self, index: u64) {
        self.latest = self.latest.max(index);
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn latest_snapshot_index(&self) -> u64 {
        self.latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virgin_log_indices() {
        let log = InMemoryLog::new();
        assert_eq!(log.first_index(), 1);
        assert_eq!(log.last_index(), 0);
        assert!(log.is_empty());
    }

    #[test]
    fn test_append_assigns_contiguous_indices() {
        let mut log = InMemoryLog::starting_at(6);
        assert_eq!(log.append(1, b"a".to_vec()), Ok(6));
        assert_eq!(log.append(1, b"b".to_vec()), Ok(7));
        assert_eq!(log.first_index(), 6);
        assert_eq!(log.last_index(), 7);
        assert_eq!(log.entry(7).map(|e| e.data.as_slice()), Some(&b"b"[..]));
        assert_eq!(log.entry(5), None);
    }

    #[test]
    fn test_compact_removes_only_lower_entries() {
        let mut log = InMemoryLog::new();
        for term in 0..10 {
            log.append(term, Vec::new()).unwrap();
        }
        assert_eq!(log.compact(4), 3);
        assert_eq!(log.first_index(), 4);
        assert_eq!(log.last_index(), 10);
        assert_eq!(log.compact(2), 0);
        assert_eq!(log.compact(100), 7);
        assert!(log.is_empty());
        assert_eq!(log.first_index(), 11);
    }

    #[test]
    fn test_reset_discards_entries() {
        let mut log = InMemoryLog::new();
        log.append(1, Vec::new()).unwrap();
        log.reset(20).unwrap();
        assert!(log.is_empty());
        assert_eq!(log.first_index(), 20);
        assert_eq!(log.append(2, Vec::new()), Ok(20));
        assert_eq!(log.reset(0), Err(StateError::InvalidResetIndex(0)));
    }

    #[test]
    fn test_snapshot_store_keeps_newest() {
        let mut store = InMemorySnapshotStore::new(5);
        store.persist(3);
        assert_eq!(store.latest_snapshot_index(), 5);
        store.persist(9);
        assert_eq!(store.latest_snapshot_index(), 9);
    }
}
