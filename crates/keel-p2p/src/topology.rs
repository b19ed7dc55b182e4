// CLUSTER TOPOLOGY DOCUMENT
// Versioned per-member map of partition assignments, merged as a join
// semilattice so gossip converges regardless of message order
//
// SAFETY INVARIANTS:
// 1. join is idempotent, commutative and associative
// 2. join never lowers the document version or any member entry
// 3. A local change strictly increases both the member and document version
// 4. Ties between member entries of equal version resolve by the total
//    order (status, partitions, last_updated); no input order dependence

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type PartitionId = u32;

/// State-based CRDT.
///
/// Implementations must satisfy:
/// - `a.join(&a) == a`
/// - `a.join(&b) == b.join(&a)`
/// - `a.join(&b).join(&c) == a.join(&b.join(&c))`
pub trait Crdt: Sized {
    fn join(&self, other: &Self) -> Self;
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        MemberId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        MemberId::new(id)
    }
}

/// Lifecycle of a member. Declaration order is the tie-break precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MemberStatus {
    Joining,
    Active,
    Leaving,
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PartitionStatus {
    Joining,
    Active,
    Leaving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionState {
    pub status: PartitionStatus,
    /// Leadership priority of this replica; higher is preferred.
    pub priority: u32,
}

impl PartitionState {
    pub fn active(priority: u32) -> Self {
        PartitionState {
            status: PartitionStatus::Active,
            priority,
        }
    }

    pub fn joining(priority: u32) -> Self {
        PartitionState {
            status: PartitionStatus::Joining,
            priority,
        }
    }
}

/// One member's entry. Field order defines the derived total order used to
/// pick a winner between two entries: version first, then status,
/// partitions and last_updated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberState {
    pub version: u64,
    pub status: MemberStatus,
    pub partitions: BTreeMap<PartitionId, PartitionState>,
    pub last_updated: DateTime<Utc>,
}

impl MemberState {
    pub fn joining(now: DateTime<Utc>) -> Self {
        MemberState {
            version: 0,
            status: MemberStatus::Joining,
            partitions: BTreeMap::new(),
            last_updated: now,
        }
    }

    pub fn active(now: DateTime<Utc>) -> Self {
        MemberState {
            status: MemberStatus::Active,
            ..Self::joining(now)
        }
    }

    pub fn assign(&mut self, partition: PartitionId, state: PartitionState) {
        self.partitions.insert(partition, state);
    }

    pub fn unassign(&mut self, partition: PartitionId) -> Option<PartitionState> {
        self.partitions.remove(&partition)
    }

    pub fn has_partition(&self, partition: PartitionId) -> bool {
        self.partitions.contains_key(&partition)
    }
}

impl Crdt for MemberState {
    fn join(&self, other: &Self) -> Self {
        if self >= other {
            self.clone()
        } else {
            other.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfiguration {
    pub version: u64,
    pub members: BTreeMap<MemberId, MemberState>,
}

impl ClusterConfiguration {
    /// The document a node holds before it has heard of any topology.
    pub fn uninitialized() -> Self {
        Self::default()
    }

    /// Version 1 document with every member active and no partitions.
    pub fn initial<I>(members: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = MemberId>,
    {
        let members = members
            .into_iter()
            .map(|id| {
                let mut state = MemberState::active(now);
                state.version = 1;
                (id, state)
            })
            .collect();
        ClusterConfiguration {
            version: 1,
            members,
        }
    }

    pub fn is_uninitialized(&self) -> bool {
        self.version == 0
    }

    pub fn member(&self, id: &MemberId) -> Option<&MemberState> {
        self.members.get(id)
    }

    /// Applies a local change to `id`'s entry and bumps both versions.
    /// A member missing from the document starts out as joining.
    pub fn update_member<F>(&self, id: &MemberId, now: DateTime<Utc>, change: F) -> Self
    where
        F: FnOnce(&mut MemberState),
    {
        let mut next = self.clone();
        let previous = self.members.get(id);
        let mut state = previous.cloned().unwrap_or_else(|| MemberState::joining(now));
        change(&mut state);
        state.version = previous.map_or(0, |p| p.version) + 1;
        state.last_updated = now;
        next.members.insert(id.clone(), state);
        next.version = self.version + 1;
        next
    }

    /// Members currently holding a replica of `partition`.
    pub fn partition_owners(&self, partition: PartitionId) -> Vec<&MemberId> {
        self.members
            .iter()
            .filter(|(_, state)| state.status != MemberStatus::Left && state.has_partition(partition))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn partitions_of(&self, member: &MemberId) -> Vec<PartitionId> {
        self.members
            .get(member)
            .map(|state| state.partitions.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Active replicas of `partition`, highest priority first. Equal
    /// priorities are ordered by member id.
    pub fn leader_candidates(&self, partition: PartitionId) -> Vec<&MemberId> {
        let mut candidates: Vec<(&MemberId, u32)> = self
            .members
            .iter()
            .filter(|(_, state)| state.status == MemberStatus::Active)
            .filter_map(|(id, state)| {
                state
                    .partitions
                    .get(&partition)
                    .filter(|p| p.status == PartitionStatus::Active)
                    .map(|p| (id, p.priority))
            })
            .collect();
        candidates.sort_by(|(a_id, a_prio), (b_id, b_prio)| b_prio.cmp(a_prio).then(a_id.cmp(b_id)));
        candidates.into_iter().map(|(id, _)| id).collect()
    }
}

impl Crdt for ClusterConfiguration {
    fn join(&self, other: &Self) -> Self {
        let mut members = self.members.clone();
        for (id, theirs) in &other.members {
            let merged = match members.get(id) {
                Some(ours) => ours.join(theirs),
                None => theirs.clone(),
            };
            members.insert(id.clone(), merged);
        }
        ClusterConfiguration {
            version: self.version.max(other.version),
            members,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn three_nodes() -> ClusterConfiguration {
        ClusterConfiguration::initial(["a", "b", "c"].map(MemberId::from), at(100))
    }

    #[test]
    fn test_initial_document() {
        let config = three_nodes();
        assert_eq!(config.version, 1);
        assert_eq!(config.members.len(), 3);
        assert!(!config.is_uninitialized());
        assert!(ClusterConfiguration::uninitialized().is_uninitialized());
    }

    #[test]
    fn test_local_update_bumps_versions() {
        let a = MemberId::from("a");
        let updated = three_nodes().update_member(&a, at(200), |state| {
            state.assign(1, PartitionState::active(3));
        });
        assert_eq!(updated.version, 2);
        let state = updated.member(&a).unwrap();
        assert_eq!(state.version, 2);
        assert_eq!(state.last_updated, at(200));
        assert_eq!(updated.partition_owners(1), vec![&a]);
        assert_eq!(updated.partitions_of(&a), vec![1]);
    }

    #[test]
    fn test_unknown_member_joins_on_update() {
        let d = MemberId::from("d");
        let updated = three_nodes().update_member(&d, at(300), |_| {});
        let state = updated.member(&d).unwrap();
        assert_eq!(state.status, MemberStatus::Joining);
        assert_eq!(state.version, 1);
    }

    #[test]
    fn test_higher_member_version_wins() {
        let a = MemberId::from("a");
        let base = three_nodes();
        let newer = base.update_member(&a, at(200), |s| s.assign(1, PartitionState::active(1)));
        assert_eq!(base.join(&newer), newer);
        assert_eq!(newer.join(&base), newer);
    }

    #[test]
    fn test_equal_versions_break_ties_by_status() {
        let a = MemberId::from("a");
        let base = three_nodes();
        let leaving = base.update_member(&a, at(200), |s| s.status = MemberStatus::Leaving);
        let joined = base.update_member(&a, at(200), |s| s.status = MemberStatus::Active);
        let merged = leaving.join(&joined);
        assert_eq!(merged.member(&a).unwrap().status, MemberStatus::Leaving);
        assert_eq!(merged, joined.join(&leaving));
    }

    #[test]
    fn test_concurrent_updates_to_different_members_both_survive() {
        let (a, b) = (MemberId::from("a"), MemberId::from("b"));
        let base = three_nodes();
        let left = base.update_member(&a, at(200), |s| s.assign(1, PartitionState::active(1)));
        let right = base.update_member(&b, at(201), |s| s.assign(2, PartitionState::active(1)));
        let merged = left.join(&right);
        assert_eq!(merged.version, 2);
        assert_eq!(merged.partition_owners(1), vec![&a]);
        assert_eq!(merged.partition_owners(2), vec![&b]);
    }

    #[test]
    fn test_leader_candidates_ordered_by_priority() {
        let (a, b, c) = (MemberId::from("a"), MemberId::from("b"), MemberId::from("c"));
        let config = three_nodes()
            .update_member(&a, at(1), |s| s.assign(1, PartitionState::active(1)))
            .update_member(&b, at(1), |s| s.assign(1, PartitionState::active(5)))
            .update_member(&c, at(1), |s| s.assign(1, PartitionState::joining(9)));
        assert_eq!(config.leader_candidates(1), vec![&b, &a]);
        assert_eq!(config.partition_owners(1).len(), 3);
    }

    #[test]
    fn test_left_member_owns_nothing() {
        let a = MemberId::from("a");
        let config = three_nodes()
            .update_member(&a, at(1), |s| s.assign(1, PartitionState::active(1)))
            .update_member(&a, at(2), |s| s.status = MemberStatus::Left);
        assert!(config.partition_owners(1).is_empty());
    }
}
