// CLUSTER NODE
// Wires the actor runtime, the topology gossiper and partition replicas
//
// SAFETY INVARIANTS:
// 1. A partition replica exists only after its log passed bootstrap
// 2. Each replica's log, load monitor and compaction gate belong to its
//    own actor
// 3. A replica is announced through gossip only once it is writable

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use keel_consensus::{LoadMonitor, LoadMonitorConfig};
use keel_p2p::{
    ClusterConfiguration, GossipTransport, GossiperHandle, MemberId, PartitionId, PartitionState,
};
use keel_scheduler::{Actor, ActorControl, ActorFuture, ActorScheduler};
use keel_state::{
    CompactionGate, ConsistencyOutcome, PartitionBootstrap, PartitionLog, ResourcePressure,
    SnapshotStore, WritablePartition,
};
use log::{info, warn};

use crate::config::NodeConfig;

/// Actor owning one writable partition.
pub struct PartitionReplica<L> {
    partition: WritablePartition<L>,
    load: LoadMonitor,
    compaction: CompactionGate,
}

impl<L: PartitionLog + 'static> Actor for PartitionReplica<L> {
    fn name(&self) -> String {
        format!("partition-{}", self.partition.partition_id())
    }
}

impl<L: PartitionLog + 'static> PartitionReplica<L> {
    pub fn new(partition: WritablePartition<L>, load: &LoadMonitorConfig, compaction: CompactionGate) -> Self {
        PartitionReplica {
            partition,
            load: LoadMonitor::new(load),
            compaction,
        }
    }
}

/// Handle to a running [`PartitionReplica`].
pub struct PartitionHandle<L: PartitionLog + 'static> {
    partition_id: PartitionId,
    outcome: ConsistencyOutcome,
    announcement: ActorFuture<ClusterConfiguration>,
    control: ActorControl<PartitionReplica<L>>,
}

impl<L: PartitionLog + 'static> Clone for PartitionHandle<L> {
    fn clone(&self) -> Self {
        PartitionHandle {
            partition_id: self.partition_id,
            outcome: self.outcome,
            announcement: self.announcement.clone(),
            control: self.control.clone(),
        }
    }
}

impl<L: PartitionLog + 'static> PartitionHandle<L> {
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// What bootstrap had to do before the partition became writable.
    pub fn bootstrap_outcome(&self) -> ConsistencyOutcome {
        self.outcome
    }

    /// Resolves with the configuration that first listed this replica, or
    /// fails if the gossiper could not take the assignment.
    pub fn announced(&self) -> ActorFuture<ClusterConfiguration> {
        self.announcement.clone()
    }

    /// Appends an entry and counts it towards the replica's load.
    pub fn append(&self, term: u64, data: Vec<u8>) -> ActorFuture<u64> {
        self.control.call(move |replica, _| {
            let index = replica
                .partition
                .append(term, data)
                .map_err(|e| keel_scheduler::TaskError::failed(e.to_string()))?;
            replica.load.record_event();
            Ok(index)
        })
    }

    /// `(first_index, last_index)` of the replica's log.
    pub fn bounds(&self) -> ActorFuture<(u64, u64)> {
        self.control.call(|replica, _| {
            let log = replica.partition.log();
            Ok((log.first_index(), log.last_index()))
        })
    }

    /// Whether the replica should refuse to bid for leadership right now.
    pub fn is_under_high_load(&self) -> ActorFuture<bool> {
        self.control
            .call(|replica, _| Ok(replica.load.is_under_high_load()))
    }

    /// Records a persisted snapshot at `index` and compacts the log below it
    /// unless the compaction gate defers. Resolves with the number of
    /// removed entries, or `None` when deferred.
    pub fn snapshot_taken(
        &self,
        index: u64,
        force: bool,
        pressure: ResourcePressure,
    ) -> ActorFuture<Option<usize>> {
        self.control.call(move |replica, _| {
            replica.partition.snapshot_taken(index);
            let PartitionReplica {
                partition,
                load,
                compaction,
            } = replica;
            Ok(compaction.maybe_compact(partition, force, pressure, load))
        })
    }

    pub fn close(&self) -> ActorFuture<()> {
        self.control.close()
    }
}

pub struct ClusterNode {
    member: MemberId,
    config: NodeConfig,
    scheduler: ActorScheduler,
    gossiper: GossiperHandle,
    partitions: Vec<PartitionId>,
}

impl ClusterNode {
    pub fn start(config: NodeConfig, transport: Arc<dyn GossipTransport>) -> Result<Self> {
        config.validate().context("refusing to start node")?;
        let member = MemberId::new(config.member_id.clone());

        let scheduler =
            ActorScheduler::start(config.scheduler.clone()).context("failed to start scheduler")?;

        let initial = if config.members.is_empty() {
            ClusterConfiguration::uninitialized()
        } else {
            ClusterConfiguration::initial(config.members.iter().cloned().map(MemberId::new), Utc::now())
        };
        let gossiper = GossiperHandle::start(
            &scheduler,
            member.clone(),
            initial,
            config.gossip.clone(),
            transport,
        )
        .context("failed to start configuration gossiper")?;

        info!("Node {} started", member);
        Ok(ClusterNode {
            member,
            config,
            scheduler,
            gossiper,
            partitions: Vec::new(),
        })
    }

    pub fn member_id(&self) -> &MemberId {
        &self.member
    }

    pub fn gossiper(&self) -> &GossiperHandle {
        &self.gossiper
    }

    pub fn scheduler(&self) -> &ActorScheduler {
        &self.scheduler
    }

    pub fn partitions(&self) -> &[PartitionId] {
        &self.partitions
    }

    /// Bootstraps `partition_id` from its recovered log and snapshot store,
    /// starts its replica actor and announces the assignment to the cluster.
    pub fn open_partition<L, S>(
        &mut self,
        partition_id: PartitionId,
        priority: u32,
        log: L,
        snapshots: &S,
    ) -> Result<PartitionHandle<L>>
    where
        L: PartitionLog + 'static,
        S: SnapshotStore + ?Sized,
    {
        let partition = PartitionBootstrap::open(partition_id, log, snapshots)
            .with_context(|| format!("partition {} failed bootstrap on {}", partition_id, self.member))?;
        let outcome = partition.outcome();

        let replica = PartitionReplica::new(
            partition,
            &self.config.load_monitor,
            CompactionGate::new(self.config.dynamic_compaction),
        );
        let control = self.scheduler.submit_actor(replica);
        self.partitions.push(partition_id);

        let announcement = self
            .gossiper
            .update_local_member(move |state| state.assign(partition_id, PartitionState::active(priority)));
        let member = self.member.clone();
        announcement.on_complete(move |result| {
            if let Err(e) = result {
                warn!(
                    "Node {}: partition {} is open but was not announced: {}",
                    member, partition_id, e
                );
            }
        });

        Ok(PartitionHandle {
            partition_id,
            outcome,
            announcement,
            control,
        })
    }

    /// Closes the gossiper and stops the runtime.
    pub fn shutdown(self) {
        let _ = self.gossiper.close().join(std::time::Duration::from_secs(5));
        self.scheduler.shutdown();
        info!("Node {} stopped", self.member);
    }
}
