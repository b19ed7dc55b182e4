// GOSSIP TRANSPORT
// Membership view plus point-to-point sends, supplied by the embedding node
//
// SAFETY INVARIANTS:
// 1. Sends never block the calling actor; outcomes arrive through futures
// 2. A lost or refused message fails its future; nothing is retried here

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Weak};

use keel_scheduler::{ActorFuture, TaskError};
use log::trace;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::GossipError;
use crate::gossiper::GossiperHandle;
use crate::topology::MemberId;

pub trait GossipTransport: Send + Sync {
    /// Current membership view. May include the local member.
    fn known_peers(&self) -> Vec<MemberId>;

    /// One-way push of an encoded gossip state.
    fn push(&self, to: &MemberId, payload: Vec<u8>) -> ActorFuture<()>;

    /// Sync request; resolves with the peer's encoded reply.
    fn sync(&self, to: &MemberId, payload: Vec<u8>) -> ActorFuture<Vec<u8>>;
}

/// In-process network of gossipers with injectable link failures and loss.
pub struct InMemoryNetwork {
    nodes: RwLock<BTreeMap<MemberId, GossiperHandle>>,
    disconnected: RwLock<HashSet<(MemberId, MemberId)>>,
    drop_rate: f64,
    rng: Mutex<StdRng>,
}

impl InMemoryNetwork {
    pub fn new() -> Arc<Self> {
        Self::with_drop_rate(0.0, 0)
    }

    /// Every message is lost with probability `drop_rate`; `seed` makes the
    /// loss pattern reproducible.
    pub fn with_drop_rate(drop_rate: f64, seed: u64) -> Arc<Self> {
        Arc::new(InMemoryNetwork {
            nodes: RwLock::new(BTreeMap::new()),
            disconnected: RwLock::new(HashSet::new()),
            drop_rate: drop_rate.clamp(0.0, 1.0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        })
    }

    /// Transport endpoint for `local`. The member only becomes reachable
    /// once its gossiper is [`register`](Self::register)ed. Endpoints do not
    /// keep the network alive; once it is dropped they see no peers.
    pub fn endpoint(self: &Arc<Self>, local: MemberId) -> Arc<dyn GossipTransport> {
        Arc::new(InMemoryEndpoint {
            local,
            network: Arc::downgrade(self),
        })
    }

    pub fn register(&self, handle: GossiperHandle) {
        self.nodes.write().insert(handle.local_member().clone(), handle);
    }

    pub fn deregister(&self, member: &MemberId) -> Option<GossiperHandle> {
        self.nodes.write().remove(member)
    }

    /// Cuts the link between `a` and `b` in both directions.
    pub fn disconnect(&self, a: &MemberId, b: &MemberId) {
        let mut links = self.disconnected.write();
        links.insert((a.clone(), b.clone()));
        links.insert((b.clone(), a.clone()));
    }

    pub fn reconnect(&self, a: &MemberId, b: &MemberId) {
        let mut links = self.disconnected.write();
        links.remove(&(a.clone(), b.clone()));
        links.remove(&(b.clone(), a.clone()));
    }

    fn route(&self, from: &MemberId, to: &MemberId) -> Result<GossiperHandle, GossipError> {
        if self.disconnected.read().contains(&(from.clone(), to.clone())) {
            return Err(GossipError::Unreachable(to.clone()));
        }
        if self.drop_rate > 0.0 && self.rng.lock().gen_bool(self.drop_rate) {
            trace!("Dropping message from {} to {}", from, to);
            return Err(GossipError::Unreachable(to.clone()));
        }
        self.nodes
            .read()
            .get(to)
            .cloned()
            .ok_or_else(|| GossipError::Unreachable(to.clone()))
    }
}

// the network owns the gossiper handles, so the back reference must be weak
struct InMemoryEndpoint {
    local: MemberId,
    network: Weak<InMemoryNetwork>,
}

impl InMemoryEndpoint {
    fn route(&self, to: &MemberId) -> Result<GossiperHandle, GossipError> {
        match self.network.upgrade() {
            Some(network) => network.route(&self.local, to),
            None => Err(GossipError::Unreachable(to.clone())),
        }
    }
}

impl GossipTransport for InMemoryEndpoint {
    fn known_peers(&self) -> Vec<MemberId> {
        self.network
            .upgrade()
            .map(|network| network.nodes.read().keys().cloned().collect())
            .unwrap_or_default()
    }

    fn push(&self, to: &MemberId, payload: Vec<u8>) -> ActorFuture<()> {
        match self.route(to) {
            Ok(peer) => peer.receive_push(payload),
            Err(e) => ActorFuture::failed(TaskError::failed(e.to_string())),
        }
    }

    fn sync(&self, to: &MemberId, payload: Vec<u8>) -> ActorFuture<Vec<u8>> {
        match self.route(to) {
            Ok(peer) => peer.handle_sync(payload),
            Err(e) => ActorFuture::failed(TaskError::failed(e.to_string())),
        }
    }
}
