// TOPOLOGY GOSSIPER
// Periodic push and pull dissemination of the cluster configuration
//
// SAFETY INVARIANTS:
// 1. The configuration document is owned by the gossiper actor; others only
//    ever see copies
// 2. A received document is merged, never forwarded in the same step; a
//    changed document is pushed on the next round
// 3. Each push round snapshots the membership view once, excludes the local
//    member and contacts at most gossip_fanout peers
// 4. Unreachable peers are skipped; failed sends are never retried. A round
//    no peer accepted leaves the document dirty for the next round

use std::sync::Arc;

use chrono::Utc;
use keel_scheduler::{Actor, ActorControl, ActorFuture, ActorScheduler, TaskError, TimerHandle};
use log::{debug, info, trace, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::codec::GossipState;
use crate::config::GossipConfig;
use crate::error::GossipError;
use crate::topology::{ClusterConfiguration, Crdt, MemberId, MemberState};
use crate::transport::GossipTransport;

type Listener = Box<dyn Fn(&ClusterConfiguration) + Send>;

pub struct ConfigurationGossiper {
    local: MemberId,
    config: GossipConfig,
    configuration: ClusterConfiguration,
    dirty: bool,
    transport: Arc<dyn GossipTransport>,
    rng: StdRng,
    listeners: Vec<Listener>,
    timers: Vec<TimerHandle>,
}

impl Actor for ConfigurationGossiper {
    fn name(&self) -> String {
        format!("config-gossiper-{}", self.local)
    }

    fn on_started(&mut self, control: &ActorControl<Self>) {
        if let Some(interval) = self.config.gossip_interval() {
            let timer = control.run_at_fixed_rate(interval, |gossiper, control| {
                gossiper.gossip_round(control);
            });
            self.timers.push(timer);
        }
        if let Some(interval) = self.config.sync_interval() {
            let timer = control.run_at_fixed_rate(interval, |gossiper, control| {
                gossiper.sync_round(control);
            });
            self.timers.push(timer);
        }
        info!(
            "Configuration gossiper started for {} at version {} (fan-out {})",
            self.local, self.configuration.version, self.config.gossip_fanout
        );
    }

    fn on_closing(&mut self, _control: &ActorControl<Self>) {
        for timer in self.timers.drain(..) {
            timer.cancel();
        }
        debug!("Configuration gossiper for {} closed", self.local);
    }
}

impl ConfigurationGossiper {
    fn new(
        local: MemberId,
        initial: ClusterConfiguration,
        config: GossipConfig,
        transport: Arc<dyn GossipTransport>,
    ) -> Self {
        ConfigurationGossiper {
            local,
            config,
            // an unseen local change has to reach the others as well
            dirty: !initial.is_uninitialized(),
            configuration: initial,
            transport,
            rng: StdRng::from_entropy(),
            listeners: Vec::new(),
            timers: Vec::new(),
        }
    }

    /// Pushes the document to a random subset of peers if it changed since
    /// the last round. Resolves with the number of peers that accepted it.
    /// If none did, the document stays marked for the next round.
    fn gossip_round(&mut self, control: &ActorControl<Self>) -> ActorFuture<usize> {
        if !self.dirty {
            return ActorFuture::completed(0);
        }
        let payload = match GossipState::of(&self.configuration).encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("{}: not gossiping: {}", self.local, e);
                return ActorFuture::completed(0);
            }
        };
        self.dirty = false;

        let mut peers: Vec<MemberId> = self
            .transport
            .known_peers()
            .into_iter()
            .filter(|peer| *peer != self.local)
            .collect();
        peers.shuffle(&mut self.rng);
        peers.truncate(self.config.gossip_fanout);

        trace!(
            "{}: pushing version {} to {:?}",
            self.local,
            self.configuration.version,
            peers
        );
        let pushes: Vec<ActorFuture<()>> = peers
            .iter()
            .map(|peer| self.transport.push(peer, payload.clone()))
            .collect();

        let accepted = ActorFuture::new();
        let outcome = accepted.clone();
        let local = self.local.clone();
        control.run_on_completion(
            &ActorFuture::join_all(pushes),
            move |gossiper, _control, results| {
                let results = results.unwrap_or_default();
                for (peer, result) in peers.iter().zip(&results) {
                    if let Err(e) = result {
                        trace!("{}: push to {} failed: {}", local, peer, e);
                    }
                }
                let accepted = results.iter().filter(|r| r.is_ok()).count();
                if accepted == 0 {
                    // nobody took the document; the next round picks new peers
                    gossiper.dirty = true;
                }
                let _ = outcome.complete(accepted);
            },
        );
        accepted
    }

    /// Pull anti-entropy with one random peer. Resolves with whether the
    /// reply changed the local document.
    fn sync_round(&mut self, control: &ActorControl<Self>) -> ActorFuture<bool> {
        let peer = self
            .transport
            .known_peers()
            .into_iter()
            .filter(|peer| *peer != self.local)
            .collect::<Vec<_>>()
            .choose(&mut self.rng)
            .cloned();
        let Some(peer) = peer else {
            return ActorFuture::completed(false);
        };
        let payload = match GossipState::of(&self.configuration).encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("{}: not syncing: {}", self.local, e);
                return ActorFuture::completed(false);
            }
        };

        let changed = ActorFuture::new();
        let outcome = changed.clone();
        let reply = self.transport.sync(&peer, payload);
        control.run_on_completion(&reply, move |gossiper, _control, result| {
            let merged = match result {
                Ok(bytes) => gossiper.merge_encoded(&bytes),
                Err(e) => {
                    trace!("{}: sync with {} failed: {}", gossiper.local, peer, e);
                    false
                }
            };
            let _ = outcome.complete(merged);
        });
        changed
    }

    /// Decodes and merges a remote state. Returns whether the local
    /// document changed. Undecodable payloads are dropped.
    fn merge_encoded(&mut self, bytes: &[u8]) -> bool {
        match GossipState::decode(bytes) {
            Ok(GossipState {
                configuration: Some(remote),
            }) => self.merge(&remote),
            Ok(GossipState { configuration: None }) => false,
            Err(e) => {
                warn!("{}: dropping gossip: {}", self.local, e);
                false
            }
        }
    }

    fn merge(&mut self, remote: &ClusterConfiguration) -> bool {
        let merged = self.configuration.join(remote);
        if merged == self.configuration {
            return false;
        }
        debug!(
            "{}: merged remote version {} into {} -> {}",
            self.local, remote.version, self.configuration.version, merged.version
        );
        self.replace(merged);
        true
    }

    fn update_local<F>(&mut self, change: F) -> ClusterConfiguration
    where
        F: FnOnce(&mut MemberState),
    {
        let updated = self.configuration.update_member(&self.local, Utc::now(), change);
        debug!(
            "{}: local change, version {} -> {}",
            self.local, self.configuration.version, updated.version
        );
        self.replace(updated);
        self.configuration.clone()
    }

    fn replace(&mut self, configuration: ClusterConfiguration) {
        self.configuration = configuration;
        self.dirty = true;
        for listener in &self.listeners {
            listener(&self.configuration);
        }
    }
}

/// Cloneable entry point to a running gossiper. Every method schedules a
/// job on the gossiper actor.
#[derive(Clone, Debug)]
pub struct GossiperHandle {
    local: MemberId,
    control: ActorControl<ConfigurationGossiper>,
}

impl GossiperHandle {
    pub fn start(
        scheduler: &ActorScheduler,
        local: MemberId,
        initial: ClusterConfiguration,
        config: GossipConfig,
        transport: Arc<dyn GossipTransport>,
    ) -> Result<Self, GossipError> {
        config.validate()?;
        let gossiper = ConfigurationGossiper::new(local.clone(), initial, config, transport);
        let control = scheduler.submit_actor(gossiper);
        Ok(GossiperHandle { local, control })
    }

    pub fn local_member(&self) -> &MemberId {
        &self.local
    }

    /// Applies a local topology change to this member's entry, bumps the
    /// versions and marks the document for the next push round.
    pub fn update_local_member<F>(&self, change: F) -> ActorFuture<ClusterConfiguration>
    where
        F: FnOnce(&mut MemberState) + Send + 'static,
    {
        self.control
            .call(move |gossiper, _| Ok(gossiper.update_local(change)))
    }

    pub fn configuration(&self) -> ActorFuture<ClusterConfiguration> {
        self.control
            .call(|gossiper, _| Ok(gossiper.configuration.clone()))
    }

    /// Runs one push round now, independent of the periodic timer.
    pub fn gossip_round(&self) -> ActorFuture<usize> {
        self.forward(|gossiper, control| gossiper.gossip_round(control))
    }

    /// Runs one pull round now, independent of the periodic timer.
    pub fn sync_round(&self) -> ActorFuture<bool> {
        self.forward(|gossiper, control| gossiper.sync_round(control))
    }

    /// Delivers a pushed state from a peer.
    pub fn receive_push(&self, payload: Vec<u8>) -> ActorFuture<()> {
        self.control.call(move |gossiper, _| {
            gossiper.merge_encoded(&payload);
            Ok(())
        })
    }

    /// Answers a sync request: merges the requester's state and replies with
    /// the local document.
    pub fn handle_sync(&self, payload: Vec<u8>) -> ActorFuture<Vec<u8>> {
        self.control.call(move |gossiper, _| {
            gossiper.merge_encoded(&payload);
            GossipState::of(&gossiper.configuration)
                .encode()
                .map_err(|e| TaskError::failed(e.to_string()))
        })
    }

    /// Registers a listener called with the new document after every change.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&ClusterConfiguration) + Send + 'static,
    {
        self.control
            .run(move |gossiper, _| gossiper.listeners.push(Box::new(listener)));
    }

    pub fn close(&self) -> ActorFuture<()> {
        self.control.close()
    }

    /// Runs `round` on the actor and relays the future it returns.
    fn forward<T, F>(&self, round: F) -> ActorFuture<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&mut ConfigurationGossiper, &ActorControl<ConfigurationGossiper>) -> ActorFuture<T>
            + Send
            + 'static,
    {
        let relayed = ActorFuture::new();
        let outcome = relayed.clone();
        let dispatched = self.control.call(move |gossiper, control| Ok(round(gossiper, control)));
        dispatched.on_complete(move |result| match result {
            Ok(inner) => inner.on_complete(move |result| {
                let _ = match result {
                    Ok(value) => outcome.complete(value),
                    Err(e) => outcome.fail(e),
                };
            }),
            Err(e) => {
                let _ = outcome.fail(e);
            }
        });
        relayed
    }
}
