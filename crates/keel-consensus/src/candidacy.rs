// CANDIDACY
// One election round: load gate, majority quorum and the self vote
//
// SAFETY INVARIANTS:
// 1. No round starts while the node reports high load
// 2. The self vote is cast exactly once, when the round starts
// 3. An abandoned round never reports an outcome

use log::{debug, info};

use crate::error::ConsensusError;
use crate::load_monitor::LoadMonitor;
use crate::quorum::{quorum_size, Quorum};

#[derive(Debug)]
pub struct Candidacy {
    term: u64,
    quorum: Quorum,
}

impl Candidacy {
    /// Starts a round for `term` among `cluster_size` voters, this node
    /// included. `on_decision` receives `true` once a majority grants the
    /// vote and `false` once a majority rejects it.
    pub fn start<F>(
        term: u64,
        cluster_size: usize,
        load: &mut LoadMonitor,
        on_decision: F,
    ) -> Result<Self, ConsensusError>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        if cluster_size == 0 {
            return Err(ConsensusError::EmptyCluster);
        }
        if load.is_under_high_load() {
            info!("Skipping candidacy for term {}: node is under high load", term);
            return Err(ConsensusError::UnderHighLoad { term });
        }

        let required = quorum_size(cluster_size);
        debug!(
            "Starting candidacy for term {} ({} of {} votes required)",
            term, required, cluster_size
        );
        let mut quorum = Quorum::new(required, on_decision);
        quorum.succeed();
        Ok(Candidacy { term, quorum })
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    pub fn vote(&mut self, granted: bool) {
        if granted {
            self.quorum.succeed();
        } else {
            self.quorum.fail();
        }
    }

    /// Drops the round, e.g. when its timer expires or a higher term shows up.
    pub fn abandon(&mut self) {
        self.quorum.cancel();
    }

    pub fn is_decided(&self) -> bool {
        self.quorum.is_decided()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::load_monitor::LoadMonitorConfig;
    use std::sync::{Arc, Mutex};

    fn idle_monitor() -> LoadMonitor {
        LoadMonitor::with_clock(&LoadMonitorConfig::default(), Arc::new(ManualClock::new(0)))
    }

    fn outcome() -> (Arc<Mutex<Option<bool>>>, impl FnOnce(bool) + Send + 'static) {
        let slot = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&slot);
        (slot, move |won| *sink.lock().unwrap() = Some(won))
    }

    #[test]
    fn test_wins_with_majority_of_five() {
        let mut load = idle_monitor();
        let (result, callback) = outcome();
        let mut round = Candidacy::start(7, 5, &mut load, callback).unwrap();
        assert_eq!(round.term(), 7);

        round.vote(true);
        round.vote(false);
        assert_eq!(*result.lock().unwrap(), None);
        round.vote(true);
        assert_eq!(*result.lock().unwrap(), Some(true));
        assert!(round.is_decided());
    }

    #[test]
    fn test_single_node_wins_immediately() {
        let mut load = idle_monitor();
        let (result, callback) = outcome();
        let round = Candidacy::start(1, 1, &mut load, callback).unwrap();
        assert!(round.is_decided());
        assert_eq!(*result.lock().unwrap(), Some(true));
    }

    #[test]
    fn test_abandoned_round_reports_nothing() {
        let mut load = idle_monitor();
        let (result, callback) = outcome();
        let mut round = Candidacy::start(3, 3, &mut load, callback).unwrap();
        round.abandon();
        round.vote(true);
        assert_eq!(*result.lock().unwrap(), None);
    }

    #[test]
    fn test_refused_under_high_load() {
        let config = LoadMonitorConfig {
            high_load_threshold: 2,
            ..LoadMonitorConfig::default()
        };
        let mut load = LoadMonitor::with_clock(&config, Arc::new(ManualClock::new(0)));
        for _ in 0..3 {
            load.record_event();
        }
        let (result, callback) = outcome();
        let refused = Candidacy::start(4, 3, &mut load, callback);
        assert_eq!(refused.unwrap_err(), ConsensusError::UnderHighLoad { term: 4 });
        assert_eq!(*result.lock().unwrap(), None);
    }

    #[test]
    fn test_empty_cluster_rejected() {
        let mut load = idle_monitor();
        let (_result, callback) = outcome();
        assert_eq!(
            Candidacy::start(1, 0, &mut load, callback).unwrap_err(),
            ConsensusError::EmptyCluster
        );
    }
}
