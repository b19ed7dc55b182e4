// QUORUM AGGREGATOR
// "N acks out of M" decision primitive used for votes and acknowledgements
//
// SAFETY INVARIANTS:
// 1. The decision callback fires at most once
// 2. It fires only from the call that makes succeeded >= required
//    or failed >= required
// 3. After a decision or cancel(), succeed()/fail() are absorbed
// 4. Owned by a single actor; no internal synchronisation

use std::fmt;

use log::trace;

type Decision = Box<dyn FnOnce(bool) + Send>;

/// Majority size for a replication group of `members` voters.
pub fn quorum_size(members: usize) -> usize {
    members / 2 + 1
}

pub struct Quorum {
    required: usize,
    succeeded: usize,
    failed: usize,
    on_decision: Option<Decision>,
    decided: bool,
}

impl Quorum {
    /// Creates an aggregator that reports `true` once `required` successes
    /// arrive, or `false` once `required` failures arrive.
    ///
    /// A self vote is an ordinary first [`succeed`](Self::succeed); with
    /// `required == 1` that call decides immediately.
    pub fn new<F>(required: usize, on_decision: F) -> Self
    where
        F: FnOnce(bool) + Send + 'static,
    {
        Quorum {
            required,
            succeeded: 0,
            failed: 0,
            on_decision: Some(Box::new(on_decision)),
            decided: false,
        }
    }

    pub fn succeed(&mut self) {
        if self.decided {
            return;
        }
        self.succeeded += 1;
        self.check_complete();
    }

    pub fn fail(&mut self) {
        if self.decided {
            return;
        }
        self.failed += 1;
        self.check_complete();
    }

    /// Abandons the decision without ever invoking the callback. Idempotent.
    pub fn cancel(&mut self) {
        if !self.decided {
            trace!(
                "Quorum cancelled at {}/{} succeeded, {}/{} failed",
                self.succeeded,
                self.required,
                self.failed,
                self.required
            );
        }
        self.decided = true;
        self.on_decision = None;
    }

    pub fn is_decided(&self) -> bool {
        self.decided
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn required(&self) -> usize {
        self.required
    }

    fn check_complete(&mut self) {
        let outcome = if self.succeeded >= self.required {
            true
        } else if self.failed >= self.required {
            false
        } else {
            return;
        };
        self.decided = true;
        if let Some(on_decision) = self.on_decision.take() {
            on_decision(outcome);
        }
    }
}

impl fmt::Debug for Quorum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Quorum")
            .field("required", &self.required)
            .field("succeeded", &self.succeeded)
            .field("failed", &self.failed)
            .field("decided", &self.decided)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<bool>>>, impl FnOnce(bool) + Send + 'static) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        (calls, move |outcome| sink.lock().unwrap().push(outcome))
    }

    #[test]
    fn test_quorum_size_is_majority() {
        assert_eq!(quorum_size(1), 1);
        assert_eq!(quorum_size(2), 2);
        assert_eq!(quorum_size(3), 2);
        assert_eq!(quorum_size(4), 3);
        assert_eq!(quorum_size(5), 3);
    }

    #[test]
    fn test_fires_once_when_successes_reach_required() {
        let (calls, callback) = recorder();
        let mut quorum = Quorum::new(2, callback);

        quorum.succeed();
        assert!(calls.lock().unwrap().is_empty());
        quorum.succeed();
        quorum.succeed();
        quorum.fail();
        quorum.fail();

        assert_eq!(*calls.lock().unwrap(), vec![true]);
        assert!(quorum.is_decided());
        assert_eq!(quorum.succeeded(), 2);
        assert_eq!(quorum.failed(), 0);
    }

    #[test]
    fn test_fires_false_when_failures_reach_required() {
        let (calls, callback) = recorder();
        let mut quorum = Quorum::new(2, callback);
        quorum.succeed(); // self vote
        quorum.fail();
        quorum.fail();
        quorum.succeed();
        assert_eq!(*calls.lock().unwrap(), vec![false]);
    }

    #[test]
    fn test_cancel_never_fires() {
        let (calls, callback) = recorder();
        let mut quorum = Quorum::new(3, callback);
        quorum.succeed();
        quorum.cancel();
        quorum.succeed();
        quorum.succeed();
        quorum.cancel();
        assert!(calls.lock().unwrap().is_empty());
        assert!(quorum.is_decided());
        assert_eq!(quorum.succeeded(), 1);
    }

    #[test]
    fn test_single_node_decides_on_self_vote() {
        let (calls, callback) = recorder();
        let mut quorum = Quorum::new(quorum_size(1), callback);
        quorum.succeed();
        quorum.succeed();
        assert_eq!(*calls.lock().unwrap(), vec![true]);
    }
}
