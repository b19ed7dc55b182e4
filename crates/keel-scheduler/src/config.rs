use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Worker pool and timer settings for an [`ActorScheduler`](crate::ActorScheduler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of worker threads executing actor jobs (must be > 0)
    pub worker_threads: usize,

    /// Maximum jobs one actor may run before its worker moves on (must be > 0)
    pub jobs_per_slice: usize,

    /// Upper bound on how long the timer poller sleeps between checks
    pub timer_poll_interval_ms: u64,

    /// Prefix for worker and timer thread names
    pub thread_name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let worker_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        SchedulerConfig {
            worker_threads,
            jobs_per_slice: 32,
            timer_poll_interval_ms: 10,
            thread_name_prefix: "keel".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_workers(worker_threads: usize) -> Self {
        SchedulerConfig {
            worker_threads,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.worker_threads == 0 {
            return Err(SchedulerError::InvalidConfig(
                "worker_threads must be > 0".to_string(),
            ));
        }
        if self.jobs_per_slice == 0 {
            return Err(SchedulerError::InvalidConfig(
                "jobs_per_slice must be > 0".to_string(),
            ));
        }
        if self.timer_poll_interval_ms == 0 {
            return Err(SchedulerError::InvalidConfig(
                "timer_poll_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
