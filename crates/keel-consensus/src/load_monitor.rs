// LOAD MONITOR
// Detects sustained high load from the event rate over a trailing window
//
// SAFETY INVARIANTS:
// 1. Purely advisory: recording and querying never fail
// 2. High load means the window sum strictly exceeds the threshold

use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::error::ConsensusError;
use crate::sliding_window::SlidingWindowCounter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadMonitorConfig {
    /// Number of slots summed by `is_under_high_load`.
    pub window_size: usize,
    /// Event count over the window above which the node is saturated.
    pub high_load_threshold: u64,
    pub slot_duration_ms: u64,
}

impl Default for LoadMonitorConfig {
    fn default() -> Self {
        LoadMonitorConfig {
            window_size: 5,
            high_load_threshold: 500,
            slot_duration_ms: 1000,
        }
    }
}

impl LoadMonitorConfig {
    pub fn validate(&self) -> Result<(), ConsensusError> {
        if self.window_size == 0 {
            return Err(ConsensusError::InvalidConfig(
                "window_size must be at least 1".to_string(),
            ));
        }
        if self.slot_duration_ms == 0 {
            return Err(ConsensusError::InvalidConfig(
                "slot_duration_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct LoadMonitor {
    window: SlidingWindowCounter,
    window_size: usize,
    high_load_threshold: u64,
}

impl LoadMonitor {
    pub fn new(config: &LoadMonitorConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &LoadMonitorConfig, clock: Arc<dyn Clock>) -> Self {
        LoadMonitor {
            window: SlidingWindowCounter::new(config.window_size, config.slot_duration_ms, clock),
            window_size: config.window_size,
            high_load_threshold: config.high_load_threshold,
        }
    }

    /// Records one unit of work, typically one applied log entry.
    pub fn record_event(&mut self) {
        self.window.increment();
    }

    pub fn current_rate(&mut self) -> u64 {
        self.window.get(self.window_size)
    }

    pub fn is_under_high_load(&mut self) -> bool {
        let rate = self.current_rate();
        let high = rate > self.high_load_threshold;
        if high {
            debug!(
                "High load: {} events over {} slots (threshold {})",
                rate, self.window_size, self.high_load_threshold
            );
        }
        high
    }
}
