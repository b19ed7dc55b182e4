//! Decision primitives used by the election and replication protocol:
//! a one-shot [`Quorum`] aggregator, a sliding-window [`LoadMonitor`] and a
//! [`Candidacy`] helper that combines both for a single election round.
//!
//! None of these types synchronise internally. Each instance belongs to one
//! actor and is only touched from that actor's jobs.

pub mod candidacy;
pub mod clock;
pub mod error;
pub mod load_monitor;
pub mod quorum;
pub mod sliding_window;

pub use candidacy::Candidacy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ConsensusError;
pub use load_monitor::{LoadMonitor, LoadMonitorConfig};
pub use quorum::{quorum_size, Quorum};
pub use sliding_window::SlidingWindowCounter;
