//! Cooperative actor runtime.
//!
//! Every mutable piece of keel state is owned by exactly one [`Actor`] and
//! touched only by jobs the runtime runs for it, one worker at a time. Actors
//! talk to each other through [`ActorFuture`]s whose continuations are
//! re-scheduled on the consuming actor.

pub mod actor;
pub mod config;
pub mod error;
pub mod fatal;
pub mod future;
pub mod scheduler;
pub mod timer;

pub use actor::{Actor, ActorControl, RepeatStep};
pub use config::SchedulerConfig;
pub use error::{SchedulerError, TaskError};
pub use fatal::{FatalErrorHandler, LogFatalErrorHandler};
pub use future::ActorFuture;
pub use scheduler::ActorScheduler;
pub use timer::TimerHandle;
