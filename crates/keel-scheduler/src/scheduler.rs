// TASK RUNTIME: ACTOR SCHEDULER
// Fixed worker pool pulling runnable actors from a shared FIFO run queue
//
// SAFETY INVARIANTS:
// 1. Workers never block on I/O; the only wait is for runnable actors
// 2. One slice runs at most `jobs_per_slice` jobs of a single actor
// 3. Shutdown is idempotent and joins every thread it started

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, trace};
use parking_lot::{Condvar, Mutex};

use crate::actor::{Actor, ActorControl, ActorTask, Runnable};
use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, TaskError};
use crate::fatal::{FatalErrorHandler, LogFatalErrorHandler};
use crate::future::ActorFuture;
use crate::timer::TimerQueue;

pub(crate) struct SchedulerShared {
    run_queue: Mutex<VecDeque<Arc<dyn Runnable>>>,
    work_available: Condvar,
    running: AtomicBool,
    timers: TimerQueue,
    fatal_handler: Arc<dyn FatalErrorHandler>,
    jobs_per_slice: usize,
}

impl SchedulerShared {
    pub(crate) fn push_runnable(&self, runnable: Arc<dyn Runnable>) {
        self.run_queue.lock().push_back(runnable);
        self.work_available.notify_one();
    }

    pub(crate) fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    pub(crate) fn fatal_error(&self, actor: &str, error: &TaskError) {
        self.fatal_handler.on_fatal_error(actor, error);
    }

    fn next_runnable(&self) -> Option<Arc<dyn Runnable>> {
        let mut queue = self.run_queue.lock();
        loop {
            if !self.running.load(Ordering::Acquire) {
                return None;
            }
            if let Some(runnable) = queue.pop_front() {
                return Some(runnable);
            }
            self.work_available.wait(&mut queue);
        }
    }

    fn run_worker(&self) {
        while let Some(runnable) = self.next_runnable() {
            trace!("Running slice of actor {}", runnable.name());
            runnable.run_slice(self.jobs_per_slice);
        }
    }
}

/// The cooperative execution substrate every other keel component runs on.
///
/// ```no_run
/// use keel_scheduler::{Actor, ActorScheduler, SchedulerConfig};
///
/// struct Counter(u64);
///
/// impl Actor for Counter {
///     fn name(&self) -> String {
///         "counter".to_string()
///     }
/// }
///
/// let scheduler = ActorScheduler::start(SchedulerConfig::with_workers(2)).unwrap();
/// let counter = scheduler.submit_actor(Counter(0));
/// let value = counter.call(|c, _| {
///     c.0 += 1;
///     Ok(c.0)
/// });
/// assert_eq!(value.join(std::time::Duration::from_secs(1)), Some(Ok(1)));
/// scheduler.shutdown();
/// ```
pub struct ActorScheduler {
    shared: Arc<SchedulerShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl ActorScheduler {
    pub fn start(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        Self::start_with_handler(config, Arc::new(LogFatalErrorHandler))
    }

    pub fn start_with_handler(
        config: SchedulerConfig,
        fatal_handler: Arc<dyn FatalErrorHandler>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;

        let shared = Arc::new(SchedulerShared {
            run_queue: Mutex::new(VecDeque::new()),
            work_available: Condvar::new(),
            running: AtomicBool::new(true),
            timers: TimerQueue::new(Duration::from_millis(config.timer_poll_interval_ms)),
            fatal_handler,
            jobs_per_slice: config.jobs_per_slice,
        });

        let scheduler = ActorScheduler {
            shared: Arc::clone(&shared),
            threads: Mutex::new(Vec::with_capacity(config.worker_threads + 1)),
            worker_count: config.worker_threads,
        };

        for index in 0..config.worker_threads {
            let name = format!("{}-worker-{}", config.thread_name_prefix, index);
            let worker = Arc::clone(&shared);
            scheduler.spawn(name, move || worker.run_worker())?;
        }
        let poller = Arc::clone(&shared);
        scheduler.spawn(format!("{}-timer", config.thread_name_prefix), move || {
            poller.timers.run_poller()
        })?;

        info!(
            "Actor scheduler started with {} workers (slice budget {})",
            config.worker_threads, config.jobs_per_slice
        );
        Ok(scheduler)
    }

    fn spawn<F>(&self, name: String, body: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(body)
            .map_err(|e| {
                self.shutdown();
                SchedulerError::ThreadSpawn {
                    name,
                    reason: e.to_string(),
                }
            })?;
        self.threads.lock().push(handle);
        Ok(())
    }

    /// Registers `actor` and queues its `on_started` hook as its first job.
    pub fn submit_actor<A: Actor>(&self, actor: A) -> ActorControl<A> {
        let task = ActorTask::new(actor, Arc::downgrade(&self.shared));
        let control = ActorControl::start(task);
        debug!("Submitted actor {}", control.name());
        control
    }

    pub fn new_future<T: Clone + Send + 'static>(&self) -> ActorFuture<T> {
        ActorFuture::new()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stops all workers and the timer poller and waits for them to exit.
    /// Jobs still queued are dropped. Must not be called from a worker.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.timers.stop();
        {
            let _queue = self.shared.run_queue.lock();
            self.shared.work_available.notify_all();
        }
        let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for handle in threads {
            let _ = handle.join();
        }
        self.shared.run_queue.lock().clear();
        info!("Actor scheduler shut down");
    }
}

impl Drop for ActorScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
