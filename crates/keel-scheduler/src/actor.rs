// TASK RUNTIME: ACTORS
// Single-writer owners of mutable state, driven by the scheduler's workers
//
// SAFETY INVARIANTS:
// 1. An actor is present in the scheduler's run queue at most once
//    (guarded by the `scheduled` flag), so at most one worker runs it
// 2. Jobs of one actor execute in FIFO submission order
// 3. A panicking job never unwinds past the runtime: it is reported to the
//    fatal-error handler and the actor keeps serving later jobs
// 4. Once closed, an actor accepts no further jobs; dropped `call` jobs
//    fail their futures with ActorClosed

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, error, trace};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::TaskError;
use crate::future::ActorFuture;
use crate::scheduler::SchedulerShared;
use crate::timer::TimerHandle;

/// State owner scheduled by the runtime.
///
/// All hooks run on a worker thread with exclusive access to `self`.
pub trait Actor: Send + Sized + 'static {
    fn name(&self) -> String;

    /// First job of every actor, runs before anything submitted after
    /// [`ActorScheduler::submit_actor`](crate::ActorScheduler::submit_actor).
    fn on_started(&mut self, _control: &ActorControl<Self>) {}

    /// Last job of the actor, runs when [`ActorControl::close`] is processed.
    fn on_closing(&mut self, _control: &ActorControl<Self>) {}

    /// Called after a job of this actor panicked.
    fn on_failure(&mut self, _error: &TaskError) {}
}

/// Outcome of one iteration of a repeated job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStep {
    /// Run the body again right away (within the current slice budget).
    Continue,
    /// Give the worker back; the job resumes behind the actor's other jobs.
    Yield,
    /// The job is exhausted.
    Done,
}

type OneShot<A> = Box<dyn FnOnce(&mut A, &ActorControl<A>) + Send>;
type Repeated<A> = Box<dyn FnMut(&mut A, &ActorControl<A>) -> RepeatStep + Send>;

enum Job<A: Actor> {
    Once(OneShot<A>),
    Repeat(Repeated<A>),
}

const STARTED: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// Type-erased view the scheduler's workers operate on.
pub(crate) trait Runnable: Send + Sync {
    fn run_slice(&self, budget: usize);
    fn name(&self) -> &str;
}

pub(crate) struct ActorTask<A: Actor> {
    id: Uuid,
    name: String,
    state: Mutex<A>,
    jobs: Mutex<VecDeque<Job<A>>>,
    scheduled: AtomicBool,
    lifecycle: AtomicU8,
    closed: ActorFuture<()>,
    scheduler: Weak<SchedulerShared>,
    self_ref: Weak<ActorTask<A>>,
}

impl<A: Actor> ActorTask<A> {
    pub(crate) fn new(actor: A, scheduler: Weak<SchedulerShared>) -> Arc<Self> {
        let name = actor.name();
        Arc::new_cyclic(|self_ref| ActorTask {
            id: Uuid::new_v4(),
            name,
            state: Mutex::new(actor),
            jobs: Mutex::new(VecDeque::new()),
            scheduled: AtomicBool::new(false),
            lifecycle: AtomicU8::new(STARTED),
            closed: ActorFuture::new(),
            scheduler,
            self_ref: self_ref.clone(),
        })
    }

    fn accepts_jobs(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) == STARTED
    }

    fn submit(&self, job: Job<A>) -> bool {
        if !self.accepts_jobs() {
            trace!("Dropping job for closed actor {}", self.name);
            return false;
        }
        self.push(job);
        true
    }

    fn push(&self, job: Job<A>) {
        self.jobs.lock().push_back(job);
        if self
            .scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.enqueue_self();
        }
    }

    fn enqueue_self(&self) {
        match (self.scheduler.upgrade(), self.self_ref.upgrade()) {
            (Some(scheduler), Some(task)) => scheduler.push_runnable(task),
            _ => debug!("Scheduler gone, actor {} stays parked", self.name),
        }
    }

    fn control(&self) -> Option<ActorControl<A>> {
        self.self_ref
            .upgrade()
            .map(|task| ActorControl { task })
    }

    /// Finishes closing. `outcome` is what the `closed` future resolves with.
    fn mark_closed(&self, outcome: Result<(), TaskError>) {
        self.lifecycle.store(CLOSED, Ordering::Release);
        let dropped: Vec<Job<A>> = self.jobs.lock().drain(..).collect();
        if !dropped.is_empty() {
            debug!("Actor {} closed with {} pending jobs", self.name, dropped.len());
        }
        drop(dropped);
        let _ = match outcome {
            Ok(()) => self.closed.complete(()),
            Err(error) => self.closed.fail(error),
        };
    }

    fn report_failure(&self, actor: &mut A, error: TaskError) {
        error!("Job of actor {} ({}) failed: {}", self.name, self.id, error);
        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.fatal_error(&self.name, &error);
        }
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| actor.on_failure(&error))) {
            error!(
                "on_failure hook of actor {} panicked: {}",
                self.name,
                panic_message(&*payload)
            );
        }
    }

    /// Re-queues the actor if jobs arrived while it was running, otherwise
    /// parks it. The second check closes the race with a concurrent `push`
    /// that saw `scheduled == true` just before we cleared it.
    fn finish_slice(&self) {
        if !self.jobs.lock().is_empty() {
            self.enqueue_self();
            return;
        }
        self.scheduled.store(false, Ordering::Release);
        if !self.jobs.lock().is_empty()
            && self
                .scheduled
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.enqueue_self();
        }
    }
}

impl<A: Actor> Runnable for ActorTask<A> {
    fn run_slice(&self, budget: usize) {
        let Some(control) = self.control() else {
            return;
        };
        let mut actor = self.state.lock();
        let mut executed = 0;

        while executed < budget {
            let Some(job) = self.jobs.lock().pop_front() else {
                break;
            };
            executed += 1;

            match job {
                Job::Once(job) => {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(&mut *actor, &control)));
                    if let Err(payload) = outcome {
                        self.report_failure(&mut *actor, TaskError::Panicked(panic_message(&*payload)));
                    }
                }
                Job::Repeat(mut body) => loop {
                    let step = panic::catch_unwind(AssertUnwindSafe(|| body(&mut *actor, &control)));
                    match step {
                        Ok(RepeatStep::Continue) if executed < budget => executed += 1,
                        Ok(RepeatStep::Continue) => {
                            self.jobs.lock().push_front(Job::Repeat(body));
                            break;
                        }
                        Ok(RepeatStep::Yield) => {
                            self.jobs.lock().push_back(Job::Repeat(body));
                            executed = budget;
                            break;
                        }
                        Ok(RepeatStep::Done) => break,
                        Err(payload) => {
                            self.report_failure(&mut *actor, TaskError::Panicked(panic_message(&*payload)));
                            break;
                        }
                    }
                },
            }

            if self.lifecycle.load(Ordering::Acquire) == CLOSED {
                break;
            }
        }

        drop(actor);
        if self.lifecycle.load(Ordering::Acquire) == CLOSED {
            self.scheduled.store(false, Ordering::Release);
            return;
        }
        self.finish_slice();
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Fails the wrapped future if it is dropped unresolved, which happens when
/// the job carrying it is discarded by a closed actor.
struct Completion<T: Clone + Send + 'static> {
    future: ActorFuture<T>,
    actor: String,
}

impl<T: Clone + Send + 'static> Drop for Completion<T> {
    fn drop(&mut self) {
        if !self.future.is_done() {
            let _ = self.future.fail(TaskError::ActorClosed(self.actor.clone()));
        }
    }
}

/// Handle to an actor. The only way to reach its state is by submitting
/// jobs through this handle.
pub struct ActorControl<A: Actor> {
    task: Arc<ActorTask<A>>,
}

impl<A: Actor> Clone for ActorControl<A> {
    fn clone(&self) -> Self {
        ActorControl {
            task: Arc::clone(&self.task),
        }
    }
}

impl<A: Actor> std::fmt::Debug for ActorControl<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorControl")
            .field("name", &self.task.name)
            .field("id", &self.task.id)
            .finish()
    }
}

impl<A: Actor> ActorControl<A> {
    pub(crate) fn start(task: Arc<ActorTask<A>>) -> Self {
        let control = ActorControl { task };
        control.run(|actor, control| actor.on_started(control));
        control
    }

    pub fn name(&self) -> &str {
        &self.task.name
    }

    pub fn id(&self) -> Uuid {
        self.task.id
    }

    pub fn is_closed(&self) -> bool {
        !self.task.accepts_jobs()
    }

    /// Appends a one-shot job to the actor's queue.
    pub fn run<F>(&self, job: F)
    where
        F: FnOnce(&mut A, &ActorControl<A>) + Send + 'static,
    {
        self.task.submit(Job::Once(Box::new(job)));
    }

    /// Runs a computation on the actor and resolves the returned future with
    /// its result. A panic fails the future and is also reported to the
    /// fatal-error handler.
    pub fn call<T, F>(&self, job: F) -> ActorFuture<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&mut A, &ActorControl<A>) -> Result<T, TaskError> + Send + 'static,
    {
        let future = ActorFuture::new();
        let completion = Completion {
            future: future.clone(),
            actor: self.task.name.clone(),
        };
        self.task.submit(Job::Once(Box::new(move |actor, control| {
            match panic::catch_unwind(AssertUnwindSafe(|| job(actor, control))) {
                Ok(Ok(value)) => {
                    let _ = completion.future.complete(value);
                }
                Ok(Err(error)) => {
                    let _ = completion.future.fail(error);
                }
                Err(payload) => {
                    let _ = completion
                        .future
                        .fail(TaskError::Panicked(panic_message(&*payload)));
                    panic::resume_unwind(payload);
                }
            }
        })));
        future
    }

    /// Re-runs `body` until it returns [`RepeatStep::Done`]. Returning
    /// [`RepeatStep::Yield`] lets the actor's other jobs (and other actors)
    /// run before the next iteration.
    pub fn run_until_done<F>(&self, body: F)
    where
        F: FnMut(&mut A, &ActorControl<A>) -> RepeatStep + Send + 'static,
    {
        self.task.submit(Job::Repeat(Box::new(body)));
    }

    /// Schedules `continuation` on this actor once `future` resolves.
    pub fn run_on_completion<T, F>(&self, future: &ActorFuture<T>, continuation: F)
    where
        T: Clone + Send + 'static,
        F: FnOnce(&mut A, &ActorControl<A>, Result<T, TaskError>) + Send + 'static,
    {
        let control = self.clone();
        future.on_complete(move |result| {
            control.run(move |actor, control| continuation(actor, control, result));
        });
    }

    pub fn run_delayed<F>(&self, delay: Duration, job: F) -> TimerHandle
    where
        F: FnOnce(&mut A, &ActorControl<A>) + Send + 'static,
    {
        let handle = TimerHandle::new();
        let timer = handle.clone();
        let control = self.clone();
        self.schedule_timer(
            delay,
            handle.clone(),
            Box::new(move || {
                control.run(move |actor, control| {
                    if !timer.is_cancelled() {
                        job(actor, control);
                    }
                });
            }),
        );
        handle
    }

    /// Runs `job` every `interval` until the returned handle is cancelled or
    /// the actor closes. The next run is armed after the current one
    /// finishes, so runs of one timer never overlap.
    pub fn run_at_fixed_rate<F>(&self, interval: Duration, job: F) -> TimerHandle
    where
        F: FnMut(&mut A, &ActorControl<A>) + Send + 'static,
    {
        let handle = TimerHandle::new();
        self.arm_fixed_rate(interval, handle.clone(), job);
        handle
    }

    fn arm_fixed_rate<F>(&self, interval: Duration, handle: TimerHandle, mut job: F)
    where
        F: FnMut(&mut A, &ActorControl<A>) + Send + 'static,
    {
        let timer = handle.clone();
        let control = self.clone();
        self.schedule_timer(
            interval,
            handle,
            Box::new(move || {
                control.run(move |actor, control| {
                    if timer.is_cancelled() {
                        return;
                    }
                    job(actor, control);
                    control.arm_fixed_rate(interval, timer, job);
                });
            }),
        );
    }

    fn schedule_timer(&self, delay: Duration, handle: TimerHandle, fire: crate::timer::FireFn) {
        if self.is_closed() {
            return;
        }
        match self.task.scheduler.upgrade() {
            Some(scheduler) => scheduler.timers().schedule(delay, handle, fire),
            None => debug!("Scheduler gone, timer for actor {} not armed", self.task.name),
        }
    }

    /// Closes the actor after every job already queued has run. Idempotent;
    /// every call returns the same future. The actor ends up closed even if
    /// `on_closing` panics, in which case the future fails.
    pub fn close(&self) -> ActorFuture<()> {
        if self
            .task
            .lifecycle
            .compare_exchange(STARTED, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.task.push(Job::Once(Box::new(|actor, control| {
                let hook = panic::catch_unwind(AssertUnwindSafe(|| actor.on_closing(control)));
                let outcome = match hook {
                    Ok(()) => Ok(()),
                    Err(payload) => {
                        let error = TaskError::Panicked(panic_message(&*payload));
                        control.task.report_failure(actor, error.clone());
                        Err(error)
                    }
                };
                control.task.mark_closed(outcome);
            })));
        }
        self.task.closed.clone()
    }
}
