// TASK RUNTIME: ACTOR FUTURES
// Write-once result cells shared between actors
//
// SAFETY INVARIANTS:
// 1. A future is resolved at most once: completed, failed or cancelled
// 2. A second resolution attempt is rejected with FutureAlreadyResolved
// 3. Continuations registered before resolution run exactly once, in
//    registration order, on the resolving thread
// 4. Continuations registered after resolution run immediately

use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{SchedulerError, TaskError};

type Continuation<T> = Box<dyn FnOnce(Result<T, TaskError>) + Send>;

enum FutureState<T> {
    Pending {
        continuations: Vec<Continuation<T>>,
        wakers: Vec<Waker>,
    },
    Resolved(Result<T, TaskError>),
}

struct FutureCell<T> {
    state: Mutex<FutureState<T>>,
    resolved: Condvar,
}

/// A write-once result cell.
///
/// Actors never read another actor's state directly; they exchange
/// `ActorFuture`s and attach continuations with
/// [`ActorControl::run_on_completion`](crate::ActorControl::run_on_completion),
/// which re-schedules the continuation on the consuming actor.
pub struct ActorFuture<T> {
    cell: Arc<FutureCell<T>>,
}

impl<T> Clone for ActorFuture<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: Clone + Send + 'static> Default for ActorFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for ActorFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.cell.state.lock() {
            FutureState::Pending { .. } => "pending",
            FutureState::Resolved(Ok(_)) => "completed",
            FutureState::Resolved(Err(TaskError::Cancelled)) => "cancelled",
            FutureState::Resolved(Err(_)) => "failed",
        };
        f.debug_struct("ActorFuture").field("state", &state).finish()
    }
}

impl<T: Clone + Send + 'static> ActorFuture<T> {
    pub fn new() -> Self {
        Self {
            cell: Arc::new(FutureCell {
                state: Mutex::new(FutureState::Pending {
                    continuations: Vec::new(),
                    wakers: Vec::new(),
                }),
                resolved: Condvar::new(),
            }),
        }
    }

    /// A future that is already completed with `value`.
    pub fn completed(value: T) -> Self {
        let future = Self::new();
        let _ = future.complete(value);
        future
    }

    /// A future that has already failed with `error`.
    pub fn failed(error: TaskError) -> Self {
        let future = Self::new();
        let _ = future.fail(error);
        future
    }

    pub fn complete(&self, value: T) -> Result<(), SchedulerError> {
        self.resolve(Ok(value))
    }

    pub fn fail(&self, error: TaskError) -> Result<(), SchedulerError> {
        self.resolve(Err(error))
    }

    /// Cancels the future. Returns `false` if it was already resolved.
    pub fn cancel(&self) -> bool {
        self.resolve(Err(TaskError::Cancelled)).is_ok()
    }

    pub fn is_done(&self) -> bool {
        matches!(&*self.cell.state.lock(), FutureState::Resolved(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            &*self.cell.state.lock(),
            FutureState::Resolved(Err(TaskError::Cancelled))
        )
    }

    /// Non-blocking peek at the outcome.
    pub fn result(&self) -> Option<Result<T, TaskError>> {
        match &*self.cell.state.lock() {
            FutureState::Pending { .. } => None,
            FutureState::Resolved(result) => Some(result.clone()),
        }
    }

    /// Blocks the calling thread until the future resolves or `timeout`
    /// elapses. Returns `None` on timeout.
    ///
    /// Must never be called from inside an actor job: it would park a worker
    /// thread. Use `run_on_completion` there instead.
    pub fn join(&self, timeout: Duration) -> Option<Result<T, TaskError>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.cell.state.lock();
        loop {
            if let FutureState::Resolved(result) = &*state {
                return Some(result.clone());
            }
            if self
                .cell
                .resolved
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return match &*state {
                    FutureState::Resolved(result) => Some(result.clone()),
                    FutureState::Pending { .. } => None,
                };
            }
        }
    }

    /// Registers a raw continuation. It runs on whichever thread resolves
    /// the future, or immediately if the future is already resolved.
    pub fn on_complete<F>(&self, continuation: F)
    where
        F: FnOnce(Result<T, TaskError>) + Send + 'static,
    {
        let mut state = self.cell.state.lock();
        match &mut *state {
            FutureState::Pending { continuations, .. } => {
                continuations.push(Box::new(continuation));
            }
            FutureState::Resolved(result) => {
                let result = result.clone();
                drop(state);
                continuation(result);
            }
        }
    }

    /// Resolves once every future in `futures` has resolved, with their
    /// outcomes in input order. Individual failures do not fail the result.
    pub fn join_all(futures: Vec<ActorFuture<T>>) -> ActorFuture<Vec<Result<T, TaskError>>> {
        let all = ActorFuture::new();
        if futures.is_empty() {
            let _ = all.complete(Vec::new());
            return all;
        }

        let slots: Vec<Option<Result<T, TaskError>>> = vec![None; futures.len()];
        let collected = Arc::new(Mutex::new((slots, futures.len())));
        for (position, future) in futures.into_iter().enumerate() {
            let collected = Arc::clone(&collected);
            let all = all.clone();
            future.on_complete(move |result| {
                let mut guard = collected.lock();
                let (slots, remaining) = &mut *guard;
                slots[position] = Some(result);
                *remaining -= 1;
                if *remaining == 0 {
                    let results = slots.iter_mut().filter_map(Option::take).collect();
                    drop(guard);
                    let _ = all.complete(results);
                }
            });
        }
        all
    }

    fn resolve(&self, result: Result<T, TaskError>) -> Result<(), SchedulerError> {
        let mut state = self.cell.state.lock();
        let (continuations, wakers) = match &mut *state {
            FutureState::Resolved(_) => return Err(SchedulerError::FutureAlreadyResolved),
            FutureState::Pending {
                continuations,
                wakers,
            } => (mem::take(continuations), mem::take(wakers)),
        };
        *state = FutureState::Resolved(result.clone());
        drop(state);

        self.cell.resolved.notify_all();
        for waker in wakers {
            waker.wake();
        }
        for continuation in continuations {
            continuation(result.clone());
        }
        Ok(())
    }
}

impl<T: Clone + Send + 'static> Future for ActorFuture<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.cell.state.lock();
        match &mut *state {
            FutureState::Resolved(result) => Poll::Ready(result.clone()),
            FutureState::Pending { wakers, .. } => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_complete_is_write_once() {
        let future = ActorFuture::new();
        assert!(future.complete(1).is_ok());
        assert_eq!(future.complete(2), Err(SchedulerError::FutureAlreadyResolved));
        assert_eq!(future.fail(TaskError::failed("late")), Err(SchedulerError::FutureAlreadyResolved));
        assert!(!future.cancel());
        assert_eq!(future.result(), Some(Ok(1)));
    }

    #[test]
    fn test_cancel_resolves_as_cancelled() {
        let future: ActorFuture<u32> = ActorFuture::new();
        assert!(future.cancel());
        assert!(future.is_cancelled());
        assert_eq!(future.result(), Some(Err(TaskError::Cancelled)));
        assert!(future.complete(3).is_err());
    }

    #[test]
    fn test_continuations_run_once_in_order() {
        let future = ActorFuture::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            future.on_complete(move |r: Result<&'static str, TaskError>| {
                order.lock().push((i, r.unwrap()));
            });
        }
        future.complete("done").unwrap();
        assert_eq!(*order.lock(), vec![(0, "done"), (1, "done"), (2, "done")]);
    }

    #[test]
    fn test_continuation_after_resolution_runs_immediately() {
        let future = ActorFuture::failed(TaskError::failed("boom"));
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        future.on_complete(move |r: Result<(), TaskError>| {
            assert_eq!(r, Err(TaskError::failed("boom")));
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_join_times_out_when_pending() {
        let future: ActorFuture<u8> = ActorFuture::new();
        assert_eq!(future.join(Duration::from_millis(20)), None);
    }

    #[test]
    fn test_join_wakes_on_completion_from_other_thread() {
        let future = ActorFuture::new();
        let completer = future.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            completer.complete(42u64).unwrap();
        });
        assert_eq!(future.join(Duration::from_secs(5)), Some(Ok(42)));
        handle.join().unwrap();
    }

    #[test]
    fn test_join_all_waits_for_every_future() {
        let first = ActorFuture::new();
        let second = ActorFuture::new();
        let all = ActorFuture::join_all(vec![first.clone(), second.clone()]);

        second.fail(TaskError::failed("unreachable")).unwrap();
        assert!(!all.is_done());
        first.complete(1u8).unwrap();
        assert_eq!(
            all.result(),
            Some(Ok(vec![Ok(1), Err(TaskError::failed("unreachable"))]))
        );
        assert_eq!(
            ActorFuture::<u8>::join_all(Vec::new()).result(),
            Some(Ok(Vec::new()))
        );
    }

    #[test]
    fn test_future_can_be_awaited() {
        let future = ActorFuture::new();
        let completer = future.clone();
        let handle = thread::spawn(move || {
            completer.complete(String::from("awaited")).unwrap();
        });
        let result = futures::executor::block_on(future);
        handle.join().unwrap();
        assert_eq!(result, Ok(String::from("awaited")));
    }
}
