// TASK RUNTIME: TIMERS
// Deadline-ordered timer queue serviced by a single low-rate poller thread
//
// SAFETY INVARIANTS:
// 1. The poller never runs user code: a fired timer only submits a job to
//    its owning actor
// 2. Cancelling before the fire job is enqueued always prevents it
// 3. Cancelling after enqueue is resolved by the fire job re-checking the
//    handle on the owning actor before it runs user code

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace};
use parking_lot::{Condvar, Mutex, MutexGuard};

/// Cancellation handle for a delayed or periodic job.
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

pub(crate) type FireFn = Box<dyn FnOnce() + Send>;

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    handle: TimerHandle,
    fire: FireFn,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

pub(crate) struct TimerQueue {
    entries: Mutex<BinaryHeap<Reverse<TimerEntry>>>,
    changed: Condvar,
    next_seq: AtomicU64,
    running: AtomicBool,
    poll_interval: Duration,
}

impl TimerQueue {
    pub(crate) fn new(poll_interval: Duration) -> Self {
        TimerQueue {
            entries: Mutex::new(BinaryHeap::new()),
            changed: Condvar::new(),
            next_seq: AtomicU64::new(0),
            running: AtomicBool::new(true),
            poll_interval,
        }
    }

    pub(crate) fn schedule(&self, delay: Duration, handle: TimerHandle, fire: FireFn) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        let entry = TimerEntry {
            deadline: Instant::now() + delay,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            handle,
            fire,
        };
        self.entries.lock().push(Reverse(entry));
        self.changed.notify_one();
    }

    pub(crate) fn pending(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.entries.lock().clear();
        self.changed.notify_all();
    }

    /// Poller loop; returns once [`stop`](Self::stop) has been called.
    pub(crate) fn run_poller(&self) {
        debug!("Timer poller started");
        let mut entries = self.entries.lock();
        while self.running.load(Ordering::Acquire) {
            let due = Self::take_due(&mut entries, Instant::now());
            if !due.is_empty() {
                MutexGuard::unlocked(&mut entries, || {
                    for entry in due {
                        if entry.handle.is_cancelled() {
                            trace!("Skipping cancelled timer {}", entry.seq);
                            continue;
                        }
                        (entry.fire)();
                    }
                });
                continue;
            }

            let wait = entries
                .peek()
                .map(|Reverse(next)| next.deadline.saturating_duration_since(Instant::now()))
                .map_or(self.poll_interval, |until| until.min(self.poll_interval));
            self.changed.wait_for(&mut entries, wait);
        }
        debug!("Timer poller stopped");
    }

    fn take_due(entries: &mut BinaryHeap<Reverse<TimerEntry>>, now: Instant) -> Vec<TimerEntry> {
        let mut due = Vec::new();
        while entries
            .peek()
            .is_some_and(|Reverse(next)| next.deadline <= now)
        {
            if let Some(Reverse(entry)) = entries.pop() {
                due.push(entry);
            }
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn spawn_poller(queue: &Arc<TimerQueue>) -> thread::JoinHandle<()> {
        let queue = Arc::clone(queue);
        thread::spawn(move || queue.run_poller())
    }

    #[test]
    fn test_timers_fire_in_deadline_order() {
        let queue = Arc::new(TimerQueue::new(Duration::from_millis(5)));
        let fired = Arc::new(Mutex::new(Vec::new()));
        for (delay, label) in [(30u64, "late"), (5, "early"), (15, "middle")] {
            let fired = Arc::clone(&fired);
            queue.schedule(
                Duration::from_millis(delay),
                TimerHandle::new(),
                Box::new(move || fired.lock().push(label)),
            );
        }
        let poller = spawn_poller(&queue);
        thread::sleep(Duration::from_millis(100));
        queue.stop();
        poller.join().unwrap();
        assert_eq!(*fired.lock(), vec!["early", "middle", "late"]);
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let queue = Arc::new(TimerQueue::new(Duration::from_millis(5)));
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = TimerHandle::new();
        let counter = Arc::clone(&fired);
        queue.schedule(
            Duration::from_millis(20),
            handle.clone(),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        handle.cancel();
        let poller = spawn_poller(&queue);
        thread::sleep(Duration::from_millis(60));
        queue.stop();
        poller.join().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(queue.pending(), 0);
    }
}
