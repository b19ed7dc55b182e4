// LOAD MONITOR: SLIDING WINDOW
// Ring of per-slot event counts covering a trailing time span
//
// SAFETY INVARIANTS:
// 1. The head only moves forward; a clock that steps backwards leaves it
//    in place
// 2. Every slot the head passes over is zeroed before it is reused
// 3. Counts saturate instead of wrapping

use std::sync::Arc;

use crate::clock::Clock;

pub struct SlidingWindowCounter {
    slots: Vec<u64>,
    head: usize,
    head_started_ms: u64,
    slot_duration_ms: u64,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowCounter {
    /// `window_slots` and `slot_duration_ms` are clamped to at least 1.
    pub fn new(window_slots: usize, slot_duration_ms: u64, clock: Arc<dyn Clock>) -> Self {
        let head_started_ms = clock.now_millis();
        SlidingWindowCounter {
            slots: vec![0; window_slots.max(1)],
            head: 0,
            head_started_ms,
            slot_duration_ms: slot_duration_ms.max(1),
            clock,
        }
    }

    pub fn window_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn increment(&mut self) {
        self.advance();
        let head = self.head;
        self.slots[head] = self.slots[head].saturating_add(1);
    }

    /// Sum of the newest `slots` slots, the current one included.
    /// Requests larger than the window are clamped to it.
    pub fn get(&mut self, slots: usize) -> u64 {
        self.advance();
        let len = self.slots.len();
        (0..slots.min(len))
            .map(|back| self.slots[(self.head + len - back) % len])
            .fold(0u64, u64::saturating_add)
    }

    fn advance(&mut self) {
        let now = self.clock.now_millis();
        let elapsed = now.saturating_sub(self.head_started_ms) / self.slot_duration_ms;
        if elapsed == 0 {
            return;
        }
        let len = self.slots.len();
        let steps = elapsed.min(len as u64) as usize;
        for _ in 0..steps {
            self.head = (self.head + 1) % len;
            self.slots[self.head] = 0;
        }
        self.head_started_ms += elapsed * self.slot_duration_ms;
    }
}
