#![forbid(unsafe_code)]

//! Virtual-time scheduler.
//!
//! Time only moves when the test says so. Due callbacks run one at a time in
//! `(due, insertion)` order, so two timers due at the same instant fire in
//! the order they were scheduled, like a browser's timer queue.

use core::time::Duration;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};

use reqrev_host::{HostScheduler, TimerHandle};

/// Animation frames are modelled as timeouts at a 60 Hz cadence.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

enum Task {
    Once(Box<dyn FnOnce()>),
    Repeat {
        period: Duration,
        callback: Box<dyn FnMut()>,
    },
}

type QueueKey = (Duration, u64);

pub struct VirtualScheduler {
    now: Cell<Duration>,
    seq: Cell<u64>,
    next_id: Cell<i32>,
    queue: RefCell<BTreeMap<QueueKey, (TimerHandle, Task)>>,
    /// Live handles and where they sit in the queue. A running interval is
    /// live but absent from the queue until re-armed.
    live: RefCell<HashMap<TimerHandle, Option<QueueKey>>>,
    fired: Cell<u64>,
}

impl Default for VirtualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualScheduler {
    /// A scheduler whose clock starts at `0`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Cell::new(Duration::ZERO),
            seq: Cell::new(0),
            next_id: Cell::new(1),
            queue: RefCell::new(BTreeMap::new()),
            live: RefCell::new(HashMap::new()),
            fired: Cell::new(0),
        }
    }

    /// Timers not yet fired or cancelled. Running intervals count.
    pub fn pending_timers(&self) -> usize {
        self.live.borrow().len()
    }

    /// Callbacks run so far.
    pub fn fired(&self) -> u64 {
        self.fired.get()
    }

    /// When the earliest queued callback is due.
    pub fn next_due(&self) -> Option<Duration> {
        self.queue.borrow().keys().next().map(|(due, _)| *due)
    }

    /// Move the clock forward without running anything. Never goes back.
    pub fn advance_to(&self, instant: Duration) {
        if instant > self.now.get() {
            self.now.set(instant);
        }
    }

    /// Run the earliest callback due at or before `until`, moving the clock
    /// to its due time. Returns `false` when nothing is due.
    pub fn run_next_due(&self, until: Duration) -> bool {
        let entry = {
            let mut queue = self.queue.borrow_mut();
            match queue.first_key_value() {
                Some((key, _)) if key.0 <= until => queue.pop_first(),
                _ => None,
            }
        };
        let Some(((due, _), (handle, task))) = entry else {
            return false;
        };
        self.advance_to(due);
        self.fired.set(self.fired.get() + 1);

        match task {
            Task::Once(callback) => {
                self.live.borrow_mut().remove(&handle);
                callback();
            }
            Task::Repeat {
                period,
                mut callback,
            } => {
                if let Some(slot) = self.live.borrow_mut().get_mut(&handle) {
                    *slot = None;
                }
                callback();
                // Cancelled from inside its own callback: not re-armed.
                if self.live.borrow().contains_key(&handle) {
                    let key = self.enqueue(
                        due.saturating_add(period.max(Duration::from_millis(1))),
                        handle,
                        Task::Repeat { period, callback },
                    );
                    self.live.borrow_mut().insert(handle, Some(key));
                }
            }
        }
        true
    }

    fn enqueue(&self, due: Duration, handle: TimerHandle, task: Task) -> QueueKey {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        let key = (due, seq);
        self.queue.borrow_mut().insert(key, (handle, task));
        key
    }

    fn schedule(&self, delay: Duration, make: impl FnOnce(i32) -> TimerHandle, task: Task) -> TimerHandle {
        let id = self.next_id.get();
        self.next_id.set(id.wrapping_add(1));
        let handle = make(id);
        let key = self.enqueue(self.now.get().saturating_add(delay), handle, task);
        self.live.borrow_mut().insert(handle, Some(key));
        handle
    }
}

impl HostScheduler for VirtualScheduler {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerHandle {
        self.schedule(delay, TimerHandle::Timeout, Task::Once(callback))
    }

    fn set_interval(&self, period: Duration, callback: Box<dyn FnMut()>) -> TimerHandle {
        self.schedule(
            period,
            TimerHandle::Interval,
            Task::Repeat { period, callback },
        )
    }

    fn request_animation_frame(&self, callback: Box<dyn FnOnce()>) -> TimerHandle {
        self.schedule(FRAME_INTERVAL, TimerHandle::Frame, Task::Once(callback))
    }

    fn cancel(&self, handle: TimerHandle) {
        let slot = self.live.borrow_mut().remove(&handle);
        if let Some(Some(key)) = slot {
            self.queue.borrow_mut().remove(&key);
        }
    }
}
