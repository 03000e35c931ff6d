//! Pluggable time source for the delayed-event scheduler.
//!
//! [`WallClock`] is the default: one thread per pending timer, fired timers
//! run their callback unless cancelled first. [`ManualClock`] is fully
//! deterministic for tests: time only moves when `advance` is called.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

/// Callback run when a timer fires. Must not touch the store; its only side
/// effect is pushing an event onto the injection queue.
pub type TimerCallback = Box<dyn FnOnce() + Send>;

/// Handle for cancelling one pending timer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimerToken(Uuid);

impl TimerToken {
    fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

/// A source of one-shot timers.
pub trait Clock: Send + Sync {
    /// Arm a timer; the callback runs once after `delay` unless cancelled.
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerToken;

    /// Cancel a pending timer. No-op for unknown or already-fired tokens.
    fn cancel(&self, token: &TimerToken);
}

/// Wall-clock timers backed by one sleeping thread each.
#[derive(Clone, Debug, Default)]
pub struct WallClock {
    cancelled: Arc<Mutex<HashMap<TimerToken, Arc<AtomicBool>>>>,
}

impl WallClock {
    /// Create a wall clock with no pending timers.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for WallClock {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerToken {
        let token = TimerToken::fresh();
        let flag = Arc::new(AtomicBool::new(false));

        lock(&self.cancelled).insert(token.clone(), Arc::clone(&flag));

        let registry = Arc::clone(&self.cancelled);
        let thread_token = token.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            let fire = !flag.load(Ordering::SeqCst);
            lock(&registry).remove(&thread_token);
            if fire {
                callback();
            }
        });

        token
    }

    fn cancel(&self, token: &TimerToken) {
        if let Some(flag) = lock(&self.cancelled).remove(token) {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

struct PendingTimer {
    token: TimerToken,
    due: Duration,
    seq: u64,
    callback: TimerCallback,
}

/// Deterministic clock for tests: timers fire only inside [`advance`].
///
/// Timers due at the same instant fire in scheduling order.
///
/// [`advance`]: ManualClock::advance
#[derive(Default)]
pub struct ManualClock {
    inner: Mutex<ManualInner>,
}

#[derive(Default)]
struct ManualInner {
    now: Duration,
    seq: u64,
    timers: Vec<PendingTimer>,
}

impl ManualClock {
    /// Create a clock at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current simulated time.
    pub fn now(&self) -> Duration {
        lock(&self.inner).now
    }

    /// Number of armed timers.
    pub fn pending(&self) -> usize {
        lock(&self.inner).timers.len()
    }

    /// Move time forward, firing every timer that comes due, in due order.
    ///
    /// Time steps to each fired timer's due instant before its callback runs,
    /// so a callback that arms a new timer schedules it from the moment the
    /// old one fired; chained timers complete within a single `advance`.
    pub fn advance(&self, delta: Duration) {
        let target = lock(&self.inner).now + delta;

        loop {
            let next = {
                let mut inner = lock(&self.inner);
                let due_index = inner
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, timer)| timer.due <= target)
                    .min_by_key(|(_, timer)| (timer.due, timer.seq))
                    .map(|(index, _)| index);
                match due_index {
                    Some(index) => {
                        let timer = inner.timers.swap_remove(index);
                        inner.now = inner.now.max(timer.due);
                        Some(timer)
                    }
                    None => {
                        inner.now = target;
                        None
                    }
                }
            };
            // Callbacks run outside the lock: they may arm new timers.
            match next {
                Some(timer) => (timer.callback)(),
                None => break,
            }
        }
    }
}

impl Clock for ManualClock {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerToken {
        let token = TimerToken::fresh();
        let mut inner = lock(&self.inner);
        let due = inner.now + delay;
        let seq = inner.seq;
        inner.seq += 1;
        inner.timers.push(PendingTimer {
            token: token.clone(),
            due,
            seq,
            callback,
        });
        token
    }

    fn cancel(&self, token: &TimerToken) {
        lock(&self.inner).timers.retain(|timer| timer.token != *token);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
