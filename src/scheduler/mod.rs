//! Delayed-event scheduler: the statechart engine's timer capability.
//!
//! One scheduler exists per runtime instance. `schedule` arms a timer that,
//! on firing, re-injects the event into the dispatch pipeline, wrapped as an
//! addressed transition envelope in closed mode, dispatched as-is in open
//! mode. Every scheduled event is stamped with the epoch current at
//! scheduling time so the staleness filter can discard it after a restart.

pub mod clock;

pub use clock::{Clock, ManualClock, TimerCallback, TimerToken, WallClock};

use crate::engine::TimerCommand;
use crate::event::{Event, EventQueue, FsmEvent};
use crate::router::DispatchMode;
use crate::store::InstanceId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Timer registry for one runtime instance.
///
/// Invariant: at most one pending timer per distinct event kind; scheduling
/// an already-pending kind replaces the prior handle.
///
/// A handle whose timer has already fired lingers in the registry until its
/// kind is rescheduled, unscheduled, or the instance stops. Cancelling a
/// fired token is a no-op at the clock, so lingering handles are harmless.
pub struct DelayedScheduler {
    id: InstanceId,
    mode: DispatchMode,
    clock: Arc<dyn Clock>,
    queue: Arc<EventQueue>,
    pending: HashMap<String, TimerToken>,
}

impl DelayedScheduler {
    pub(crate) fn new(
        id: InstanceId,
        mode: DispatchMode,
        clock: Arc<dyn Clock>,
        queue: Arc<EventQueue>,
    ) -> Self {
        Self {
            id,
            mode,
            clock,
            queue,
            pending: HashMap::new(),
        }
    }

    /// Arm a timer that re-injects `event` after `delay_ms`, stamped with the
    /// epoch current now. Replaces any pending timer for the same kind.
    pub fn schedule(&mut self, event: FsmEvent, delay_ms: u64, epoch: u64) {
        self.unschedule(&event.kind);

        let kind = event.kind.clone();
        let routed = match self.mode {
            DispatchMode::Closed => Event::Transition {
                id: self.id.clone(),
                event: event.tagged(epoch),
            },
            DispatchMode::Open => Event::App(event.tagged(epoch)),
        };

        let queue = Arc::clone(&self.queue);
        let token = self.clock.schedule(
            Duration::from_millis(delay_ms),
            Box::new(move || queue.push(routed)),
        );

        debug!(id = %self.id, %kind, delay_ms, epoch, "scheduled delayed event");
        self.pending.insert(kind, token);
    }

    /// Cancel the pending timer for an event kind. No-op if absent.
    pub fn unschedule(&mut self, kind: &str) {
        if let Some(token) = self.pending.remove(kind) {
            self.clock.cancel(&token);
            debug!(id = %self.id, %kind, "unscheduled delayed event");
        }
    }

    /// Cancel every pending timer; called when the instance stops.
    pub fn cancel_all(&mut self) {
        for (_, token) in self.pending.drain() {
            self.clock.cancel(&token);
        }
    }

    /// Execute a batch of engine timer commands under one epoch.
    pub(crate) fn run(&mut self, commands: Vec<TimerCommand>, epoch: u64) {
        for command in commands {
            match command {
                TimerCommand::Schedule { event, delay_ms } => {
                    self.schedule(event, delay_ms, epoch)
                }
                TimerCommand::Unschedule { kind } => self.unschedule(&kind),
            }
        }
    }

    /// Take over another scheduler's pending handles (re-`start` of a live
    /// id) so its timers stay cancellable.
    pub(crate) fn adopt(&mut self, mut other: DelayedScheduler) {
        for (kind, token) in other.pending.drain() {
            if let Some(replaced) = self.pending.insert(kind, token) {
                self.clock.cancel(&replaced);
            }
        }
    }

    /// Number of tracked timer handles. Handles of already-fired timers are
    /// counted until their kind is rescheduled or unscheduled.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(clock: &Arc<ManualClock>, queue: &Arc<EventQueue>) -> DelayedScheduler {
        let clock: Arc<dyn Clock> = Arc::clone(clock) as Arc<dyn Clock>;
        DelayedScheduler::new(
            InstanceId::key("doc"),
            DispatchMode::Closed,
            clock,
            Arc::clone(queue),
        )
    }

    #[test]
    fn fired_timer_reinjects_addressed_envelope() {
        let clock = Arc::new(ManualClock::new());
        let queue = Arc::new(EventQueue::new());
        let mut scheduler = scheduler(&clock, &queue);

        scheduler.schedule(FsmEvent::new("timeout"), 100, 3);
        clock.advance(Duration::from_millis(100));

        assert_eq!(
            queue.pop(),
            Some(Event::Transition {
                id: InstanceId::key("doc"),
                event: FsmEvent::new("timeout").tagged(3),
            })
        );
    }

    #[test]
    fn open_mode_reinjects_bare_app_event() {
        let clock = Arc::new(ManualClock::new());
        let queue = Arc::new(EventQueue::new());
        let mut scheduler = DelayedScheduler::new(
            InstanceId::key("doc"),
            DispatchMode::Open,
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::clone(&queue),
        );

        scheduler.schedule(FsmEvent::new("timeout"), 50, 1);
        clock.advance(Duration::from_millis(50));

        assert_eq!(queue.pop(), Some(Event::App(FsmEvent::new("timeout").tagged(1))));
    }

    #[test]
    fn rescheduling_replaces_the_pending_timer() {
        let clock = Arc::new(ManualClock::new());
        let queue = Arc::new(EventQueue::new());
        let mut scheduler = scheduler(&clock, &queue);

        scheduler.schedule(FsmEvent::new("timeout"), 100, 1);
        scheduler.schedule(FsmEvent::new("timeout"), 200, 1);
        assert_eq!(scheduler.pending_len(), 1);

        clock.advance(Duration::from_millis(100));
        assert!(queue.is_empty());

        clock.advance(Duration::from_millis(100));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn unschedule_missing_kind_is_noop() {
        let clock = Arc::new(ManualClock::new());
        let queue = Arc::new(EventQueue::new());
        let mut scheduler = scheduler(&clock, &queue);

        scheduler.unschedule("never-scheduled");
        assert_eq!(scheduler.pending_len(), 0);
    }

    #[test]
    fn cancel_all_silences_every_timer() {
        let clock = Arc::new(ManualClock::new());
        let queue = Arc::new(EventQueue::new());
        let mut scheduler = scheduler(&clock, &queue);

        scheduler.schedule(FsmEvent::new("a"), 10, 1);
        scheduler.schedule(FsmEvent::new("b"), 20, 1);
        scheduler.cancel_all();

        clock.advance(Duration::from_millis(100));
        assert!(queue.is_empty());
    }

    #[test]
    fn fired_handles_linger_and_cancel_as_noops() {
        let clock = Arc::new(ManualClock::new());
        let queue = Arc::new(EventQueue::new());
        let mut scheduler = scheduler(&clock, &queue);

        scheduler.schedule(FsmEvent::new("timeout"), 10, 1);
        clock.advance(Duration::from_millis(10));
        assert_eq!(queue.len(), 1);

        // The handle stays tracked after firing; cancelling it later is a
        // no-op at the clock and does not disturb the queued event.
        assert_eq!(scheduler.pending_len(), 1);
        scheduler.unschedule("timeout");
        assert_eq!(scheduler.pending_len(), 0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn adopted_handles_stay_cancellable() {
        let clock = Arc::new(ManualClock::new());
        let queue = Arc::new(EventQueue::new());
        let mut old = scheduler(&clock, &queue);
        old.schedule(FsmEvent::new("timeout"), 100, 1);

        let mut fresh = scheduler(&clock, &queue);
        fresh.adopt(old);
        fresh.unschedule("timeout");

        clock.advance(Duration::from_millis(200));
        assert!(queue.is_empty());
    }
}
