//! Event vocabulary for the dispatch pipeline.
//!
//! Every piece of work the runtime performs arrives as an [`Event`]: lifecycle
//! operations (`init`, `start`, `stop`, `restart`), addressed transition
//! envelopes, and arbitrary application events that open-mode instances treat
//! as transition candidates. Events are plain data: each kind is a tagged
//! variant with an explicit, typed payload.

use crate::engine::MachineDefinition;
use crate::runtime::StartOptions;
use crate::store::InstanceId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Event kinds reserved for the runtime's own lifecycle handling.
///
/// Open-mode routers never treat an application event carrying one of these
/// kinds as a transition candidate.
pub const RESERVED_EVENT_KINDS: [&str; 4] = ["init", "start", "stop", "restart"];

/// Check whether an event kind is reserved for lifecycle handling.
pub fn is_reserved_kind(kind: &str) -> bool {
    RESERVED_EVENT_KINDS.contains(&kind)
}

/// A machine-level event: the input the statechart engine transitions on.
///
/// `data` carries the primary payload; `more` is the explicit ordered
/// sequence of any additional payload values. `scheduled_epoch` is stamped by
/// the delayed-event scheduler and marks the event as epoch-sensitive;
/// ordinary synchronous events leave it `None` and are never discarded on
/// epoch grounds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FsmEvent {
    /// Event kind the machine transitions on.
    pub kind: String,

    /// Primary payload, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Additional ordered payload values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub more: Vec<Value>,

    /// Epoch current when this event was scheduled, for delayed events only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_epoch: Option<u64>,
}

impl FsmEvent {
    /// Create an event with no payload.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: None,
            more: Vec::new(),
            scheduled_epoch: None,
        }
    }

    /// Create an event carrying a primary payload.
    pub fn with_data(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data: Some(data),
            more: Vec::new(),
            scheduled_epoch: None,
        }
    }

    /// Append an additional payload value.
    pub fn and_more(mut self, value: Value) -> Self {
        self.more.push(value);
        self
    }

    /// Stamp the event with the epoch current at scheduling time.
    pub(crate) fn tagged(mut self, epoch: u64) -> Self {
        self.scheduled_epoch = Some(epoch);
        self
    }

    /// Whether this event was re-injected by the scheduler.
    pub fn is_scheduled(&self) -> bool {
        self.scheduled_epoch.is_some()
    }
}

/// An event flowing through the dispatch pipeline.
///
/// Lifecycle variants are handled by the lifecycle controller; `Transition`
/// envelopes are claimed by the router bound to the target id; `App` events
/// are offered to every open-mode router after the host's own handling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Event {
    /// Create initial state for a machine if absent, stamping a fresh epoch.
    Init {
        definition: MachineDefinition,
        #[serde(default)]
        args: Option<Value>,
    },

    /// Run `init` and register an event router for the machine's id.
    Start {
        definition: MachineDefinition,
        #[serde(default)]
        options: StartOptions,
    },

    /// Remove persisted state and unregister the router.
    Stop { id: InstanceId },

    /// Recompute initial state and bump the epoch; routing untouched.
    Restart {
        id: InstanceId,
        #[serde(default)]
        definition: Option<MachineDefinition>,
    },

    /// Addressed transition envelope for one instance (closed-mode routing).
    Transition { id: InstanceId, event: FsmEvent },

    /// Arbitrary application event; open-mode transition candidate.
    App(FsmEvent),
}

/// Injection queue feeding fired timers back into the serialized pipeline.
///
/// Timer callbacks run outside the pipeline and must never touch the store;
/// their only side effect is pushing a brand-new event here. The runtime
/// drains the queue in FIFO order, so re-injected events are subject to the
/// same serialization and staleness checks as any other event.
#[derive(Debug, Default)]
pub struct EventQueue {
    inner: Mutex<VecDeque<Event>>,
}

impl EventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an event for the next pump of the pipeline.
    pub fn push(&self, event: Event) {
        self.lock().push_back(event);
    }

    /// Dequeue the oldest pending event.
    pub fn pop(&self) -> Option<Event> {
        self.lock().pop_front()
    }

    /// Number of events waiting for injection.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no events are waiting.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Event>> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
