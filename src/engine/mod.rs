//! The statechart engine boundary.
//!
//! The runtime does not implement statechart semantics; it drives an engine
//! through the [`StatechartEngine`] trait: pure `initialize` and `transition`
//! functions plus a `matches` predicate. Engines stay pure by returning timer
//! *commands* for delayed transitions instead of touching the scheduler
//! themselves; the runtime executes the commands.
//!
//! [`FlatEngine`] is the bundled default: flat machines with per-state event
//! tables and delayed transitions, no hierarchy or parallel regions.

pub mod definition;
pub mod error;
pub mod flat;

pub use definition::{
    DelayedTransition, MachineBuilder, MachineDefinition, StateNode, StateSpec,
};
pub use error::{BuildError, EngineError};
pub use flat::FlatEngine;

use crate::event::FsmEvent;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Engine-specific transition options, resolved once at `start` time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOptions {
    /// Treat an event with no matching transition as a no-op instead of an
    /// error. Always forced on for open-mode instances.
    #[serde(default)]
    pub ignore_unknown: bool,
}

/// Timer instruction emitted by an engine alongside a state change.
#[derive(Clone, Debug, PartialEq)]
pub enum TimerCommand {
    /// Start a timer that re-injects `event` after `delay_ms`.
    Schedule { event: FsmEvent, delay_ms: u64 },
    /// Cancel the pending timer for the event kind, if any.
    Unschedule { kind: String },
}

/// Result of an engine `initialize` or accepted `transition`.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineOutcome {
    /// The next state node.
    pub state: StateNode,
    /// Extension fields to merge into the envelope.
    pub ext: Map<String, Value>,
    /// Timer commands to execute, in order.
    pub timers: Vec<TimerCommand>,
}

impl EngineOutcome {
    /// An outcome with no extension data and no timer commands.
    pub fn state(state: StateNode) -> Self {
        Self {
            state,
            ext: Map::new(),
            timers: Vec::new(),
        }
    }
}

/// Pure statechart engine driven by the runtime.
///
/// All three operations are pure functions of their arguments; any
/// time-driven behavior is expressed through the returned timer commands.
pub trait StatechartEngine: Send + Sync {
    /// Compute the initial state for a definition.
    fn initialize(&self, definition: &MachineDefinition, args: Option<&Value>) -> EngineOutcome;

    /// Compute the next state for an event.
    ///
    /// Returns `Ok(None)` when the event matches no transition and
    /// `options.ignore_unknown` is set; otherwise an unmatched event is an
    /// [`EngineError::UnknownEvent`].
    fn transition(
        &self,
        definition: &MachineDefinition,
        current: &StateNode,
        event: &FsmEvent,
        options: &TransitionOptions,
    ) -> Result<Option<EngineOutcome>, EngineError>;

    /// Whether `state` is at or below the given node.
    fn matches(&self, state: &StateNode, node: &str) -> bool;
}
