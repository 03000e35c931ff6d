//! Default statechart engine: flat machines.
//!
//! Supports per-state event tables and delayed (`after`) transitions. No
//! hierarchy, no parallel regions, no guards; callers needing richer
//! semantics plug in their own [`StatechartEngine`].

use super::definition::{MachineDefinition, StateNode, StateSpec};
use super::error::EngineError;
use super::{EngineOutcome, StatechartEngine, TimerCommand, TransitionOptions};
use crate::event::FsmEvent;
use serde_json::{Map, Value};

/// Event kind synthesized for a state's delayed transition.
///
/// Entering the state schedules an event of this kind; the state's own
/// transition table resolves it back to the delayed target.
pub fn after_event_kind(node: &StateNode, delay_ms: u64) -> String {
    format!("fsm.after.{delay_ms}.{node}")
}

/// The bundled flat-statechart engine.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlatEngine;

impl FlatEngine {
    /// Timer commands armed when entering `node`.
    fn entry_commands(node: &StateNode, spec: &StateSpec) -> Vec<TimerCommand> {
        spec.after
            .iter()
            .map(|after| TimerCommand::Schedule {
                event: FsmEvent::new(after_event_kind(node, after.delay_ms)),
                delay_ms: after.delay_ms,
            })
            .collect()
    }

    /// Timer commands disarmed when exiting `node`.
    fn exit_commands(node: &StateNode, spec: &StateSpec) -> Vec<TimerCommand> {
        spec.after
            .iter()
            .map(|after| TimerCommand::Unschedule {
                kind: after_event_kind(node, after.delay_ms),
            })
            .collect()
    }

    /// Resolve an event kind against a state's tables.
    fn target_for(node: &StateNode, spec: &StateSpec, kind: &str) -> Option<StateNode> {
        if let Some(target) = spec.on.get(kind) {
            return Some(target.clone());
        }
        spec.after
            .iter()
            .find(|after| after_event_kind(node, after.delay_ms) == kind)
            .map(|after| after.target.clone())
    }
}

impl StatechartEngine for FlatEngine {
    fn initialize(&self, definition: &MachineDefinition, args: Option<&Value>) -> EngineOutcome {
        let mut ext = Map::new();
        match args {
            Some(Value::Object(map)) => ext.extend(map.clone()),
            Some(other) => {
                ext.insert("args".to_string(), other.clone());
            }
            None => {}
        }

        let timers = definition
            .states
            .get(&definition.initial)
            .map(|spec| Self::entry_commands(&definition.initial, spec))
            .unwrap_or_default();

        EngineOutcome {
            state: definition.initial.clone(),
            ext,
            timers,
        }
    }

    fn transition(
        &self,
        definition: &MachineDefinition,
        current: &StateNode,
        event: &FsmEvent,
        options: &TransitionOptions,
    ) -> Result<Option<EngineOutcome>, EngineError> {
        let spec = definition
            .states
            .get(current)
            .ok_or_else(|| EngineError::UndefinedState {
                node: current.to_string(),
            })?;

        let Some(target) = Self::target_for(current, spec, &event.kind) else {
            if options.ignore_unknown {
                return Ok(None);
            }
            return Err(EngineError::UnknownEvent {
                state: current.to_string(),
                kind: event.kind.clone(),
            });
        };

        let target_spec =
            definition
                .states
                .get(&target)
                .ok_or_else(|| EngineError::UndefinedState {
                    node: target.to_string(),
                })?;

        // Exit disarms before entry arms, so a self-transition restarts its
        // own delayed timers.
        let mut timers = Self::exit_commands(current, spec);
        timers.extend(Self::entry_commands(&target, target_spec));

        Ok(Some(EngineOutcome {
            state: target,
            ext: Map::new(),
            timers,
        }))
    }

    fn matches(&self, state: &StateNode, node: &str) -> bool {
        let name = state.as_str();
        name == node || name.strip_prefix(node).is_some_and(|rest| rest.starts_with('.'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MachineBuilder;

    fn editor() -> MachineDefinition {
        MachineBuilder::new()
            .id("doc")
            .initial("clean")
            .state("clean", [("edit-started", "editing")])
            .state("editing", [("edit-ended", "dirty")])
            .state("dirty", [("edit-started", "editing")])
            .build()
            .unwrap()
    }

    fn timed() -> MachineDefinition {
        MachineBuilder::new()
            .id("job")
            .initial("idle")
            .state("idle", [("begin", "waiting")])
            .state("waiting", [("cancel", "idle")])
            .after("waiting", 1000, "expired")
            .terminal("expired")
            .build()
            .unwrap()
    }

    #[test]
    fn initialize_returns_initial_state() {
        let outcome = FlatEngine.initialize(&editor(), None);
        assert_eq!(outcome.state, StateNode::from("clean"));
        assert!(outcome.timers.is_empty());
    }

    #[test]
    fn initialize_merges_object_args_into_ext() {
        let outcome = FlatEngine.initialize(&editor(), Some(&serde_json::json!({"rev": 4})));
        assert_eq!(outcome.ext.get("rev"), Some(&serde_json::json!(4)));
    }

    #[test]
    fn declared_transition_moves_to_target() {
        let outcome = FlatEngine
            .transition(
                &editor(),
                &StateNode::from("clean"),
                &FsmEvent::new("edit-started"),
                &TransitionOptions::default(),
            )
            .unwrap()
            .unwrap();
        assert_eq!(outcome.state, StateNode::from("editing"));
    }

    #[test]
    fn unknown_event_is_an_error_by_default() {
        let result = FlatEngine.transition(
            &editor(),
            &StateNode::from("clean"),
            &FsmEvent::new("edit-ended"),
            &TransitionOptions::default(),
        );
        assert_eq!(
            result.unwrap_err(),
            EngineError::UnknownEvent {
                state: "clean".into(),
                kind: "edit-ended".into()
            }
        );
    }

    #[test]
    fn unknown_event_is_noop_when_ignored() {
        let result = FlatEngine.transition(
            &editor(),
            &StateNode::from("clean"),
            &FsmEvent::new("edit-ended"),
            &TransitionOptions {
                ignore_unknown: true,
            },
        );
        assert_eq!(result.unwrap(), None);
    }

    #[test]
    fn undefined_current_state_is_an_error() {
        let result = FlatEngine.transition(
            &editor(),
            &StateNode::from("nowhere"),
            &FsmEvent::new("edit-started"),
            &TransitionOptions::default(),
        );
        assert_eq!(
            result.unwrap_err(),
            EngineError::UndefinedState {
                node: "nowhere".into()
            }
        );
    }

    #[test]
    fn entering_a_timed_state_schedules_its_delay() {
        let outcome = FlatEngine
            .transition(
                &timed(),
                &StateNode::from("idle"),
                &FsmEvent::new("begin"),
                &TransitionOptions::default(),
            )
            .unwrap()
            .unwrap();

        assert_eq!(outcome.state, StateNode::from("waiting"));
        assert_eq!(
            outcome.timers,
            vec![TimerCommand::Schedule {
                event: FsmEvent::new("fsm.after.1000.waiting"),
                delay_ms: 1000,
            }]
        );
    }

    #[test]
    fn leaving_a_timed_state_unschedules_its_delay() {
        let outcome = FlatEngine
            .transition(
                &timed(),
                &StateNode::from("waiting"),
                &FsmEvent::new("cancel"),
                &TransitionOptions::default(),
            )
            .unwrap()
            .unwrap();

        assert_eq!(outcome.state, StateNode::from("idle"));
        assert_eq!(
            outcome.timers,
            vec![TimerCommand::Unschedule {
                kind: "fsm.after.1000.waiting".into()
            }]
        );
    }

    #[test]
    fn delay_event_resolves_to_delayed_target() {
        let outcome = FlatEngine
            .transition(
                &timed(),
                &StateNode::from("waiting"),
                &FsmEvent::new("fsm.after.1000.waiting"),
                &TransitionOptions::default(),
            )
            .unwrap()
            .unwrap();
        assert_eq!(outcome.state, StateNode::from("expired"));
    }

    #[test]
    fn matches_is_exact_or_dotted_descendant() {
        let engine = FlatEngine;
        assert!(engine.matches(&StateNode::from("editing"), "editing"));
        assert!(engine.matches(&StateNode::from("editing.autosave"), "editing"));
        assert!(!engine.matches(&StateNode::from("editingx"), "editing"));
        assert!(!engine.matches(&StateNode::from("editing"), "editing.autosave"));
    }
}
