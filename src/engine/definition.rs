//! Machine definitions: immutable, data-first descriptions of an FSM.
//!
//! Definitions are owned by the caller and read-only to the runtime. They are
//! plain serde data so they can be loaded from configuration, plus a fluent
//! [`MachineBuilder`] for constructing them in code with validation.

use super::error::BuildError;
use crate::store::InstanceId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of a state node within a machine.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateNode(String);

impl StateNode {
    /// The node name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StateNode {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for StateNode {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for StateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A delayed transition: after `delay_ms` in the state, move to `target`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayedTransition {
    pub delay_ms: u64,
    pub target: StateNode,
}

/// One state's transition tables.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSpec {
    /// Event kind to target node.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub on: BTreeMap<String, StateNode>,

    /// Delayed transitions armed on entry and disarmed on exit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<DelayedTransition>,
}

/// Immutable description of a machine: `{id, initial, states}`.
///
/// `id` is optional in the data model because definitions may be assembled
/// from configuration; `start` rejects a definition whose id is missing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MachineDefinition {
    /// Identifier the runtime binds instances of this machine to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<InstanceId>,

    /// Initial state node.
    pub initial: StateNode,

    /// All state nodes and their transition tables.
    pub states: BTreeMap<StateNode, StateSpec>,
}

/// Fluent builder for [`MachineDefinition`] with target validation.
///
/// # Example
///
/// ```rust
/// use fsmbind::MachineBuilder;
///
/// let machine = MachineBuilder::new()
///     .id("doc")
///     .initial("clean")
///     .state("clean", [("edit-started", "editing")])
///     .state("editing", [("edit-ended", "dirty")])
///     .state("dirty", [("edit-started", "editing")])
///     .build()
///     .unwrap();
///
/// assert_eq!(machine.initial.as_str(), "clean");
/// ```
#[derive(Debug, Default)]
pub struct MachineBuilder {
    id: Option<InstanceId>,
    initial: Option<StateNode>,
    states: BTreeMap<StateNode, StateSpec>,
}

impl MachineBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the instance id.
    pub fn id(mut self, id: impl Into<InstanceId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the initial state (required).
    pub fn initial(mut self, node: impl Into<StateNode>) -> Self {
        self.initial = Some(node.into());
        self
    }

    /// Add a state with its event table.
    pub fn state<I, K, T>(mut self, node: impl Into<StateNode>, on: I) -> Self
    where
        I: IntoIterator<Item = (K, T)>,
        K: Into<String>,
        T: Into<StateNode>,
    {
        let spec = self.states.entry(node.into()).or_default();
        spec.on
            .extend(on.into_iter().map(|(kind, target)| (kind.into(), target.into())));
        self
    }

    /// Add a state with no outgoing transitions.
    pub fn terminal(mut self, node: impl Into<StateNode>) -> Self {
        self.states.entry(node.into()).or_default();
        self
    }

    /// Add a delayed transition to a state: after `delay_ms` there, move to
    /// `target`. The state is created if it was not declared yet.
    pub fn after(
        mut self,
        node: impl Into<StateNode>,
        delay_ms: u64,
        target: impl Into<StateNode>,
    ) -> Self {
        let spec = self.states.entry(node.into()).or_default();
        spec.after.push(DelayedTransition {
            delay_ms,
            target: target.into(),
        });
        self
    }

    /// Validate and build the definition.
    pub fn build(self) -> Result<MachineDefinition, BuildError> {
        let initial = self.initial.ok_or(BuildError::MissingInitial)?;

        if self.states.is_empty() {
            return Err(BuildError::NoStates);
        }

        if !self.states.contains_key(&initial) {
            return Err(BuildError::UnknownInitial {
                initial: initial.to_string(),
            });
        }

        for (node, spec) in &self.states {
            let targets = spec
                .on
                .values()
                .chain(spec.after.iter().map(|after| &after.target));
            for target in targets {
                if !self.states.contains_key(target) {
                    return Err(BuildError::UnknownTarget {
                        from: node.to_string(),
                        target: target.to_string(),
                    });
                }
            }
        }

        Ok(MachineDefinition {
            id: self.id,
            initial,
            states: self.states,
        })
    }
}
