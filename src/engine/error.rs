//! Engine and definition-builder error types.

use thiserror::Error;

/// Errors raised while building a machine definition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("Initial state not specified. Call .initial(node) before .build()")]
    MissingInitial,

    #[error("No states defined. Add at least one state")]
    NoStates,

    #[error("State '{from}' targets unknown state '{target}'")]
    UnknownTarget { from: String, target: String },

    #[error("Initial state '{initial}' is not a defined state")]
    UnknownInitial { initial: String },
}

/// Errors raised by a statechart engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The current state declares no transition for the event kind and the
    /// caller did not opt into ignoring unknown events.
    #[error("State '{state}' has no transition for event '{kind}'")]
    UnknownEvent { state: String, kind: String },

    /// A state node was referenced that the definition does not declare.
    #[error("Machine has no state named '{node}'")]
    UndefinedState { node: String },
}
