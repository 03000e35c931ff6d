//! Runtime-facing error type.

use crate::engine::EngineError;
use crate::store::InstanceId;
use thiserror::Error;

/// Errors surfaced by the lifecycle controller and dispatch pipeline.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// `start` was given a definition with no id.
    #[error("Machine definition has no id; assign one before calling start")]
    MissingMachineId,

    /// `restart` with no definition argument and no live router to read one
    /// from.
    #[error("No live instance or definition available for '{id}'")]
    UnknownInstance { id: InstanceId },

    /// A router is already registered for the id.
    ///
    /// Unreachable through the lifecycle controller, which always removes the
    /// old router first; kept as the registry's contract.
    #[error("A router is already registered for '{id}'")]
    RouterConflict { id: InstanceId },

    /// The statechart engine rejected a transition.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A delayed event carried an epoch newer than the instance's current
    /// one. Cannot occur under correct use; scheduling outside the runtime is
    /// the only way to produce it.
    #[error(
        "Delayed event '{kind}' for '{id}' carries epoch {event_epoch}, \
         ahead of current epoch {current_epoch}"
    )]
    EpochFromFuture {
        id: InstanceId,
        kind: String,
        event_epoch: u64,
        current_epoch: u64,
    },
}
