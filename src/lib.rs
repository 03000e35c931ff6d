//! Fsmbind: FSM instances bound into a centralized, event-sourced store.
//!
//! The runtime core manages the lifecycle of named FSM instances (create,
//! transition, restart, destroy), routes incoming application events to the
//! right instance through a global interceptor chain with no per-instance
//! event handlers, and guarantees that stale asynchronous events cannot
//! corrupt machine state after a restart.
//!
//! # Core Concepts
//!
//! - **Instance**: a machine definition bound to an id, with its state
//!   persisted as one slice of the shared application store
//! - **Router**: the per-instance interceptor claiming events from the
//!   serialized dispatch pipeline, in closed (addressed) or open (broadcast)
//!   mode
//! - **Epoch**: a per-instance counter bumped on every init/restart; delayed
//!   events from before the bump are discarded instead of applied
//! - **Scheduler**: re-injects delayed events into the pipeline through a
//!   pluggable clock, for the engine's delayed-transition support
//!
//! # Example
//!
//! ```rust
//! use fsmbind::{FsmEvent, FsmRuntime, MachineBuilder, StartOptions};
//!
//! let machine = MachineBuilder::new()
//!     .id("doc")
//!     .initial("clean")
//!     .state("clean", [("edit-started", "editing")])
//!     .state("editing", [("edit-ended", "dirty")])
//!     .state("dirty", [("edit-started", "editing")])
//!     .build()?;
//!
//! let mut runtime = FsmRuntime::new();
//! let id = runtime.start(machine, StartOptions::default())?;
//!
//! runtime.transition(&id, FsmEvent::new("edit-started"))?;
//! assert!(runtime.is_in(&id, "editing"));
//!
//! runtime.stop(&id);
//! assert!(runtime.state(&id).is_none());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod engine;
pub mod epoch;
pub mod error;
pub mod event;
pub mod matcher;
pub mod router;
pub mod runtime;
pub mod scheduler;
pub mod store;

// Re-export commonly used types
pub use engine::{
    BuildError, EngineError, EngineOutcome, FlatEngine, MachineBuilder, MachineDefinition,
    StateNode, StatechartEngine, TimerCommand, TransitionOptions,
};
pub use epoch::EpochTracker;
pub use error::RuntimeError;
pub use event::{Event, FsmEvent};
pub use matcher::{MatchError, StateMatcher};
pub use router::DispatchMode;
pub use runtime::{FsmRuntime, InstanceGuard, StartOptions};
pub use scheduler::{Clock, ManualClock, WallClock};
pub use store::{AppDb, DocumentAdapter, Envelope, InstanceId, StoreAdapter};
