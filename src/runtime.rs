//! The lifecycle controller and serialized dispatch pipeline.
//!
//! [`FsmRuntime`] owns the application store, the router registry, and the
//! epoch counters. Dispatch is single-writer and strictly serialized: each
//! event is fully processed (routing hooks, core handling, store write)
//! before the next one begins. Timers are the only suspension point, and a
//! fired timer re-enters the pipeline as a brand-new event through the
//! injection queue, subject to the same serialization and staleness checks as
//! everything else.

use crate::engine::{
    FlatEngine, MachineDefinition, StateNode, StatechartEngine, TransitionOptions,
};
use crate::epoch::EpochTracker;
use crate::error::RuntimeError;
use crate::event::{Event, EventQueue, FsmEvent};
use crate::matcher::{MatchError, StateMatcher};
use crate::router::{DispatchMode, EventRouter, RouterRegistry};
use crate::scheduler::{Clock, DelayedScheduler, WallClock};
use crate::store::{AppDb, DocumentAdapter, Envelope, InstanceId, StoreAdapter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Configuration surface recognized at `start` time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StartOptions {
    /// Open dispatch mode: every pipeline event is a transition candidate.
    /// Defaults to closed (addressed envelopes only).
    #[serde(default)]
    pub open: bool,

    /// Engine transition options for this instance.
    #[serde(default)]
    pub transition: TransitionOptions,

    /// Arguments handed to the engine's `initialize`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_args: Option<Value>,
}

impl StartOptions {
    /// Closed mode with unknown events ignored.
    pub fn lenient() -> Self {
        Self {
            transition: TransitionOptions {
                ignore_unknown: true,
            },
            ..Self::default()
        }
    }

    /// Open dispatch mode.
    pub fn open() -> Self {
        Self {
            open: true,
            ..Self::default()
        }
    }
}

/// Host hook run on every application event before open-mode routing.
pub type AppHandler = Box<dyn FnMut(&mut AppDb, &FsmEvent) + Send>;

/// The runtime core: lifecycle controller plus dispatch pipeline.
///
/// Defaults to the bundled [`FlatEngine`], the [`DocumentAdapter`] store
/// mapping, and wall-clock timers; all three are pluggable.
pub struct FsmRuntime {
    db: AppDb,
    registry: RouterRegistry,
    epochs: EpochTracker,
    engine: Arc<dyn StatechartEngine>,
    adapter: Arc<dyn StoreAdapter>,
    clock: Arc<dyn Clock>,
    queue: Arc<EventQueue>,
    app_handler: Option<AppHandler>,
}

impl Default for FsmRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FsmRuntime {
    /// Create a runtime with the default engine, adapter, and wall clock.
    pub fn new() -> Self {
        Self {
            db: AppDb::new(),
            registry: RouterRegistry::new(),
            epochs: EpochTracker::new(),
            engine: Arc::new(FlatEngine),
            adapter: Arc::new(DocumentAdapter),
            clock: Arc::new(WallClock::new()),
            queue: Arc::new(EventQueue::new()),
            app_handler: None,
        }
    }

    /// Substitute the time source (deterministic clocks for tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Substitute the store adapter.
    pub fn with_adapter(mut self, adapter: Arc<dyn StoreAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    /// Substitute the statechart engine.
    pub fn with_engine(mut self, engine: Arc<dyn StatechartEngine>) -> Self {
        self.engine = engine;
        self
    }

    /// Install the host's own handler for application events.
    ///
    /// It runs before open-mode routers in the same dispatch turn, so a
    /// router's envelope write lands after the handler's write for the same
    /// event and never clobbers it.
    pub fn on_app_event<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&mut AppDb, &FsmEvent) + Send + 'static,
    {
        self.app_handler = Some(Box::new(handler));
        self
    }

    // ------------------------------------------------------------------
    // Lifecycle controller
    // ------------------------------------------------------------------

    /// Start an instance: initialize state if absent and install its router.
    ///
    /// Fails if the definition has no id. Starting an id that is already
    /// live is a no-op for state but re-registers routing with the resolved
    /// mode and options; the previous router's pending timer handles are
    /// adopted so they stay cancellable.
    pub fn start(
        &mut self,
        definition: MachineDefinition,
        options: StartOptions,
    ) -> Result<InstanceId, RuntimeError> {
        let id = definition.id.clone().ok_or(RuntimeError::MissingMachineId)?;
        let mode = if options.open {
            DispatchMode::Open
        } else {
            DispatchMode::Closed
        };

        let mut scheduler = DelayedScheduler::new(
            id.clone(),
            mode,
            Arc::clone(&self.clock),
            Arc::clone(&self.queue),
        );
        if let Some(previous) = self.registry.unregister(&id) {
            scheduler.adopt(previous.into_scheduler());
        }

        let mut transition_options = options.transition;
        if options.open {
            // Arbitrary application events flow into the machine; failing on
            // unmatched ones would break unrelated application logic.
            transition_options.ignore_unknown = true;
        }

        let router = EventRouter::new(
            id.clone(),
            definition.clone(),
            transition_options,
            mode,
            Arc::clone(&self.engine),
            Arc::clone(&self.adapter),
            scheduler,
        );
        self.registry.register(router)?;

        self.initialize_instance(&id, &definition, options.init_args.as_ref());
        Ok(id)
    }

    /// Create initial state for a definition if absent, stamping a fresh
    /// epoch. No router involvement.
    pub fn init(
        &mut self,
        definition: MachineDefinition,
        args: Option<Value>,
    ) -> Result<InstanceId, RuntimeError> {
        let id = definition.id.clone().ok_or(RuntimeError::MissingMachineId)?;
        self.initialize_instance(&id, &definition, args.as_ref());
        Ok(id)
    }

    /// Stop an instance: delete its persisted state, unregister its router,
    /// and cancel its pending timers. Safe to call on an id with no active
    /// instance.
    pub fn stop(&mut self, id: &InstanceId) {
        self.adapter.set_state(&mut self.db, id, None);
        if let Some(mut router) = self.registry.unregister(id) {
            router.scheduler.cancel_all();
            debug!(%id, "stopped instance");
        }
    }

    /// Restart an instance: recompute initial state under a bumped epoch,
    /// leaving router registration untouched. Delayed events scheduled under
    /// the previous epoch stay pending and die at the staleness filter.
    pub fn restart(
        &mut self,
        id: &InstanceId,
        definition: Option<MachineDefinition>,
    ) -> Result<(), RuntimeError> {
        let definition = match definition {
            Some(definition) => {
                if let Some(router) = self.registry.get_mut(id) {
                    router.rebind(definition.clone());
                }
                definition
            }
            None => self
                .registry
                .get(id)
                .map(|router| router.definition().clone())
                .ok_or_else(|| RuntimeError::UnknownInstance { id: id.clone() })?,
        };

        let outcome = self.engine.initialize(&definition, None);
        let epoch = self.epochs.advance(id);
        let mut envelope = Envelope::new(outcome.state, epoch);
        envelope.ext = outcome.ext;
        self.adapter.set_state(&mut self.db, id, Some(envelope));
        debug!(%id, epoch, "restarted instance");

        if let Some(router) = self.registry.get_mut(id) {
            router.scheduler.run(outcome.timers, epoch);
        } else if !outcome.timers.is_empty() {
            warn!(%id, "dropping entry timers: no router owns a scheduler for this id");
        }
        Ok(())
    }

    /// Start an instance and return a guard that stops it when dropped,
    /// guaranteeing release on every exit path.
    pub fn start_scoped(
        &mut self,
        definition: MachineDefinition,
        options: StartOptions,
    ) -> Result<InstanceGuard<'_>, RuntimeError> {
        let id = self.start(definition, options)?;
        Ok(InstanceGuard { runtime: self, id })
    }

    /// Initialize state for an id if absent: engine `initialize`, fresh
    /// epoch, persist, and arm the entry timers on the id's scheduler.
    fn initialize_instance(
        &mut self,
        id: &InstanceId,
        definition: &MachineDefinition,
        args: Option<&Value>,
    ) {
        if self.adapter.get_state(&self.db, id).is_some() {
            return;
        }

        let outcome = self.engine.initialize(definition, args);
        let epoch = self.epochs.advance(id);
        let mut envelope = Envelope::new(outcome.state, epoch);
        envelope.ext = outcome.ext;
        self.adapter.set_state(&mut self.db, id, Some(envelope));
        debug!(%id, epoch, "initialized instance");

        if let Some(router) = self.registry.get_mut(id) {
            router.scheduler.run(outcome.timers, epoch);
        } else if !outcome.timers.is_empty() {
            warn!(%id, "dropping entry timers: no router owns a scheduler for this id");
        }
    }

    // ------------------------------------------------------------------
    // Dispatch pipeline
    // ------------------------------------------------------------------

    /// Dispatch one event through the pipeline, then drain any events the
    /// scheduler injected meanwhile, FIFO.
    pub fn dispatch(&mut self, event: Event) -> Result<(), RuntimeError> {
        self.process(event)?;
        self.pump()
    }

    /// Drain the injection queue through the serialized pipeline. Call this
    /// (or any `dispatch`) after wall-clock timers may have fired.
    pub fn pump(&mut self) -> Result<(), RuntimeError> {
        while let Some(event) = self.queue.pop() {
            self.process(event)?;
        }
        Ok(())
    }

    /// Shorthand for dispatching an addressed transition envelope.
    pub fn transition(&mut self, id: &InstanceId, event: FsmEvent) -> Result<(), RuntimeError> {
        self.dispatch(Event::Transition {
            id: id.clone(),
            event,
        })
    }

    fn process(&mut self, event: Event) -> Result<(), RuntimeError> {
        match event {
            Event::Init { definition, args } => self.init(definition, args).map(|_| ()),
            Event::Start {
                definition,
                options,
            } => self.start(definition, options).map(|_| ()),
            Event::Stop { id } => {
                self.stop(&id);
                Ok(())
            }
            Event::Restart { id, definition } => self.restart(&id, definition),
            Event::Transition { id, event } => {
                let Some(router) = self.registry.get_mut(&id) else {
                    trace!(%id, kind = %event.kind, "transition for id with no live instance");
                    return Ok(());
                };
                router.route_addressed(&mut self.db, &event).map(|_| ())
            }
            Event::App(event) => {
                if let Some(handler) = self.app_handler.as_mut() {
                    handler(&mut self.db, &event);
                }
                for router in self.registry.iter_mut() {
                    router.route_open(&mut self.db, &event)?;
                }
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // State queries
    // ------------------------------------------------------------------

    /// The full persisted envelope for an instance, if live.
    pub fn state(&self, id: &InstanceId) -> Option<Envelope> {
        self.adapter.get_state(&self.db, id)
    }

    /// The current state node for an instance, if live.
    pub fn state_node(&self, id: &InstanceId) -> Option<StateNode> {
        self.state(id).map(|envelope| envelope.current)
    }

    /// Whether the instance's state is at or below the given node.
    pub fn is_in(&self, id: &InstanceId, node: &str) -> bool {
        self.state_node(id)
            .is_some_and(|state| self.engine.matches(&state, node))
    }

    /// Resolve a state-to-view matcher against an instance's current state.
    pub fn match_state<'m, T>(
        &self,
        id: &InstanceId,
        matcher: &'m StateMatcher<T>,
    ) -> Result<&'m T, MatchError> {
        let Some(state) = self.state_node(id) else {
            return Err(MatchError::NoInstance { id: id.to_string() });
        };
        matcher.resolve(&state, self.engine.as_ref())
    }

    /// The current epoch for an id; zero if never initialized.
    pub fn epoch(&self, id: &InstanceId) -> u64 {
        self.epochs.current(id)
    }

    /// Whether a router is registered for the id.
    pub fn is_live(&self, id: &InstanceId) -> bool {
        self.registry.contains(id)
    }

    /// Read access to the application store.
    pub fn db(&self) -> &AppDb {
        &self.db
    }

    /// Host write access to the application store, outside dispatch.
    pub fn db_mut(&mut self) -> &mut AppDb {
        &mut self.db
    }
}

/// Scoped handle to a started instance; stops it on drop.
///
/// Release happens on every exit path (normal, early return, or panic
/// unwind), independent of any UI framework.
pub struct InstanceGuard<'rt> {
    runtime: &'rt mut FsmRuntime,
    id: InstanceId,
}

impl InstanceGuard<'_> {
    /// The guarded instance's id.
    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    /// The underlying runtime, for dispatching while the guard is held.
    pub fn runtime(&mut self) -> &mut FsmRuntime {
        self.runtime
    }

    /// Dispatch an addressed transition to the guarded instance.
    pub fn transition(&mut self, event: FsmEvent) -> Result<(), RuntimeError> {
        let id = self.id.clone();
        self.runtime.transition(&id, event)
    }

    /// The guarded instance's current state node.
    pub fn state_node(&self) -> Option<StateNode> {
        self.runtime.state_node(&self.id)
    }
}

impl Drop for InstanceGuard<'_> {
    fn drop(&mut self) {
        self.runtime.stop(&self.id.clone());
    }
}
