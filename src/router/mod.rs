//! Event routers: the per-instance interceptors of the dispatch pipeline.
//!
//! A router is installed once per live instance and inspects every event
//! flowing through the pipeline, so machines react to application events
//! without per-instance event handlers. Two mutually exclusive modes:
//!
//! - **Closed** (default): the instance reacts only to addressed transition
//!   envelopes naming its id. The router acts as a before-hook, substituting
//!   its bound definition and options so transition application stays a pure
//!   function of `(state, event)`.
//! - **Open**: every application event is a candidate transition, except the
//!   reserved lifecycle kinds. The router acts as an after-hook, running once
//!   the host's own handling of the event is done and merging its envelope
//!   write into the same dispatch turn. This invokes the engine on every
//!   event in the system, not just ones aimed at this instance (a deliberate
//!   convenience-over-throughput trade-off), so unmatched events are always
//!   silently ignored.
//!
//! The staleness filter lives here: before applying a transition sourced from
//! a delayed event, the router compares the event's stamped epoch against the
//! envelope's current epoch and silently discards superseded events.

use crate::engine::{MachineDefinition, StatechartEngine, TransitionOptions};
use crate::error::RuntimeError;
use crate::event::{is_reserved_kind, FsmEvent};
use crate::scheduler::DelayedScheduler;
use crate::store::{AppDb, InstanceId, StoreAdapter};
use chrono::Utc;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, trace};

/// How a router claims events from the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    /// React only to addressed transition envelopes.
    Closed,
    /// Treat every non-reserved application event as a candidate.
    Open,
}

/// The interceptor bound to one live instance.
pub struct EventRouter {
    id: InstanceId,
    definition: MachineDefinition,
    options: TransitionOptions,
    mode: DispatchMode,
    engine: Arc<dyn StatechartEngine>,
    adapter: Arc<dyn StoreAdapter>,
    pub(crate) scheduler: DelayedScheduler,
}

impl EventRouter {
    pub(crate) fn new(
        id: InstanceId,
        definition: MachineDefinition,
        options: TransitionOptions,
        mode: DispatchMode,
        engine: Arc<dyn StatechartEngine>,
        adapter: Arc<dyn StoreAdapter>,
        scheduler: DelayedScheduler,
    ) -> Self {
        Self {
            id,
            definition,
            options,
            mode,
            engine,
            adapter,
            scheduler,
        }
    }

    /// The instance id this router claims.
    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    /// The router's dispatch mode.
    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub(crate) fn definition(&self) -> &MachineDefinition {
        &self.definition
    }

    /// Swap the bound definition (restart with a new definition).
    pub(crate) fn rebind(&mut self, definition: MachineDefinition) {
        self.definition = definition;
    }

    pub(crate) fn into_scheduler(self) -> DelayedScheduler {
        self.scheduler
    }

    /// Before-hook: apply an addressed transition envelope.
    ///
    /// The caller has already matched the envelope's target id to this
    /// router; the bound definition and options are substituted here.
    pub(crate) fn route_addressed(
        &mut self,
        db: &mut AppDb,
        event: &FsmEvent,
    ) -> Result<bool, RuntimeError> {
        let options = self.options;
        self.apply(db, event, options)
    }

    /// After-hook: offer an application event to an open-mode instance.
    ///
    /// Reserved lifecycle kinds are never candidates, and unknown events are
    /// always ignored regardless of the configured options.
    pub(crate) fn route_open(
        &mut self,
        db: &mut AppDb,
        event: &FsmEvent,
    ) -> Result<bool, RuntimeError> {
        if self.mode != DispatchMode::Open || is_reserved_kind(&event.kind) {
            return Ok(false);
        }
        self.apply(
            db,
            event,
            TransitionOptions {
                ignore_unknown: true,
            },
        )
    }

    /// Run one event through the staleness filter, the engine, and the store
    /// adapter. Returns whether the envelope was rewritten.
    fn apply(
        &mut self,
        db: &mut AppDb,
        event: &FsmEvent,
        options: TransitionOptions,
    ) -> Result<bool, RuntimeError> {
        let Some(envelope) = self.adapter.get_state(db, &self.id) else {
            // Instances may legitimately be stopped; nothing to do.
            trace!(id = %self.id, kind = %event.kind, "no live state for event");
            return Ok(false);
        };

        if let Some(event_epoch) = event.scheduled_epoch {
            match event_epoch.cmp(&envelope.epoch) {
                Ordering::Less => {
                    debug!(
                        id = %self.id,
                        kind = %event.kind,
                        event_epoch,
                        current_epoch = envelope.epoch,
                        "discarding stale delayed event"
                    );
                    return Ok(false);
                }
                Ordering::Greater => {
                    return Err(RuntimeError::EpochFromFuture {
                        id: self.id.clone(),
                        kind: event.kind.clone(),
                        event_epoch,
                        current_epoch: envelope.epoch,
                    });
                }
                Ordering::Equal => {}
            }
        }

        // A scheduler-injected event races with synchronous exits from the
        // state that armed it within the same epoch; an unmatched one is a
        // no-op, never an error.
        let options = if event.is_scheduled() {
            TransitionOptions {
                ignore_unknown: true,
            }
        } else {
            options
        };

        let Some(outcome) =
            self.engine
                .transition(&self.definition, &envelope.current, event, &options)?
        else {
            return Ok(false);
        };

        self.scheduler.run(outcome.timers, envelope.epoch);

        let mut next = envelope;
        next.current = outcome.state;
        next.ext.extend(outcome.ext);
        next.updated_at = Utc::now();
        self.adapter.set_state(db, &self.id, Some(next));
        Ok(true)
    }
}

/// The global, ordered interceptor chain: one slot per instance id.
///
/// `register` and `unregister` are its only mutators, and only the lifecycle
/// controller calls them. Iteration preserves registration order, which is
/// the order the host pipeline runs the hooks in.
#[derive(Default)]
pub struct RouterRegistry {
    routers: Vec<EventRouter>,
}

impl RouterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a router. Fails if the id already has one; replacement is
    /// always an explicit unregister-then-register by the controller.
    pub(crate) fn register(&mut self, router: EventRouter) -> Result<(), RuntimeError> {
        if self.contains(router.id()) {
            return Err(RuntimeError::RouterConflict {
                id: router.id().clone(),
            });
        }
        debug!(id = %router.id(), mode = ?router.mode(), "registering event router");
        self.routers.push(router);
        Ok(())
    }

    /// Remove and return the router for an id. Idempotent.
    pub(crate) fn unregister(&mut self, id: &InstanceId) -> Option<EventRouter> {
        let index = self.routers.iter().position(|router| router.id() == id)?;
        debug!(%id, "unregistering event router");
        Some(self.routers.remove(index))
    }

    /// Whether an id has a live router.
    pub fn contains(&self, id: &InstanceId) -> bool {
        self.routers.iter().any(|router| router.id() == id)
    }

    pub(crate) fn get(&self, id: &InstanceId) -> Option<&EventRouter> {
        self.routers.iter().find(|router| router.id() == id)
    }

    pub(crate) fn get_mut(&mut self, id: &InstanceId) -> Option<&mut EventRouter> {
        self.routers.iter_mut().find(|router| router.id() == id)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut EventRouter> {
        self.routers.iter_mut()
    }

    /// Number of live routers.
    pub fn len(&self) -> usize {
        self.routers.len()
    }

    /// Whether no routers are live.
    pub fn is_empty(&self) -> bool {
        self.routers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{FlatEngine, MachineBuilder};
    use crate::event::EventQueue;
    use crate::scheduler::ManualClock;
    use crate::store::{DocumentAdapter, Envelope};

    fn router(id: &str, mode: DispatchMode) -> EventRouter {
        let definition = MachineBuilder::new()
            .id(id)
            .initial("clean")
            .state("clean", [("edit-started", "editing")])
            .state("editing", [("edit-ended", "dirty")])
            .state("dirty", [("edit-started", "editing")])
            .build()
            .unwrap();
        let instance = InstanceId::key(id);
        let scheduler = DelayedScheduler::new(
            instance.clone(),
            mode,
            Arc::new(ManualClock::new()),
            Arc::new(EventQueue::new()),
        );
        EventRouter::new(
            instance,
            definition,
            TransitionOptions::default(),
            mode,
            Arc::new(FlatEngine),
            Arc::new(DocumentAdapter),
            scheduler,
        )
    }

    fn db_with(id: &str, state: &str, epoch: u64) -> AppDb {
        let mut db = AppDb::new();
        DocumentAdapter.set_state(
            &mut db,
            &InstanceId::key(id),
            Some(Envelope::new(state.into(), epoch)),
        );
        db
    }

    #[test]
    fn registry_rejects_duplicate_ids() {
        let mut registry = RouterRegistry::new();
        registry.register(router("doc", DispatchMode::Closed)).unwrap();

        let result = registry.register(router("doc", DispatchMode::Open));
        assert_eq!(
            result.unwrap_err(),
            RuntimeError::RouterConflict {
                id: InstanceId::key("doc")
            }
        );
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut registry = RouterRegistry::new();
        registry.register(router("doc", DispatchMode::Closed)).unwrap();

        assert!(registry.unregister(&InstanceId::key("doc")).is_some());
        assert!(registry.unregister(&InstanceId::key("doc")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn addressed_routing_rewrites_the_envelope() {
        let mut db = db_with("doc", "clean", 1);
        let mut router = router("doc", DispatchMode::Closed);

        let applied = router
            .route_addressed(&mut db, &FsmEvent::new("edit-started"))
            .unwrap();

        assert!(applied);
        let envelope = DocumentAdapter
            .get_state(&db, &InstanceId::key("doc"))
            .unwrap();
        assert_eq!(envelope.current.as_str(), "editing");
        assert_eq!(envelope.epoch, 1);
    }

    #[test]
    fn routing_without_state_is_a_noop() {
        let mut db = AppDb::new();
        let mut router = router("doc", DispatchMode::Closed);

        let applied = router
            .route_addressed(&mut db, &FsmEvent::new("edit-started"))
            .unwrap();

        assert!(!applied);
        assert!(db.as_map().is_empty());
    }

    #[test]
    fn open_routing_skips_reserved_kinds() {
        let mut db = db_with("doc", "clean", 1);
        let mut router = router("doc", DispatchMode::Open);

        for kind in ["init", "start", "stop", "restart"] {
            let applied = router.route_open(&mut db, &FsmEvent::new(kind)).unwrap();
            assert!(!applied);
        }
    }

    #[test]
    fn open_routing_ignores_unknown_events() {
        let mut db = db_with("doc", "clean", 1);
        let mut router = router("doc", DispatchMode::Open);

        let applied = router
            .route_open(&mut db, &FsmEvent::new("unrelated"))
            .unwrap();

        assert!(!applied);
        let envelope = DocumentAdapter
            .get_state(&db, &InstanceId::key("doc"))
            .unwrap();
        assert_eq!(envelope.current.as_str(), "clean");
    }

    #[test]
    fn closed_router_never_claims_open_candidates() {
        let mut db = db_with("doc", "clean", 1);
        let mut router = router("doc", DispatchMode::Closed);

        let applied = router
            .route_open(&mut db, &FsmEvent::new("edit-started"))
            .unwrap();
        assert!(!applied);
    }

    #[test]
    fn stale_epoch_is_discarded_silently() {
        let mut db = db_with("doc", "clean", 5);
        let mut router = router("doc", DispatchMode::Closed);

        let applied = router
            .route_addressed(&mut db, &FsmEvent::new("edit-started").tagged(4))
            .unwrap();

        assert!(!applied);
        let envelope = DocumentAdapter
            .get_state(&db, &InstanceId::key("doc"))
            .unwrap();
        assert_eq!(envelope.current.as_str(), "clean");
    }

    #[test]
    fn future_epoch_is_a_contract_violation() {
        let mut db = db_with("doc", "clean", 1);
        let mut router = router("doc", DispatchMode::Closed);

        let result = router.route_addressed(&mut db, &FsmEvent::new("edit-started").tagged(2));
        assert_eq!(
            result.unwrap_err(),
            RuntimeError::EpochFromFuture {
                id: InstanceId::key("doc"),
                kind: "edit-started".into(),
                event_epoch: 2,
                current_epoch: 1,
            }
        );
    }

    #[test]
    fn scheduled_event_with_no_matching_transition_is_ignored() {
        let mut db = db_with("doc", "clean", 1);
        let mut router = router("doc", DispatchMode::Closed);

        // "edit-ended" is unknown from "clean": a hard error for a user
        // event, a no-op for a scheduler-injected one.
        let applied = router
            .route_addressed(&mut db, &FsmEvent::new("edit-ended").tagged(1))
            .unwrap();

        assert!(!applied);
        let envelope = DocumentAdapter
            .get_state(&db, &InstanceId::key("doc"))
            .unwrap();
        assert_eq!(envelope.current.as_str(), "clean");
    }

    #[test]
    fn matching_epoch_is_accepted() {
        let mut db = db_with("doc", "clean", 3);
        let mut router = router("doc", DispatchMode::Closed);

        let applied = router
            .route_addressed(&mut db, &FsmEvent::new("edit-started").tagged(3))
            .unwrap();
        assert!(applied);
    }
}
