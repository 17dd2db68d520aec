//! Store Kernel
//!
//! The store maps opaque typed identifiers to controlled subjects and exposes
//! the public surface: registration (states, reducers, derived behaviors,
//! event sources), observation (behavior and event streams), dispatch, typed
//! event multiplexing, the effect registry, and lifecycle (child stores,
//! reset, completion).
//!
//! # Architecture
//!
//! ```text
//! dispatch(e, v) ──► DelayedEventQueue ──► reducers(e) ──► state subjects
//!                        (FIFO tick)  └──► event subject ──► subscribers,
//!                                                            source pumps
//! getBehavior(b) ──► ControlledSubject(b) ──► replay + live updates
//!                        │ 0→1 subscribers
//!                        ▼
//!                   lazy source pumps (transitive activation upstream)
//! ```
//!
//! Control flow is demand-driven: nothing is subscribed upstream until a
//! terminal behavior or event has subscribers, except sources registered as
//! stateful. Every dispatch is serialized through the store's delayed-event
//! queue, which both fixes the delivery order and breaks synchronous cycles.
//!
//! Dispatch is lazy in the caller: the returned future performs the send on
//! first poll and resolves once all synchronous receivers (reducers, channel
//! fan-out) have handled the value.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Weak};

use futures::{Stream, StreamExt};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

use rill_core::{
    BehaviorId, DerivedId, EffectId, EventId, MaybeValue, SignalId, StateId, StoreError,
};

use crate::config::StoreConfig;
use crate::effect::Effect;
use crate::queue::DelayedEventQueue;
use crate::source::{Source, SourceBuilder, SourceContext, SourceKind, SourceName};
use crate::stream::{BehaviorStream, EventStream};
use crate::subject::{EqFn, Subject, SubjectControl};
use crate::typed::{TypedEvent, TypedEventStream};

// ─────────────────────────────────────────────────────────────────────────────
// Store handle
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to a signal store. Clones share the same store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

#[derive(Clone)]
pub(crate) struct WeakStore {
    inner: Weak<StoreInner>,
}

impl WeakStore {
    pub(crate) fn upgrade(&self) -> Option<Store> {
        self.inner.upgrade().map(|inner| Store { inner })
    }
}

struct StoreInner {
    config: StoreConfig,
    queue: DelayedEventQueue,
    parent: Option<Store>,
    entries: Mutex<HashMap<u64, Entry>>,
    /// event index → state index → erased reducer application.
    reducers: Mutex<HashMap<u64, IndexMap<u64, ReducerFn>>>,
    effects: Mutex<HashMap<u64, EffectSlot>>,
    multiplexers: Mutex<HashMap<SourceName, MultiplexEntry>>,
    /// Store-held counting subscriptions (eager behaviors).
    pins: Mutex<Vec<Box<dyn Any + Send>>>,
}

struct Entry {
    control: Arc<dyn SubjectControl>,
    handle: Box<dyn Any + Send + Sync>,
    /// True once a registration (source, state, reducer) was made here, which
    /// makes this store the authority for the id in child-store resolution.
    registered: bool,
}

type ReducerFn = Arc<dyn Fn(&dyn Any) + Send + Sync>;

struct EffectSlot {
    value: Option<Arc<dyn Any + Send + Sync>>,
    notify: Arc<Notify>,
}

impl Default for EffectSlot {
    fn default() -> Self {
        Self {
            value: None,
            notify: Arc::new(Notify::new()),
        }
    }
}

struct MultiplexEntry {
    handle: JoinHandle<()>,
    targets: Vec<SignalId>,
}

impl Store {
    /// Create a store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create a store with an explicit configuration.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                config,
                queue: DelayedEventQueue::new(),
                parent: None,
                entries: Mutex::new(HashMap::new()),
                reducers: Mutex::new(HashMap::new()),
                effects: Mutex::new(HashMap::new()),
                multiplexers: Mutex::new(HashMap::new()),
                pins: Mutex::new(Vec::new()),
            }),
        }
    }

    fn downgrade(&self) -> WeakStore {
        WeakStore {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The delayed-event queue serializing this store's dispatches.
    ///
    /// Child stores share their root's queue.
    pub fn queue(&self) -> &DelayedEventQueue {
        &self.inner.queue
    }

    // ─── Child stores ────────────────────────────────────────────────────────

    /// Create a child store.
    ///
    /// A child resolves each id to the nearest ancestor owning a registration
    /// for it and auto-creates locally otherwise; dispatches share the root's
    /// queue so ordering is global.
    pub fn create_child_store(&self) -> Store {
        Store {
            inner: Arc::new(StoreInner {
                config: self.inner.config.clone(),
                queue: self.inner.queue.clone(),
                parent: Some(self.clone()),
                entries: Mutex::new(HashMap::new()),
                reducers: Mutex::new(HashMap::new()),
                effects: Mutex::new(HashMap::new()),
                multiplexers: Mutex::new(HashMap::new()),
                pins: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The parent store, if this is a child.
    pub fn get_parent_store(&self) -> Option<Store> {
        self.inner.parent.clone()
    }

    /// The root of the store hierarchy.
    pub fn get_root_store(&self) -> Store {
        let mut store = self.clone();
        while let Some(parent) = store.get_parent_store() {
            store = parent;
        }
        store
    }

    /// The store that serves `index`: the nearest ancestor with a registered
    /// entry, else the nearest with any entry, else `self`.
    fn resolve_store_for(&self, index: u64) -> Store {
        let mut cursor = Some(self.clone());
        let mut fallback: Option<Store> = None;
        while let Some(store) = cursor {
            {
                let entries = store.inner.entries.lock();
                if let Some(entry) = entries.get(&index) {
                    if entry.registered {
                        drop(entries);
                        return store;
                    }
                    if fallback.is_none() {
                        fallback = Some(store.clone());
                    }
                }
            }
            cursor = store.inner.parent.clone();
        }
        fallback.unwrap_or_else(|| self.clone())
    }

    // ─── Subject access ──────────────────────────────────────────────────────

    fn try_local_behavior_subject<T>(&self, id: &SignalId) -> Result<Subject<T>, StoreError>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        let mut entries = self.inner.entries.lock();
        if let Some(entry) = entries.get(&id.index()) {
            return entry
                .handle
                .downcast_ref::<Subject<T>>()
                .cloned()
                .ok_or_else(|| StoreError::TypeMismatch {
                    id: id.clone(),
                    expected: std::any::type_name::<T>(),
                });
        }
        let eq: EqFn<T> = Arc::new(|a, b| a == b);
        let subject = Subject::new_behavior(
            id.clone(),
            self.inner.config.channel_capacity,
            self.downgrade(),
            eq,
        );
        entries.insert(
            id.index(),
            Entry {
                control: Arc::new(subject.clone()),
                handle: Box::new(subject.clone()),
                registered: false,
            },
        );
        Ok(subject)
    }

    fn try_local_event_subject<T>(&self, id: &SignalId) -> Result<Subject<T>, StoreError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut entries = self.inner.entries.lock();
        if let Some(entry) = entries.get(&id.index()) {
            return entry
                .handle
                .downcast_ref::<Subject<T>>()
                .cloned()
                .ok_or_else(|| StoreError::TypeMismatch {
                    id: id.clone(),
                    expected: std::any::type_name::<T>(),
                });
        }
        let subject = Subject::new_event(
            id.clone(),
            self.inner.config.channel_capacity,
            self.downgrade(),
        );
        entries.insert(
            id.index(),
            Entry {
                control: Arc::new(subject.clone()),
                handle: Box::new(subject.clone()),
                registered: false,
            },
        );
        Ok(subject)
    }

    fn observe_behavior_subject<T>(&self, id: &SignalId) -> Subject<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        let owner = self.resolve_store_for(id.index());
        match owner.try_local_behavior_subject::<T>(id) {
            Ok(subject) => subject,
            Err(err) => {
                tracing::error!(signal = %id, error = %err, "behavior observed at mismatching type");
                let eq: EqFn<T> = Arc::new(|a, b| a == b);
                Subject::new_behavior(
                    id.clone(),
                    self.inner.config.channel_capacity,
                    self.downgrade(),
                    eq,
                )
            }
        }
    }

    fn observe_event_subject<T>(&self, id: &SignalId) -> Subject<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let owner = self.resolve_store_for(id.index());
        match owner.try_local_event_subject::<T>(id) {
            Ok(subject) => subject,
            Err(err) => {
                tracing::error!(signal = %id, error = %err, "event observed at mismatching type");
                Subject::new_event(
                    id.clone(),
                    self.inner.config.channel_capacity,
                    self.downgrade(),
                )
            }
        }
    }

    fn mark_registered(&self, id: &SignalId) {
        if let Some(entry) = self.inner.entries.lock().get_mut(&id.index()) {
            entry.registered = true;
        }
    }

    // ─── State and reducers ──────────────────────────────────────────────────

    /// Register a root state with its initial value.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::DuplicateSource`] when the state was already
    /// added.
    pub fn add_state<S>(&self, id: &StateId<S>, initial: S) -> Result<(), StoreError>
    where
        S: Clone + PartialEq + Send + Sync + 'static,
    {
        let subject = self.try_local_behavior_subject::<S>(id.erased())?;
        subject.note_external_source(&SourceName::new("state"))?;
        subject.set_initial(MaybeValue::Value(initial.clone()));
        subject.seed(initial);
        self.mark_registered(id.erased());
        tracing::debug!(signal = %id.erased(), "state registered");
        Ok(())
    }

    /// Bind a pure reducer folding `event` into `state`.
    ///
    /// Reducers observe every dispatched event from registration on,
    /// independent of external subscriptions: they are applied inside the
    /// dispatch drain, before channel fan-out.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::DuplicateSource`] when a reducer is already
    /// bound to this (state, event) pair.
    pub fn add_reducer<S, E>(
        &self,
        state: &StateId<S>,
        event: &EventId<E>,
        reducer: impl Fn(&S, &E) -> S + Send + Sync + 'static,
    ) -> Result<(), StoreError>
    where
        S: Clone + PartialEq + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        let state_subject = self.try_local_behavior_subject::<S>(state.erased())?;
        let _ = self.try_local_event_subject::<E>(event.erased())?;
        self.mark_registered(state.erased());
        self.mark_registered(event.erased());

        let mut reducers = self.inner.reducers.lock();
        let for_event = reducers.entry(event.erased().index()).or_default();
        if for_event.contains_key(&state.erased().index()) {
            return Err(StoreError::DuplicateSource {
                id: state.erased().clone(),
                name: format!("reducer:{}", event.erased()),
            });
        }
        let event_id = event.erased().clone();
        for_event.insert(
            state.erased().index(),
            Arc::new(move |payload: &dyn Any| match payload.downcast_ref::<E>() {
                Some(event) => state_subject.reduce(|state| reducer(state, event)),
                None => {
                    tracing::error!(event = %event_id, "reducer received payload of unexpected type");
                }
            }),
        );
        Ok(())
    }

    /// Detach the reducer bound to (state, event), if any.
    ///
    /// A state whose last reducer is removed stays constant at its last
    /// value.
    pub fn remove_reducer<S, E>(&self, state: &StateId<S>, event: &EventId<E>) {
        let mut reducers = self.inner.reducers.lock();
        if let Some(for_event) = reducers.get_mut(&event.erased().index()) {
            for_event.shift_remove(&state.erased().index());
        }
    }

    // ─── Behavior sources ────────────────────────────────────────────────────

    /// Register a derived behavior: a single lazy source built from `build`
    /// on every activation. An initial value seeds the replay slot so late
    /// subscribers see it before the first upstream emission.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::DuplicateSource`] when the derived state was
    /// already added.
    pub fn add_derived_state<T, F, S>(
        &self,
        id: &DerivedId<T>,
        build: F,
        initial: Option<T>,
    ) -> Result<(), StoreError>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&SourceContext) -> S + Send + Sync + 'static,
        S: Stream<Item = T> + Send + 'static,
    {
        let subject = self.try_local_behavior_subject::<T>(id.erased())?;
        subject.set_initial(initial.clone().map_or(MaybeValue::NoValue, MaybeValue::Value));
        subject.add_source(Source::new(
            SourceName::new("derived-state"),
            SourceKind::Lazy,
            initial,
            boxed_builder(build),
        ))?;
        self.mark_registered(id.erased());
        tracing::debug!(signal = %id.erased(), "derived state registered");
        Ok(())
    }

    /// Register a behavior source under a generated name.
    ///
    /// `stateful` sources are subscribed from registration on; lazy sources
    /// only while the behavior has subscribers.
    pub fn add_behavior<T, F, S>(
        &self,
        id: impl Into<BehaviorId<T>>,
        build: F,
        stateful: bool,
        initial: Option<T>,
    ) -> Result<SourceName, StoreError>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&SourceContext) -> S + Send + Sync + 'static,
        S: Stream<Item = T> + Send + 'static,
    {
        let id = id.into();
        let subject = self.try_local_behavior_subject::<T>(id.erased())?;
        if let Some(initial) = &initial {
            subject.set_initial(MaybeValue::Value(initial.clone()));
        }
        let name = SourceName::generated("behavior");
        let kind = if stateful {
            SourceKind::Stateful
        } else {
            SourceKind::Lazy
        };
        subject.add_source(Source::new(name.clone(), kind, initial, boxed_builder(build)))?;
        self.mark_registered(id.erased());
        Ok(name)
    }

    /// [`add_behavior`](Store::add_behavior) with a lazy source.
    pub fn add_lazy_behavior<T, F, S>(
        &self,
        id: impl Into<BehaviorId<T>>,
        build: F,
        initial: Option<T>,
    ) -> Result<SourceName, StoreError>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&SourceContext) -> S + Send + Sync + 'static,
        S: Stream<Item = T> + Send + 'static,
    {
        self.add_behavior(id, build, false, initial)
    }

    /// [`add_behavior`](Store::add_behavior) with a stateful source.
    pub fn add_non_lazy_behavior<T, F, S>(
        &self,
        id: impl Into<BehaviorId<T>>,
        build: F,
        initial: Option<T>,
    ) -> Result<SourceName, StoreError>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&SourceContext) -> S + Send + Sync + 'static,
        S: Stream<Item = T> + Send + 'static,
    {
        self.add_behavior(id, build, true, initial)
    }

    // ─── Event sources ───────────────────────────────────────────────────────

    /// Register a lazy event source. Sourced values are routed through
    /// dispatch, so reducers and subscribers observe them like any other
    /// dispatched event.
    pub fn add_event_source<T, F, S>(
        &self,
        id: &EventId<T>,
        build: F,
    ) -> Result<SourceName, StoreError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&SourceContext) -> S + Send + Sync + 'static,
        S: Stream<Item = T> + Send + 'static,
    {
        self.event_source(id, build, SourceKind::Lazy)
    }

    /// Register a stateful event source: it pumps from registration on.
    pub fn add_stateful_event_source<T, F, S>(
        &self,
        id: &EventId<T>,
        build: F,
    ) -> Result<SourceName, StoreError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&SourceContext) -> S + Send + Sync + 'static,
        S: Stream<Item = T> + Send + 'static,
    {
        self.event_source(id, build, SourceKind::Stateful)
    }

    fn event_source<T, F, S>(
        &self,
        id: &EventId<T>,
        build: F,
        kind: SourceKind,
    ) -> Result<SourceName, StoreError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&SourceContext) -> S + Send + Sync + 'static,
        S: Stream<Item = T> + Send + 'static,
    {
        let subject = self.try_local_event_subject::<T>(id.erased())?;
        let name = SourceName::generated("event-source");
        subject.add_source(Source::new(
            name.clone(),
            kind,
            None,
            dispatching_builder(id.clone(), build),
        ))?;
        self.mark_registered(id.erased());
        Ok(name)
    }

    /// Remove an event source by name; removes a typed-event multiplexer
    /// entirely when `name` refers to one targeting `id`.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::MissingSource`] when nothing is registered
    /// under the name.
    pub fn remove_event_source<T>(
        &self,
        id: &EventId<T>,
        name: &SourceName,
    ) -> Result<(), StoreError>
    where
        T: Clone + Send + Sync + 'static,
    {
        {
            let mut multiplexers = self.inner.multiplexers.lock();
            let targets_id = multiplexers
                .get(name)
                .is_some_and(|m| m.targets.iter().any(|t| t == id.erased()));
            if targets_id {
                if let Some(entry) = multiplexers.remove(name) {
                    entry.handle.abort();
                }
                return Ok(());
            }
        }
        let owner = self.resolve_store_for(id.erased().index());
        let control = {
            let entries = owner.inner.entries.lock();
            entries.get(&id.erased().index()).map(|e| Arc::clone(&e.control))
        };
        match control {
            Some(control) => control.try_remove_source(name),
            None => Err(StoreError::MissingSource {
                id: id.erased().clone(),
                name: name.as_str().to_owned(),
            }),
        }
    }

    // ─── Connect ─────────────────────────────────────────────────────────────

    /// Wire one behavior as a source of another.
    ///
    /// When `lazy` is unspecified the connection is eager exactly when at
    /// least one endpoint is a derived state, so a stateful result producer
    /// keeps producing while only its side channels are observed.
    pub fn connect<T>(
        &self,
        from: impl Into<BehaviorId<T>>,
        to: impl Into<BehaviorId<T>>,
        lazy: Option<bool>,
    ) -> Result<SourceName, StoreError>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        let from = from.into();
        let to = to.into();
        let either_derived = from.erased().is_derived_id() || to.erased().is_derived_id();
        let lazy = lazy.unwrap_or(!either_derived);
        self.connect_observable(move |ctx: &SourceContext| ctx.get_behavior(from.clone()), to, lazy)
    }

    /// Wire an event channel as a source of a behavior. Lazy by default.
    pub fn connect_event_to_behavior<T>(
        &self,
        from: &EventId<T>,
        to: impl Into<BehaviorId<T>>,
        lazy: Option<bool>,
    ) -> Result<SourceName, StoreError>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        let from = from.clone();
        self.connect_observable(
            move |ctx: &SourceContext| ctx.get_event_stream(&from),
            to,
            lazy.unwrap_or(true),
        )
    }

    /// Wire a behavior as a source of an event channel. Lazy by default.
    pub fn connect_behavior_to_event<T>(
        &self,
        from: impl Into<BehaviorId<T>>,
        to: &EventId<T>,
        lazy: Option<bool>,
    ) -> Result<SourceName, StoreError>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        let from = from.into();
        self.connect_observable_to_event(
            move |ctx: &SourceContext| ctx.get_behavior(from.clone()),
            to,
            lazy.unwrap_or(true),
        )
    }

    /// Wire one event channel as a source of another. Lazy by default.
    pub fn connect_event_to_event<T>(
        &self,
        from: &EventId<T>,
        to: &EventId<T>,
        lazy: Option<bool>,
    ) -> Result<SourceName, StoreError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let from = from.clone();
        self.connect_observable_to_event(
            move |ctx: &SourceContext| ctx.get_event_stream(&from),
            to,
            lazy.unwrap_or(true),
        )
    }

    /// Wire an arbitrary stream as a source of a behavior.
    pub fn connect_observable<T, F, S>(
        &self,
        build: F,
        to: impl Into<BehaviorId<T>>,
        lazy: bool,
    ) -> Result<SourceName, StoreError>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&SourceContext) -> S + Send + Sync + 'static,
        S: Stream<Item = T> + Send + 'static,
    {
        let to = to.into();
        let subject = self.try_local_behavior_subject::<T>(to.erased())?;
        let name = SourceName::generated("connect");
        let kind = if lazy {
            SourceKind::Lazy
        } else {
            SourceKind::Stateful
        };
        subject.add_source(Source::new(name.clone(), kind, None, boxed_builder(build)))?;
        self.mark_registered(to.erased());
        Ok(name)
    }

    /// Wire an arbitrary stream as a source of an event channel.
    pub fn connect_observable_to_event<T, F, S>(
        &self,
        build: F,
        to: &EventId<T>,
        lazy: bool,
    ) -> Result<SourceName, StoreError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&SourceContext) -> S + Send + Sync + 'static,
        S: Stream<Item = T> + Send + 'static,
    {
        let subject = self.try_local_event_subject::<T>(to.erased())?;
        let name = SourceName::generated("connect");
        let kind = if lazy {
            SourceKind::Lazy
        } else {
            SourceKind::Stateful
        };
        subject.add_source(Source::new(
            name.clone(),
            kind,
            None,
            dispatching_builder(to.clone(), build),
        ))?;
        self.mark_registered(to.erased());
        Ok(name)
    }

    // ─── Observation ─────────────────────────────────────────────────────────

    /// Subscribe a behavior: the cached last value (if any) is replayed,
    /// followed by every subsequent distinct emission. The subscription
    /// counts towards laziness; dropping the stream releases it.
    pub fn get_behavior<T>(&self, id: impl Into<BehaviorId<T>>) -> BehaviorStream<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        let id = id.into();
        self.observe_behavior_subject::<T>(id.erased())
            .behavior_stream(true, None)
    }

    /// Subscribe an event channel: only values dispatched after the call are
    /// observed.
    pub fn get_event_stream<T>(&self, id: &EventId<T>) -> EventStream<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.observe_event_subject::<T>(id.erased())
            .event_stream(true, None)
    }

    /// [`get_event_stream`](Store::get_event_stream) yielding the payload
    /// together with the event id it arrived on.
    pub fn get_typed_event_stream<T>(&self, id: &EventId<T>) -> TypedEventStream<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        TypedEventStream::new(id.clone(), self.get_event_stream(id))
    }

    /// The cached value of a behavior, without subscribing.
    pub fn current_value<T>(&self, id: impl Into<BehaviorId<T>>) -> MaybeValue<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        let id = id.into();
        let owner = self.resolve_store_for(id.erased().index());
        let entries = owner.inner.entries.lock();
        match entries.get(&id.erased().index()) {
            Some(entry) => entry
                .handle
                .downcast_ref::<Subject<T>>()
                .map(Subject::current)
                .unwrap_or(MaybeValue::NoValue),
            None => MaybeValue::NoValue,
        }
    }

    /// True while the signal has counting subscribers.
    pub fn is_subscribed(&self, id: &SignalId) -> bool {
        let owner = self.resolve_store_for(id.index());
        let entries = owner.inner.entries.lock();
        entries
            .get(&id.index())
            .map(|entry| entry.control.is_subscribed())
            .unwrap_or(false)
    }

    /// Number of sources registered for a behavior (the state fold counts as
    /// one).
    pub fn get_number_of_behavior_sources(&self, id: &SignalId) -> usize {
        let owner = self.resolve_store_for(id.index());
        let entries = owner.inner.entries.lock();
        entries
            .get(&id.index())
            .map(|entry| entry.control.source_count())
            .unwrap_or(0)
    }

    /// Number of sources registered for an event channel, including typed
    /// multiplexers targeting it.
    pub fn get_number_of_event_sources(&self, id: &SignalId) -> usize {
        let owner = self.resolve_store_for(id.index());
        let mut count = {
            let entries = owner.inner.entries.lock();
            entries
                .get(&id.index())
                .map(|entry| entry.control.source_count())
                .unwrap_or(0)
        };
        let mut cursor = Some(self.clone());
        while let Some(store) = cursor {
            count += store
                .inner
                .multiplexers
                .lock()
                .values()
                .filter(|m| m.targets.iter().any(|t| t == id))
                .count();
            cursor = store.inner.parent.clone();
        }
        count
    }

    /// Hold a counting subscription on a behavior for the lifetime of the
    /// store (until [`complete_all_signals`](Store::complete_all_signals)).
    pub fn pin_behavior<T>(&self, id: impl Into<BehaviorId<T>>)
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        let stream = self.get_behavior(id);
        self.inner.pins.lock().push(Box::new(stream));
    }

    pub(crate) fn subscribe_behavior_counting<T>(
        &self,
        id: &BehaviorId<T>,
        ancestry: Arc<HashSet<u64>>,
    ) -> BehaviorStream<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        self.observe_behavior_subject::<T>(id.erased())
            .behavior_stream(true, Some(&ancestry))
    }

    pub(crate) fn subscribe_behavior_passive<T>(&self, id: &BehaviorId<T>) -> BehaviorStream<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        self.observe_behavior_subject::<T>(id.erased())
            .behavior_stream(false, None)
    }

    pub(crate) fn subscribe_event_counting<T>(
        &self,
        id: &EventId<T>,
        ancestry: Arc<HashSet<u64>>,
    ) -> EventStream<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.observe_event_subject::<T>(id.erased())
            .event_stream(true, Some(&ancestry))
    }

    pub(crate) fn subscribe_event_passive<T>(&self, id: &EventId<T>) -> EventStream<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.observe_event_subject::<T>(id.erased())
            .event_stream(false, None)
    }

    // ─── Dispatch ────────────────────────────────────────────────────────────

    /// Dispatch a value to an event channel.
    ///
    /// The returned future is lazy: the send is enqueued on first poll and
    /// the future resolves once all synchronous receivers (reducers, channel
    /// fan-out) have handled the value.
    pub fn dispatch<T>(
        &self,
        id: &EventId<T>,
        value: T,
    ) -> impl Future<Output = Result<(), StoreError>> + Send + 'static
    where
        T: Clone + Send + Sync + 'static,
    {
        let store = self.clone();
        let id = id.clone();
        async move { store.dispatch_all(vec![TypedEvent::new(&id, value)]).await }
    }

    /// Dispatch a batch of typed events atomically: every emission of the
    /// batch is delivered before any other queued dispatch is observed.
    pub fn dispatch_all(
        &self,
        events: Vec<TypedEvent>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send + 'static {
        let store = self.clone();
        async move {
            if events.is_empty() {
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            let delivery_store = store.clone();
            store.inner.queue.enqueue(Box::new(move || {
                let mut result = Ok(());
                for event in events {
                    let target = event.target().clone();
                    if let Err(err) = event.deliver(&delivery_store) {
                        tracing::warn!(signal = %target, error = %err, "event delivery failed");
                        if result.is_ok() {
                            result = Err(err);
                        }
                    }
                }
                let _ = tx.send(result);
            }));
            match rx.await {
                Ok(result) => result,
                Err(_) => {
                    // A receiver panicked mid-drain; the queue survives and
                    // the event was discarded.
                    tracing::warn!("dispatch completion dropped during delivery");
                    Ok(())
                }
            }
        }
    }

    pub(crate) fn deliver_event<T>(&self, id: &EventId<T>, value: T) -> Result<(), StoreError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let owner = self.resolve_store_for(id.erased().index());
        let reducers: Vec<ReducerFn> = {
            let map = owner.inner.reducers.lock();
            map.get(&id.erased().index())
                .map(|m| m.values().cloned().collect())
                .unwrap_or_default()
        };
        for reducer in &reducers {
            reducer(&value);
        }
        owner.observe_event_subject::<T>(id.erased()).next(value);
        Ok(())
    }

    // ─── Typed-event multiplexing ────────────────────────────────────────────

    /// Register a multiplexed source emitting batches of [`TypedEvent`]s for
    /// the given target event ids.
    ///
    /// Each batch is delivered atomically through the dispatch queue. When a
    /// batch contains `termination_id`, the following batch is deferred by a
    /// fresh queue tick, so downstream samplers observe the settled state
    /// between logical cycles.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::InvalidConfig`] when `targets` is empty or
    /// contains a non-event id.
    pub fn add_typed_event_source<F, S>(
        &self,
        targets: Vec<SignalId>,
        termination_id: Option<SignalId>,
        build: F,
    ) -> Result<SourceName, StoreError>
    where
        F: Fn(&SourceContext) -> S + Send + Sync + 'static,
        S: Stream<Item = Vec<TypedEvent>> + Send + 'static,
    {
        if targets.is_empty() {
            return Err(StoreError::InvalidConfig {
                message: "typed event source needs at least one target".into(),
            });
        }
        if let Some(bad) = targets.iter().find(|t| !t.is_event_id()) {
            return Err(StoreError::InvalidConfig {
                message: format!("typed event source target {bad} is not an event id"),
            });
        }
        let name = SourceName::generated("typed-source");
        let store = self.clone();
        let queue = self.inner.queue.clone();
        let handle = tokio::spawn(async move {
            let ctx = SourceContext::new(store.clone(), Arc::new(HashSet::new()));
            let mut stream = Box::pin(build(&ctx));
            while let Some(batch) = stream.next().await {
                let terminal = termination_id
                    .as_ref()
                    .is_some_and(|t| batch.iter().any(|e| e.target() == t));
                if let Err(err) = store.dispatch_all(batch).await {
                    tracing::warn!(error = %err, "typed event batch delivery failed");
                }
                if terminal {
                    queue.tick().await;
                }
            }
        });
        self.inner.multiplexers.lock().insert(
            name.clone(),
            MultiplexEntry {
                handle,
                targets,
            },
        );
        Ok(name)
    }

    // ─── Effects ─────────────────────────────────────────────────────────────

    /// Register (or replace) the effect behind `id`.
    pub fn add_effect<I, R, E>(&self, id: &EffectId<I, R, E>, effect: impl Effect<I, R, E>)
    where
        I: 'static,
        R: 'static,
        E: 'static,
    {
        self.add_effect_arc(id, Arc::new(effect));
    }

    /// Register an already-shared effect behind `id`.
    pub fn add_effect_arc<I, R, E>(&self, id: &EffectId<I, R, E>, effect: Arc<dyn Effect<I, R, E>>)
    where
        I: 'static,
        R: 'static,
        E: 'static,
    {
        let mut effects = self.inner.effects.lock();
        let slot = effects.entry(id.erased().index()).or_default();
        slot.value = Some(Arc::new(effect));
        slot.notify.notify_waiters();
        tracing::debug!(signal = %id.erased(), "effect registered");
    }

    /// The effect registered behind `id`, resolved through the store
    /// hierarchy.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::UnknownEffect`] when nothing is registered.
    pub fn get_effect<I, R, E>(
        &self,
        id: &EffectId<I, R, E>,
    ) -> Result<Arc<dyn Effect<I, R, E>>, StoreError>
    where
        I: 'static,
        R: 'static,
        E: 'static,
    {
        let mut cursor = Some(self.clone());
        while let Some(store) = cursor {
            {
                let effects = store.inner.effects.lock();
                if let Some(slot) = effects.get(&id.erased().index()) {
                    if let Some(value) = &slot.value {
                        return value
                            .downcast_ref::<Arc<dyn Effect<I, R, E>>>()
                            .cloned()
                            .ok_or_else(|| StoreError::TypeMismatch {
                                id: id.erased().clone(),
                                expected: "registered effect type",
                            });
                    }
                }
            }
            cursor = store.inner.parent.clone();
        }
        Err(StoreError::UnknownEffect {
            id: id.erased().clone(),
        })
    }

    /// Resolve the effect behind `id`, waiting until one is registered.
    ///
    /// This makes wiring order and registration order independent: machinery
    /// can look effects up at invocation time even when `add_effect` runs
    /// later in setup.
    pub async fn effect_handle<I, R, E>(&self, id: &EffectId<I, R, E>) -> Arc<dyn Effect<I, R, E>>
    where
        I: 'static,
        R: 'static,
        E: 'static,
    {
        loop {
            let notify = {
                let mut effects = self.inner.effects.lock();
                Arc::clone(&effects.entry(id.erased().index()).or_default().notify)
            };
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Ok(effect) = self.get_effect(id) {
                return effect;
            }
            notified.as_mut().await;
        }
    }

    /// Copy the effect registered behind `from` to `to`, as soon as it is
    /// available. Completes asynchronously.
    pub fn copy_effect<I, R, E>(&self, from: &EffectId<I, R, E>, to: &EffectId<I, R, E>)
    where
        I: 'static,
        R: 'static,
        E: 'static,
    {
        let store = self.clone();
        let from = from.clone();
        let to = to.clone();
        tokio::spawn(async move {
            let effect = store.effect_handle(&from).await;
            store.add_effect_arc(&to, effect);
        });
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Complete every signal owned by this store.
    ///
    /// Source maps are cleared before completion so reference cycles between
    /// subjects are broken; pins, reducers, multiplexers and effects are
    /// dropped as well. Signals owned by parent or child stores are
    /// untouched.
    pub fn complete_all_signals(&self) {
        let controls: Vec<Arc<dyn SubjectControl>> = self
            .inner
            .entries
            .lock()
            .values()
            .map(|entry| Arc::clone(&entry.control))
            .collect();
        for control in &controls {
            control.clear_sources();
        }
        for control in &controls {
            control.complete();
        }
        self.inner.pins.lock().clear();
        self.inner.reducers.lock().clear();
        for (_, entry) in self.inner.multiplexers.lock().drain() {
            entry.handle.abort();
        }
        self.inner.effects.lock().clear();
        tracing::debug!(store = ?self.inner.config.name, "all signals completed");
    }

    /// Complete one behavior: subscribers see end-of-stream, sources are
    /// dropped, and the id no longer accepts registrations.
    pub fn complete_behavior(&self, id: &SignalId) {
        let owner = self.resolve_store_for(id.index());
        let control = {
            let entries = owner.inner.entries.lock();
            entries.get(&id.index()).map(|e| Arc::clone(&e.control))
        };
        if let Some(control) = control {
            control.complete();
        }
    }

    /// Drop every source of a behavior, keeping the channel and cached value
    /// alive. Reducers feeding the behavior are detached as well.
    pub fn remove_behavior_sources(&self, id: &SignalId) {
        let owner = self.resolve_store_for(id.index());
        let control = {
            let entries = owner.inner.entries.lock();
            entries.get(&id.index()).map(|e| Arc::clone(&e.control))
        };
        if let Some(control) = control {
            control.clear_sources();
        }
        let mut reducers = owner.inner.reducers.lock();
        for for_event in reducers.values_mut() {
            for_event.shift_remove(&id.index());
        }
    }

    /// Reset every behavior owned by this store to its registered initial
    /// value, rebuilding active sources.
    pub fn reset_behaviors(&self) {
        let controls: Vec<Arc<dyn SubjectControl>> = self
            .inner
            .entries
            .lock()
            .values()
            .filter(|entry| entry.control.erased_id().is_behavior_id())
            .map(|entry| Arc::clone(&entry.control))
            .collect();
        for control in controls {
            control.reset();
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.inner.config.name)
            .field("entries", &self.inner.entries.lock().len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder plumbing
// ─────────────────────────────────────────────────────────────────────────────

fn boxed_builder<T, F, S>(build: F) -> SourceBuilder<T>
where
    T: Send + 'static,
    F: Fn(&SourceContext) -> S + Send + Sync + 'static,
    S: Stream<Item = T> + Send + 'static,
{
    Arc::new(move |ctx: &SourceContext| build(ctx).boxed())
}

/// Event sources route their values through dispatch instead of feeding the
/// channel directly, so reducers observe sourced events exactly like
/// dispatched ones and cyclic re-entry stays on the queue.
fn dispatching_builder<T, F, S>(id: EventId<T>, build: F) -> SourceBuilder<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&SourceContext) -> S + Send + Sync + 'static,
    S: Stream<Item = T> + Send + 'static,
{
    Arc::new(move |ctx: &SourceContext| {
        let store = ctx.store().clone();
        let id = id.clone();
        build(ctx)
            .then(move |value| {
                let store = store.clone();
                let id = id.clone();
                async move {
                    if let Err(err) = store.dispatch(&id, value).await {
                        tracing::warn!(signal = %id.erased(), error = %err, "event source dispatch failed");
                    }
                }
            })
            .filter_map(|()| futures::future::ready(None::<T>))
            .boxed()
    })
}
