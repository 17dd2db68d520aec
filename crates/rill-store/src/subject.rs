//! Controlled Subjects
//!
//! A controlled subject is the per-signal multiplexer: it owns the broadcast
//! channel all sources feed into, the replay slot (behavior variant only),
//! the lazy and stateful source registries, the running pump tasks, and the
//! counting-subscriber refcount.
//!
//! Lifecycle rules:
//! - the first counting subscriber activates every lazy source (a pump task
//!   per source, built fresh from its builder);
//! - the last counting unsubscribe aborts the lazy pumps; stateful pumps run
//!   from registration until removal or completion;
//! - a pump whose upstream stream terminates is retired without propagating
//!   any terminal signal - the channel stays live and the source is rebuilt
//!   on the next activation, so later subscribers are never poisoned;
//! - behavior subjects skip emissions equal to the cached value, so replay
//!   plus source rebuild never double-delivers.
//!
//! Activation carries an ancestry set (the chain of subjects being activated)
//! so that source builders subscribing an ancestor get a passive subscription:
//! the cyclic-context guard of the kernel.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::StreamExt;
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use rill_core::{MaybeValue, SignalId, StoreError};

use crate::source::{extend_ancestry, Source, SourceBuilder, SourceContext, SourceKind, SourceName};
use crate::store::WeakStore;
use crate::stream::{BehaviorStream, EventStream, SubscriptionGuard};

pub(crate) type EqFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Subject handle
// ─────────────────────────────────────────────────────────────────────────────

/// Cheaply cloneable handle to a controlled subject.
pub(crate) struct Subject<T> {
    shared: Arc<SubjectShared<T>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

pub(crate) struct SubjectShared<T> {
    id: SignalId,
    behavior: bool,
    eq: Option<EqFn<T>>,
    store: WeakStore,
    state: Mutex<SubjectState<T>>,
}

struct SubjectState<T> {
    sender: Option<broadcast::Sender<T>>,
    current: MaybeValue<T>,
    initial: MaybeValue<T>,
    lazy: IndexMap<SourceName, Source<T>>,
    stateful: IndexMap<SourceName, Source<T>>,
    /// Inert registrations (state folds, typed-event multiplexers) that count
    /// as sources and participate in duplicate detection but have no pump.
    external: IndexSet<SourceName>,
    pumps: HashMap<SourceName, JoinHandle<()>>,
    subscribers: usize,
    /// Activation ancestry of the first counting subscriber, kept while the
    /// subject is subscribed so that late-added lazy sources activate with
    /// the same context.
    ancestry: Option<Arc<HashSet<u64>>>,
    completed: bool,
}

impl<T: Clone + Send + Sync + 'static> Subject<T> {
    pub(crate) fn new_behavior(
        id: SignalId,
        capacity: usize,
        store: WeakStore,
        eq: EqFn<T>,
    ) -> Self {
        Self::new(id, capacity, store, true, Some(eq))
    }

    pub(crate) fn new_event(id: SignalId, capacity: usize, store: WeakStore) -> Self {
        Self::new(id, capacity, store, false, None)
    }

    fn new(
        id: SignalId,
        capacity: usize,
        store: WeakStore,
        behavior: bool,
        eq: Option<EqFn<T>>,
    ) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            shared: Arc::new(SubjectShared {
                id,
                behavior,
                eq,
                store,
                state: Mutex::new(SubjectState {
                    sender: Some(sender),
                    current: MaybeValue::NoValue,
                    initial: MaybeValue::NoValue,
                    lazy: IndexMap::new(),
                    stateful: IndexMap::new(),
                    external: IndexSet::new(),
                    pumps: HashMap::new(),
                    subscribers: 0,
                    ancestry: None,
                    completed: false,
                }),
            }),
        }
    }

    pub(crate) fn id(&self) -> &SignalId {
        &self.shared.id
    }

    // ─── Subscription ────────────────────────────────────────────────────────

    /// Take a subscription.
    ///
    /// Counting subscriptions increment the refcount and activate lazy
    /// sources on the 0→1 transition; passive ones (cyclic-context guard)
    /// only attach a receiver. Behavior subjects snapshot the replay value
    /// under the same lock that guards emission, so a subscriber sees at most
    /// one replay value and never misses the update racing its attach.
    fn subscribe(
        &self,
        counting: bool,
        ancestry: Option<&Arc<HashSet<u64>>>,
    ) -> (Option<T>, broadcast::Receiver<T>, SubscriptionGuard) {
        let mut st = self.shared.state.lock();
        let receiver = match &st.sender {
            Some(sender) => sender.subscribe(),
            None => closed_receiver(),
        };
        let replay = if self.shared.behavior {
            match &st.current {
                MaybeValue::Value(v) => Some(v.clone()),
                MaybeValue::NoValue => None,
            }
        } else {
            None
        };
        let guard = if counting {
            st.subscribers += 1;
            if st.subscribers == 1 && !st.completed {
                let anc = extend_ancestry(ancestry, self.shared.id.index());
                st.ancestry = Some(Arc::clone(&anc));
                self.activate_locked(&mut st, &anc);
            }
            let shared = Arc::clone(&self.shared);
            SubscriptionGuard::counting(move || shared.release())
        } else {
            SubscriptionGuard::passive()
        };
        (replay, receiver, guard)
    }

    pub(crate) fn behavior_stream(
        &self,
        counting: bool,
        ancestry: Option<&Arc<HashSet<u64>>>,
    ) -> BehaviorStream<T> {
        let (replay, receiver, guard) = self.subscribe(counting, ancestry);
        BehaviorStream::new(self.shared.id.clone(), replay, receiver, guard)
    }

    pub(crate) fn event_stream(
        &self,
        counting: bool,
        ancestry: Option<&Arc<HashSet<u64>>>,
    ) -> EventStream<T> {
        let (_, receiver, guard) = self.subscribe(counting, ancestry);
        EventStream::new(self.shared.id.clone(), receiver, guard)
    }

    // ─── Sources ─────────────────────────────────────────────────────────────

    /// Register a source.
    ///
    /// Stateful sources start pumping immediately; lazy sources start only
    /// while the subject has counting subscribers. An initial value seeds the
    /// replay slot (and is emitted) if nothing was cached yet.
    pub(crate) fn add_source(&self, source: Source<T>) -> Result<(), StoreError> {
        let mut st = self.shared.state.lock();
        if st.completed {
            return Err(StoreError::SubjectCompleted {
                id: self.shared.id.clone(),
            });
        }
        self.check_duplicate_locked(&st, &source.name)?;
        if let Some(initial) = &source.initial {
            if st.current.is_no_value() {
                self.shared.next_locked(&mut st, initial.clone());
            }
        }
        let name = source.name.clone();
        let build = Arc::clone(&source.build);
        match source.kind {
            SourceKind::Stateful => {
                st.stateful.insert(name.clone(), source);
                let anc = extend_ancestry(None, self.shared.id.index());
                self.spawn_pump(&mut st, name, build, anc);
            }
            SourceKind::Lazy => {
                st.lazy.insert(name.clone(), source);
                if st.subscribers > 0 {
                    let anc = st
                        .ancestry
                        .clone()
                        .unwrap_or_else(|| extend_ancestry(None, self.shared.id.index()));
                    self.spawn_pump(&mut st, name, build, anc);
                }
            }
        }
        Ok(())
    }

    /// Register an inert named source (state fold, multiplexer target).
    pub(crate) fn note_external_source(&self, name: &SourceName) -> Result<(), StoreError> {
        let mut st = self.shared.state.lock();
        if st.completed {
            return Err(StoreError::SubjectCompleted {
                id: self.shared.id.clone(),
            });
        }
        self.check_duplicate_locked(&st, name)?;
        st.external.insert(name.clone());
        Ok(())
    }

    pub(crate) fn remove_source(&self, name: &SourceName) -> Result<(), StoreError> {
        let mut st = self.shared.state.lock();
        if st.lazy.shift_remove(name).is_some() || st.stateful.shift_remove(name).is_some() {
            if let Some(pump) = st.pumps.remove(name) {
                pump.abort();
            }
            return Ok(());
        }
        if st.external.shift_remove(name) {
            return Ok(());
        }
        Err(StoreError::MissingSource {
            id: self.shared.id.clone(),
            name: name.as_str().to_owned(),
        })
    }

    fn check_duplicate_locked(
        &self,
        st: &SubjectState<T>,
        name: &SourceName,
    ) -> Result<(), StoreError> {
        if st.lazy.contains_key(name) || st.stateful.contains_key(name) || st.external.contains(name)
        {
            return Err(StoreError::DuplicateSource {
                id: self.shared.id.clone(),
                name: name.as_str().to_owned(),
            });
        }
        Ok(())
    }

    fn activate_locked(&self, st: &mut SubjectState<T>, ancestry: &Arc<HashSet<u64>>) {
        let pending: Vec<(SourceName, SourceBuilder<T>)> = st
            .lazy
            .iter()
            .filter(|(name, _)| !st.pumps.contains_key(*name))
            .map(|(name, source)| (name.clone(), Arc::clone(&source.build)))
            .collect();
        for (name, build) in pending {
            self.spawn_pump(st, name, build, Arc::clone(ancestry));
        }
    }

    fn spawn_pump(
        &self,
        st: &mut SubjectState<T>,
        name: SourceName,
        build: SourceBuilder<T>,
        ancestry: Arc<HashSet<u64>>,
    ) {
        let Some(store) = self.shared.store.upgrade() else {
            return;
        };
        let shared = Arc::clone(&self.shared);
        let pump_name = name.clone();
        let handle = tokio::spawn(async move {
            let ctx = SourceContext::new(store, ancestry);
            let mut stream = (build)(&ctx);
            while let Some(value) = stream.next().await {
                shared.next(value);
            }
            tracing::debug!(
                signal = %shared.id,
                source = %pump_name,
                "source stream terminated; retiring pump"
            );
            shared.state.lock().pumps.remove(&pump_name);
        });
        st.pumps.insert(name, handle);
    }

    // ─── Values ──────────────────────────────────────────────────────────────

    /// Feed a value into the subject.
    pub(crate) fn next(&self, value: T) {
        self.shared.next(value);
    }

    /// Fold the cached value through `f` and emit the result.
    ///
    /// A state that was never seeded cannot be reduced; the event is dropped
    /// with a warning.
    pub(crate) fn reduce(&self, f: impl FnOnce(&T) -> T) {
        let mut st = self.shared.state.lock();
        match &st.current {
            MaybeValue::Value(current) => {
                let next = f(current);
                self.shared.next_locked(&mut st, next);
            }
            MaybeValue::NoValue => {
                tracing::warn!(signal = %self.shared.id, "reducer fired on unseeded state; event dropped");
            }
        }
    }

    /// Seed the replay slot if nothing was cached yet.
    pub(crate) fn seed(&self, value: T) {
        let mut st = self.shared.state.lock();
        if st.current.is_no_value() {
            self.shared.next_locked(&mut st, value);
        }
    }

    pub(crate) fn current(&self) -> MaybeValue<T> {
        self.shared.state.lock().current.clone()
    }

    pub(crate) fn set_initial(&self, initial: MaybeValue<T>) {
        self.shared.state.lock().initial = initial;
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    pub(crate) fn complete(&self) {
        let mut st = self.shared.state.lock();
        st.completed = true;
        st.sender = None;
        st.ancestry = None;
        for (_, pump) in st.pumps.drain() {
            pump.abort();
        }
        st.lazy.clear();
        st.stateful.clear();
        st.external.clear();
    }

    /// Abort pumps and drop every source registration, keeping the channel
    /// alive. Run before release on teardown so cyclic source graphs cannot
    /// keep each other alive.
    pub(crate) fn clear_sources(&self) {
        let mut st = self.shared.state.lock();
        for (_, pump) in st.pumps.drain() {
            pump.abort();
        }
        st.lazy.clear();
        st.stateful.clear();
        st.external.clear();
    }

    /// Reset the replay slot to the registered initial value and rebuild
    /// every running pump from its builder.
    pub(crate) fn reset(&self) {
        let mut st = self.shared.state.lock();
        if st.completed {
            return;
        }
        for (_, pump) in st.pumps.drain() {
            pump.abort();
        }
        st.current = MaybeValue::NoValue;
        if let MaybeValue::Value(initial) = st.initial.clone() {
            self.shared.next_locked(&mut st, initial);
        }
        let stateful: Vec<(SourceName, SourceBuilder<T>)> = st
            .stateful
            .iter()
            .map(|(name, source)| (name.clone(), Arc::clone(&source.build)))
            .collect();
        for (name, build) in stateful {
            let anc = extend_ancestry(None, self.shared.id.index());
            self.spawn_pump(&mut st, name, build, anc);
        }
        if st.subscribers > 0 {
            let anc = st
                .ancestry
                .clone()
                .unwrap_or_else(|| extend_ancestry(None, self.shared.id.index()));
            self.activate_locked(&mut st, &anc);
        }
    }

    pub(crate) fn is_subscribed(&self) -> bool {
        self.shared.state.lock().subscribers > 0
    }

    pub(crate) fn source_count(&self) -> usize {
        let st = self.shared.state.lock();
        st.lazy.len() + st.stateful.len() + st.external.len()
    }
}

impl<T: Clone + Send + Sync + 'static> SubjectShared<T> {
    fn next(&self, value: T) {
        let mut st = self.state.lock();
        self.next_locked(&mut st, value);
    }

    fn next_locked(&self, st: &mut SubjectState<T>, value: T) {
        if st.completed {
            return;
        }
        if self.behavior {
            if let (Some(eq), MaybeValue::Value(current)) = (&self.eq, &st.current) {
                if eq(current, &value) {
                    return;
                }
            }
            st.current = MaybeValue::Value(value.clone());
        }
        if let Some(sender) = &st.sender {
            // No receivers is fine; behaviors keep the value cached anyway.
            let _ = sender.send(value);
        }
    }

    fn release(&self) {
        let mut st = self.state.lock();
        st.subscribers = st.subscribers.saturating_sub(1);
        if st.subscribers == 0 {
            st.ancestry = None;
            // Derived replay caches reset with their subscription; root
            // states, and derived behaviors held live by a stateful source,
            // keep their value across teardown.
            if self.id.is_derived_id() && !st.completed && st.stateful.is_empty() {
                st.current = st.initial.clone();
            }
            let lazy_names: Vec<SourceName> = st.lazy.keys().cloned().collect();
            for name in lazy_names {
                if let Some(pump) = st.pumps.remove(&name) {
                    pump.abort();
                }
            }
        }
    }
}

fn closed_receiver<T: Clone + Send + 'static>() -> broadcast::Receiver<T> {
    let (sender, receiver) = broadcast::channel(1);
    drop(sender);
    receiver
}

// ─────────────────────────────────────────────────────────────────────────────
// Erased control surface
// ─────────────────────────────────────────────────────────────────────────────

/// Type-erased subject operations used by store lifecycle code.
pub(crate) trait SubjectControl: Send + Sync {
    fn erased_id(&self) -> &SignalId;
    fn complete(&self);
    fn reset(&self);
    fn clear_sources(&self);
    fn source_count(&self) -> usize;
    fn is_subscribed(&self) -> bool;
    fn try_remove_source(&self, name: &SourceName) -> Result<(), StoreError>;
}

impl<T: Clone + Send + Sync + 'static> SubjectControl for Subject<T> {
    fn erased_id(&self) -> &SignalId {
        self.id()
    }

    fn complete(&self) {
        Subject::complete(self);
    }

    fn reset(&self) {
        Subject::reset(self);
    }

    fn clear_sources(&self) {
        Subject::clear_sources(self);
    }

    fn source_count(&self) -> usize {
        Subject::source_count(self)
    }

    fn is_subscribed(&self) -> bool {
        Subject::is_subscribed(self)
    }

    fn try_remove_source(&self, name: &SourceName) -> Result<(), StoreError> {
        self.remove_source(name)
    }
}
