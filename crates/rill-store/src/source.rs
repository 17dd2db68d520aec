//! Sources
//!
//! A source is a named producer of values for one signal: a stream builder
//! plus its laziness and an optional initial value. Builders are invoked on
//! every activation, so a retired or torn-down source is rebuilt from scratch
//! the next time the owning signal gains subscribers - the stream itself is
//! cold construction, never a shared hot reference.
//!
//! [`SourceContext`] is what builders receive. It wraps the owning store
//! together with the activation ancestry used by the cyclic-context guard:
//! subscribing an ancestor signal from inside a builder yields a passive
//! subscription that neither counts nor re-activates, which is what lets
//! teardown cascade through cyclic behavior graphs.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rill_core::{BehaviorId, EventId};

use crate::store::Store;
use crate::stream::{BehaviorStream, EventStream};

/// An erased, boxed stream of values.
pub type BoxedStream<T> = futures::stream::BoxStream<'static, T>;

/// A stream builder invoked on every activation of its source.
pub type SourceBuilder<T> = Arc<dyn Fn(&SourceContext) -> BoxedStream<T> + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Source naming
// ─────────────────────────────────────────────────────────────────────────────

/// Name disambiguating multiple concurrent sources under the same signal.
///
/// At most one source may exist per (signal, name) pair.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SourceName(Arc<str>);

static SOURCE_COUNTER: AtomicU64 = AtomicU64::new(0);

impl SourceName {
    /// A caller-chosen name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// A process-unique generated name.
    pub fn generated(prefix: &str) -> Self {
        let n = SOURCE_COUNTER.fetch_add(1, Ordering::SeqCst);
        Self(Arc::from(format!("{prefix}-{n}").as_str()))
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Source descriptor
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum SourceKind {
    /// Subscribed only while the owning signal has counting subscribers.
    Lazy,
    /// Subscribed from registration until removal or completion.
    Stateful,
}

pub(crate) struct Source<T> {
    pub(crate) name: SourceName,
    pub(crate) kind: SourceKind,
    pub(crate) initial: Option<T>,
    pub(crate) build: SourceBuilder<T>,
}

impl<T> Source<T> {
    pub(crate) fn new(
        name: SourceName,
        kind: SourceKind,
        initial: Option<T>,
        build: SourceBuilder<T>,
    ) -> Self {
        Self {
            name,
            kind,
            initial,
            build,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Source context
// ─────────────────────────────────────────────────────────────────────────────

/// The environment handed to source builders: the owning store plus the
/// activation ancestry for the cyclic-context guard.
#[derive(Clone)]
pub struct SourceContext {
    store: Store,
    ancestry: Arc<HashSet<u64>>,
}

impl SourceContext {
    pub(crate) fn new(store: Store, ancestry: Arc<HashSet<u64>>) -> Self {
        Self { store, ancestry }
    }

    /// The store this source feeds into.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Subscribe a behavior from inside a source.
    ///
    /// Subscribing an activation ancestor yields a passive subscription:
    /// replay and live values are delivered, but the refcount is untouched
    /// and no further activation is triggered, so cyclic graphs neither
    /// re-enter their own teardown nor keep themselves alive.
    pub fn get_behavior<T>(&self, id: impl Into<BehaviorId<T>>) -> BehaviorStream<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        let id = id.into();
        if self.ancestry.contains(&id.erased().index()) {
            self.store.subscribe_behavior_passive(&id)
        } else {
            self.store
                .subscribe_behavior_counting(&id, Arc::clone(&self.ancestry))
        }
    }

    /// Subscribe an event channel from inside a source.
    pub fn get_event_stream<T>(&self, id: &EventId<T>) -> EventStream<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        if self.ancestry.contains(&id.erased().index()) {
            self.store.subscribe_event_passive(id)
        } else {
            self.store
                .subscribe_event_counting(id, Arc::clone(&self.ancestry))
        }
    }

    pub(crate) fn ancestry(&self) -> &Arc<HashSet<u64>> {
        &self.ancestry
    }
}

pub(crate) fn extend_ancestry(ancestry: Option<&Arc<HashSet<u64>>>, index: u64) -> Arc<HashSet<u64>> {
    let mut set: HashSet<u64> = ancestry.map(|a| (**a).clone()).unwrap_or_default();
    set.insert(index);
    Arc::new(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_names_are_unique() {
        let a = SourceName::generated("connect");
        let b = SourceName::generated("connect");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("connect-"));
    }

    #[test]
    fn test_extend_ancestry_accumulates() {
        let base = extend_ancestry(None, 1);
        assert!(base.contains(&1));
        let child = extend_ancestry(Some(&base), 2);
        assert!(child.contains(&1));
        assert!(child.contains(&2));
        // The parent set is untouched.
        assert!(!base.contains(&2));
    }
}
