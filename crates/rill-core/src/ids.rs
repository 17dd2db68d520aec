//! Signal Identifier Namespace
//!
//! Identifiers are opaque, process-unique keys into the store. Each carries a
//! kind tag (root state, derived state, event, effect) and a phantom type so
//! that registration and observation stay type-safe without runtime type tags.
//!
//! Identity is by allocation: every identifier minted by a constructor is
//! distinct from every other, and equality/hashing use only the allocation
//! index. The optional name exists for debugging and tracing output only.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ─────────────────────────────────────────────────────────────────────────────
// Erased identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// Kind tag discriminating the four identifier families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// A stateful behavior backed by reducers over events.
    RootState,
    /// A behavior derived from other signals via a stream source.
    DerivedState,
    /// A transient, non-caching event channel.
    Event,
    /// A registered asynchronous effect.
    Effect,
}

/// A process-unique, kind-tagged signal identifier.
///
/// `SignalId` is the erased form shared by all typed identifier wrappers.
/// Equality and hashing use the allocation index only, so two ids are equal
/// exactly when they originate from the same constructor call.
#[derive(Clone)]
pub struct SignalId {
    index: u64,
    kind: SignalKind,
    name: Option<Arc<str>>,
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

impl SignalId {
    fn fresh(kind: SignalKind, name: Option<&str>) -> Self {
        let index = ID_COUNTER.fetch_add(1, Ordering::SeqCst);
        Self {
            index,
            kind,
            name: name.map(Arc::from),
        }
    }

    /// The process-unique allocation index.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// The kind tag of this identifier.
    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    /// The debug name, if one was given at construction.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// True for identifiers minted via [`StateId`].
    pub fn is_root_state_id(&self) -> bool {
        self.kind == SignalKind::RootState
    }

    /// True for identifiers minted via [`DerivedId`].
    pub fn is_derived_id(&self) -> bool {
        self.kind == SignalKind::DerivedState
    }

    /// True for root-state and derived-state identifiers.
    pub fn is_behavior_id(&self) -> bool {
        matches!(self.kind, SignalKind::RootState | SignalKind::DerivedState)
    }

    /// True for identifiers minted via [`EventId`].
    pub fn is_event_id(&self) -> bool {
        self.kind == SignalKind::Event
    }

    /// True for identifiers minted via [`EffectId`].
    pub fn is_effect_id(&self) -> bool {
        self.kind == SignalKind::Effect
    }
}

impl PartialEq for SignalId {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for SignalId {}

impl Hash for SignalId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl fmt::Debug for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{:?}({name}#{})", self.kind, self.index),
            None => write!(f, "{:?}(#{})", self.kind, self.index),
        }
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}#{}", self.index),
            None => write!(f, "#{}", self.index),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Typed identifier wrappers
// ─────────────────────────────────────────────────────────────────────────────

macro_rules! typed_id {
    ($(#[$doc:meta])* $name:ident, $kind:expr) => {
        $(#[$doc])*
        pub struct $name<T> {
            id: SignalId,
            _marker: PhantomData<fn() -> T>,
        }

        impl<T> $name<T> {
            /// Mint a fresh, anonymous identifier.
            pub fn new() -> Self {
                Self {
                    id: SignalId::fresh($kind, None),
                    _marker: PhantomData,
                }
            }

            /// Mint a fresh identifier carrying a debug name.
            pub fn named(name: &str) -> Self {
                Self {
                    id: SignalId::fresh($kind, Some(name)),
                    _marker: PhantomData,
                }
            }

            /// The erased identifier.
            pub fn erased(&self) -> &SignalId {
                &self.id
            }
        }

        impl<T> Default for $name<T> {
            fn default() -> Self {
                Self::new()
            }
        }

        impl<T> Clone for $name<T> {
            fn clone(&self) -> Self {
                Self {
                    id: self.id.clone(),
                    _marker: PhantomData,
                }
            }
        }

        impl<T> PartialEq for $name<T> {
            fn eq(&self, other: &Self) -> bool {
                self.id == other.id
            }
        }

        impl<T> Eq for $name<T> {}

        impl<T> Hash for $name<T> {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.id.hash(state);
            }
        }

        impl<T> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:?}", self.id)
            }
        }

        impl<T> fmt::Display for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.id)
            }
        }
    };
}

typed_id!(
    /// Identifier of a stateful root behavior (reducer-backed).
    StateId,
    SignalKind::RootState
);

typed_id!(
    /// Identifier of a derived behavior (stream-sourced).
    DerivedId,
    SignalKind::DerivedState
);

typed_id!(
    /// Identifier of a transient event channel.
    EventId,
    SignalKind::Event
);

/// Identifier of any behavior - root state or derived state.
///
/// `BehaviorId` cannot be minted directly; it is obtained by converting a
/// [`StateId`] or [`DerivedId`], so its kind tag is always one of the two
/// behavior kinds.
pub struct BehaviorId<T> {
    id: SignalId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> BehaviorId<T> {
    /// The erased identifier.
    pub fn erased(&self) -> &SignalId {
        &self.id
    }
}

impl<T> From<StateId<T>> for BehaviorId<T> {
    fn from(id: StateId<T>) -> Self {
        Self {
            id: id.id,
            _marker: PhantomData,
        }
    }
}

impl<T> From<DerivedId<T>> for BehaviorId<T> {
    fn from(id: DerivedId<T>) -> Self {
        Self {
            id: id.id,
            _marker: PhantomData,
        }
    }
}

impl<T> From<&StateId<T>> for BehaviorId<T> {
    fn from(id: &StateId<T>) -> Self {
        id.clone().into()
    }
}

impl<T> From<&DerivedId<T>> for BehaviorId<T> {
    fn from(id: &DerivedId<T>) -> Self {
        id.clone().into()
    }
}

impl<T> Clone for BehaviorId<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for BehaviorId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for BehaviorId<T> {}

impl<T> Hash for BehaviorId<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for BehaviorId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.id)
    }
}

impl<T> fmt::Display for BehaviorId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Identifier of a registered effect taking inputs `I` and producing results
/// `R` or errors `E`.
pub struct EffectId<I, R, E> {
    id: SignalId,
    _marker: PhantomData<fn(I) -> (R, E)>,
}

impl<I, R, E> EffectId<I, R, E> {
    /// Mint a fresh, anonymous effect identifier.
    pub fn new() -> Self {
        Self {
            id: SignalId::fresh(SignalKind::Effect, None),
            _marker: PhantomData,
        }
    }

    /// Mint a fresh effect identifier carrying a debug name.
    pub fn named(name: &str) -> Self {
        Self {
            id: SignalId::fresh(SignalKind::Effect, Some(name)),
            _marker: PhantomData,
        }
    }

    /// The erased identifier.
    pub fn erased(&self) -> &SignalId {
        &self.id
    }
}

impl<I, R, E> Default for EffectId<I, R, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, R, E> Clone for EffectId<I, R, E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            _marker: PhantomData,
        }
    }
}

impl<I, R, E> PartialEq for EffectId<I, R, E> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<I, R, E> Eq for EffectId<I, R, E> {}

impl<I, R, E> Hash for EffectId<I, R, E> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<I, R, E> fmt::Debug for EffectId<I, R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
