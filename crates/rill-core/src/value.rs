//! Value Sentinels
//!
//! [`MaybeValue`] represents "no value yet" without conflating the sentinel
//! with legitimate domain values: a behavior of `Option<T>` can still
//! distinguish a cached `None` from never having received anything.
//!
//! [`InvalidationToken`] is a freshly-allocated, identity-compared value used
//! to force staleness of a prior computation result.

use std::sync::atomic::{AtomicU64, Ordering};

// ─────────────────────────────────────────────────────────────────────────────
// MaybeValue
// ─────────────────────────────────────────────────────────────────────────────

/// A value that may not have been produced yet.
///
/// This is deliberately distinct from [`Option`]: `MaybeValue<Option<T>>`
/// keeps "never emitted" and "emitted `None`" apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaybeValue<T> {
    /// No value has been produced.
    NoValue,
    /// A produced value.
    Value(T),
}

impl<T> MaybeValue<T> {
    /// True if a value is present.
    pub fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    /// True if no value is present.
    pub fn is_no_value(&self) -> bool {
        matches!(self, Self::NoValue)
    }

    /// The contained value, if present.
    pub fn value(self) -> Option<T> {
        match self {
            Self::Value(v) => Some(v),
            Self::NoValue => None,
        }
    }

    /// Borrowing variant of [`MaybeValue::value`].
    pub fn as_ref(&self) -> MaybeValue<&T> {
        match self {
            Self::Value(v) => MaybeValue::Value(v),
            Self::NoValue => MaybeValue::NoValue,
        }
    }

    /// Map the contained value, preserving `NoValue`.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> MaybeValue<U> {
        match self {
            Self::Value(v) => MaybeValue::Value(f(v)),
            Self::NoValue => MaybeValue::NoValue,
        }
    }

    /// The contained value, or `fallback` when absent.
    pub fn unwrap_or(self, fallback: T) -> T {
        match self {
            Self::Value(v) => v,
            Self::NoValue => fallback,
        }
    }
}

impl<T> Default for MaybeValue<T> {
    fn default() -> Self {
        Self::NoValue
    }
}

impl<T> From<Option<T>> for MaybeValue<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Self::Value(v),
            None => Self::NoValue,
        }
    }
}

impl<T> From<MaybeValue<T>> for Option<T> {
    fn from(value: MaybeValue<T>) -> Self {
        value.value()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// InvalidationToken
// ─────────────────────────────────────────────────────────────────────────────

/// An identity-compared token used to mark computation results as stale.
///
/// Tokens compare equal only to clones of themselves; [`fresh`] always
/// produces a token distinct from every previously allocated one.
///
/// [`fresh`]: InvalidationToken::fresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvalidationToken(u64);

static TOKEN_COUNTER: AtomicU64 = AtomicU64::new(1);

impl InvalidationToken {
    /// Allocate a token distinct from all existing ones.
    pub fn fresh() -> Self {
        Self(TOKEN_COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// The token every result starts out with before any invalidation.
    pub fn initial() -> Self {
        Self(0)
    }
}

impl Default for InvalidationToken {
    fn default() -> Self {
        Self::initial()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
