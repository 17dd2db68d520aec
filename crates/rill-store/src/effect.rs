//! Effects
//!
//! An effect is a user-supplied asynchronous computation: given an input, a
//! read context onto the store, and the previous invocation's input/result,
//! it returns a lazy stream of results. The stream may be empty, finite, or
//! infinite; it may complete or error. Nothing runs until the returned
//! stream is polled, and dropping the stream cancels the invocation - user
//! effects are expected to honour that cooperatively.
//!
//! Effects are registered in the store under an [`EffectId`](rill_core::EffectId)
//! and looked up at invocation time, so registration order and wiring order
//! are independent.

use rill_core::MaybeValue;

use crate::source::BoxedStream;
use crate::store::Store;

/// Read access handed to a running effect.
#[derive(Clone)]
pub struct EffectContext {
    store: Store,
}

impl EffectContext {
    /// Wrap a store for effect consumption. Created by the machinery that
    /// invokes effects; user code only receives it.
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// The store the effect may read from.
    pub fn store(&self) -> &Store {
        &self.store
    }
}

/// A user-supplied asynchronous effect.
///
/// `previous_input` and `previous_result` carry the input and result of the
/// most recent completed invocation, or [`MaybeValue::NoValue`] on the first
/// run - useful for incremental recomputation and cache-style effects.
pub trait Effect<I, R, E>: Send + Sync + 'static {
    /// Start one invocation. The returned stream is lazy; dropping it
    /// cancels the invocation.
    fn run(
        &self,
        input: I,
        ctx: &EffectContext,
        previous_input: MaybeValue<I>,
        previous_result: MaybeValue<R>,
    ) -> BoxedStream<Result<R, E>>;
}

impl<F, I, R, E> Effect<I, R, E> for F
where
    F: Fn(I, &EffectContext, MaybeValue<I>, MaybeValue<R>) -> BoxedStream<Result<R, E>>
        + Send
        + Sync
        + 'static,
{
    fn run(
        &self,
        input: I,
        ctx: &EffectContext,
        previous_input: MaybeValue<I>,
        previous_result: MaybeValue<R>,
    ) -> BoxedStream<Result<R, E>> {
        self(input, ctx, previous_input, previous_result)
    }
}

/// An [`Effect`] built from a plain closure that ignores the store context.
pub struct FnEffect<F>(F);

impl<F, I, R, E> Effect<I, R, E> for FnEffect<F>
where
    F: Fn(I, MaybeValue<I>, MaybeValue<R>) -> BoxedStream<Result<R, E>> + Send + Sync + 'static,
    I: 'static,
    R: 'static,
    E: 'static,
{
    fn run(
        &self,
        input: I,
        _ctx: &EffectContext,
        previous_input: MaybeValue<I>,
        previous_result: MaybeValue<R>,
    ) -> BoxedStream<Result<R, E>> {
        (self.0)(input, previous_input, previous_result)
    }
}

/// Wrap a closure `(input, previous_input, previous_result) -> stream` as an
/// effect. Use the [`Effect`] trait directly when the effect needs store
/// access.
pub fn from_fn<F>(f: F) -> FnEffect<F> {
    FnEffect(f)
}
