//! Typed-Event Multiplexing
//!
//! A [`TypedEvent`] pairs a target event identifier with an erased payload so
//! that heterogeneous emissions can travel together. A batch of typed events
//! is delivered atomically: every emission of the batch reaches its target -
//! reducers first, then channel fan-out - before any other queued dispatch is
//! observed.
//!
//! [`Store::add_typed_event_source`](crate::Store::add_typed_event_source)
//! registers a stream of such batches under several target ids at once. Its
//! optional termination id marks the end of a logical dispatch cycle: the
//! batch carrying it flushes, and the next batch is deferred by a fresh queue
//! tick so downstream samplers observe the settled state between cycles.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;

use rill_core::{EventId, SignalId, StoreError};

use crate::store::Store;
use crate::stream::EventStream;

// ─────────────────────────────────────────────────────────────────────────────
// Typed events
// ─────────────────────────────────────────────────────────────────────────────

type DeliverFn = Box<dyn FnOnce(&Store) -> Result<(), StoreError> + Send>;

/// One tagged emission: a target event id plus its (erased) payload.
pub struct TypedEvent {
    target: SignalId,
    deliver: DeliverFn,
}

impl TypedEvent {
    /// Tag `value` for delivery to `id`.
    pub fn new<T>(id: &EventId<T>, value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        let target = id.erased().clone();
        let id = id.clone();
        Self {
            target,
            deliver: Box::new(move |store| store.deliver_event(&id, value)),
        }
    }

    /// The event id this emission is destined for.
    pub fn target(&self) -> &SignalId {
        &self.target
    }

    pub(crate) fn deliver(self, store: &Store) -> Result<(), StoreError> {
        (self.deliver)(store)
    }
}

impl std::fmt::Debug for TypedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedEvent")
            .field("target", &self.target)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Typed event streams
// ─────────────────────────────────────────────────────────────────────────────

/// An event observed together with the id it was dispatched to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchedEvent<T> {
    /// The event channel the payload arrived on.
    pub id: EventId<T>,
    /// The dispatched payload.
    pub payload: T,
}

/// Event stream variant yielding [`DispatchedEvent`]s, convenient when
/// merging several channels into one consumer.
pub struct TypedEventStream<T> {
    id: EventId<T>,
    inner: EventStream<T>,
}

impl<T: Clone + Send + Sync + 'static> TypedEventStream<T> {
    pub(crate) fn new(id: EventId<T>, inner: EventStream<T>) -> Self {
        Self { id, inner }
    }

    /// Receive the next event, waiting if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SubscriptionClosed`] when the channel was
    /// completed.
    pub async fn recv(&mut self) -> Result<DispatchedEvent<T>, StoreError> {
        let payload = self.inner.recv().await?;
        Ok(DispatchedEvent {
            id: self.id.clone(),
            payload,
        })
    }
}

impl<T: Clone + Send + Sync + 'static> Stream for TypedEventStream<T> {
    type Item = DispatchedEvent<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(payload)) => Poll::Ready(Some(DispatchedEvent {
                id: this.id.clone(),
                payload,
            })),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
