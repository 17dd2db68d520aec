//! Subscription Streams
//!
//! [`BehaviorStream`] and [`EventStream`] are the externally consumable views
//! of a signal. Both wrap a broadcast receiver; the behavior variant
//! additionally carries the replayed last value, delivered before any live
//! update. Dropping a stream releases its subscription, which may tear down
//! lazy upstream sources.
//!
//! Receivers that fall behind the channel capacity are lagged: they skip to
//! the oldest retained value and a warning is logged.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use rill_core::{SignalId, StoreError};

// ─────────────────────────────────────────────────────────────────────────────
// Subscription guard
// ─────────────────────────────────────────────────────────────────────────────

/// Releases a counting subscription when dropped.
///
/// Passive guards (cyclic-context subscriptions) release nothing.
pub struct SubscriptionGuard {
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionGuard {
    pub(crate) fn counting(on_drop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_drop: Some(Box::new(on_drop)),
        }
    }

    pub(crate) fn passive() -> Self {
        Self { on_drop: None }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(release) = self.on_drop.take() {
            release();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Behavior stream
// ─────────────────────────────────────────────────────────────────────────────

/// A subscription to a behavior: the cached last value (if any) replayed
/// first, then every subsequent distinct emission.
pub struct BehaviorStream<T> {
    id: SignalId,
    replay: Option<T>,
    inner: BroadcastStream<T>,
    _guard: SubscriptionGuard,
}

impl<T> Unpin for BehaviorStream<T> {}

impl<T: Clone + Send + 'static> BehaviorStream<T> {
    pub(crate) fn new(
        id: SignalId,
        replay: Option<T>,
        receiver: broadcast::Receiver<T>,
        guard: SubscriptionGuard,
    ) -> Self {
        Self {
            id,
            replay,
            inner: BroadcastStream::new(receiver),
            _guard: guard,
        }
    }

    /// The behavior this stream observes.
    pub fn id(&self) -> &SignalId {
        &self.id
    }

    /// Receive the next value, waiting if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SubscriptionClosed`] when the behavior was
    /// completed.
    pub async fn recv(&mut self) -> Result<T, StoreError> {
        match self.next().await {
            Some(value) => Ok(value),
            None => Err(StoreError::SubscriptionClosed {
                id: self.id.clone(),
            }),
        }
    }
}

impl<T: Clone + Send + 'static> Stream for BehaviorStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(value) = this.replay.take() {
            return Poll::Ready(Some(value));
        }
        poll_skipping_lag(&this.id, &mut this.inner, cx)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event stream
// ─────────────────────────────────────────────────────────────────────────────

/// A subscription to an event channel: no replay, only values dispatched
/// after the subscription was taken.
pub struct EventStream<T> {
    id: SignalId,
    inner: BroadcastStream<T>,
    _guard: SubscriptionGuard,
}

impl<T> Unpin for EventStream<T> {}

impl<T: Clone + Send + 'static> EventStream<T> {
    pub(crate) fn new(
        id: SignalId,
        receiver: broadcast::Receiver<T>,
        guard: SubscriptionGuard,
    ) -> Self {
        Self {
            id,
            inner: BroadcastStream::new(receiver),
            _guard: guard,
        }
    }

    /// The event channel this stream observes.
    pub fn id(&self) -> &SignalId {
        &self.id
    }

    /// Receive the next event, waiting if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SubscriptionClosed`] when the channel was
    /// completed.
    pub async fn recv(&mut self) -> Result<T, StoreError> {
        match self.next().await {
            Some(value) => Ok(value),
            None => Err(StoreError::SubscriptionClosed {
                id: self.id.clone(),
            }),
        }
    }
}

impl<T: Clone + Send + 'static> Stream for EventStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        poll_skipping_lag(&this.id, &mut this.inner, cx)
    }
}

fn poll_skipping_lag<T: Clone + Send + 'static>(
    id: &SignalId,
    inner: &mut BroadcastStream<T>,
    cx: &mut Context<'_>,
) -> Poll<Option<T>> {
    loop {
        match Pin::new(&mut *inner).poll_next(cx) {
            Poll::Ready(Some(Ok(value))) => return Poll::Ready(Some(value)),
            Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(missed)))) => {
                tracing::warn!(signal = %id, missed, "subscriber lagged; skipping missed values");
            }
            Poll::Ready(None) => return Poll::Ready(None),
            Poll::Pending => return Poll::Pending,
        }
    }
}
