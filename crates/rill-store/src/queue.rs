//! Delayed-Event Queue
//!
//! A single FIFO of pending one-shot notifications used to break synchronous
//! cycles: re-entrant emissions are deferred to the next asynchronous tick
//! instead of growing the stack. The queue is fair - strict insertion order -
//! and drains exactly the snapshot of its length at tick start; notifications
//! appended while draining schedule a fresh tick.
//!
//! The store funnels every dispatch through one of these queues, which makes
//! the queue the single serialization point for event delivery.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::oneshot;

type QueuedNotification = Box<dyn FnOnce() + Send>;

/// A microtask-fair FIFO of one-shot notifications.
///
/// Clones share the same queue.
#[derive(Clone)]
pub struct DelayedEventQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    state: Mutex<QueueState>,
}

struct QueueState {
    queue: VecDeque<QueuedNotification>,
    drain_scheduled: bool,
}

impl DelayedEventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    drain_scheduled: false,
                }),
            }),
        }
    }

    /// Append a notification.
    ///
    /// If the queue transitions from empty to non-empty, a single
    /// asynchronous drain tick is scheduled. Must be called with an ambient
    /// tokio runtime.
    pub fn enqueue(&self, notification: QueuedNotification) {
        let schedule = {
            let mut state = self.inner.state.lock();
            state.queue.push_back(notification);
            if state.drain_scheduled {
                false
            } else {
                state.drain_scheduled = true;
                true
            }
        };
        if schedule {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                drain_tick(inner);
            });
        }
    }

    /// Resolve on the next drain tick after the call.
    pub async fn tick(&self) {
        let (tx, rx) = oneshot::channel::<()>();
        self.enqueue(Box::new(move || {
            let _ = tx.send(());
        }));
        let _ = rx.await;
    }

    /// Defer every item of `stream` by one queue tick.
    ///
    /// Each upstream value enqueues a one-shot sink and is emitted downstream
    /// only once that sink fires, which unwinds the current synchronous stack
    /// before a feedback value flows.
    pub fn wrap_delayed<T, S>(&self, stream: S) -> impl Stream<Item = T>
    where
        T: Send + 'static,
        S: Stream<Item = T>,
    {
        let queue = self.clone();
        stream.then(move |value| {
            let queue = queue.clone();
            async move {
                queue.tick().await;
                value
            }
        })
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }
}

impl Default for DelayedEventQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Drain the snapshot of the queue taken at tick start.
///
/// Every notification runs isolated: one that panics is discarded with a
/// warning while the rest of the batch still runs, so one poisoned dispatch
/// can never swallow unrelated dispatches sharing the tick. Items appended
/// during the drain are handed to a fresh tick.
fn drain_tick(inner: Arc<QueueInner>) {
    let batch: Vec<QueuedNotification> = {
        let mut state = inner.state.lock();
        let snapshot = state.queue.len();
        state.queue.drain(..snapshot).collect()
    };
    for notification in batch {
        if catch_unwind(AssertUnwindSafe(notification)).is_err() {
            tracing::warn!("queued notification panicked; discarding it");
        }
    }
    let reschedule = {
        let mut state = inner.state.lock();
        if state.queue.is_empty() {
            state.drain_scheduled = false;
            false
        } else {
            true
        }
    };
    if reschedule {
        let inner = Arc::clone(&inner);
        tokio::spawn(async move {
            drain_tick(inner);
        });
    }
}
