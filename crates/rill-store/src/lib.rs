//! # Rill Store - Layer 2: Kernel
//!
//! **Purpose**: The signal store - a demand-driven mapping from opaque typed
//! identifiers to behaviors (stateful, last-value-caching) and events
//! (transient, non-caching), with reducer-backed states, typed-event
//! multiplexing, an effect registry, and store lifecycle.
//!
//! # Core Concepts
//!
//! - **Behavior**: a stream whose last value is replayed to new subscribers.
//! - **Event**: a stream with no replay; subscribers see only later values.
//! - **Lazy source**: subscribed only while the owning id has subscribers.
//! - **Stateful source**: subscribed from registration until removal.
//! - **Delayed-event queue**: the FIFO every dispatch is serialized through,
//!   which bounds the stack under cyclic feedback and fixes delivery order.
//!
//! # Usage
//!
//! ```ignore
//! use rill_core::{EventId, StateId};
//! use rill_store::Store;
//!
//! let store = Store::new();
//! let counter: StateId<u32> = StateId::named("counter");
//! let inc: EventId<()> = EventId::named("inc");
//!
//! store.add_state(&counter, 0)?;
//! store.add_reducer(&counter, &inc, |n, ()| n + 1)?;
//!
//! let mut values = store.get_behavior(&counter);
//! store.dispatch(&inc, ()).await?;
//! assert_eq!(values.recv().await?, 0);
//! assert_eq!(values.recv().await?, 1);
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod effect;
pub mod queue;
pub mod source;
pub mod store;
pub mod stream;
mod subject;
pub mod typed;

pub use config::{StoreConfig, StoreConfigBuilder};
pub use effect::{from_fn, Effect, EffectContext, FnEffect};
pub use queue::DelayedEventQueue;
pub use source::{BoxedStream, SourceBuilder, SourceContext, SourceName};
pub use store::Store;
pub use stream::{BehaviorStream, EventStream, SubscriptionGuard};
pub use typed::{DispatchedEvent, TypedEvent, TypedEventStream};

// Re-export the foundation vocabulary so store consumers need one import.
pub use rill_core::{
    BehaviorId, DerivedId, EffectId, EventId, InvalidationToken, MaybeValue, SignalId, SignalKind,
    StateId, StoreError,
};
