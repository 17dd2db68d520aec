//! Store kernel behavior: states and reducers, replay, laziness, cyclic
//! graphs, typed-event multiplexing, child stores, and lifecycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use assert_matches::assert_matches;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use rill_store::{
    DerivedId, EventId, MaybeValue, SourceContext, StateId, Store, StoreError, TypedEvent,
};

/// Let spawned pump tasks catch up on the current-thread runtime.
async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Sample the latest value of `latest` at each `events` emission.
fn with_latest_from<A, B>(
    events: impl Stream<Item = A> + Send + Unpin + 'static,
    latest: impl Stream<Item = B> + Send + Unpin + 'static,
) -> impl Stream<Item = (A, B)> + Send
where
    A: Send + 'static,
    B: Clone + Send + 'static,
{
    enum Tag<A, B> {
        Event(A),
        Latest(B),
    }
    futures::stream::select(events.map(Tag::Event), latest.map(Tag::Latest))
        .scan(None::<B>, |state, tag| {
            let out = match tag {
                Tag::Latest(b) => {
                    *state = Some(b);
                    None
                }
                Tag::Event(a) => state.clone().map(|b| (a, b)),
            };
            futures::future::ready(Some(out))
        })
        .filter_map(futures::future::ready)
}

// ─────────────────────────────────────────────────────────────────────────────
// States and reducers
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn counter_state_folds_dispatched_events() {
    let store = Store::new();
    let counter: StateId<u32> = StateId::named("counter");
    let inc: EventId<()> = EventId::named("inc");

    store.add_state(&counter, 0).unwrap();
    store.add_reducer(&counter, &inc, |n, ()| n + 1).unwrap();

    let mut values = store.get_behavior(&counter);
    for _ in 0..3 {
        store.dispatch(&inc, ()).await.unwrap();
    }
    let mut seen = Vec::new();
    for _ in 0..4 {
        seen.push(values.recv().await.unwrap());
    }
    assert_eq!(seen, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn reducers_observe_events_while_unsubscribed() {
    let store = Store::new();
    let counter: StateId<u32> = StateId::new();
    let inc: EventId<u32> = EventId::new();

    store.add_state(&counter, 0).unwrap();
    store.add_reducer(&counter, &inc, |n, step| n + step).unwrap();

    // No subscriber anywhere.
    store.dispatch(&inc, 5).await.unwrap();
    store.dispatch(&inc, 7).await.unwrap();

    assert_eq!(store.current_value(&counter), MaybeValue::Value(12));
    let mut values = store.get_behavior(&counter);
    assert_eq!(values.recv().await.unwrap(), 12);
}

#[tokio::test]
async fn removed_reducer_leaves_state_constant() {
    let store = Store::new();
    let counter: StateId<u32> = StateId::new();
    let inc: EventId<()> = EventId::new();

    store.add_state(&counter, 0).unwrap();
    store.add_reducer(&counter, &inc, |n, ()| n + 1).unwrap();
    store.dispatch(&inc, ()).await.unwrap();

    store.remove_reducer(&counter, &inc);
    store.dispatch(&inc, ()).await.unwrap();
    assert_eq!(store.current_value(&counter), MaybeValue::Value(1));
}

#[tokio::test]
async fn duplicate_registrations_fail_without_poisoning() {
    let store = Store::new();
    let counter: StateId<u32> = StateId::new();
    let inc: EventId<()> = EventId::new();

    store.add_state(&counter, 0).unwrap();
    assert_matches!(
        store.add_state(&counter, 1),
        Err(StoreError::DuplicateSource { .. })
    );

    store.add_reducer(&counter, &inc, |n, ()| n + 1).unwrap();
    assert_matches!(
        store.add_reducer(&counter, &inc, |n, ()| n + 2),
        Err(StoreError::DuplicateSource { .. })
    );

    // The original registration still works.
    store.dispatch(&inc, ()).await.unwrap();
    assert_eq!(store.current_value(&counter), MaybeValue::Value(1));
}

// ─────────────────────────────────────────────────────────────────────────────
// Replay and event semantics
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn behavior_replays_exactly_the_last_value() {
    let store = Store::new();
    let counter: StateId<u32> = StateId::new();
    let set: EventId<u32> = EventId::new();

    store.add_state(&counter, 0).unwrap();
    store.add_reducer(&counter, &set, |_, v| *v).unwrap();
    store.dispatch(&set, 41).await.unwrap();
    store.dispatch(&set, 42).await.unwrap();

    let mut late = store.get_behavior(&counter);
    assert_eq!(late.recv().await.unwrap(), 42);
}

#[tokio::test]
async fn behaviors_skip_consecutive_equal_values() {
    let store = Store::new();
    let counter: StateId<u32> = StateId::new();
    let set: EventId<u32> = EventId::new();

    store.add_state(&counter, 0).unwrap();
    store.add_reducer(&counter, &set, |_, v| *v).unwrap();

    let mut values = store.get_behavior(&counter);
    assert_eq!(values.recv().await.unwrap(), 0);
    store.dispatch(&set, 0).await.unwrap();
    store.dispatch(&set, 1).await.unwrap();
    // The equal re-emission was skipped; the next observed value is 1.
    assert_eq!(values.recv().await.unwrap(), 1);
}

#[tokio::test]
async fn event_subscribers_see_only_later_dispatches() {
    let store = Store::new();
    let event: EventId<u32> = EventId::new();

    store.dispatch(&event, 1).await.unwrap();
    let mut stream = store.get_event_stream(&event);
    store.dispatch(&event, 2).await.unwrap();
    assert_eq!(stream.recv().await.unwrap(), 2);
}

#[tokio::test]
async fn dispatch_is_lazy_until_polled() {
    let store = Store::new();
    let counter: StateId<u32> = StateId::new();
    let inc: EventId<()> = EventId::new();

    store.add_state(&counter, 0).unwrap();
    store.add_reducer(&counter, &inc, |n, ()| n + 1).unwrap();

    let pending = store.dispatch(&inc, ());
    drop(pending);
    settle().await;
    assert_eq!(store.current_value(&counter), MaybeValue::Value(0));
}

// ─────────────────────────────────────────────────────────────────────────────
// Laziness and activation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn derived_source_is_built_on_demand_and_torn_down() {
    let store = Store::new();
    let counter: StateId<u32> = StateId::new();
    let doubled: DerivedId<u32> = DerivedId::new();
    let builds = Arc::new(AtomicUsize::new(0));

    store.add_state(&counter, 21).unwrap();
    {
        let builds = Arc::clone(&builds);
        let counter = counter.clone();
        store
            .add_derived_state(
                &doubled,
                move |ctx: &SourceContext| {
                    builds.fetch_add(1, Ordering::SeqCst);
                    ctx.get_behavior(counter.clone()).map(|n| n * 2)
                },
                None,
            )
            .unwrap();
    }

    settle().await;
    assert_eq!(builds.load(Ordering::SeqCst), 0);
    assert!(!store.is_subscribed(doubled.erased()));

    let mut values = store.get_behavior(&doubled);
    assert_eq!(values.recv().await.unwrap(), 42);
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert!(store.is_subscribed(doubled.erased()));
    assert!(store.is_subscribed(counter.erased()));

    // A second subscriber shares the single upstream subscription.
    let _second = store.get_behavior(&doubled);
    settle().await;
    assert_eq!(builds.load(Ordering::SeqCst), 1);

    drop(values);
    drop(_second);
    assert!(!store.is_subscribed(doubled.erased()));
    settle().await;
    assert!(!store.is_subscribed(counter.erased()));

    // Re-subscription rebuilds the source from its builder.
    let mut again = store.get_behavior(&doubled);
    assert_eq!(again.recv().await.unwrap(), 42);
    assert_eq!(builds.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn connect_defaults_follow_endpoint_kinds() {
    let store = Store::new();
    let a: StateId<u32> = StateId::new();
    let b: StateId<u32> = StateId::new();
    let d: DerivedId<u32> = DerivedId::new();

    store.add_state(&a, 1).unwrap();
    store.add_state(&b, 0).unwrap();
    store.connect(&a, &b, None).unwrap();
    settle().await;
    // state → state defaults lazy: nothing flows while unsubscribed.
    assert_eq!(store.current_value(&b), MaybeValue::Value(0));

    // state → derived defaults eager: flows without subscribers.
    store.connect(&a, &d, None).unwrap();
    settle().await;
    assert_eq!(store.current_value(&d), MaybeValue::Value(1));
}

// ─────────────────────────────────────────────────────────────────────────────
// Cyclic behavior graphs
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn cyclic_behaviors_resolve_and_replay_across_resubscription() {
    let store = Store::new();
    let input: EventId<i64> = EventId::named("input");
    let cyclic: StateId<i64> = StateId::named("cyclic");
    let derived: DerivedId<i64> = DerivedId::named("derived");

    store.add_state(&cyclic, 1).unwrap();
    {
        let input = input.clone();
        let derived = derived.clone();
        store
            .connect_observable(
                move |ctx: &SourceContext| {
                    let events = ctx.get_event_stream(&input);
                    let latest = ctx.get_behavior(derived.clone()).map(|d| d * 10);
                    with_latest_from(events.boxed(), latest.boxed()).map(|(e, l)| e * l)
                },
                &cyclic,
                true,
            )
            .unwrap();
    }
    {
        let cyclic = cyclic.clone();
        store
            .add_derived_state(
                &derived,
                move |ctx: &SourceContext| ctx.get_behavior(cyclic.clone()).map(|c| c * 10),
                None,
            )
            .unwrap();
    }

    let mut values = store.get_behavior(&derived);
    assert_eq!(values.recv().await.unwrap(), 10);
    settle().await;

    store.dispatch(&input, 1).await.unwrap();
    assert_eq!(values.recv().await.unwrap(), 1000);

    // Resubscribing without further events replays the cached value.
    drop(values);
    settle().await;
    let mut again = store.get_behavior(&derived);
    assert_eq!(again.recv().await.unwrap(), 1000);
    settle().await;

    store.dispatch(&input, 3).await.unwrap();
    assert_eq!(again.recv().await.unwrap(), 300_000);
}

// ─────────────────────────────────────────────────────────────────────────────
// Typed-event multiplexing
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn typed_event_batches_fan_out_atomically() {
    let store = Store::new();
    let numbers: EventId<u32> = EventId::named("numbers");
    let labels: EventId<String> = EventId::named("labels");
    let sum: StateId<u32> = StateId::new();

    store.add_state(&sum, 0).unwrap();
    store.add_reducer(&sum, &numbers, |n, v| n + v).unwrap();

    let mut number_stream = store.get_typed_event_stream(&numbers);
    let mut label_stream = store.get_event_stream(&labels);

    let (tx, rx) = mpsc::channel::<Vec<TypedEvent>>(4);
    let rx = Arc::new(parking_lot::Mutex::new(Some(rx)));
    store
        .add_typed_event_source(
            vec![numbers.erased().clone(), labels.erased().clone()],
            Some(labels.erased().clone()),
            move |_ctx: &SourceContext| {
                let rx = rx.lock().take().expect("multiplexer builds once");
                ReceiverStream::new(rx)
            },
        )
        .unwrap();

    tx.send(vec![
        TypedEvent::new(&numbers, 3),
        TypedEvent::new(&labels, "three".to_owned()),
    ])
    .await
    .unwrap();

    let number = number_stream.recv().await.unwrap();
    assert_eq!(number.id, numbers);
    assert_eq!(number.payload, 3);
    assert_eq!(label_stream.recv().await.unwrap(), "three");
    // Reducers saw the batch too.
    assert_eq!(store.current_value(&sum), MaybeValue::Value(3));
    assert_eq!(store.get_number_of_event_sources(numbers.erased()), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Child stores and lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn child_store_resolves_to_parent_until_overridden() {
    let parent = Store::new();
    let counter: StateId<u32> = StateId::new();
    let inc: EventId<()> = EventId::new();

    parent.add_state(&counter, 0).unwrap();
    parent.add_reducer(&counter, &inc, |n, ()| n + 1).unwrap();

    let child = parent.create_child_store();
    assert!(child.get_parent_store().is_some());

    child.dispatch(&inc, ()).await.unwrap();
    let mut from_child = child.get_behavior(&counter);
    assert_eq!(from_child.recv().await.unwrap(), 1);

    // An override shadows the parent registration for child consumers.
    child.add_state(&counter, 100).unwrap();
    let mut overridden = child.get_behavior(&counter);
    assert_eq!(overridden.recv().await.unwrap(), 100);
    assert_eq!(parent.current_value(&counter), MaybeValue::Value(1));
}

#[tokio::test]
async fn reset_behaviors_restores_initial_values() {
    let store = Store::new();
    let counter: StateId<u32> = StateId::new();
    let inc: EventId<()> = EventId::new();

    store.add_state(&counter, 0).unwrap();
    store.add_reducer(&counter, &inc, |n, ()| n + 1).unwrap();
    store.dispatch(&inc, ()).await.unwrap();
    store.dispatch(&inc, ()).await.unwrap();
    assert_eq!(store.current_value(&counter), MaybeValue::Value(2));

    store.reset_behaviors();
    assert_eq!(store.current_value(&counter), MaybeValue::Value(0));
}

#[tokio::test]
async fn completed_behavior_closes_subscribers() {
    let store = Store::new();
    let counter: StateId<u32> = StateId::new();
    store.add_state(&counter, 0).unwrap();

    let mut values = store.get_behavior(&counter);
    assert_eq!(values.recv().await.unwrap(), 0);

    store.complete_behavior(counter.erased());
    assert_matches!(
        values.recv().await,
        Err(StoreError::SubscriptionClosed { .. })
    );
}

#[tokio::test]
async fn remove_behavior_sources_detaches_reducers() {
    let store = Store::new();
    let counter: StateId<u32> = StateId::new();
    let inc: EventId<()> = EventId::new();

    store.add_state(&counter, 0).unwrap();
    store.add_reducer(&counter, &inc, |n, ()| n + 1).unwrap();
    assert_eq!(store.get_number_of_behavior_sources(counter.erased()), 1);

    store.remove_behavior_sources(counter.erased());
    assert_eq!(store.get_number_of_behavior_sources(counter.erased()), 0);

    store.dispatch(&inc, ()).await.unwrap();
    // The cached value survives, the fold does not.
    assert_eq!(store.current_value(&counter), MaybeValue::Value(0));
}

#[tokio::test]
async fn complete_all_signals_tears_down_cyclic_graphs() {
    let store = Store::new();
    let a: StateId<u32> = StateId::new();
    let b: DerivedId<u32> = DerivedId::new();

    store.add_state(&a, 1).unwrap();
    {
        let a2 = a.clone();
        store
            .add_derived_state(&b, move |ctx: &SourceContext| ctx.get_behavior(a2.clone()).map(|v| v + 1), None)
            .unwrap();
    }
    {
        let b2 = b.clone();
        store
            .connect_observable(
                move |ctx: &SourceContext| ctx.get_behavior(b2.clone()).map(|v| v * 2),
                &a,
                true,
            )
            .unwrap();
    }
    let values = store.get_behavior(&b);
    settle().await;

    store.complete_all_signals();
    assert_eq!(store.get_number_of_behavior_sources(a.erased()), 0);
    assert_eq!(store.get_number_of_behavior_sources(b.erased()), 0);
    drop(values);
}

// ─────────────────────────────────────────────────────────────────────────────
// Fold law
// ─────────────────────────────────────────────────────────────────────────────

mod fold_properties {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Add(i64),
        Mul(i64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (-100i64..100).prop_map(Op::Add),
            (-4i64..4).prop_map(Op::Mul),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// A continuously-subscribed observer sees exactly the left fold of
        /// the dispatched events over the initial state.
        #[test]
        fn observed_states_equal_scanleft(ops in proptest::collection::vec(op_strategy(), 0..24)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .expect("runtime");
            runtime.block_on(async {
                let store = Store::new();
                let state: StateId<i64> = StateId::new();
                let add: EventId<i64> = EventId::new();
                let mul: EventId<i64> = EventId::new();

                store.add_state(&state, 1).unwrap();
                store
                    .add_reducer(&state, &add, |s, v| s.wrapping_add(*v))
                    .unwrap();
                store
                    .add_reducer(&state, &mul, |s, v| s.wrapping_mul(*v))
                    .unwrap();

                let mut observed = store.get_behavior(&state);
                let mut expected = vec![1i64];
                let mut acc = 1i64;
                for op in &ops {
                    let next = match op {
                        Op::Add(v) => {
                            store.dispatch(&add, *v).await.unwrap();
                            acc.wrapping_add(*v)
                        }
                        Op::Mul(v) => {
                            store.dispatch(&mul, *v).await.unwrap();
                            acc.wrapping_mul(*v)
                        }
                    };
                    // Behaviors dedupe, so only record changes.
                    if next != acc {
                        expected.push(next);
                    }
                    acc = next;
                }
                let mut seen = Vec::new();
                for _ in 0..expected.len() {
                    seen.push(observed.recv().await.unwrap());
                }
                assert_eq!(seen, expected);
            });
        }
    }
}
