//! Algebraic laws of the signals-factory operations, checked behaviorally:
//! two factories are considered equal when driving their built signals the
//! same way produces the same observable values on fresh stores.

use rill_core::{EventId, MaybeValue, StateId};
use rill_factories::{Setup, Signals, SignalsFactory};
use rill_store::Store;

#[derive(Debug, Clone)]
struct CounterInput {
    inc: EventId<u32>,
}

#[derive(Debug, Clone)]
struct CounterOutput {
    count: StateId<u64>,
}

/// A counter whose config is its initial value.
fn counter_factory() -> SignalsFactory<CounterInput, CounterOutput, (), u64> {
    SignalsFactory::new(|initial: u64| {
        let inc: EventId<u32> = EventId::named("inc");
        let count: StateId<u64> = StateId::named("count");
        let input = CounterInput { inc: inc.clone() };
        let output = CounterOutput {
            count: count.clone(),
        };
        let setup = Setup::new(move |store: &Store| {
            store.add_state(&count, initial).unwrap();
            store
                .add_reducer(&count, &inc, |n, step| n + u64::from(*step))
                .unwrap();
        });
        Signals {
            input,
            output,
            effects: (),
            setup,
        }
    })
}

/// Install the signals on a fresh store, dispatch `steps`, return the final
/// count.
async fn drive(signals: Signals<CounterInput, CounterOutput, ()>, steps: &[u32]) -> u64 {
    let store = Store::new();
    let input = signals.input.clone();
    let output = signals.output.clone();
    signals.setup.run(&store);
    for step in steps {
        store.dispatch(&input.inc, *step).await.unwrap();
    }
    match store.current_value(&output.count) {
        MaybeValue::Value(v) => v,
        MaybeValue::NoValue => panic!("counter state missing"),
    }
}

#[tokio::test]
async fn map_config_with_identity_preserves_behavior() {
    let plain = counter_factory();
    let mapped = counter_factory().map_config(|c: u64| c);

    let a = drive(plain.build(10), &[1, 2, 3]).await;
    let b = drive(mapped.build(10), &[1, 2, 3]).await;
    assert_eq!(a, 16);
    assert_eq!(a, b);
}

#[tokio::test]
async fn extend_setup_with_noop_preserves_behavior() {
    let plain = counter_factory();
    let extended = counter_factory().extend_setup(|_store, _in, _out, _eff, _cfg| {});

    let a = drive(plain.build(5), &[7]).await;
    let b = drive(extended.build(5), &[7]).await;
    assert_eq!(a, 12);
    assert_eq!(a, b);
}

#[tokio::test]
async fn compose_is_associative_up_to_renesting() {
    // ((a, b), c) vs (a, (b, c)): flattening the tuples yields the same
    // three counters with the same behavior.
    let left = counter_factory()
        .compose(counter_factory())
        .compose(counter_factory());
    let right = counter_factory().compose(counter_factory().compose(counter_factory()));

    let l = left.build(((1, 2), 3));
    let r = right.build((1, (2, 3)));

    let store_l = Store::new();
    let ((l_in_a, l_in_b), l_in_c) = l.input.clone();
    let ((l_out_a, l_out_b), l_out_c) = l.output.clone();
    l.setup.run(&store_l);

    let store_r = Store::new();
    let (r_in_a, (r_in_b, r_in_c)) = r.input.clone();
    let (r_out_a, (r_out_b, r_out_c)) = r.output.clone();
    r.setup.run(&store_r);

    for (input, store) in [
        (&l_in_a, &store_l),
        (&l_in_b, &store_l),
        (&l_in_c, &store_l),
        (&r_in_a, &store_r),
        (&r_in_b, &store_r),
        (&r_in_c, &store_r),
    ] {
        store.dispatch(&input.inc, 10).await.unwrap();
    }

    let flatten_l = [
        store_l.current_value(&l_out_a.count),
        store_l.current_value(&l_out_b.count),
        store_l.current_value(&l_out_c.count),
    ];
    let flatten_r = [
        store_r.current_value(&r_out_a.count),
        store_r.current_value(&r_out_b.count),
        store_r.current_value(&r_out_c.count),
    ];
    assert_eq!(flatten_l, flatten_r);
    assert_eq!(flatten_l[0], MaybeValue::Value(11));
    assert_eq!(flatten_l[1], MaybeValue::Value(12));
    assert_eq!(flatten_l[2], MaybeValue::Value(13));
}

#[tokio::test]
async fn rename_and_rename_back_is_identity() {
    #[derive(Debug, Clone)]
    struct Renamed {
        bump: EventId<u32>,
    }

    let round_tripped = counter_factory()
        .rename_input_id(|input: CounterInput| Renamed { bump: input.inc })
        .rename_input_id(|renamed: Renamed| CounterInput { inc: renamed.bump });

    let a = drive(counter_factory().build(0), &[4, 4]).await;
    let b = drive(round_tripped.build(0), &[4, 4]).await;
    assert_eq!(a, 8);
    assert_eq!(a, b);
}

#[tokio::test]
async fn build_is_pure_and_setup_idempotent_per_store() {
    let factory = counter_factory();

    // Two builds of the same factory are independent and equivalent.
    let first = factory.build(3);
    let second = factory.build(3);
    assert_ne!(first.input.inc, second.input.inc);

    let a = drive(first, &[1]).await;
    let b = drive(second, &[1]).await;
    assert_eq!(a, 4);
    assert_eq!(a, b);

    // The same build config on a fresh store reproduces the behavior.
    let c = drive(factory.build(3), &[1]).await;
    assert_eq!(c, 4);
}

#[tokio::test]
async fn connect_wires_output_to_input_across_composition() {
    // Two counters where the first's count drives the second through the
    // algebra's connect: dispatching to the first bumps the second.
    #[derive(Debug, Clone)]
    struct MirrorInput {
        follow: StateId<u64>,
    }
    #[derive(Debug, Clone)]
    struct MirrorOutput {
        mirrored: StateId<u64>,
    }

    let mirror = SignalsFactory::new(|_: ()| {
        let follow: StateId<u64> = StateId::named("follow");
        let mirrored = follow.clone();
        let follow_for_setup = follow.clone();
        Signals {
            input: MirrorInput {
                follow: follow.clone(),
            },
            output: MirrorOutput { mirrored },
            effects: (),
            setup: Setup::new(move |store: &Store| {
                store.add_state(&follow_for_setup, 0).unwrap();
            }),
        }
    });

    let wired = counter_factory()
        .compose(mirror)
        .connect(
            |output: &(CounterOutput, MirrorOutput)| output.0.count.clone().into(),
            |input: &(CounterInput, MirrorInput)| input.1.follow.clone().into(),
            Some(false),
        )
        .map_config(|initial: u64| (initial, ()));

    let signals = wired.build(100);
    let store = Store::new();
    let (counter_in, _) = signals.input.clone();
    let (_, mirror_out) = signals.output.clone();
    signals.setup.run(&store);

    store.dispatch(&counter_in.inc, 1).await.unwrap();
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
    assert_eq!(
        store.current_value(&mirror_out.mirrored),
        MaybeValue::Value(101)
    );
}
