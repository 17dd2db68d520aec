//! End-to-end behavior of the effect-signals machine: laziness, pending
//! transitions, trigger gating, invalidation, debouncing, switch-latest
//! cancellation, and error recovery.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use rill_core::{EventId, MaybeValue};
use rill_factories::{
    effect_signals_factory, CombinedEffectResult, EffectConfiguration, EffectInputSignals,
    EffectOutputSignals,
};
use rill_store::{from_fn, BoxedStream, EventStream, Store};

#[derive(Debug, Clone, PartialEq, Eq)]
struct TestError(String);

type Machine = (
    Store,
    EventId<String>,
    EffectInputSignals<String>,
    EffectOutputSignals<String, String, TestError>,
    Arc<AtomicUsize>,
);

async fn settle() {
    for _ in 0..48 {
        tokio::task::yield_now().await;
    }
}

/// Build a machine whose effect uppercases its input after `delay`, tagging
/// the result with the invocation count. Inputs equal to "boom" error.
fn machine(config: EffectConfiguration<String, String, TestError>, delay: Duration) -> Machine {
    let store = Store::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let signals = effect_signals_factory::<String, String, TestError>().build(config);
    let inputs = signals.input.clone();
    let outputs = signals.output.clone();

    let effect_calls = Arc::clone(&calls);
    store.add_effect(
        &signals.effects.effect,
        from_fn(
            move |input: String, _prev_in: MaybeValue<String>, _prev_res: MaybeValue<String>| {
                let nth = effect_calls.fetch_add(1, Ordering::SeqCst) + 1;
                futures::stream::once(async move {
                    tokio::time::sleep(delay).await;
                    if input == "boom" {
                        Err(TestError(format!("failed on {input}")))
                    } else {
                        Ok(format!("{}#{nth}", input.to_uppercase()))
                    }
                })
                .boxed() as BoxedStream<Result<String, TestError>>
            },
        ),
    );

    let set_input: EventId<String> = EventId::named("set-input");
    store
        .connect_event_to_behavior(&set_input, inputs.input.clone(), None)
        .unwrap();
    signals.setup.run(&store);

    (store, set_input, inputs, outputs, calls)
}

/// Collect events until the stream stays quiet for a little while.
async fn drain<T: Clone + Send + Sync + 'static>(stream: &mut EventStream<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(60), stream.next()).await
    {
        out.push(event);
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Laziness
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn effect_never_runs_without_output_subscribers() {
    let (store, set_input, _inputs, _outputs, calls) =
        machine(EffectConfiguration::default(), Duration::ZERO);

    store.dispatch(&set_input, "abc".to_owned()).await.unwrap();
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn subscribing_only_event_outputs_never_runs_the_effect() {
    let (store, set_input, _inputs, outputs, calls) =
        machine(EffectConfiguration::default(), Duration::ZERO);

    let _errors = store.get_event_stream(&outputs.errors);
    let _successes = store.get_event_stream(&outputs.successes);
    let _completed = store.get_event_stream(&outputs.completed_successes);

    store.dispatch(&set_input, "abc".to_owned()).await.unwrap();
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn dropping_combined_cancels_the_in_flight_effect() {
    let (store, set_input, _inputs, outputs, calls) =
        machine(EffectConfiguration::default(), Duration::from_millis(50));

    let mut combined = store.get_behavior(&outputs.combined);
    let mut successes = store.get_event_stream(&outputs.successes);
    settle().await;

    store.dispatch(&set_input, "abc".to_owned()).await.unwrap();
    let first = combined.recv().await.unwrap();
    assert!(first.result_pending);
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    drop(combined);
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(drain(&mut successes).await.is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Basic runs
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn input_change_drives_pending_then_settled() {
    let (store, set_input, _inputs, outputs, calls) =
        machine(EffectConfiguration::default(), Duration::ZERO);

    let mut combined = store.get_behavior(&outputs.combined);
    let mut successes = store.get_event_stream(&outputs.successes);
    settle().await;

    store.dispatch(&set_input, "ab".to_owned()).await.unwrap();

    let pending = combined.recv().await.unwrap();
    assert_eq!(
        pending,
        CombinedEffectResult {
            current_input: MaybeValue::Value("ab".to_owned()),
            result: MaybeValue::NoValue,
            result_input: MaybeValue::NoValue,
            result_error: None,
            result_pending: true,
        }
    );

    let settled = combined.recv().await.unwrap();
    assert_eq!(settled.result, MaybeValue::Value("AB#1".to_owned()));
    assert_eq!(settled.result_input, MaybeValue::Value("ab".to_owned()));
    assert!(!settled.result_pending);

    let events = drain(&mut successes).await;
    assert_eq!(events.len(), 1);
    assert!(events[0].completed);
    assert_eq!(events[0].result, MaybeValue::Value("AB#1".to_owned()));
    assert_eq!(events[0].previous_input, MaybeValue::NoValue);

    // Re-dispatching the identical input does not re-run the effect.
    store.dispatch(&set_input, "ab".to_owned()).await.unwrap();
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn result_behavior_filters_to_settled_successes() {
    let (store, set_input, _inputs, outputs, _calls) =
        machine(EffectConfiguration::default(), Duration::ZERO);

    let mut result = store.get_behavior(&outputs.result);
    settle().await;
    store.dispatch(&set_input, "ok".to_owned()).await.unwrap();
    assert_eq!(result.recv().await.unwrap(), "OK#1");
}

#[tokio::test]
async fn initial_result_seeds_subscribers_before_any_run() {
    let config = EffectConfiguration::default().with_initial_result(|| "seed".to_owned());
    let (store, _set_input, _inputs, outputs, calls) = machine(config, Duration::ZERO);

    let mut result = store.get_behavior(&outputs.result);
    assert_eq!(result.recv().await.unwrap(), "seed");
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn errors_surface_and_the_machine_recovers() {
    let (store, set_input, _inputs, outputs, _calls) =
        machine(EffectConfiguration::default(), Duration::ZERO);

    let mut combined = store.get_behavior(&outputs.combined);
    let mut errors = store.get_event_stream(&outputs.errors);
    settle().await;

    store.dispatch(&set_input, "boom".to_owned()).await.unwrap();

    let pending = combined.recv().await.unwrap();
    assert!(pending.result_pending);
    let failed = combined.recv().await.unwrap();
    assert!(!failed.result_pending);
    assert_eq!(failed.result, MaybeValue::NoValue);
    assert_eq!(
        failed.result_error,
        Some(TestError("failed on boom".to_owned()))
    );

    let observed = drain(&mut errors).await;
    assert_eq!(observed.len(), 1);
    assert_eq!(observed[0].error_input, "boom");

    // The next input change recovers.
    store.dispatch(&set_input, "fine".to_owned()).await.unwrap();
    loop {
        let next = combined.recv().await.unwrap();
        if !next.result_pending {
            assert_eq!(next.result, MaybeValue::Value("FINE#2".to_owned()));
            assert_eq!(next.result_error, None);
            break;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trigger gating
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn trigger_gates_the_effect_until_dispatched() {
    let config = EffectConfiguration::default().with_trigger();
    let (store, set_input, inputs, outputs, calls) = machine(config, Duration::ZERO);

    let mut combined = store.get_behavior(&outputs.combined);
    settle().await;
    store.dispatch(&set_input, "go".to_owned()).await.unwrap();

    // Stale but not pending: the machine awaits the trigger.
    let waiting = combined.recv().await.unwrap();
    assert!(!waiting.result_pending);
    assert_eq!(waiting.result, MaybeValue::NoValue);
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    store.dispatch(&inputs.trigger, ()).await.unwrap();
    let pending = combined.recv().await.unwrap();
    assert!(pending.result_pending);
    let settled = combined.recv().await.unwrap();
    assert_eq!(settled.result, MaybeValue::Value("GO#1".to_owned()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Invalidation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn invalidation_while_unsubscribed_is_not_lost() {
    use rill_core::StateId;

    let store = Store::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let signals =
        effect_signals_factory::<String, String, TestError>().build(EffectConfiguration::default());
    let inputs = signals.input.clone();
    let outputs = signals.output.clone();

    let effect_calls = Arc::clone(&calls);
    store.add_effect(
        &signals.effects.effect,
        from_fn(
            move |input: String, _prev_in: MaybeValue<String>, _prev_res: MaybeValue<String>| {
                let nth = effect_calls.fetch_add(1, Ordering::SeqCst) + 1;
                futures::stream::once(async move {
                    Ok(format!("{}#{nth}", input.to_uppercase()))
                })
                .boxed() as BoxedStream<Result<String, TestError>>
            },
        ),
    );

    // A state-backed input survives teardown of the machine, so the same
    // input is reprocessed after invalidation.
    let input_state: StateId<String> = StateId::named("query");
    store.add_state(&input_state, "in".to_owned()).unwrap();
    store
        .connect(&input_state, inputs.input.clone(), None)
        .unwrap();
    signals.setup.run(&store);

    let mut combined = store.get_behavior(&outputs.combined);
    loop {
        if !combined.recv().await.unwrap().result_pending {
            break;
        }
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Unsubscribe everything, then invalidate.
    drop(combined);
    settle().await;
    store.dispatch(&inputs.invalidate, ()).await.unwrap();
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Resubscription first replays the stale result as pending, then the
    // recomputation for the unchanged input.
    let mut combined = store.get_behavior(&outputs.combined);
    let first = combined.recv().await.unwrap();
    assert!(first.result_pending);
    assert_eq!(first.result, MaybeValue::Value("IN#1".to_owned()));
    assert_eq!(first.result_input, MaybeValue::Value("in".to_owned()));

    loop {
        let next = combined.recv().await.unwrap();
        if !next.result_pending {
            assert_eq!(next.result, MaybeValue::Value("IN#2".to_owned()));
            break;
        }
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Switch-latest and debounce
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rapid_inputs_cancel_superseded_invocations() {
    let (store, set_input, _inputs, outputs, _calls) =
        machine(EffectConfiguration::default(), Duration::from_millis(40));

    let _combined = store.get_behavior(&outputs.combined);
    let mut successes = store.get_event_stream(&outputs.successes);
    let mut completed = store.get_event_stream(&outputs.completed_successes);
    settle().await;

    for input in ["i1", "i2", "i3"] {
        store.dispatch(&set_input, input.to_owned()).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(150)).await;

    let all = drain(&mut successes).await;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].result_input, "i3");
    assert!(all[0].completed);

    let completed = drain(&mut completed).await;
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].result_input, "i3");
}

#[tokio::test]
async fn debounce_coalesces_quick_input_changes() {
    let config =
        EffectConfiguration::default().with_effect_debounce(Duration::from_millis(50));
    let (store, set_input, _inputs, outputs, calls) = machine(config, Duration::ZERO);

    let _combined = store.get_behavior(&outputs.combined);
    let mut successes = store.get_event_stream(&outputs.successes);
    settle().await;

    store.dispatch(&set_input, "first".to_owned()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    store.dispatch(&set_input, "second".to_owned()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let all = drain(&mut successes).await;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].result_input, "second");
}
