//! Effect-Signals Factory
//!
//! The reusable pattern "input behavior → user async effect → (result,
//! pending, success, error)". One machine instance owns:
//!
//! - an `input` derived behavior the consumer feeds,
//! - `invalidate` and `trigger` event inputs,
//! - a non-lazy invalidation-token state (invalidations are never missed),
//! - a result state folded from an internal result event,
//! - a `combined` derived behavior whose single lazy source is the machine
//!   driver, and `result` / `pending` projections of it,
//! - `errors`, `successes` and `completed_successes` event outputs.
//!
//! Laziness discipline: the user effect runs only while `combined` (directly
//! or through `result`/`pending`) has subscribers. Subscribing only the
//! event outputs never invokes the effect. In-flight invocations are
//! cancelled switch-latest style when a staleness-triggering update arrives.
//!
//! ```text
//!  input ─┐
//!  result ─┤                        ┌─► combined (pending/settled shapes)
//!  token ──┼─► driver ── staleness ─┤
//!  trigger─┘      │                 └─► launch effect ──► result event +
//!   state         └─ trigger arming                       success/error events
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_stream::wrappers::ReceiverStream;

use rill_core::{DerivedId, EffectId, EventId, InvalidationToken, MaybeValue, StateId};
use rill_store::{BehaviorStream, Effect, EffectContext, SourceContext, Store, TypedEvent};

use crate::factory::SignalsFactory;
use crate::signals::{Setup, Signals};

// ─────────────────────────────────────────────────────────────────────────────
// Value shapes
// ─────────────────────────────────────────────────────────────────────────────

/// The five-field summary of an effect machine's externally visible state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinedEffectResult<I, R, E> {
    /// The input currently driving the machine.
    pub current_input: MaybeValue<I>,
    /// The most recent result, possibly from an older input.
    pub result: MaybeValue<R>,
    /// The input the result belongs to.
    pub result_input: MaybeValue<I>,
    /// The error of the most recent failed invocation, if unresolved.
    pub result_error: Option<E>,
    /// True while the current input still awaits its result.
    pub result_pending: bool,
}

/// Error event payload: the failure plus the input it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectError<I, E> {
    /// What the effect produced instead of a result.
    pub error: E,
    /// The input that was being processed.
    pub error_input: I,
}

/// Success event payload.
///
/// `completed` is false for intermediate emissions of a multi-result effect
/// and true exactly once, when the effect's sequence terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectSuccess<I, R> {
    /// The produced result; `NoValue` for an empty completed sequence.
    pub result: MaybeValue<R>,
    /// The input the result belongs to.
    pub result_input: I,
    /// Input of the previous completed invocation, if any.
    pub previous_input: MaybeValue<I>,
    /// Result of the previous completed invocation, if any.
    pub previous_result: MaybeValue<R>,
    /// True when the effect's sequence has terminated.
    pub completed: bool,
}

/// The fold of the internal result event: everything the staleness predicate
/// needs to re-arm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultState<I, R, E> {
    /// Most recent result, `NoValue` until the first emission (or after an
    /// error).
    pub result: MaybeValue<R>,
    /// The input the result belongs to.
    pub result_input: MaybeValue<I>,
    /// The error that terminated the invocation, if it failed.
    pub result_error: Option<E>,
    /// The invalidation token the result was computed under.
    pub result_token: InvalidationToken,
    /// False while the producing sequence is still emitting.
    pub completed: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Identifier maps
// ─────────────────────────────────────────────────────────────────────────────

/// Input identifiers of one effect machine.
#[derive(Debug, Clone)]
pub struct EffectInputSignals<I> {
    /// The behavior the machine consumes; connect a source to drive it.
    pub input: DerivedId<I>,
    /// Forces reprocessing of the current input, even if unchanged.
    pub invalidate: EventId<()>,
    /// Arms one invocation when `with_trigger` is configured; no-op
    /// otherwise.
    pub trigger: EventId<()>,
}

/// Output identifiers of one effect machine.
#[derive(Debug, Clone)]
pub struct EffectOutputSignals<I, R, E> {
    /// The combined five-field view.
    pub combined: DerivedId<CombinedEffectResult<I, R, E>>,
    /// Settled successful results only.
    pub result: DerivedId<R>,
    /// The pending flag of `combined`.
    pub pending: DerivedId<bool>,
    /// Effect failures.
    pub errors: EventId<EffectError<I, E>>,
    /// Every produced result, intermediate or final.
    pub successes: EventId<EffectSuccess<I, R>>,
    /// Successes whose sequence terminated.
    pub completed_successes: EventId<EffectSuccess<I, R>>,
}

/// Effect identifiers of one effect machine.
#[derive(Debug, Clone)]
pub struct EffectEffects<I, R, E> {
    /// The effect invoked by the machine; back it via
    /// [`Store::add_effect`].
    pub effect: EffectId<I, R, E>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

type EqArc<I> = Arc<dyn Fn(&I, &I) -> bool + Send + Sync>;
type WrapArc<I, R, E> =
    Arc<dyn Fn(Arc<dyn Effect<I, R, E>>) -> Arc<dyn Effect<I, R, E>> + Send + Sync>;

/// Configuration of one effect machine; the factory's config type.
pub struct EffectConfiguration<I, R, E> {
    /// Input equality deciding whether a new input is "the same". Defaults
    /// to `PartialEq`.
    pub effect_input_equals: EqArc<I>,
    /// Gate each invocation on an explicit `trigger` event.
    pub with_trigger: bool,
    /// Seeds the `result` behavior so subscribers see a value before the
    /// first invocation completes.
    pub initial_result_getter: Option<Arc<dyn Fn() -> R + Send + Sync>>,
    /// Debounce the post-staleness stream feeding the effect.
    pub effect_debounce: Option<Duration>,
    /// Decorator around the registered effect.
    pub wrapped_effect_getter: Option<WrapArc<I, R, E>>,
    /// Subscribe the input behavior at setup time instead of lazily.
    pub eager_input_subscription: bool,
    /// Suffix for the generated identifier names (debug only).
    pub name_extension: Option<String>,
}

impl<I, R, E> Clone for EffectConfiguration<I, R, E> {
    fn clone(&self) -> Self {
        Self {
            effect_input_equals: Arc::clone(&self.effect_input_equals),
            with_trigger: self.with_trigger,
            initial_result_getter: self.initial_result_getter.clone(),
            effect_debounce: self.effect_debounce,
            wrapped_effect_getter: self.wrapped_effect_getter.clone(),
            eager_input_subscription: self.eager_input_subscription,
            name_extension: self.name_extension.clone(),
        }
    }
}

impl<I: PartialEq, R, E> Default for EffectConfiguration<I, R, E> {
    fn default() -> Self {
        Self {
            effect_input_equals: Arc::new(|a, b| a == b),
            with_trigger: false,
            initial_result_getter: None,
            effect_debounce: None,
            wrapped_effect_getter: None,
            eager_input_subscription: false,
            name_extension: None,
        }
    }
}

impl<I, R, E> EffectConfiguration<I, R, E> {
    /// Replace the input equality.
    pub fn with_effect_input_equals(
        mut self,
        eq: impl Fn(&I, &I) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.effect_input_equals = Arc::new(eq);
        self
    }

    /// Gate invocations on the `trigger` event.
    pub fn with_trigger(mut self) -> Self {
        self.with_trigger = true;
        self
    }

    /// Seed the result behavior.
    pub fn with_initial_result(mut self, getter: impl Fn() -> R + Send + Sync + 'static) -> Self {
        self.initial_result_getter = Some(Arc::new(getter));
        self
    }

    /// Debounce staleness-triggered invocations.
    pub fn with_effect_debounce(mut self, debounce: Duration) -> Self {
        self.effect_debounce = Some(debounce);
        self
    }

    /// Decorate the registered effect at invocation time.
    pub fn with_wrapped_effect(
        mut self,
        wrap: impl Fn(Arc<dyn Effect<I, R, E>>) -> Arc<dyn Effect<I, R, E>> + Send + Sync + 'static,
    ) -> Self {
        self.wrapped_effect_getter = Some(Arc::new(wrap));
        self
    }

    /// Subscribe the input behavior at setup time.
    pub fn with_eager_input_subscription(mut self) -> Self {
        self.eager_input_subscription = true;
        self
    }

    /// Suffix generated identifier names for debugging.
    pub fn with_name_extension(mut self, name: impl Into<String>) -> Self {
        self.name_extension = Some(name.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Factory
// ─────────────────────────────────────────────────────────────────────────────

/// Build the effect-signals factory for input `I`, result `R`, error `E`.
pub fn effect_signals_factory<I, R, E>() -> SignalsFactory<
    EffectInputSignals<I>,
    EffectOutputSignals<I, R, E>,
    EffectEffects<I, R, E>,
    EffectConfiguration<I, R, E>,
>
where
    I: Clone + PartialEq + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
    E: Clone + PartialEq + Send + Sync + 'static,
{
    SignalsFactory::new(|config: EffectConfiguration<I, R, E>| {
        let suffix = config.name_extension.clone().unwrap_or_default();
        let name = move |base: &str| {
            if suffix.is_empty() {
                base.to_owned()
            } else {
                format!("{base}-{suffix}")
            }
        };

        let input: DerivedId<I> = DerivedId::named(&name("effect-input"));
        let invalidate: EventId<()> = EventId::named(&name("invalidate"));
        let trigger: EventId<()> = EventId::named(&name("trigger"));

        let combined: DerivedId<CombinedEffectResult<I, R, E>> =
            DerivedId::named(&name("combined"));
        let result: DerivedId<R> = DerivedId::named(&name("result"));
        let pending: DerivedId<bool> = DerivedId::named(&name("pending"));
        let errors: EventId<EffectError<I, E>> = EventId::named(&name("errors"));
        let successes: EventId<EffectSuccess<I, R>> = EventId::named(&name("successes"));
        let completed_successes: EventId<EffectSuccess<I, R>> =
            EventId::named(&name("completed-successes"));
        let effect: EffectId<I, R, E> = EffectId::named(&name("effect"));

        let result_event: EventId<ResultState<I, R, E>> = EventId::named(&name("result-event"));
        let triggered_event: EventId<I> = EventId::named(&name("triggered-input"));
        let token_state: StateId<InvalidationToken> = StateId::named(&name("invalidate-token"));
        let result_state: StateId<ResultState<I, R, E>> = StateId::named(&name("result-state"));
        let triggered_state: StateId<MaybeValue<I>> =
            StateId::named(&name("triggered-input-state"));

        let inputs = EffectInputSignals {
            input: input.clone(),
            invalidate: invalidate.clone(),
            trigger: trigger.clone(),
        };
        let outputs = EffectOutputSignals {
            combined: combined.clone(),
            result: result.clone(),
            pending: pending.clone(),
            errors: errors.clone(),
            successes: successes.clone(),
            completed_successes: completed_successes.clone(),
        };
        let effects = EffectEffects {
            effect: effect.clone(),
        };

        let wiring = MachineWiring {
            effect,
            result_event: result_event.clone(),
            errors,
            successes: successes.clone(),
            trigger,
            triggered_event: triggered_event.clone(),
            eq: Arc::clone(&config.effect_input_equals),
            with_trigger: config.with_trigger,
            debounce: config.effect_debounce,
            wrap: config.wrapped_effect_getter.clone(),
        };
        let initial_result = config
            .initial_result_getter
            .as_ref()
            .map(|getter| getter());
        let eager_input = config.eager_input_subscription;
        let setup_input = inputs.clone();
        let setup_outputs = outputs.clone();

        let setup = Setup::new(move |store: &Store| {
            install_machine(
                store,
                setup_input,
                setup_outputs,
                InternalIds {
                    result_event,
                    triggered_event,
                    token_state,
                    result_state,
                    triggered_state,
                },
                wiring,
                initial_result,
                eager_input,
            );
        });

        Signals {
            input: inputs,
            output: outputs,
            effects,
            setup,
        }
    })
}

struct InternalIds<I, R, E> {
    result_event: EventId<ResultState<I, R, E>>,
    triggered_event: EventId<I>,
    token_state: StateId<InvalidationToken>,
    result_state: StateId<ResultState<I, R, E>>,
    triggered_state: StateId<MaybeValue<I>>,
}

struct MachineWiring<I, R, E> {
    effect: EffectId<I, R, E>,
    result_event: EventId<ResultState<I, R, E>>,
    errors: EventId<EffectError<I, E>>,
    successes: EventId<EffectSuccess<I, R>>,
    trigger: EventId<()>,
    triggered_event: EventId<I>,
    eq: EqArc<I>,
    with_trigger: bool,
    debounce: Option<Duration>,
    wrap: Option<WrapArc<I, R, E>>,
}

impl<I, R, E> Clone for MachineWiring<I, R, E> {
    fn clone(&self) -> Self {
        Self {
            effect: self.effect.clone(),
            result_event: self.result_event.clone(),
            errors: self.errors.clone(),
            successes: self.successes.clone(),
            trigger: self.trigger.clone(),
            triggered_event: self.triggered_event.clone(),
            eq: Arc::clone(&self.eq),
            with_trigger: self.with_trigger,
            debounce: self.debounce,
            wrap: self.wrap.clone(),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn install_machine<I, R, E>(
    store: &Store,
    inputs: EffectInputSignals<I>,
    outputs: EffectOutputSignals<I, R, E>,
    ids: InternalIds<I, R, E>,
    wiring: MachineWiring<I, R, E>,
    initial_result: Option<R>,
    eager_input: bool,
) where
    I: Clone + PartialEq + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
    E: Clone + PartialEq + Send + Sync + 'static,
{
    let registered = (|| {
        // Invalidation tokens are root state, so invalidations are folded
        // even while every output is unsubscribed.
        store.add_state(&ids.token_state, InvalidationToken::initial())?;
        store.add_reducer(&ids.token_state, &inputs.invalidate, |_, ()| {
            InvalidationToken::fresh()
        })?;

        store.add_state(
            &ids.result_state,
            ResultState {
                result: initial_result
                    .clone()
                    .map_or(MaybeValue::NoValue, MaybeValue::Value),
                result_input: MaybeValue::NoValue,
                result_error: None,
                result_token: InvalidationToken::initial(),
                completed: true,
            },
        )?;
        store.add_reducer(&ids.result_state, &ids.result_event, |_, next| next.clone())?;

        store.add_state(&ids.triggered_state, MaybeValue::NoValue)?;
        store.add_reducer(&ids.triggered_state, &ids.triggered_event, |_, input| {
            MaybeValue::Value(input.clone())
        })?;

        // The machine driver is the single lazy source of `combined`.
        let driver_wiring = wiring.clone();
        let driver_input = inputs.input.clone();
        let driver_result = ids.result_state.clone();
        let driver_token = ids.token_state.clone();
        let driver_triggered = ids.triggered_state.clone();
        store.add_derived_state(
            &outputs.combined,
            move |ctx: &SourceContext| {
                let streams = MachineStreams {
                    input: ctx.get_behavior(driver_input.clone()),
                    result: ctx.get_behavior(driver_result.clone()),
                    token: ctx.get_behavior(driver_token.clone()),
                    triggered: ctx.get_behavior(driver_triggered.clone()),
                };
                let (tx, rx) = mpsc::channel(16);
                tokio::spawn(drive_machine(
                    ctx.store().clone(),
                    driver_wiring.clone(),
                    streams,
                    tx,
                ));
                ReceiverStream::new(rx)
            },
            None,
        )?;

        // `result` and `pending` wrap `combined`, so subscribing either
        // causes exactly one upstream driver.
        let combined_for_result = outputs.combined.clone();
        store.add_derived_state(
            &outputs.result,
            move |ctx: &SourceContext| {
                ctx.get_behavior(combined_for_result.clone())
                    .filter_map(|c: CombinedEffectResult<I, R, E>| {
                        let settled = !c.result_pending && c.result_error.is_none();
                        futures::future::ready(match c.result {
                            MaybeValue::Value(r) if settled => Some(r),
                            _ => None,
                        })
                    })
            },
            initial_result,
        )?;

        let combined_for_pending = outputs.combined.clone();
        store.add_derived_state(
            &outputs.pending,
            move |ctx: &SourceContext| {
                ctx.get_behavior(combined_for_pending.clone())
                    .map(|c: CombinedEffectResult<I, R, E>| c.result_pending)
            },
            Some(false),
        )?;

        let successes_for_completed = outputs.successes.clone();
        store.add_event_source(&outputs.completed_successes, move |ctx: &SourceContext| {
            ctx.get_event_stream(&successes_for_completed)
                .filter(|s: &EffectSuccess<I, R>| futures::future::ready(s.completed))
        })?;

        if eager_input {
            store.pin_behavior(inputs.input.clone());
        }
        Ok::<(), rill_core::StoreError>(())
    })();
    if let Err(err) = registered {
        tracing::warn!(error = %err, "effect machine setup failed");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Staleness predicate
// ─────────────────────────────────────────────────────────────────────────────

enum Decision {
    Settled,
    AwaitTrigger,
    Launch,
}

fn classify<I, R, E>(
    input: &I,
    result: &ResultState<I, R, E>,
    token: InvalidationToken,
    triggered: &MaybeValue<I>,
    eq: &EqArc<I>,
    with_trigger: bool,
) -> (CombinedEffectResult<I, R, E>, Decision)
where
    I: Clone,
    R: Clone,
    E: Clone,
{
    let same_input = match &result.result_input {
        MaybeValue::Value(result_input) => eq(input, result_input),
        MaybeValue::NoValue => false,
    };
    let stale = token != result.result_token || !same_input || !result.completed;
    let awaiting_trigger = with_trigger
        && !matches!(triggered, MaybeValue::Value(armed) if eq(armed, input));
    let pending = stale && !awaiting_trigger;

    let combined = CombinedEffectResult {
        current_input: MaybeValue::Value(input.clone()),
        result: result.result.clone(),
        result_input: result.result_input.clone(),
        result_error: result.result_error.clone(),
        result_pending: pending,
    };
    let decision = if !stale {
        Decision::Settled
    } else if awaiting_trigger {
        Decision::AwaitTrigger
    } else {
        Decision::Launch
    };
    (combined, decision)
}

// ─────────────────────────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────────────────────────

struct MachineStreams<I, R, E> {
    input: BehaviorStream<I>,
    result: BehaviorStream<ResultState<I, R, E>>,
    token: BehaviorStream<InvalidationToken>,
    triggered: BehaviorStream<MaybeValue<I>>,
}

struct LaunchPlan<I, R> {
    input: I,
    token: InvalidationToken,
    previous_input: MaybeValue<I>,
    previous_result: MaybeValue<R>,
}

async fn drive_machine<I, R, E>(
    store: Store,
    wiring: MachineWiring<I, R, E>,
    mut streams: MachineStreams<I, R, E>,
    tx: mpsc::Sender<CombinedEffectResult<I, R, E>>,
) where
    I: Clone + PartialEq + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
    E: Clone + PartialEq + Send + Sync + 'static,
{
    let effect_ctx = EffectContext::new(store.clone());

    let mut latest_input: Option<I> = None;
    let mut latest_result: Option<ResultState<I, R, E>> = None;
    let mut latest_token: Option<InvalidationToken> = None;
    let mut latest_triggered: Option<MaybeValue<I>> = None;

    let mut in_flight: Option<JoinHandle<()>> = None;
    let mut current_run: Option<(I, InvalidationToken)> = None;
    let mut armed: Option<(I, JoinHandle<()>)> = None;
    let mut debounce_sleep: Option<Pin<Box<Sleep>>> = None;
    let mut pending_launch: Option<LaunchPlan<I, R>> = None;

    loop {
        tokio::select! {
            _ = tx.closed() => break,
            Some(value) = streams.input.next() => latest_input = Some(value),
            Some(value) = streams.result.next() => latest_result = Some(value),
            Some(value) = streams.token.next() => latest_token = Some(value),
            Some(value) = streams.triggered.next() => latest_triggered = Some(value),
            () = async {
                match debounce_sleep.as_mut() {
                    Some(sleep) => sleep.await,
                    None => std::future::pending().await,
                }
            }, if debounce_sleep.is_some() => {
                debounce_sleep = None;
                if let Some(plan) = pending_launch.take() {
                    launch(&store, &wiring, &effect_ctx, &mut in_flight, plan);
                }
                continue;
            }
            else => break,
        }

        let (Some(input), Some(result), Some(token), Some(triggered)) = (
            latest_input.as_ref(),
            latest_result.as_ref(),
            latest_token.as_ref(),
            latest_triggered.as_ref(),
        ) else {
            continue;
        };

        let (combined, decision) =
            classify(input, result, *token, triggered, &wiring.eq, wiring.with_trigger);
        if tx.send(combined).await.is_err() {
            break;
        }

        match decision {
            Decision::Settled => {
                disarm(&mut armed);
            }
            Decision::AwaitTrigger => {
                let rearm = match &armed {
                    Some((armed_for, _)) => !(wiring.eq)(armed_for, input),
                    None => true,
                };
                if rearm {
                    disarm(&mut armed);
                    armed = Some((input.clone(), arm_trigger(&store, &wiring, input.clone())));
                }
                debounce_sleep = None;
                pending_launch = None;
            }
            Decision::Launch => {
                disarm(&mut armed);
                let same_run = current_run
                    .as_ref()
                    .is_some_and(|(i, t)| (wiring.eq)(i, input) && *t == *token);
                if !same_run {
                    current_run = Some((input.clone(), *token));
                    let plan = LaunchPlan {
                        input: input.clone(),
                        token: *token,
                        previous_input: result.result_input.clone(),
                        previous_result: result.result.clone(),
                    };
                    match wiring.debounce {
                        Some(duration) => {
                            pending_launch = Some(plan);
                            debounce_sleep = Some(Box::pin(tokio::time::sleep(duration)));
                        }
                        None => launch(&store, &wiring, &effect_ctx, &mut in_flight, plan),
                    }
                }
            }
        }
    }

    // Teardown: the effect must not outlive the combined subscription.
    if let Some(handle) = in_flight.take() {
        handle.abort();
    }
    disarm(&mut armed);
}

fn disarm<I>(armed: &mut Option<(I, JoinHandle<()>)>) {
    if let Some((_, handle)) = armed.take() {
        handle.abort();
    }
}

/// Map the next `trigger` occurrence to a triggered-input event carrying the
/// input that was awaiting it.
fn arm_trigger<I, R, E>(store: &Store, wiring: &MachineWiring<I, R, E>, input: I) -> JoinHandle<()>
where
    I: Clone + PartialEq + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
    E: Clone + PartialEq + Send + Sync + 'static,
{
    let store = store.clone();
    let trigger = wiring.trigger.clone();
    let triggered_event = wiring.triggered_event.clone();
    tokio::spawn(async move {
        let mut triggers = store.get_event_stream(&trigger);
        if triggers.recv().await.is_ok() {
            if let Err(err) = store.dispatch(&triggered_event, input).await {
                tracing::warn!(error = %err, "trigger arming dispatch failed");
            }
        }
    })
}

fn launch<I, R, E>(
    store: &Store,
    wiring: &MachineWiring<I, R, E>,
    effect_ctx: &EffectContext,
    in_flight: &mut Option<JoinHandle<()>>,
    plan: LaunchPlan<I, R>,
) where
    I: Clone + PartialEq + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
    E: Clone + PartialEq + Send + Sync + 'static,
{
    // Switch-latest: a newer stale input cancels the in-flight invocation.
    if let Some(previous) = in_flight.take() {
        previous.abort();
    }
    *in_flight = Some(tokio::spawn(run_effect(
        store.clone(),
        wiring.clone(),
        effect_ctx.clone(),
        plan,
    )));
}

/// One effect invocation: adapt the effect's sequence into result events and
/// success/error events, dispatched as atomic batches.
///
/// Values are re-flagged one step late so the final value of a terminating
/// sequence carries `completed: true` - each produced value is dispatched
/// exactly once.
async fn run_effect<I, R, E>(
    store: Store,
    wiring: MachineWiring<I, R, E>,
    effect_ctx: EffectContext,
    plan: LaunchPlan<I, R>,
) where
    I: Clone + PartialEq + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
    E: Clone + PartialEq + Send + Sync + 'static,
{
    let effect = store.effect_handle(&wiring.effect).await;
    let effect = match &wiring.wrap {
        Some(wrap) => wrap(effect),
        None => effect,
    };
    let mut sequence = effect.run(
        plan.input.clone(),
        &effect_ctx,
        plan.previous_input.clone(),
        plan.previous_result.clone(),
    );

    let mut held: Option<R> = None;
    loop {
        match sequence.next().await {
            Some(Ok(value)) => {
                if let Some(previous) = held.replace(value) {
                    dispatch_step(&store, &wiring, &plan, MaybeValue::Value(previous), false).await;
                }
            }
            Some(Err(error)) => {
                let batch = vec![
                    TypedEvent::new(
                        &wiring.errors,
                        EffectError {
                            error: error.clone(),
                            error_input: plan.input.clone(),
                        },
                    ),
                    TypedEvent::new(
                        &wiring.result_event,
                        ResultState {
                            result: MaybeValue::NoValue,
                            result_input: MaybeValue::Value(plan.input.clone()),
                            result_error: Some(error),
                            result_token: plan.token,
                            completed: true,
                        },
                    ),
                ];
                if let Err(err) = store.dispatch_all(batch).await {
                    tracing::warn!(error = %err, "effect error dispatch failed");
                }
                return;
            }
            None => {
                let last = held.take().map_or(MaybeValue::NoValue, MaybeValue::Value);
                dispatch_step(&store, &wiring, &plan, last, true).await;
                return;
            }
        }
    }
}

async fn dispatch_step<I, R, E>(
    store: &Store,
    wiring: &MachineWiring<I, R, E>,
    plan: &LaunchPlan<I, R>,
    value: MaybeValue<R>,
    completed: bool,
) where
    I: Clone + PartialEq + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
    E: Clone + PartialEq + Send + Sync + 'static,
{
    let batch = vec![
        TypedEvent::new(
            &wiring.result_event,
            ResultState {
                result: value.clone(),
                result_input: MaybeValue::Value(plan.input.clone()),
                result_error: None,
                result_token: plan.token,
                completed,
            },
        ),
        TypedEvent::new(
            &wiring.successes,
            EffectSuccess {
                result: value,
                result_input: plan.input.clone(),
                previous_input: plan.previous_input.clone(),
                previous_result: plan.previous_result.clone(),
                completed,
            },
        ),
    ];
    if let Err(err) = store.dispatch_all(batch).await {
        tracing::warn!(error = %err, "effect result dispatch failed");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
