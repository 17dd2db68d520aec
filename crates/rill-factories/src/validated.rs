//! Validated-Input-With-Result
//!
//! Two effect machines composed by the algebra: a validation effect over the
//! raw input, and a result effect whose input is fed by a filter over the
//! validation's combined behavior retaining only inputs that validated as
//! valid. The result effect can never observe an invalid input, and runs
//! once per distinct valid input under the configured input equality.

use std::sync::Arc;

use futures::StreamExt;

use rill_core::{DerivedId, EffectId, EventId, MaybeValue};
use rill_store::{SourceContext, Store};

use crate::effect_signals::{
    effect_signals_factory, CombinedEffectResult, EffectConfiguration, EffectError, EffectSuccess,
};
use crate::factory::SignalsFactory;
use crate::signals::{Setup, Signals};

// ─────────────────────────────────────────────────────────────────────────────
// Identifier maps
// ─────────────────────────────────────────────────────────────────────────────

/// Input identifiers of the validated-input pattern.
#[derive(Debug, Clone)]
pub struct ValidatedInputSignals<I> {
    /// The raw input behavior; connect a source to drive it.
    pub input: DerivedId<I>,
    /// Forces revalidation of the current input.
    pub validation_invalidate: EventId<()>,
    /// Forces recomputation of the current result.
    pub result_invalidate: EventId<()>,
    /// Arms one result computation when the result machine is
    /// trigger-gated.
    pub result_trigger: EventId<()>,
}

/// Output identifiers of the validated-input pattern.
#[derive(Debug, Clone)]
pub struct ValidatedOutputSignals<I, V, R, E> {
    /// Combined view of the validation machine.
    pub validation_combined: DerivedId<CombinedEffectResult<I, V, E>>,
    /// Settled validation results.
    pub validation_result: DerivedId<V>,
    /// True while the current input is being validated.
    pub validation_pending: DerivedId<bool>,
    /// Validation failures.
    pub validation_errors: EventId<EffectError<I, E>>,
    /// Validation successes.
    pub validation_successes: EventId<EffectSuccess<I, V>>,
    /// True when the current input's validation settled valid.
    pub is_valid: DerivedId<bool>,
    /// Combined view of the result machine.
    pub result_combined: DerivedId<CombinedEffectResult<I, R, E>>,
    /// Settled results for valid inputs.
    pub result: DerivedId<R>,
    /// True while a valid input's result is being computed.
    pub result_pending: DerivedId<bool>,
    /// Result-effect failures.
    pub result_errors: EventId<EffectError<I, E>>,
    /// Result-effect successes.
    pub result_successes: EventId<EffectSuccess<I, R>>,
    /// Result-effect successes whose sequence terminated.
    pub result_completed_successes: EventId<EffectSuccess<I, R>>,
}

/// Effect identifiers of the validated-input pattern.
#[derive(Debug, Clone)]
pub struct ValidatedEffects<I, V, R, E> {
    /// The validation effect.
    pub validation_effect: EffectId<I, V, E>,
    /// The result effect.
    pub result_effect: EffectId<I, R, E>,
}

/// Configuration of the validated-input pattern.
pub struct ValidatedInputConfig<I, V, R, E> {
    /// Configuration of the validation machine.
    pub validation: EffectConfiguration<I, V, E>,
    /// Configuration of the result machine.
    pub result: EffectConfiguration<I, R, E>,
    /// Decides whether a settled validation result admits the input to the
    /// result effect.
    pub is_validation_result_valid: Arc<dyn Fn(&V) -> bool + Send + Sync>,
    /// Gate the result machine on `result_trigger`.
    pub with_result_trigger: bool,
}

impl<I, V, R, E> Clone for ValidatedInputConfig<I, V, R, E> {
    fn clone(&self) -> Self {
        Self {
            validation: self.validation.clone(),
            result: self.result.clone(),
            is_validation_result_valid: Arc::clone(&self.is_validation_result_valid),
            with_result_trigger: self.with_result_trigger,
        }
    }
}

impl<I: PartialEq, V, R, E> Default for ValidatedInputConfig<I, V, R, E> {
    fn default() -> Self {
        Self {
            validation: EffectConfiguration::default(),
            result: EffectConfiguration::default(),
            is_validation_result_valid: Arc::new(|_| true),
            with_result_trigger: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Factory
// ─────────────────────────────────────────────────────────────────────────────

/// Build the validated-input-with-result factory.
pub fn validated_input_with_result_factory<I, V, R, E>() -> SignalsFactory<
    ValidatedInputSignals<I>,
    ValidatedOutputSignals<I, V, R, E>,
    ValidatedEffects<I, V, R, E>,
    ValidatedInputConfig<I, V, R, E>,
>
where
    I: Clone + PartialEq + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
    E: Clone + PartialEq + Send + Sync + 'static,
{
    effect_signals_factory::<I, V, E>()
        .compose(effect_signals_factory::<I, R, E>())
        .map_config(|config: ValidatedInputConfig<I, V, R, E>| {
            let mut result = config.result.clone();
            if config.with_result_trigger {
                result.with_trigger = true;
            }
            (config.validation.clone(), result)
        })
        .bind(|input, output, effects| {
            let input = input.clone();
            let output = output.clone();
            let effects = effects.clone();
            SignalsFactory::new(move |config: ValidatedInputConfig<I, V, R, E>| {
                let (validation_in, result_in) = input.clone();
                let (validation_out, result_out) = output.clone();
                let (validation_eff, result_eff) = effects.clone();

                let is_valid: DerivedId<bool> = DerivedId::named("is-valid");

                let surface_input = ValidatedInputSignals {
                    input: validation_in.input.clone(),
                    validation_invalidate: validation_in.invalidate.clone(),
                    result_invalidate: result_in.invalidate.clone(),
                    result_trigger: result_in.trigger.clone(),
                };
                let surface_output = ValidatedOutputSignals {
                    validation_combined: validation_out.combined.clone(),
                    validation_result: validation_out.result.clone(),
                    validation_pending: validation_out.pending.clone(),
                    validation_errors: validation_out.errors.clone(),
                    validation_successes: validation_out.successes.clone(),
                    is_valid: is_valid.clone(),
                    result_combined: result_out.combined.clone(),
                    result: result_out.result.clone(),
                    result_pending: result_out.pending.clone(),
                    result_errors: result_out.errors.clone(),
                    result_successes: result_out.successes.clone(),
                    result_completed_successes: result_out.completed_successes.clone(),
                };
                let surface_effects = ValidatedEffects {
                    validation_effect: validation_eff.effect.clone(),
                    result_effect: result_eff.effect.clone(),
                };

                let predicate = Arc::clone(&config.is_validation_result_valid);
                let validation_combined = validation_out.combined.clone();
                let result_input = result_in.input.clone();
                let setup = Setup::new(move |store: &Store| {
                    // Valid, settled inputs flow on to the result machine.
                    let filter_predicate = Arc::clone(&predicate);
                    let filter_combined = validation_combined.clone();
                    let connected = store.connect_observable(
                        move |ctx: &SourceContext| {
                            let predicate = Arc::clone(&filter_predicate);
                            ctx.get_behavior(filter_combined.clone()).filter_map(
                                move |c: CombinedEffectResult<I, V, E>| {
                                    let admitted = !c.result_pending
                                        && c.result_error.is_none()
                                        && matches!(&c.result, MaybeValue::Value(v) if predicate(v));
                                    futures::future::ready(match (admitted, c.result_input) {
                                        (true, MaybeValue::Value(input)) => Some(input),
                                        _ => None,
                                    })
                                },
                            )
                        },
                        result_input.clone(),
                        true,
                    );
                    if let Err(err) = connected {
                        tracing::warn!(error = %err, "validated-input wiring failed");
                    }

                    let valid_predicate = Arc::clone(&predicate);
                    let valid_combined = validation_combined.clone();
                    let registered = store.add_derived_state(
                        &is_valid,
                        move |ctx: &SourceContext| {
                            let predicate = Arc::clone(&valid_predicate);
                            ctx.get_behavior(valid_combined.clone()).map(
                                move |c: CombinedEffectResult<I, V, E>| {
                                    !c.result_pending
                                        && c.result_error.is_none()
                                        && matches!(&c.result, MaybeValue::Value(v) if predicate(v))
                                },
                            )
                        },
                        Some(false),
                    );
                    if let Err(err) = registered {
                        tracing::warn!(error = %err, "is-valid wiring failed");
                    }
                });

                Signals {
                    input: surface_input,
                    output: surface_output,
                    effects: surface_effects,
                    setup,
                }
            })
        })
}
