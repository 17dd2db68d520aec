//! Entity-Edit
//!
//! Load effect + edit buffer + save effect, composed by the algebra:
//!
//! - the load machine maps a key (or `None` for a fresh entity) to an
//!   entity; its results seed the edit buffer eagerly, so the buffer fills
//!   even when only the model is watched;
//! - the buffer is a model with `set`/`update`/`reset`, where `reset`
//!   restores the last loaded entity (or the configured default before any
//!   load);
//! - the save machine tracks the buffer as its input and is trigger-gated:
//!   nothing is persisted until `save_trigger` is dispatched.

use rill_core::{DerivedId, EffectId, EventId, StateId};
use rill_store::{SourceContext, Store};

use crate::effect_signals::{
    effect_signals_factory, CombinedEffectResult, EffectConfiguration, EffectError, EffectSuccess,
};
use crate::factory::SignalsFactory;
use crate::model::{model_signals_factory, ModelConfig, ModelUpdateFn};
use crate::signals::{Setup, Signals};
use crate::util::with_latest_from;

use futures::StreamExt;

// ─────────────────────────────────────────────────────────────────────────────
// Identifier maps
// ─────────────────────────────────────────────────────────────────────────────

/// Input identifiers of the entity-edit pattern.
#[derive(Debug, Clone)]
pub struct EntityEditInput<K, T> {
    /// The key to load; `None` loads nothing and leaves the default entity.
    pub load_key: DerivedId<Option<K>>,
    /// Forces a reload of the current key.
    pub load_invalidate: EventId<()>,
    /// Replace the edit buffer.
    pub set: EventId<T>,
    /// Apply a pure updater to the edit buffer.
    pub update: EventId<ModelUpdateFn<T>>,
    /// Restore the last loaded entity (or the default before any load).
    pub reset: EventId<()>,
    /// Arms one save of the current buffer.
    pub save_trigger: EventId<()>,
    /// Forces re-saving of the current buffer.
    pub save_invalidate: EventId<()>,
}

/// Output identifiers of the entity-edit pattern.
#[derive(Debug, Clone)]
pub struct EntityEditOutput<K, T, E> {
    /// The edit buffer.
    pub model: StateId<T>,
    /// Combined view of the load machine.
    pub load_combined: DerivedId<CombinedEffectResult<Option<K>, T, E>>,
    /// True while an entity is loading.
    pub load_pending: DerivedId<bool>,
    /// Load failures.
    pub load_errors: EventId<EffectError<Option<K>, E>>,
    /// Combined view of the save machine.
    pub save_combined: DerivedId<CombinedEffectResult<T, K, E>>,
    /// True while the buffer is being saved.
    pub save_pending: DerivedId<bool>,
    /// Save failures.
    pub save_errors: EventId<EffectError<T, E>>,
    /// Completed saves, carrying the persisted key.
    pub save_completed_successes: EventId<EffectSuccess<T, K>>,
}

/// Effect identifiers of the entity-edit pattern.
#[derive(Debug, Clone)]
pub struct EntityEditEffects<K, T, E> {
    /// Key → entity.
    pub load_effect: EffectId<Option<K>, T, E>,
    /// Entity → persisted key.
    pub save_effect: EffectId<T, K, E>,
}

/// Configuration of the entity-edit pattern.
pub struct EntityEditConfig<K, T, E> {
    /// Configuration of the load machine.
    pub load: EffectConfiguration<Option<K>, T, E>,
    /// Configuration of the save machine; trigger gating is forced on.
    pub save: EffectConfiguration<T, K, E>,
    /// The entity used before anything was loaded.
    pub default_entity: T,
}

impl<K, T, E> Clone for EntityEditConfig<K, T, E>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        Self {
            load: self.load.clone(),
            save: self.save.clone(),
            default_entity: self.default_entity.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Factory
// ─────────────────────────────────────────────────────────────────────────────

/// Build the entity-edit factory for key `K`, entity `T`, error `E`.
pub fn entity_edit_factory<K, T, E>() -> SignalsFactory<
    EntityEditInput<K, T>,
    EntityEditOutput<K, T, E>,
    EntityEditEffects<K, T, E>,
    EntityEditConfig<K, T, E>,
>
where
    K: Clone + PartialEq + Send + Sync + 'static,
    T: Clone + PartialEq + Send + Sync + 'static,
    E: Clone + PartialEq + Send + Sync + 'static,
{
    effect_signals_factory::<Option<K>, T, E>()
        .compose(model_signals_factory::<T>())
        .compose(effect_signals_factory::<T, K, E>())
        .map_config(|config: EntityEditConfig<K, T, E>| {
            let mut save = config.save.clone();
            save.with_trigger = true;
            (
                (
                    config.load.clone(),
                    ModelConfig {
                        default_model: config.default_entity.clone(),
                    },
                ),
                save,
            )
        })
        .bind(|input, output, effects| {
            let input = input.clone();
            let output = output.clone();
            let effects = effects.clone();
            SignalsFactory::new(move |config: EntityEditConfig<K, T, E>| {
                let ((load_in, model_in), save_in) = input.clone();
                let ((load_out, model_out), save_out) = output.clone();
                let ((load_eff, ()), save_eff) = effects.clone();

                let surface_input = EntityEditInput {
                    load_key: load_in.input.clone(),
                    load_invalidate: load_in.invalidate.clone(),
                    set: model_in.set.clone(),
                    update: model_in.update.clone(),
                    reset: model_in.reset.clone(),
                    save_trigger: save_in.trigger.clone(),
                    save_invalidate: save_in.invalidate.clone(),
                };
                let surface_output = EntityEditOutput {
                    model: model_out.model.clone(),
                    load_combined: load_out.combined.clone(),
                    load_pending: load_out.pending.clone(),
                    load_errors: load_out.errors.clone(),
                    save_combined: save_out.combined.clone(),
                    save_pending: save_out.pending.clone(),
                    save_errors: save_out.errors.clone(),
                    save_completed_successes: save_out.completed_successes.clone(),
                };
                let surface_effects = EntityEditEffects {
                    load_effect: load_eff.effect.clone(),
                    save_effect: save_eff.effect.clone(),
                };

                let default_entity = config.default_entity.clone();
                let load_result = load_out.result.clone();
                let model_state = model_out.model.clone();
                let model_set = model_in.set.clone();
                let model_reset = model_in.reset.clone();
                let save_input = save_in.input.clone();
                let setup = Setup::new(move |store: &Store| {
                    // Loaded entities seed the buffer; eager so the buffer
                    // fills while only the model is watched.
                    if let Err(err) =
                        store.connect_behavior_to_event(load_result.clone(), &model_set, Some(false))
                    {
                        tracing::warn!(error = %err, "entity-edit load wiring failed");
                    }

                    // `reset` restores the last load instead of the model's
                    // plain default: replace the model's reset reducer by a
                    // sampling connection over the load results.
                    store.remove_reducer(&model_state, &model_reset);
                    let sample_result = load_result.clone();
                    let sample_default = default_entity.clone();
                    let connected = store.connect_observable_to_event(
                        move |ctx: &SourceContext| {
                            let resets = ctx.get_event_stream(&model_reset);
                            let loaded = futures::stream::iter(vec![None::<T>])
                                .chain(ctx.get_behavior(sample_result.clone()).map(Some));
                            let default_entity = sample_default.clone();
                            with_latest_from(resets, loaded)
                                .map(move |((), last)| last.unwrap_or_else(|| default_entity.clone()))
                        },
                        &model_set,
                        false,
                    );
                    if let Err(err) = connected {
                        tracing::warn!(error = %err, "entity-edit reset wiring failed");
                    }

                    // The buffer is the save machine's input.
                    if let Err(err) = store.connect(model_state.clone(), save_input.clone(), None) {
                        tracing::warn!(error = %err, "entity-edit save wiring failed");
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
