//! # Rill Factories - Layer 3: Composition
//!
//! **Purpose**: The immutable signals-factory algebra and the reusable
//! patterns built with it.
//!
//! A [`SignalsFactory`] wraps a pure `build(config) -> Signals` and supports
//! value-level composition: `compose`, `extend_setup`, `map_*`, `connect`,
//! `bind`. The shipped patterns are assembled from exactly these operations:
//!
//! - [`effect_signals_factory`]: the async-effect state machine (input
//!   change detection, debouncing, trigger gating, pending/success/error
//!   events, invalidation, switch-latest cancellation, guaranteed laziness
//!   of the effect);
//! - [`model_signals_factory`]: a root-state edit buffer with
//!   set/update/reset events;
//! - [`validated_input_with_result_factory`]: validation effect gating a
//!   result effect;
//! - [`entity_edit_factory`]: load effect + edit buffer + trigger-gated
//!   save effect.
//!
//! # Usage
//!
//! ```ignore
//! let factory = effect_signals_factory::<Query, Results, SearchError>();
//! let signals = factory.build(EffectConfiguration::default());
//! store.add_effect(&signals.effects.effect, search_effect);
//! store.connect(&query_state, &signals.input.input, None)?;
//! signals.setup.run(&store);
//!
//! let mut results = store.get_behavior(&signals.output.result);
//! ```

#![forbid(unsafe_code)]

pub mod effect_signals;
pub mod entity;
pub mod factory;
pub mod model;
pub mod signals;
mod util;
pub mod validated;

pub use effect_signals::{
    effect_signals_factory, CombinedEffectResult, EffectConfiguration, EffectError,
    EffectInputSignals, EffectOutputSignals, EffectSuccess, ResultState,
};
pub use entity::{
    entity_edit_factory, EntityEditConfig, EntityEditEffects, EntityEditInput, EntityEditOutput,
};
pub use factory::SignalsFactory;
pub use model::{
    model_signals_factory, ModelConfig, ModelInputSignals, ModelOutputSignals, ModelUpdateFn,
};
pub use signals::{Setup, Signals};
pub use validated::{
    validated_input_with_result_factory, ValidatedEffects, ValidatedInputConfig,
    ValidatedInputSignals, ValidatedOutputSignals,
};

// Re-export the effect machine's effects map under its full name.
pub use effect_signals::EffectEffects;
