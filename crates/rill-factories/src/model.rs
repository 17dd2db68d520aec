//! Model Signals
//!
//! A model is a root state with the trivial edit events: `set` replaces the
//! buffer, `update` applies a pure updater, `reset` restores the configured
//! default. The entity-edit pattern composes one of these as its edit
//! buffer.

use std::sync::Arc;

use rill_core::{EventId, StateId};
use rill_store::Store;

use crate::factory::SignalsFactory;
use crate::signals::{Setup, Signals};

/// A pure updater carried by the `update` event.
pub type ModelUpdateFn<T> = Arc<dyn Fn(&T) -> T + Send + Sync>;

/// Input identifiers of a model.
#[derive(Debug, Clone)]
pub struct ModelInputSignals<T> {
    /// Replace the buffer.
    pub set: EventId<T>,
    /// Apply a pure updater to the buffer.
    pub update: EventId<ModelUpdateFn<T>>,
    /// Restore the configured default.
    pub reset: EventId<()>,
}

/// Output identifiers of a model.
#[derive(Debug, Clone)]
pub struct ModelOutputSignals<T> {
    /// The buffer state.
    pub model: StateId<T>,
}

/// Configuration of a model: its default value.
#[derive(Debug, Clone)]
pub struct ModelConfig<T> {
    /// Value the buffer starts at and resets to.
    pub default_model: T,
}

/// Build a model factory for buffer type `T`.
pub fn model_signals_factory<T>(
) -> SignalsFactory<ModelInputSignals<T>, ModelOutputSignals<T>, (), ModelConfig<T>>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    SignalsFactory::new(|config: ModelConfig<T>| {
        let set: EventId<T> = EventId::named("model-set");
        let update: EventId<ModelUpdateFn<T>> = EventId::named("model-update");
        let reset: EventId<()> = EventId::named("model-reset");
        let model: StateId<T> = StateId::named("model");

        let inputs = ModelInputSignals {
            set: set.clone(),
            update: update.clone(),
            reset: reset.clone(),
        };
        let outputs = ModelOutputSignals {
            model: model.clone(),
        };
        let default_model = config.default_model.clone();

        let setup = Setup::new(move |store: &Store| {
            let registered = (|| {
                store.add_state(&model, default_model.clone())?;
                store.add_reducer(&model, &set, |_, value| value.clone())?;
                store.add_reducer(&model, &update, |current, updater| updater(current))?;
                let reset_to = default_model.clone();
                store.add_reducer(&model, &reset, move |_, ()| reset_to.clone())?;
                Ok::<(), rill_core::StoreError>(())
            })();
            if let Err(err) = registered {
                tracing::warn!(error = %err, "model setup failed");
            }
        });

        Signals {
            input: inputs,
            output: outputs,
            effects: (),
            setup,
        }
    })
}
