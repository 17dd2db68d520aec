//! Signals-Factory Algebra
//!
//! A [`SignalsFactory`] is an immutable value wrapping a pure
//! `build(config) -> Signals`. Every operation returns a new factory; none
//! mutates the receiver. Composition is value-level: identifier maps are
//! plain structs, and [`compose`](SignalsFactory::compose) merges two
//! factories' maps into tuples, which keeps colliding names apart with full
//! type safety.
//!
//! The algebra is the only place wiring concerns live: factories for the
//! effect machine, model buffers, or whole patterns never know what they are
//! composed with; `extend_setup` and `connect` splice the seams.

use std::sync::Arc;

use futures::Stream;

use rill_core::{BehaviorId, DerivedId, EffectId};
use rill_store::{BoxedStream, SourceContext, Store};

use crate::signals::{Setup, Signals};

/// An immutable factory of [`Signals`] wirings.
pub struct SignalsFactory<IN, OUT, EFF, CFG> {
    build: Arc<dyn Fn(CFG) -> Signals<IN, OUT, EFF> + Send + Sync>,
}

impl<IN, OUT, EFF, CFG> Clone for SignalsFactory<IN, OUT, EFF, CFG> {
    fn clone(&self) -> Self {
        Self {
            build: Arc::clone(&self.build),
        }
    }
}

impl<IN, OUT, EFF, CFG> SignalsFactory<IN, OUT, EFF, CFG>
where
    IN: Send + Sync + 'static,
    OUT: Send + Sync + 'static,
    EFF: Send + Sync + 'static,
    CFG: Send + Sync + 'static,
{
    /// Wrap a pure build function.
    pub fn new(build: impl Fn(CFG) -> Signals<IN, OUT, EFF> + Send + Sync + 'static) -> Self {
        Self {
            build: Arc::new(build),
        }
    }

    /// Build the signals for `config`. Pure: only the returned
    /// [`Setup`](crate::signals::Setup) has effects.
    pub fn build(&self, config: CFG) -> Signals<IN, OUT, EFF> {
        (self.build)(config)
    }

    // ─── Composition ─────────────────────────────────────────────────────────

    /// Merge two factories. Identifier maps and configs nest into tuples, so
    /// the two halves stay apart with full type safety.
    pub fn compose<IN2, OUT2, EFF2, CFG2>(
        self,
        other: SignalsFactory<IN2, OUT2, EFF2, CFG2>,
    ) -> SignalsFactory<(IN, IN2), (OUT, OUT2), (EFF, EFF2), (CFG, CFG2)>
    where
        IN2: Send + Sync + 'static,
        OUT2: Send + Sync + 'static,
        EFF2: Send + Sync + 'static,
        CFG2: Send + Sync + 'static,
    {
        SignalsFactory::new(move |(c1, c2): (CFG, CFG2)| {
            let Signals {
                input: i1,
                output: o1,
                effects: e1,
                setup: s1,
            } = self.build(c1);
            let Signals {
                input: i2,
                output: o2,
                effects: e2,
                setup: s2,
            } = other.build(c2);
            Signals {
                input: (i1, i2),
                output: (o1, o2),
                effects: (e1, e2),
                setup: Setup::new(move |store| {
                    s1.run(store);
                    s2.run(store);
                }),
            }
        })
    }

    /// Run `extension` after the original setup, with access to the built
    /// identifier maps and the config. This is how composed halves get wired
    /// to each other.
    pub fn extend_setup(
        self,
        extension: impl Fn(&Store, &IN, &OUT, &EFF, &CFG) + Send + Sync + 'static,
    ) -> Self
    where
        IN: Clone,
        OUT: Clone,
        EFF: Clone,
        CFG: Clone,
    {
        let extension = Arc::new(extension);
        SignalsFactory::new(move |config: CFG| {
            let config_for_setup = config.clone();
            let Signals {
                input,
                output,
                effects,
                setup,
            } = self.build(config);
            let ids = (input.clone(), output.clone(), effects.clone());
            let extension = Arc::clone(&extension);
            Signals {
                input,
                output,
                effects,
                setup: setup.and_then(move |store| {
                    extension(store, &ids.0, &ids.1, &ids.2, &config_for_setup);
                }),
            }
        })
    }

    /// Monadic bind: derive a follow-up factory from the built identifier
    /// maps. The follow-up's build runs with the same config; both setups
    /// run, original first.
    pub fn bind<IN2, OUT2, EFF2>(
        self,
        mapper: impl Fn(&IN, &OUT, &EFF) -> SignalsFactory<IN2, OUT2, EFF2, CFG> + Send + Sync + 'static,
    ) -> SignalsFactory<IN2, OUT2, EFF2, CFG>
    where
        IN2: Send + Sync + 'static,
        OUT2: Send + Sync + 'static,
        EFF2: Send + Sync + 'static,
        CFG: Clone,
    {
        SignalsFactory::new(move |config: CFG| {
            let Signals {
                input,
                output,
                effects,
                setup,
            } = self.build(config.clone());
            let Signals {
                input: input2,
                output: output2,
                effects: effects2,
                setup: setup2,
            } = mapper(&input, &output, &effects).build(config);
            Signals {
                input: input2,
                output: output2,
                effects: effects2,
                setup: Setup::new(move |store| {
                    setup.run(store);
                    setup2.run(store);
                }),
            }
        })
    }

    // ─── Map operations ──────────────────────────────────────────────────────

    /// Reshape the input identifier map.
    pub fn map_input<IN2>(
        self,
        f: impl Fn(IN) -> IN2 + Send + Sync + 'static,
    ) -> SignalsFactory<IN2, OUT, EFF, CFG>
    where
        IN2: Send + Sync + 'static,
    {
        SignalsFactory::new(move |config| {
            let signals = self.build(config);
            Signals {
                input: f(signals.input),
                output: signals.output,
                effects: signals.effects,
                setup: signals.setup,
            }
        })
    }

    /// Reshape the output identifier map.
    pub fn map_output<OUT2>(
        self,
        f: impl Fn(OUT) -> OUT2 + Send + Sync + 'static,
    ) -> SignalsFactory<IN, OUT2, EFF, CFG>
    where
        OUT2: Send + Sync + 'static,
    {
        SignalsFactory::new(move |config| {
            let signals = self.build(config);
            Signals {
                input: signals.input,
                output: f(signals.output),
                effects: signals.effects,
                setup: signals.setup,
            }
        })
    }

    /// Reshape the effects identifier map.
    pub fn map_effects<EFF2>(
        self,
        f: impl Fn(EFF) -> EFF2 + Send + Sync + 'static,
    ) -> SignalsFactory<IN, OUT, EFF2, CFG>
    where
        EFF2: Send + Sync + 'static,
    {
        SignalsFactory::new(move |config| {
            let signals = self.build(config);
            Signals {
                input: signals.input,
                output: signals.output,
                effects: f(signals.effects),
                setup: signals.setup,
            }
        })
    }

    /// Adapt the factory to a different config type. `f` maps the new config
    /// to the original one.
    pub fn map_config<CFG2>(
        self,
        f: impl Fn(CFG2) -> CFG + Send + Sync + 'static,
    ) -> SignalsFactory<IN, OUT, EFF, CFG2>
    where
        CFG2: Send + Sync + 'static,
    {
        SignalsFactory::new(move |config: CFG2| self.build(f(config)))
    }

    // ─── Wiring sugar ────────────────────────────────────────────────────────

    /// Extend setup to connect one of this factory's output behaviors to one
    /// of its input behaviors.
    ///
    /// The input id stays on the surface; reshape it away with
    /// [`map_input`](SignalsFactory::map_input) when the connection makes it
    /// internal.
    pub fn connect<T>(
        self,
        pick_output: impl Fn(&OUT) -> BehaviorId<T> + Send + Sync + 'static,
        pick_input: impl Fn(&IN) -> BehaviorId<T> + Send + Sync + 'static,
        lazy: Option<bool>,
    ) -> Self
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        IN: Clone,
        OUT: Clone,
        EFF: Clone,
        CFG: Clone,
    {
        self.extend_setup(move |store, input, output, _effects, _config| {
            if let Err(err) = store.connect(pick_output(output), pick_input(input), lazy) {
                tracing::warn!(error = %err, "factory connect failed");
            }
        })
    }

    /// Extend setup to connect an arbitrary stream to one of this factory's
    /// input behaviors.
    pub fn connect_observable<T, S>(
        self,
        build: impl Fn(&SourceContext) -> S + Send + Sync + 'static,
        pick_input: impl Fn(&IN) -> BehaviorId<T> + Send + Sync + 'static,
        lazy: bool,
    ) -> Self
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        S: Stream<Item = T> + Send + 'static,
        IN: Clone,
        OUT: Clone,
        EFF: Clone,
        CFG: Clone,
    {
        let build = Arc::new(build);
        self.extend_setup(move |store, input, _output, _effects, _config| {
            let build = Arc::clone(&build);
            let connected =
                store.connect_observable(move |ctx: &SourceContext| build(ctx), pick_input(input), lazy);
            if let Err(err) = connected {
                tracing::warn!(error = %err, "factory connect_observable failed");
            }
        })
    }

    /// Replace an output behavior with a fresh derived behavior wrapping the
    /// original through a stream transform.
    pub fn map_output_behavior<T, U, OUT2>(
        self,
        pick: impl Fn(&OUT) -> BehaviorId<T> + Send + Sync + 'static,
        inject: impl Fn(OUT, DerivedId<U>) -> OUT2 + Send + Sync + 'static,
        transform: impl Fn(BoxedStream<T>) -> BoxedStream<U> + Send + Sync + 'static,
    ) -> SignalsFactory<IN, OUT2, EFF, CFG>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        U: Clone + PartialEq + Send + Sync + 'static,
        OUT2: Send + Sync + 'static,
    {
        use futures::StreamExt;

        let transform = Arc::new(transform);
        SignalsFactory::new(move |config| {
            let Signals {
                input,
                output,
                effects,
                setup,
            } = self.build(config);
            let wrapped: DerivedId<U> = DerivedId::new();
            let original = pick(&output);
            let transform = Arc::clone(&transform);
            let wrapped_for_setup = wrapped.clone();
            Signals {
                input,
                output: inject(output, wrapped),
                effects,
                setup: setup.and_then(move |store| {
                    let registered = store.add_derived_state(
                        &wrapped_for_setup,
                        move |ctx: &SourceContext| {
                            transform(ctx.get_behavior(original.clone()).boxed())
                        },
                        None,
                    );
                    if let Err(err) = registered {
                        tracing::warn!(error = %err, "factory map_output_behavior failed");
                    }
                }),
            }
        })
    }

    /// Extend setup to back one of this factory's effect ids by an effect
    /// already registered in the store (resolved from the config).
    pub fn use_existing_effect<I, R, E>(
        self,
        existing: impl Fn(&CFG) -> EffectId<I, R, E> + Send + Sync + 'static,
        pick_effect: impl Fn(&EFF) -> EffectId<I, R, E> + Send + Sync + 'static,
    ) -> Self
    where
        I: 'static,
        R: 'static,
        E: 'static,
        IN: Clone,
        OUT: Clone,
        EFF: Clone,
        CFG: Clone,
    {
        self.extend_setup(move |store, _input, _output, effects, config| {
            store.copy_effect(&existing(config), &pick_effect(effects));
        })
    }

    // ─── Identifier-map sugar ────────────────────────────────────────────────

    /// Add a freshly minted identifier to the input map.
    pub fn add_input_id<ID, IN2>(
        self,
        mint: impl Fn() -> ID + Send + Sync + 'static,
        merge: impl Fn(IN, ID) -> IN2 + Send + Sync + 'static,
    ) -> SignalsFactory<IN2, OUT, EFF, CFG>
    where
        IN2: Send + Sync + 'static,
    {
        self.map_input(move |input| merge(input, mint()))
    }

    /// Add a freshly minted identifier to the output map.
    pub fn add_output_id<ID, OUT2>(
        self,
        mint: impl Fn() -> ID + Send + Sync + 'static,
        merge: impl Fn(OUT, ID) -> OUT2 + Send + Sync + 'static,
    ) -> SignalsFactory<IN, OUT2, EFF, CFG>
    where
        OUT2: Send + Sync + 'static,
    {
        self.map_output(move |output| merge(output, mint()))
    }

    /// Add a freshly minted identifier to the effects map.
    pub fn add_effect_id<ID, EFF2>(
        self,
        mint: impl Fn() -> ID + Send + Sync + 'static,
        merge: impl Fn(EFF, ID) -> EFF2 + Send + Sync + 'static,
    ) -> SignalsFactory<IN, OUT, EFF2, CFG>
    where
        EFF2: Send + Sync + 'static,
    {
        self.map_effects(move |effects| merge(effects, mint()))
    }

    /// Rename (reshape) the input map; identical to
    /// [`map_input`](SignalsFactory::map_input), kept for intent at call
    /// sites. Applying a rename and its inverse restores the original shape.
    pub fn rename_input_id<IN2>(
        self,
        reshape: impl Fn(IN) -> IN2 + Send + Sync + 'static,
    ) -> SignalsFactory<IN2, OUT, EFF, CFG>
    where
        IN2: Send + Sync + 'static,
    {
        self.map_input(reshape)
    }

    /// Rename (reshape) the output map.
    pub fn rename_output_id<OUT2>(
        self,
        reshape: impl Fn(OUT) -> OUT2 + Send + Sync + 'static,
    ) -> SignalsFactory<IN, OUT2, EFF, CFG>
    where
        OUT2: Send + Sync + 'static,
    {
        self.map_output(reshape)
    }

    /// Drop identifiers from the input map.
    pub fn remove_input_id<IN2>(
        self,
        reshape: impl Fn(IN) -> IN2 + Send + Sync + 'static,
    ) -> SignalsFactory<IN2, OUT, EFF, CFG>
    where
        IN2: Send + Sync + 'static,
    {
        self.map_input(reshape)
    }

    /// Drop identifiers from the output map.
    pub fn remove_output_id<OUT2>(
        self,
        reshape: impl Fn(OUT) -> OUT2 + Send + Sync + 'static,
    ) -> SignalsFactory<IN, OUT2, EFF, CFG>
    where
        OUT2: Send + Sync + 'static,
    {
        self.map_output(reshape)
    }
}
