//! Signals and Setup
//!
//! A [`Signals`] value is what a factory build produces: the identifier maps
//! handed to consumers (`input`, `output`, `effects`) plus the one
//! side-effecting entry point, [`Setup`], which registers all sources in a
//! store. Building is pure; nothing touches a store until `setup` runs.

use rill_store::Store;

/// The deferred registration step of a built [`Signals`] value.
pub struct Setup(Box<dyn FnOnce(&Store) + Send>);

impl Setup {
    /// Wrap a registration closure.
    pub fn new(f: impl FnOnce(&Store) + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    /// A setup that registers nothing.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// Run the registration against `store`.
    pub fn run(self, store: &Store) {
        (self.0)(store);
    }

    /// Chain another registration step after this one.
    pub fn and_then(self, f: impl FnOnce(&Store) + Send + 'static) -> Self {
        Self::new(move |store| {
            self.run(store);
            f(store);
        })
    }
}

/// The product of building a factory: identifier maps plus the setup step.
///
/// `input` carries the ids consumers dispatch or connect into, `output` the
/// ids they observe, `effects` the effect ids that must be backed by
/// [`Store::add_effect`] registrations.
pub struct Signals<IN, OUT, EFF> {
    /// Identifiers the wiring consumes.
    pub input: IN,
    /// Identifiers the wiring produces.
    pub output: OUT,
    /// Effect identifiers the wiring invokes.
    pub effects: EFF,
    /// Registers every source; the only side-effecting entry point.
    pub setup: Setup,
}
