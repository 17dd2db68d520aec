//! Error Taxonomy
//!
//! Fatal registration and lookup errors returned by store operations. These
//! are caller errors: returning one never poisons the store.
//!
//! Two error families deliberately do NOT appear here. User-effect failures
//! travel through designated error event channels, and upstream source
//! terminations are absorbed by subject recycling - neither is surfaced as a
//! [`StoreError`].

use crate::ids::SignalId;

/// Error type for store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    InvalidConfig {
        /// What was wrong with the configuration.
        message: String,
    },

    /// A source was added under an (id, name) pair already in use.
    #[error("duplicate source {name:?} for signal {id}")]
    DuplicateSource {
        /// The signal the source was added to.
        id: SignalId,
        /// The colliding source name.
        name: String,
    },

    /// A source was asserted to exist where none is registered.
    #[error("no source {name:?} registered for signal {id}")]
    MissingSource {
        /// The signal the source was looked up on.
        id: SignalId,
        /// The missing source name.
        name: String,
    },

    /// No effect is registered under the given identifier.
    #[error("no effect registered for {id}")]
    UnknownEffect {
        /// The effect identifier.
        id: SignalId,
    },

    /// The signal was completed and no longer accepts sources or values.
    #[error("signal {id} is completed")]
    SubjectCompleted {
        /// The completed signal.
        id: SignalId,
    },

    /// The subscription channel closed underneath a receiver.
    #[error("subscription closed for signal {id}")]
    SubscriptionClosed {
        /// The signal the subscription belonged to.
        id: SignalId,
    },

    /// An erased payload failed to downcast to the registered type.
    #[error("type mismatch for signal {id}: expected {expected}")]
    TypeMismatch {
        /// The signal the payload was destined for.
        id: SignalId,
        /// The expected payload type.
        expected: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::EventId;

    #[test]
    fn test_errors_carry_the_offending_id() {
        let id: EventId<u32> = EventId::named("inc");
        let err = StoreError::DuplicateSource {
            id: id.erased().clone(),
            name: "reducer".into(),
        };
        let shown = err.to_string();
        assert!(shown.contains("inc"));
        assert!(shown.contains("reducer"));
    }
}
