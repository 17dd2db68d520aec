//! # Rill Core - Layer 1: Foundation
//!
//! **Purpose**: Single source of truth for the identifier namespace and the
//! value-level vocabulary shared by the store kernel and the factory layer.
//!
//! This crate provides the opaque, strongly-typed signal identifiers, the
//! `MaybeValue` sentinel used to represent "no value yet" without conflating
//! it with legitimate domain values, identity-compared invalidation tokens,
//! and the error taxonomy for store operations.
//!
//! # Architecture Constraints
//!
//! **Layer 1 has ZERO dependencies on other Rill crates** (foundation).
//! - YES identifier types and kind predicates
//! - YES value sentinels and invalidation tokens
//! - YES error types
//! - NO subjects, streams, or store logic (that goes in rill-store)
//! - NO composition logic (that goes in rill-factories)

#![forbid(unsafe_code)]

pub mod error;
pub mod ids;
pub mod value;

pub use error::StoreError;
pub use ids::{BehaviorId, DerivedId, EffectId, EventId, SignalId, SignalKind, StateId};
pub use value::{InvalidationToken, MaybeValue};
