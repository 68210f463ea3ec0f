//! Chrono Primitives
//!
//! The building blocks stored in a `ChronoGraph`: value cells, immutable
//! versions, references, calculations and the effects calculations may ask
//! for.
//!
//! # Concepts
//!
//! ## Atoms
//!
//! An Atom is a mutable value cell. Observable atoms skip writes their
//! comparator considers equal to the current value.
//!
//! ## Versions and References
//!
//! A `VersionedNode` is immutable. Writing produces a successor linked to its
//! predecessor. A `VersionedReference` is the stable slot pointing at the
//! newest version, so readers keep one handle across writes.
//!
//! ## Mutations
//!
//! A Mutation is a calculation over keyed or positional inputs. Its single
//! result is written to each of its outputs.
//!
//! ## Effects
//!
//! A calculation can suspend on an `Effect` that the caller resolves, then
//! continue with the resolved value.

mod atom;
mod effect;
mod mutation;
mod versioned;

pub use atom::{Atom, Capabilities, Comparator, Readable, Writable};
pub use effect::{
    effect_channel, AcceptAll, ChannelResolver, Effect, EffectInbox, EffectRequest,
    EffectResolver, PendingEffect, Resolution,
};
pub use mutation::{CalcResult, Computation, Continuation, Inputs, Mutation, Outputs};
pub use versioned::{History, Identified, Versioned, VersionedNode, VersionedReference};
