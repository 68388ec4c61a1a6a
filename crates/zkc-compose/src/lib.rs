//! # Composition Engine
//!
//! Combines proofs from registered providers into [`ComposedProof`]s
//! under one of four strategies. The [`composer`] module owns the
//! provider registry, generation (with a request-digest result cache),
//! and strategy dispatch; the [`aggregator`] module holds the
//! strategy-level verification and folding primitives as free functions
//! over a provider lookup, so they can also be driven without a
//! composer instance.
//!
//! [`ComposedProof`]: zkc_core::ComposedProof

pub mod aggregator;
pub mod composer;

pub use aggregator::{
    link_proofs, verify_link, AggregationContext, AggregationProgress, RetryPolicy,
};
pub use composer::{ComposeOptions, ComposerConfig, ProofComposer};
