//! # Verification Pipeline
//!
//! Verifies composed proofs against their providers: order planning
//! from composition hints, strict/parallel/batch execution modes, a
//! TTL-bounded result cache with hit accounting, cross-proof link
//! validation, and per-system statistics.

pub mod cache;
pub mod pipeline;

pub use cache::{CacheStats, VerificationCache};
pub use pipeline::{
    ProofVerification, SystemStats, VerificationPipeline, VerificationReport, VerifyConfig,
    VerifyContext, VerifyMode, VerifyProgress,
};
