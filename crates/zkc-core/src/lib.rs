//! # Proof Composition Core
//!
//! Shared data model for the proof composition engine: proof systems and
//! proof records, composition strategies and results, the engine-wide
//! error taxonomy, the event bus, cooperative cancellation tokens, and
//! the telemetry collector hook.
//!
//! Everything here is pure data plus small synchronization primitives.
//! No provider is ever called from this crate.

pub mod cancel;
pub mod digest;
pub mod error;
pub mod events;
pub mod proof;
pub mod telemetry;

pub use cancel::CancellationToken;
pub use digest::{input_hash, sha256_hex};
pub use error::EngineError;
pub use events::{Event, EventBus, Subscription, SwitchReason};
pub use proof::{
    ComposedProof, CompositionMetadata, CompositionStrategy, GenerationResult, ProofLink,
    ProofMetadata, ProofRequest, ProofStatus, ProofSystem, SingleProof, VerificationHints,
};
pub use telemetry::{NoopTelemetry, TelemetryCollector};
