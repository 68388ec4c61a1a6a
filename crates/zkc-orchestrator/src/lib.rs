//! # Workflow Orchestrator
//!
//! The top of the stack: plans a workflow from a template or explicit
//! requests, then drives generation, validation, and composition
//! through a staged state machine with an outer retry loop, a deadline,
//! cooperative cancellation, and an append-only audit log.

pub mod audit;
pub mod orchestrator;
pub mod templates;

pub use audit::{AuditLog, AuditLogEntry};
pub use orchestrator::{
    CompositionPlan, CrossProofValidator, OrchestrationRequest, OrchestrationResult,
    OrchestrationState, Orchestrator, OrchestratorConfig, OrchestratorStatus, RetryConfig,
};
pub use templates::{builtin_templates, TemplateStep, WorkflowTemplate};
