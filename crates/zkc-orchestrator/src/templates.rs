//! # Workflow Templates
//!
//! Named, reusable workflow shapes: a composition strategy plus the
//! ordered circuits to prove. A template expands into concrete proof
//! requests during planning; the built-in set covers the common
//! privacy-transfer shapes, and custom templates register at runtime.

use serde::{Deserialize, Serialize};

use zkc_core::{CompositionStrategy, ProofRequest, ProofSystem};

/// One circuit to prove within a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateStep {
    pub circuit_id: String,
    /// Pin the step to a system; `None` lets the composer resolve.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<ProofSystem>,
}

impl TemplateStep {
    pub fn new(circuit_id: impl Into<String>) -> Self {
        Self {
            circuit_id: circuit_id.into(),
            system: None,
        }
    }

    pub fn on_system(mut self, system: impl Into<ProofSystem>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// A named workflow shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub name: String,
    pub description: String,
    pub strategy: CompositionStrategy,
    pub steps: Vec<TemplateStep>,
}

impl WorkflowTemplate {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        strategy: CompositionStrategy,
        steps: Vec<TemplateStep>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            strategy,
            steps,
        }
    }

    /// Expand into concrete requests carrying the run's inputs.
    pub fn expand(
        &self,
        public_inputs: &[String],
        private_inputs: &serde_json::Value,
    ) -> Vec<ProofRequest> {
        self.steps
            .iter()
            .map(|step| {
                let mut request = ProofRequest::new(&step.circuit_id)
                    .with_public_inputs(public_inputs.to_vec());
                request.system = step.system.clone();
                request.private_inputs = private_inputs.clone();
                request
            })
            .collect()
    }
}

/// The built-in template set.
pub fn builtin_templates() -> Vec<WorkflowTemplate> {
    vec![
        WorkflowTemplate::new(
            "shielded-transfer",
            "Note commitment plus nullifier for one private transfer",
            CompositionStrategy::Sequential,
            vec![
                TemplateStep::new("note-commitment"),
                TemplateStep::new("nullifier"),
            ],
        ),
        WorkflowTemplate::new(
            "compliant-transfer",
            "Shielded transfer with an additional compliance predicate",
            CompositionStrategy::Sequential,
            vec![
                TemplateStep::new("note-commitment"),
                TemplateStep::new("nullifier"),
                TemplateStep::new("compliance-predicate"),
            ],
        ),
        WorkflowTemplate::new(
            "multi-chain-bridge",
            "Lock on the source chain, mint on the target chain",
            CompositionStrategy::Parallel,
            vec![
                TemplateStep::new("bridge-lock"),
                TemplateStep::new("bridge-mint"),
            ],
        ),
        WorkflowTemplate::new(
            "batch-verification",
            "Batch of independent transfers verified per system",
            CompositionStrategy::Batch,
            vec![
                TemplateStep::new("transfer"),
                TemplateStep::new("transfer"),
                TemplateStep::new("transfer"),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_set_contains_the_four_shapes() {
        let names: Vec<String> = builtin_templates().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                "shielded-transfer",
                "compliant-transfer",
                "multi-chain-bridge",
                "batch-verification"
            ]
        );
    }

    #[test]
    fn expansion_carries_inputs_into_every_step() {
        let template = &builtin_templates()[0];
        let inputs = vec!["0a".to_string(), "0b".to_string()];
        let witness = json!({ "note": "..." });
        let requests = template.expand(&inputs, &witness);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].circuit_id, "note-commitment");
        for request in &requests {
            assert_eq!(request.public_inputs, inputs);
            assert_eq!(request.private_inputs, witness);
        }
    }
}
