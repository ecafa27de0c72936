//! Reflective dataset construction.
//!
//! Turns captured evaluation traces into structured critique rows the
//! mutation/reflection step consumes when proposing new candidates. One
//! logical dataset is shared by every component being updated; this service
//! evolves a single component, but the contract allows several.

use clawevolve_shared::{Candidate, EvaluationBatch, ObjectiveScores};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectiveInputs {
    pub trajectory_id: String,
    pub prompt: String,
    pub tools: Vec<String>,
    pub safety_incidents: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReflectiveOutputs {
    pub policy_json: String,
    pub score: f64,
    pub objectives: ObjectiveScores,
}

/// One (input, generated output, feedback) row. Field names follow the
/// reflection engine's expected headings.
#[derive(Debug, Clone, Serialize)]
pub struct ReflectiveRow {
    #[serde(rename = "Inputs")]
    pub inputs: ReflectiveInputs,
    #[serde(rename = "Generated Outputs")]
    pub generated_outputs: ReflectiveOutputs,
    #[serde(rename = "Feedback")]
    pub feedback: String,
}

/// Builds the per-component reflective dataset from a traced evaluation.
/// Batches evaluated without trace capture yield empty row sets.
#[must_use]
pub fn build(
    candidate: &Candidate,
    eval_batch: &EvaluationBatch,
    component_names: &[String],
) -> BTreeMap<String, Vec<ReflectiveRow>> {
    let rows: Vec<ReflectiveRow> = eval_batch
        .trajectories
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|trace| ReflectiveRow {
            inputs: ReflectiveInputs {
                trajectory_id: trace.data.id.clone(),
                prompt: trace.data.prompt.clone(),
                tools: trace
                    .data
                    .tool_calls
                    .iter()
                    .map(|c| c.tool_name.clone())
                    .collect(),
                safety_incidents: trace.data.safety_incidents,
            },
            generated_outputs: ReflectiveOutputs {
                policy_json: candidate.policy_json().to_string(),
                score: trace.score,
                objectives: trace.objective_scores,
            },
            feedback: trace.feedback.clone(),
        })
        .collect();

    component_names
        .iter()
        .map(|component| (component.clone(), rows.clone()))
        .collect()
}
