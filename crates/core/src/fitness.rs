//! Multi-objective fitness scoring for recorded trajectories.
//!
//! This is the objective function the whole search optimizes against. Every
//! formula and constant here directly determines which policies win, so the
//! literals are deliberate and covered by tests.

use clawevolve_shared::{
    clamp, mean, Candidate, EvalTrace, EvaluationBatch, ExampleOutput, ObjectiveScores,
    ObjectiveWeights, Policy, Trajectory, OBJECTIVE_NAMES,
};
use std::collections::BTreeMap;

use crate::codec;

/// Default preference weight for a tool the policy has never seen. Small but
/// nonzero so unknown tools are explored rather than zeroed out.
const UNSEEN_TOOL_PREF: f64 = 0.01;

/// Uniform score reduction applied to every example in a batch whose
/// candidate payload failed to parse. Applied per batch invocation.
const PARSE_ERROR_PENALTY: f64 = 0.08;

/// Cost above which `normalizedCost` bottoms out at zero, in USD.
const COST_CEILING_USD: f64 = 0.15;

/// Latency above which `normalizedLatency` bottoms out at zero, in ms.
const LATENCY_CEILING_MS: f64 = 20_000.0;

fn normalized_cost(cost_usd: f64) -> f64 {
    clamp(1.0 - cost_usd / COST_CEILING_USD, 0.0, 1.0)
}

fn normalized_latency(latency_ms: f64) -> f64 {
    clamp(1.0 - latency_ms / LATENCY_CEILING_MS, 0.0, 1.0)
}

/// Missing metrics score neutral rather than zero so sparse telemetry does
/// not bias the efficiency objective.
fn metric_or_neutral(raw: Option<f64>, normalizer: fn(f64) -> f64) -> f64 {
    raw.map_or(0.5, normalizer)
}

/// Scores a candidate policy against batches of trajectories. Stateless per
/// call: each `evaluate` decodes its own policy copy, so the optimizer may
/// call it concurrently across candidates.
pub struct FitnessEvaluator {
    seed_policy: Policy,
    objective_weights: ObjectiveWeights,
}

impl FitnessEvaluator {
    #[must_use]
    pub fn new(seed_policy: Policy, objective_weights: ObjectiveWeights) -> Self {
        Self {
            seed_policy,
            objective_weights,
        }
    }

    #[must_use]
    pub fn seed_policy(&self) -> &Policy {
        &self.seed_policy
    }

    /// Decodes a candidate against the held seed policy.
    #[must_use]
    pub fn decode_candidate(&self, candidate: &Candidate) -> (Policy, Option<String>) {
        codec::decode(&self.seed_policy, candidate)
    }

    /// Tool-routing fitness in [0, 1]. Neutral 0.5 when the trajectory made
    /// no tool calls. Per call the signed score is
    /// `pref * (1 + successBoost + baselineRiskPenalty + hardRiskPenalty)`,
    /// and the mean is remapped symmetrically via `(raw + 1) / 2`.
    #[must_use]
    pub fn tool_fitness(&self, trajectory: &Trajectory, policy: &Policy) -> f64 {
        if trajectory.tool_calls.is_empty() {
            return 0.5;
        }

        let max_risk = policy.safeguards.max_risk_score;
        let scores: Vec<f64> = trajectory
            .tool_calls
            .iter()
            .map(|call| {
                let pref = policy
                    .tool_preferences
                    .get(&call.tool_name)
                    .copied()
                    .unwrap_or(UNSEEN_TOOL_PREF);
                let success_boost = if call.success { 1.0 } else { -0.7 };
                let call_risk = clamp(call.risk_score, 0.0, 1.0);
                let baseline_risk_penalty = -0.5 * call_risk;
                let hard_risk_penalty = if call_risk > max_risk { -0.8 } else { 0.0 };
                pref * (1.0 + success_boost + baseline_risk_penalty + hard_risk_penalty)
            })
            .collect();

        clamp((mean(&scores) + 1.0) / 2.0, 0.0, 1.0)
    }

    /// Scores one trajectory against one decoded policy.
    #[must_use]
    pub fn evaluate_example(
        &self,
        trajectory: &Trajectory,
        policy: &Policy,
    ) -> (f64, ObjectiveScores, ExampleOutput, String) {
        let success_rate = if trajectory.success { 1.0 } else { 0.0 };
        let satisfaction = clamp((trajectory.user_feedback + 1.0) / 2.0, 0.0, 1.0);
        // Three or more incidents saturate safety at zero.
        let safety = clamp(
            1.0 - (f64::from(trajectory.safety_incidents) / 3.0).min(1.0),
            0.0,
            1.0,
        );
        let tool_reliability = self.tool_fitness(trajectory, policy);

        let cost_score = metric_or_neutral(trajectory.cost_usd, normalized_cost);
        let latency_score = metric_or_neutral(trajectory.latency_ms, normalized_latency);
        let efficiency = clamp((cost_score + latency_score) / 2.0, 0.0, 1.0);

        // Larger deliberation/memory budgets proxy for cost and latency risk
        // the trajectory itself never observed.
        let strategy_penalty = clamp(f64::from(policy.deliberation_budget) / 10.0, 0.0, 0.3)
            + clamp(f64::from(policy.memory_depth) / 100.0, 0.0, 0.2);
        let style_bonus = 0.05
            * match policy.response_style {
                clawevolve_shared::ResponseStyle::Balanced => 1.0,
                clawevolve_shared::ResponseStyle::Concise => 0.95,
                clawevolve_shared::ResponseStyle::Detailed => 0.9,
            };

        let w = &self.objective_weights;
        let total = clamp(
            w.success * success_rate
                + w.satisfaction * satisfaction
                + w.safety * safety
                + w.tool_reliability * tool_reliability
                + w.efficiency * efficiency
                + style_bonus
                - strategy_penalty,
            0.0,
            1.0,
        );

        let objectives = ObjectiveScores {
            success_rate,
            satisfaction,
            safety,
            tool_reliability,
            efficiency,
        };
        let output = ExampleOutput {
            score: total,
            objectives,
            trajectory_id: trajectory.id.clone(),
        };

        let hint = if success_rate >= 1.0 && safety >= 1.0 {
            "Preserve this behavior while improving efficiency."
        } else {
            "Improve safety checks and tool routing."
        };
        let feedback = format!(
            "success={success_rate:.2}, safety={safety:.2}, toolReliability={tool_reliability:.2}. {hint}"
        );

        (total, objectives, output, feedback)
    }

    /// Evaluates every trajectory in the batch independently, in order.
    ///
    /// The candidate is decoded once; if its payload failed to parse, every
    /// example's score is reduced by a flat penalty (clamped at zero) and its
    /// feedback annotated with the parse error. Traces are captured only when
    /// `capture_traces` is set.
    #[must_use]
    pub fn evaluate(
        &self,
        batch: &[Trajectory],
        candidate: &Candidate,
        capture_traces: bool,
    ) -> EvaluationBatch {
        let (policy, parse_error) = self.decode_candidate(candidate);

        let mut outputs = Vec::with_capacity(batch.len());
        let mut scores = Vec::with_capacity(batch.len());
        let mut traces = Vec::new();
        let mut objective_scores: BTreeMap<String, Vec<f64>> = OBJECTIVE_NAMES
            .iter()
            .map(|name| ((*name).to_string(), Vec::with_capacity(batch.len())))
            .collect();

        for example in batch {
            let (mut score, objectives, output, mut feedback) =
                self.evaluate_example(example, &policy);
            if let Some(ref err) = parse_error {
                score = clamp(score - PARSE_ERROR_PENALTY, 0.0, 1.0);
                feedback = format!("{feedback} Parse error fallback: {err}");
            }
            for (name, value) in OBJECTIVE_NAMES.iter().zip(objectives.as_array()) {
                if let Some(column) = objective_scores.get_mut(*name) {
                    column.push(value);
                }
            }
            if capture_traces {
                traces.push(EvalTrace {
                    data: example.clone(),
                    output: output.clone(),
                    score,
                    objective_scores: objectives,
                    feedback,
                });
            }
            outputs.push(output);
            scores.push(score);
        }

        EvaluationBatch {
            outputs,
            scores,
            trajectories: capture_traces.then_some(traces),
            objective_scores,
        }
    }
}
