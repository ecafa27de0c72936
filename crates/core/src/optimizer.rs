//! Optimizer boundary: the adapter contract this service implements and the
//! search-engine contract it calls.
//!
//! The search algorithm itself is swappable. `PolicyOptimizer` is an opaque
//! engine invoked with a fixed contract; `LocalSearchOptimizer` is the
//! built-in engine so the server runs end to end without an external
//! process, and tests substitute a stub.

use anyhow::Context;
use clawevolve_shared::{mean, Candidate, EvaluationBatch, Trajectory};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

use crate::fitness::FitnessEvaluator;
use crate::reflect::{self, ReflectiveRow};

/// The evaluation surface the search engine drives. Implementations must
/// tolerate concurrent calls: every call decodes its own policy copy and
/// writes only locally allocated structures.
pub trait EvalAdapter: Send + Sync {
    fn evaluate(
        &self,
        batch: &[Trajectory],
        candidate: &Candidate,
        capture_traces: bool,
    ) -> EvaluationBatch;

    fn make_reflective_dataset(
        &self,
        candidate: &Candidate,
        eval_batch: &EvaluationBatch,
        component_names: &[String],
    ) -> BTreeMap<String, Vec<ReflectiveRow>>;
}

impl EvalAdapter for FitnessEvaluator {
    fn evaluate(
        &self,
        batch: &[Trajectory],
        candidate: &Candidate,
        capture_traces: bool,
    ) -> EvaluationBatch {
        FitnessEvaluator::evaluate(self, batch, candidate, capture_traces)
    }

    fn make_reflective_dataset(
        &self,
        candidate: &Candidate,
        eval_batch: &EvaluationBatch,
        component_names: &[String],
    ) -> BTreeMap<String, Vec<ReflectiveRow>> {
        reflect::build(candidate, eval_batch, component_names)
    }
}

/// Resolved search configuration passed to the engine.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub candidate_selection_strategy: String,
    pub reflection_minibatch_size: u32,
    pub use_merge: bool,
    pub max_merge_invocations: u32,
    pub max_metric_calls: u64,
    pub seed: u64,
    pub reflection_model: String,
    /// When false the engine must swallow adapter exceptions instead of
    /// aborting the search. The native adapter is infallible, so this only
    /// matters for external engines.
    pub raise_on_exception: bool,
}

/// One full invocation of the engine.
pub struct OptimizerRun<'a> {
    pub seed_candidate: Candidate,
    pub trainset: &'a [Trajectory],
    pub valset: &'a [Trajectory],
    pub adapter: &'a dyn EvalAdapter,
    pub generations: u32,
    pub config: SearchConfig,
}

/// What an engine hands back. Deliberately loose: `best_candidate` and
/// `history` are raw JSON so the orchestrator's lenient substitution and
/// extraction rules apply to engines we do not control.
#[derive(Debug, Clone)]
pub struct OptimizerOutcome {
    pub best_candidate: serde_json::Value,
    pub history: serde_json::Value,
}

pub trait PolicyOptimizer: Send + Sync {
    fn run(&self, run: OptimizerRun<'_>) -> anyhow::Result<OptimizerOutcome>;
}

// ══════════════════════════════════════════════════════════════
// Built-in local-search engine
// ══════════════════════════════════════════════════════════════

/// Feedback-guided stochastic hill climb over the policy payload.
///
/// Per generation it proposes a reflection-minibatch worth of mutations,
/// keeps the best scorer on the train set, and stops early when the
/// metric-call budget would be exceeded. Critique rows from the reflective
/// dataset bias the mutation direction (safety-heavy feedback tightens the
/// risk ceiling).
#[derive(Debug, Default)]
pub struct LocalSearchOptimizer;

impl LocalSearchOptimizer {
    fn mutate(payload: &serde_json::Value, rng: &mut StdRng, tighten_safety: bool) -> Candidate {
        let mut mutated = payload.clone();
        if let Some(obj) = mutated.as_object_mut() {
            let jitter_int = |value: i64, delta: i64, rng: &mut StdRng| {
                value + rng.gen_range(-delta..=delta)
            };
            if rng.gen_bool(0.5) {
                let current = obj
                    .get("deliberationBudget")
                    .and_then(serde_json::Value::as_i64)
                    .unwrap_or(2);
                obj.insert(
                    "deliberationBudget".to_string(),
                    json!(jitter_int(current, 2, rng)),
                );
            }
            if rng.gen_bool(0.5) {
                let current = obj
                    .get("memoryDepth")
                    .and_then(serde_json::Value::as_i64)
                    .unwrap_or(6);
                obj.insert("memoryDepth".to_string(), json!(jitter_int(current, 4, rng)));
            }
            if rng.gen_bool(0.3) {
                let current = obj
                    .get("toolRetryBudget")
                    .and_then(serde_json::Value::as_i64)
                    .unwrap_or(1);
                obj.insert(
                    "toolRetryBudget".to_string(),
                    json!(jitter_int(current, 1, rng)),
                );
            }
            if rng.gen_bool(0.3) {
                let styles = ["concise", "balanced", "detailed"];
                obj.insert(
                    "responseStyle".to_string(),
                    json!(styles[rng.gen_range(0..styles.len())]),
                );
            }
            if tighten_safety || rng.gen_bool(0.4) {
                let current = obj
                    .get("safeguards")
                    .and_then(|s| s.get("maxRiskScore"))
                    .and_then(serde_json::Value::as_f64)
                    .unwrap_or(0.55);
                let delta = if tighten_safety {
                    -rng.gen_range(0.0..0.1)
                } else {
                    rng.gen_range(-0.1..0.1)
                };
                let safeguards = obj
                    .entry("safeguards".to_string())
                    .or_insert_with(|| json!({}));
                if let Some(s) = safeguards.as_object_mut() {
                    s.insert("maxRiskScore".to_string(), json!(current + delta));
                }
            }
        }
        // Decode clamps out-of-range mutations; no need to re-validate here.
        Candidate::from_policy_json(mutated.to_string())
    }

    /// Uses the reflective dataset to decide whether mutations should bias
    /// toward tighter safety, mirroring how a reflection engine consumes
    /// these rows.
    fn wants_tighter_safety(
        adapter: &dyn EvalAdapter,
        candidate: &Candidate,
        minibatch: &[Trajectory],
    ) -> bool {
        let traced = adapter.evaluate(minibatch, candidate, true);
        let dataset = adapter.make_reflective_dataset(
            candidate,
            &traced,
            &[clawevolve_shared::POLICY_COMPONENT.to_string()],
        );
        dataset
            .values()
            .flatten()
            .any(|row| row.feedback.contains("Improve safety"))
    }
}

impl PolicyOptimizer for LocalSearchOptimizer {
    fn run(&self, run: OptimizerRun<'_>) -> anyhow::Result<OptimizerOutcome> {
        if run.trainset.is_empty() {
            anyhow::bail!("local search requires a non-empty train set");
        }

        let mut rng = StdRng::seed_from_u64(run.config.seed);
        let batch_cost = run.trainset.len() as u64;
        let mut metric_calls = 0u64;

        let mut best = run.seed_candidate.clone();
        let mut best_score = {
            metric_calls += batch_cost;
            mean(&run.adapter.evaluate(run.trainset, &best, false).scores)
        };

        let minibatch_len = (run.config.reflection_minibatch_size.max(1) as usize)
            .min(run.trainset.len());
        let mut history = Vec::with_capacity(run.generations as usize);

        'generations: for generation in 1..=run.generations {
            // The traced minibatch counts against the metric budget too.
            let reflect_cost = minibatch_len as u64;
            if metric_calls + reflect_cost > run.config.max_metric_calls {
                break;
            }
            metric_calls += reflect_cost;
            let tighten = Self::wants_tighter_safety(
                run.adapter,
                &best,
                &run.trainset[..minibatch_len],
            );

            let payload: serde_json::Value =
                serde_json::from_str(best.policy_json()).context("best candidate unparseable")?;

            for _ in 0..run.config.reflection_minibatch_size.max(1) {
                if metric_calls + batch_cost > run.config.max_metric_calls {
                    history.push(json!({ "generation": generation, "bestScore": best_score }));
                    break 'generations;
                }
                let proposal = Self::mutate(&payload, &mut rng, tighten);
                let score =
                    mean(&run.adapter.evaluate(run.trainset, &proposal, false).scores);
                metric_calls += batch_cost;
                if score > best_score {
                    best_score = score;
                    best = proposal;
                }
            }
            debug!(
                generation,
                best_score, metric_calls, "local search generation complete"
            );
            history.push(json!({ "generation": generation, "bestScore": best_score }));
        }

        Ok(OptimizerOutcome {
            best_candidate: serde_json::to_value(&best)?,
            history: serde_json::Value::Array(history),
        })
    }
}
