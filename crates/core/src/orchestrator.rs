//! Top-level run orchestration: seed preparation, train/validation
//! partitioning, search configuration, engine invocation, and champion
//! extraction.

use clawevolve_shared::{
    mean, Candidate, ClawError, ClawResult, Genome, ObjectiveWeights, Policy, Trajectory,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::codec;
use crate::fitness::FitnessEvaluator;
use crate::optimizer::{OptimizerRun, PolicyOptimizer, SearchConfig};

/// Provenance tag appended to every champion's mutation trace.
pub const ENGINE_TAG: &str = "clawevolve-native";

/// Trajectory count at or above which a validation split is carved out.
/// Below it the full set serves both roles to preserve sample efficiency.
const SPLIT_THRESHOLD: usize = 25;

// ══════════════════════════════════════════════════════════════
// Request / response types
// ══════════════════════════════════════════════════════════════

fn default_generations() -> u32 {
    6
}

fn default_population_size() -> u32 {
    18
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolveRequest {
    /// Raw genome payload; fields are defaulted/clamped, never rejected.
    pub seed_genome: serde_json::Value,
    pub trajectories: Vec<Trajectory>,
    #[serde(default = "default_generations")]
    pub generations: u32,
    #[serde(default = "default_population_size")]
    pub population_size: u32,
    #[serde(default)]
    pub objective_weights: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    pub algorithm: Option<AlgorithmOverrides>,
    #[serde(default)]
    pub engine: Option<EngineOverrides>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlgorithmOverrides {
    /// Caller already held out validation data externally; do not re-split.
    pub outer_holdout_applied: bool,
    pub candidate_selection_strategy: Option<String>,
    pub reflection_minibatch_size: Option<u32>,
    pub use_merge: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineOverrides {
    #[serde(alias = "reflectionLm")]
    pub reflection_model: Option<String>,
    pub candidate_selection_strategy: Option<String>,
    pub reflection_minibatch_size: Option<u32>,
    pub use_merge: Option<bool>,
    pub max_merge_invocations: Option<u32>,
    pub max_metric_calls: Option<u64>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChampionEvaluation {
    pub objectives: BTreeMap<String, f64>,
    pub aggregate_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub genome: Genome,
    pub evaluation: ChampionEvaluation,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySummary {
    pub trajectory_count: usize,
    pub engine: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPoint {
    pub generation: u64,
    pub best_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmEcho {
    pub mode: String,
    pub candidate_selection_strategy: String,
    pub reflection_minibatch_size: u32,
    pub use_merge: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolveResponse {
    pub champion: Genome,
    pub champion_evaluation: ChampionEvaluation,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub telemetry_summary: TelemetrySummary,
    pub history: Vec<HistoryPoint>,
    pub algorithm: AlgorithmEcho,
}

// ══════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════

/// Partitions trajectories into (train, validation).
///
/// With an external holdout, or fewer than [`SPLIT_THRESHOLD`] trajectories,
/// the full set serves both roles. Otherwise the last ceil(20%) becomes the
/// validation set; should that somehow empty the train side, training
/// reverts to the full set.
pub fn split_sets(trajectories: &[Trajectory], outer_holdout: bool) -> (&[Trajectory], &[Trajectory]) {
    let len = trajectories.len();
    if outer_holdout || len < SPLIT_THRESHOLD {
        return (trajectories, trajectories);
    }
    let split = ((len as f64) * 0.2).ceil().max(1.0) as usize;
    let (train, val) = trajectories.split_at(len - split);
    if train.is_empty() {
        return (trajectories, val);
    }
    (train, val)
}

/// Resolves the full search configuration, engine overrides first, then
/// algorithm overrides, then defaults. The metric-call budget defaults to
/// `max(40, generations * populationSize * 2)` so small requests are not
/// starved and large requests stay bounded.
pub fn resolve_search_config(request: &EvolveRequest) -> SearchConfig {
    let algorithm = request.algorithm.clone().unwrap_or_default();
    let engine = request.engine.clone().unwrap_or_default();

    SearchConfig {
        candidate_selection_strategy: engine
            .candidate_selection_strategy
            .or(algorithm.candidate_selection_strategy)
            .unwrap_or_else(|| "pareto".to_string()),
        reflection_minibatch_size: engine
            .reflection_minibatch_size
            .or(algorithm.reflection_minibatch_size)
            .unwrap_or(3),
        use_merge: engine.use_merge.or(algorithm.use_merge).unwrap_or(true),
        max_merge_invocations: engine.max_merge_invocations.unwrap_or(5),
        max_metric_calls: engine.max_metric_calls.unwrap_or_else(|| {
            (u64::from(request.generations) * u64::from(request.population_size) * 2).max(40)
        }),
        seed: engine.seed.unwrap_or(0),
        reflection_model: engine
            .reflection_model
            .unwrap_or_else(|| "openai/gpt-5-mini".to_string()),
        raise_on_exception: false,
    }
}

/// Best-effort candidate recovery: anything that does not deserialize into a
/// component map degrades to the seed candidate instead of failing the run.
fn candidate_or_seed(raw: serde_json::Value, seed: &Candidate) -> Candidate {
    match serde_json::from_value::<Candidate>(raw) {
        Ok(candidate) => candidate,
        Err(e) => {
            warn!(error = %e, "Engine returned a structurally invalid best candidate; using seed");
            seed.clone()
        }
    }
}

/// Best-effort history extraction. Non-array shapes or entries without a
/// recognizable score yield empty/None rather than an error.
pub fn extract_history(raw: &serde_json::Value) -> Vec<HistoryPoint> {
    let Some(items) = raw.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .enumerate()
        .map(|(index, item)| HistoryPoint {
            generation: index as u64 + 1,
            best_score: ["bestScore", "best_score", "score"]
                .iter()
                .find_map(|key| item.get(key))
                .and_then(serde_json::Value::as_f64),
        })
        .collect()
}

// ══════════════════════════════════════════════════════════════
// Run flow
// ══════════════════════════════════════════════════════════════

pub fn run_evolution(
    request: &EvolveRequest,
    optimizer: &dyn PolicyOptimizer,
) -> ClawResult<EvolveResponse> {
    if request.trajectories.is_empty() {
        return Err(ClawError::Validation(
            "At least one trajectory is required".to_string(),
        ));
    }

    let seed_policy = Policy::from_genome_value(&request.seed_genome);
    let objective_weights = ObjectiveWeights::resolve(request.objective_weights.as_ref());
    let evaluator = FitnessEvaluator::new(seed_policy.clone(), objective_weights);

    let outer_holdout = request
        .algorithm
        .as_ref()
        .is_some_and(|a| a.outer_holdout_applied);
    let (trainset, valset) = split_sets(&request.trajectories, outer_holdout);

    let seed_candidate = codec::encode(&seed_policy);
    let config = resolve_search_config(request);

    info!(
        trajectory_count = request.trajectories.len(),
        train = trainset.len(),
        validation = valset.len(),
        generations = request.generations,
        strategy = %config.candidate_selection_strategy,
        max_metric_calls = config.max_metric_calls,
        "Starting evolution run"
    );

    let echo = AlgorithmEcho {
        mode: ENGINE_TAG.to_string(),
        candidate_selection_strategy: config.candidate_selection_strategy.clone(),
        reflection_minibatch_size: config.reflection_minibatch_size,
        use_merge: config.use_merge,
    };

    // Engine failure is fatal to the run: no partial champion.
    let outcome = optimizer
        .run(OptimizerRun {
            seed_candidate: seed_candidate.clone(),
            trainset,
            valset,
            adapter: &evaluator,
            generations: request.generations,
            config,
        })
        .map_err(|e| ClawError::Optimizer(format!("optimization failed: {e:#}")))?;

    let best_candidate = candidate_or_seed(outcome.best_candidate, &seed_candidate);

    // Final no-trace pass over the validation set for the champion summary.
    let eval_batch = evaluator.evaluate(valset, &best_candidate, false);
    let objectives: BTreeMap<String, f64> = eval_batch
        .objective_scores
        .iter()
        .map(|(name, column)| (name.clone(), mean(column)))
        .collect();
    let champion_evaluation = ChampionEvaluation {
        objectives,
        aggregate_score: mean(&eval_batch.scores),
    };

    let (best_policy, _) = evaluator.decode_candidate(&best_candidate);
    let champion = Genome::from_policy(&request.seed_genome, best_policy, ENGINE_TAG);
    let history = extract_history(&outcome.history);

    info!(
        champion_id = %champion.id,
        aggregate_score = champion_evaluation.aggregate_score,
        generations_recorded = history.len(),
        "Evolution run complete"
    );

    Ok(EvolveResponse {
        leaderboard: vec![LeaderboardEntry {
            genome: champion.clone(),
            evaluation: champion_evaluation.clone(),
        }],
        telemetry_summary: TelemetrySummary {
            trajectory_count: request.trajectories.len(),
            engine: ENGINE_TAG.to_string(),
        },
        champion,
        champion_evaluation,
        history,
        algorithm: echo,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn trajectories(n: usize) -> Vec<Trajectory> {
        (0..n)
            .map(|i| Trajectory {
                id: format!("t{i}"),
                success: true,
                ..Trajectory::default()
            })
            .collect()
    }

    fn base_request(n: usize) -> EvolveRequest {
        serde_json::from_value(json!({
            "seedGenome": {},
            "trajectories": trajectories(n),
        }))
        .unwrap()
    }

    #[test]
    fn thirty_trajectories_split_24_6() {
        let data = trajectories(30);
        let (train, val) = split_sets(&data, false);
        assert_eq!(train.len(), 24);
        assert_eq!(val.len(), 6);
        assert_eq!(val[0].id, "t24");
        assert_eq!(val[5].id, "t29");
    }

    #[test]
    fn below_threshold_uses_full_set_both_ways() {
        let data = trajectories(10);
        let (train, val) = split_sets(&data, false);
        assert_eq!(train.len(), 10);
        assert_eq!(val.len(), 10);
    }

    #[test]
    fn outer_holdout_skips_the_split() {
        let data = trajectories(40);
        let (train, val) = split_sets(&data, true);
        assert_eq!(train.len(), 40);
        assert_eq!(val.len(), 40);
    }

    #[test]
    fn default_budget_tracks_search_breadth() {
        let mut request = base_request(1);
        request.generations = 10;
        request.population_size = 20;
        assert_eq!(resolve_search_config(&request).max_metric_calls, 400);

        // Small requests do not starve below the floor.
        request.generations = 1;
        request.population_size = 4;
        assert_eq!(resolve_search_config(&request).max_metric_calls, 40);
    }

    #[test]
    fn engine_overrides_win_over_algorithm_overrides() {
        let request: EvolveRequest = serde_json::from_value(json!({
            "seedGenome": {},
            "trajectories": trajectories(1),
            "algorithm": {
                "candidateSelectionStrategy": "greedy",
                "reflectionMinibatchSize": 9,
            },
            "engine": {
                "candidateSelectionStrategy": "pareto",
                "maxMetricCalls": 5,
                "seed": 42,
            },
        }))
        .unwrap();
        let config = resolve_search_config(&request);
        assert_eq!(config.candidate_selection_strategy, "pareto");
        assert_eq!(config.reflection_minibatch_size, 9);
        assert_eq!(config.max_metric_calls, 5);
        assert_eq!(config.seed, 42);
        assert!(config.use_merge);
    }

    #[test]
    fn history_extraction_tolerates_malformed_shapes() {
        assert!(extract_history(&json!({"not": "a list"})).is_empty());
        assert!(extract_history(&json!(null)).is_empty());

        let history = extract_history(&json!([
            {"bestScore": 0.5},
            {"score": 0.6},
            {"unrelated": true},
            "not even an object",
        ]));
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].best_score, Some(0.5));
        assert_eq!(history[1].best_score, Some(0.6));
        assert_eq!(history[2].best_score, None);
        assert_eq!(history[3].best_score, None);
        assert_eq!(history[3].generation, 4);
    }

    #[test]
    fn empty_trajectories_rejected_before_evaluation() {
        let request = base_request(0);
        let err = run_evolution(&request, &crate::optimizer::LocalSearchOptimizer).unwrap_err();
        assert!(matches!(err, ClawError::Validation(_)));
    }
}
