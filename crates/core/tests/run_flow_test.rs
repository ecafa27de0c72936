//! End-to-end orchestration tests against stub and built-in engines.

use clawevolve_core::optimizer::LocalSearchOptimizer;
use clawevolve_core::orchestrator::{run_evolution, EvolveRequest};
use clawevolve_core::test_utils::StubOptimizer;
use clawevolve_shared::ClawError;
use serde_json::{json, Value};

fn request_with(trajectory_count: usize, extra: Value) -> EvolveRequest {
    let trajectories: Vec<Value> = (0..trajectory_count)
        .map(|i| {
            json!({
                "id": format!("t{i}"),
                "prompt": "triage the ticket",
                "toolCalls": [
                    { "toolName": "search", "success": i % 4 != 0, "riskScore": 0.3 }
                ],
                "success": i % 2 == 0,
                "userFeedback": 0.1,
                "costUsd": 0.02,
                "latencyMs": 3000,
            })
        })
        .collect();
    let mut body = json!({
        "seedGenome": {
            "systemPrompt": "Stay on task.",
            "toolPreferences": { "search": 1.0 },
            "deliberationBudget": 3,
        },
        "trajectories": trajectories,
    });
    if let (Some(target), Some(source)) = (body.as_object_mut(), extra.as_object()) {
        for (k, v) in source {
            target.insert(k.clone(), v.clone());
        }
    }
    serde_json::from_value(body).unwrap()
}

#[test]
fn invalid_best_candidate_falls_back_to_seed_policy() {
    let stub = StubOptimizer {
        best_candidate: json!(42),
        history: json!([]),
        fail_with: None,
    };
    let response = run_evolution(&request_with(4, json!({})), &stub).unwrap();

    // Champion must be the seed policy, not an error.
    assert_eq!(response.champion.policy.system_prompt, "Stay on task.");
    assert_eq!(response.champion.policy.deliberation_budget, 3);
    assert!(response.history.is_empty());
}

#[test]
fn unparseable_champion_payload_keeps_seed_and_applies_penalty() {
    let broken = StubOptimizer {
        best_candidate: json!({ "policy_json": "{definitely not json" }),
        history: json!([]),
        fail_with: None,
    };
    let clean = StubOptimizer::echo_seed();

    let request = request_with(4, json!({}));
    let penalized = run_evolution(&request, &broken).unwrap();
    let baseline = run_evolution(&request, &clean).unwrap();

    // Decode degrades to the seed policy; scores carry the flat parse penalty.
    assert_eq!(
        penalized.champion.policy.system_prompt,
        baseline.champion.policy.system_prompt
    );
    let delta = baseline.champion_evaluation.aggregate_score
        - penalized.champion_evaluation.aggregate_score;
    assert!((delta - 0.08).abs() < 1e-9);
}

#[test]
fn optimizer_failure_yields_no_partial_champion() {
    let stub = StubOptimizer {
        best_candidate: Value::Null,
        history: json!([]),
        fail_with: Some("backend exploded".to_string()),
    };
    let err = run_evolution(&request_with(4, json!({})), &stub).unwrap_err();
    match err {
        ClawError::Optimizer(message) => assert!(message.contains("backend exploded")),
        other => panic!("expected optimizer error, got {other:?}"),
    }
}

#[test]
fn malformed_history_degrades_to_empty() {
    let stub = StubOptimizer {
        best_candidate: Value::Null,
        history: json!({ "generations": "oops" }),
        fail_with: None,
    };
    let response = run_evolution(&request_with(4, json!({})), &stub).unwrap();
    assert!(response.history.is_empty());
}

#[test]
fn local_search_end_to_end_produces_bounded_champion() {
    let request = request_with(
        30,
        json!({ "generations": 3, "populationSize": 4, "engine": { "seed": 11 } }),
    );
    let response = run_evolution(&request, &LocalSearchOptimizer).unwrap();

    let policy = &response.champion.policy;
    assert!(policy.tool_retry_budget <= 8);
    assert!((1..=12).contains(&policy.deliberation_budget));
    assert!((1..=64).contains(&policy.memory_depth));
    assert!((0.05..=0.95).contains(&policy.safeguards.max_risk_score));

    assert!(!response.history.is_empty());
    for (i, point) in response.history.iter().enumerate() {
        assert_eq!(point.generation, i as u64 + 1);
    }
    assert!((0.0..=1.0).contains(&response.champion_evaluation.aggregate_score));
    assert_eq!(response.telemetry_summary.trajectory_count, 30);
}

#[test]
fn objective_weight_overrides_shift_the_aggregate() {
    let base = run_evolution(&request_with(4, json!({})), &StubOptimizer::echo_seed()).unwrap();
    let safety_heavy = run_evolution(
        &request_with(4, json!({ "objectiveWeights": { "safety": 0.9 } })),
        &StubOptimizer::echo_seed(),
    )
    .unwrap();

    // All test trajectories are incident-free, so weighting safety up raises
    // the aggregate.
    assert!(
        safety_heavy.champion_evaluation.aggregate_score
            > base.champion_evaluation.aggregate_score
    );
}
