//! Shared domain model for the ClawEvolve policy-evolution service.
//!
//! Everything in here is plain data plus the validation/clamping rules that
//! keep it well-formed. No I/O, no async: these types are constructed once
//! per request or per candidate decode and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ══════════════════════════════════════════════════════════════
// Errors
// ══════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum ClawError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Optimizer error: {0}")]
    Optimizer(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ClawResult<T> = std::result::Result<T, ClawError>;

// ══════════════════════════════════════════════════════════════
// Numeric helpers
// ══════════════════════════════════════════════════════════════

#[must_use]
pub fn clamp(value: f64, min_value: f64, max_value: f64) -> f64 {
    value.max(min_value).min(max_value)
}

#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Clamps negative weights to zero and rescales so the map sums to 1.0.
/// A map whose weights sum to <= 0 (or an empty map) becomes uniform.
#[must_use]
pub fn normalize_tool_preferences(weights: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    let safe: BTreeMap<String, f64> = weights
        .iter()
        .map(|(k, v)| (k.clone(), if v.is_finite() { v.max(0.0) } else { 0.0 }))
        .collect();
    let total: f64 = safe.values().sum();
    if total <= 0.0 {
        let n = safe.len().max(1) as f64;
        return safe.keys().map(|k| (k.clone(), 1.0 / n)).collect();
    }
    safe.into_iter().map(|(k, v)| (k, v / total)).collect()
}

/// Casts an arbitrary JSON value to f64, clamps, then truncates to an
/// integer. Returns `fallback` when the value is not castable.
fn lenient_int(value: &serde_json::Value, fallback: u32, min_v: u32, max_v: u32) -> u32 {
    match json_as_f64(value) {
        Some(v) => clamp(v, f64::from(min_v), f64::from(max_v)) as u32,
        None => fallback,
    }
}

/// Numeric cast that also accepts numeric strings, mirroring how loosely
/// typed telemetry payloads arrive from agent runtimes.
#[must_use]
pub fn json_as_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        serde_json::Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

// ══════════════════════════════════════════════════════════════
// Policy
// ══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStyle {
    Concise,
    Balanced,
    Detailed,
}

impl ResponseStyle {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "concise" => Some(Self::Concise),
            "balanced" => Some(Self::Balanced),
            "detailed" => Some(Self::Detailed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResponseStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Concise => write!(f, "concise"),
            Self::Balanced => write!(f, "balanced"),
            Self::Detailed => write!(f, "detailed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Safeguards {
    pub max_risk_score: f64,
    pub disallowed_tools: Vec<String>,
}

impl Default for Safeguards {
    fn default() -> Self {
        Self {
            max_risk_score: 0.55,
            disallowed_tools: Vec::new(),
        }
    }
}

/// The evolvable agent configuration. Field bounds:
/// `toolRetryBudget` [0,8], `deliberationBudget` [1,12], `memoryDepth` [1,64],
/// `safeguards.maxRiskScore` [0.05,0.95]. `toolPreferences` always sums to
/// 1.0 (uniform when the supplied weights sum to <= 0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub system_prompt: String,
    pub response_style: ResponseStyle,
    pub tool_preferences: BTreeMap<String, f64>,
    pub tool_retry_budget: u32,
    pub deliberation_budget: u32,
    pub memory_depth: u32,
    pub safeguards: Safeguards,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            response_style: ResponseStyle::Balanced,
            tool_preferences: BTreeMap::new(),
            tool_retry_budget: 1,
            deliberation_budget: 2,
            memory_depth: 6,
            safeguards: Safeguards::default(),
        }
    }
}

impl Policy {
    /// Merges a loosely typed JSON object into this policy, field by field.
    /// Each field is taken only if it type-checks and lies in its domain;
    /// invalid fields are skipped and the prior value kept. Integer fields
    /// clamp via f64 cast then truncation. This is the single validation
    /// path for both candidate decode and seed-genome ingestion.
    pub fn merge_from_value(&mut self, parsed: &serde_json::Value) {
        if let Some(prompt) = parsed.get("systemPrompt").and_then(|v| v.as_str()) {
            self.system_prompt = prompt.to_string();
        }
        if let Some(style) = parsed
            .get("responseStyle")
            .and_then(|v| v.as_str())
            .and_then(ResponseStyle::parse)
        {
            self.response_style = style;
        }
        if let Some(prefs) = parsed.get("toolPreferences").and_then(|v| v.as_object()) {
            let raw: BTreeMap<String, f64> = prefs
                .iter()
                .map(|(k, v)| (k.clone(), json_as_f64(v).unwrap_or(0.0)))
                .collect();
            self.tool_preferences = normalize_tool_preferences(&raw);
        }
        if let Some(v) = parsed.get("toolRetryBudget") {
            self.tool_retry_budget = lenient_int(v, self.tool_retry_budget, 0, 8);
        }
        if let Some(v) = parsed.get("deliberationBudget") {
            self.deliberation_budget = lenient_int(v, self.deliberation_budget, 1, 12);
        }
        if let Some(v) = parsed.get("memoryDepth") {
            self.memory_depth = lenient_int(v, self.memory_depth, 1, 64);
        }
        if let Some(safeguards) = parsed.get("safeguards").and_then(|v| v.as_object()) {
            if let Some(risk) = safeguards.get("maxRiskScore").and_then(json_as_f64) {
                self.safeguards.max_risk_score = clamp(risk, 0.05, 0.95);
            }
            if let Some(tools) = safeguards.get("disallowedTools").and_then(|v| v.as_array()) {
                self.safeguards.disallowed_tools = tools
                    .iter()
                    .map(|t| match t {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
            }
        }
    }

    /// Builds the seed policy from a raw genome payload: defaults first,
    /// then the genome's own fields under the same clamp rules as decode.
    #[must_use]
    pub fn from_genome_value(genome: &serde_json::Value) -> Self {
        let mut policy = Self::default();
        policy.merge_from_value(genome);
        policy
    }
}

// ══════════════════════════════════════════════════════════════
// Trajectory
// ══════════════════════════════════════════════════════════════

/// Lenient deserializer for telemetry metrics: numbers and numeric strings
/// pass through, anything else becomes None (scored as neutral later).
fn lenient_metric<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(json_as_f64(&value))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolCall {
    pub tool_name: String,
    pub success: bool,
    pub risk_score: f64,
}

/// One recorded agent interaction episode. Read-only input: the evaluator
/// never mutates trajectories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Trajectory {
    pub id: String,
    pub prompt: String,
    pub tool_calls: Vec<ToolCall>,
    pub success: bool,
    /// In [-1, 1]; out-of-range values are clamped during scoring.
    pub user_feedback: f64,
    pub safety_incidents: u32,
    #[serde(deserialize_with = "lenient_metric")]
    pub cost_usd: Option<f64>,
    #[serde(deserialize_with = "lenient_metric")]
    pub latency_ms: Option<f64>,
}

// ══════════════════════════════════════════════════════════════
// Candidate
// ══════════════════════════════════════════════════════════════

/// Component name holding the serialized policy inside a candidate.
pub const POLICY_COMPONENT: &str = "policy_json";

/// The optimizer's opaque unit of search: a map of named text components.
/// This service uses a single component, `policy_json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Candidate(pub BTreeMap<String, String>);

impl Candidate {
    #[must_use]
    pub fn from_policy_json(payload: String) -> Self {
        let mut components = BTreeMap::new();
        components.insert(POLICY_COMPONENT.to_string(), payload);
        Self(components)
    }

    /// The serialized policy payload; empty when the component is absent.
    #[must_use]
    pub fn policy_json(&self) -> &str {
        self.0.get(POLICY_COMPONENT).map_or("", String::as_str)
    }
}

// ══════════════════════════════════════════════════════════════
// Objectives & evaluation results
// ══════════════════════════════════════════════════════════════

pub const OBJECTIVE_NAMES: [&str; 5] = [
    "successRate",
    "satisfaction",
    "safety",
    "toolReliability",
    "efficiency",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectiveScores {
    pub success_rate: f64,
    pub satisfaction: f64,
    pub safety: f64,
    pub tool_reliability: f64,
    pub efficiency: f64,
}

impl ObjectiveScores {
    /// Values in `OBJECTIVE_NAMES` order.
    #[must_use]
    pub fn as_array(&self) -> [f64; 5] {
        [
            self.success_rate,
            self.satisfaction,
            self.safety,
            self.tool_reliability,
            self.efficiency,
        ]
    }
}

/// Caller-tunable coefficients combining the named objectives into the
/// aggregate fitness score. Need not sum to 1; the total is clamped anyway.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectiveWeights {
    pub success: f64,
    pub satisfaction: f64,
    pub safety: f64,
    pub tool_reliability: f64,
    pub efficiency: f64,
}

impl Default for ObjectiveWeights {
    fn default() -> Self {
        Self {
            success: 0.30,
            satisfaction: 0.20,
            safety: 0.25,
            tool_reliability: 0.15,
            efficiency: 0.10,
        }
    }
}

impl ObjectiveWeights {
    /// Field-by-field defaulting over an optional override map.
    #[must_use]
    pub fn resolve(overrides: Option<&BTreeMap<String, f64>>) -> Self {
        let defaults = Self::default();
        let Some(source) = overrides else {
            return defaults;
        };
        let pick = |key: &str, fallback: f64| {
            source
                .get(key)
                .copied()
                .filter(|v| v.is_finite())
                .unwrap_or(fallback)
        };
        Self {
            success: pick("success", defaults.success),
            satisfaction: pick("satisfaction", defaults.satisfaction),
            safety: pick("safety", defaults.safety),
            tool_reliability: pick("toolReliability", defaults.tool_reliability),
            efficiency: pick("efficiency", defaults.efficiency),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExampleOutput {
    pub score: f64,
    pub objectives: ObjectiveScores,
    pub trajectory_id: String,
}

/// Captured per-example trace: the raw input alongside what the candidate
/// scored on it. Only materialized when the optimizer asks for traces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalTrace {
    pub data: Trajectory,
    pub output: ExampleOutput,
    pub score: f64,
    pub objective_scores: ObjectiveScores,
    pub feedback: String,
}

/// Result of evaluating one candidate over a batch of trajectories.
/// `objective_scores` holds one score column per objective name, aligned
/// with the batch order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationBatch {
    pub outputs: Vec<ExampleOutput>,
    pub scores: Vec<f64>,
    pub trajectories: Option<Vec<EvalTrace>>,
    pub objective_scores: BTreeMap<String, Vec<f64>>,
}

// ══════════════════════════════════════════════════════════════
// Genome
// ══════════════════════════════════════════════════════════════

/// A versioned, provenance-tagged policy snapshot exchanged with callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Genome {
    pub id: String,
    pub base_model: String,
    #[serde(flatten)]
    pub policy: Policy,
    pub mutation_trace: Vec<String>,
}

impl Genome {
    /// Packages a policy back into genome form. Base model and prior
    /// provenance come from the raw seed genome; the engine tag extends the
    /// mutation trace.
    #[must_use]
    pub fn from_policy(seed_genome: &serde_json::Value, policy: Policy, engine_tag: &str) -> Self {
        let base_model = seed_genome
            .get("baseModel")
            .and_then(|v| v.as_str())
            .unwrap_or("gpt-5-mini")
            .to_string();
        let mut mutation_trace: Vec<String> = seed_genome
            .get("mutationTrace")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        mutation_trace.push(engine_tag.to_string());

        let millis = chrono::Utc::now().timestamp_millis();
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("genome_{}_{}", millis, &uuid[..8]),
            base_model,
            policy,
            mutation_trace,
        }
    }
}

// ══════════════════════════════════════════════════════════════
// Tests
// ══════════════════════════════════════════════════════════════
