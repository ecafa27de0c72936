//! Policy <-> Candidate codec.
//!
//! Encoding is canonical: key-sorted, compact JSON, so identical policies
//! always serialize to byte-identical candidates and the optimizer can
//! cache/dedup on the payload text. Decoding never fails hard: a malformed
//! payload degrades to the seed policy with a non-fatal parse-error string.

use clawevolve_shared::{Candidate, Policy};

/// Serializes a policy into a candidate. `serde_json`'s object map is
/// BTree-backed, so round-tripping through `Value` yields sorted keys.
#[must_use]
pub fn encode(policy: &Policy) -> Candidate {
    let payload = serde_json::to_value(policy)
        .map(|v| v.to_string())
        .unwrap_or_default();
    Candidate::from_policy_json(payload)
}

/// Decodes a candidate against a seed policy.
///
/// Starts from a fresh copy of the seed. An empty payload returns the seed
/// unchanged with no error; unparseable JSON returns the seed plus a parse
/// error string; a parsed object is merged field by field under the clamp
/// rules in [`Policy::merge_from_value`], silently skipping invalid fields.
#[must_use]
pub fn decode(seed_policy: &Policy, candidate: &Candidate) -> (Policy, Option<String>) {
    let mut policy = seed_policy.clone();
    let payload = candidate.policy_json();
    if payload.is_empty() {
        return (policy, None);
    }

    let parsed: serde_json::Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => return (policy, Some(format!("invalid policy_json: {e}"))),
    };

    policy.merge_from_value(&parsed);
    (policy, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawevolve_shared::{normalize_tool_preferences, ResponseStyle};
    use std::collections::BTreeMap;

    fn sample_policy() -> Policy {
        let prefs = BTreeMap::from([("search".to_string(), 2.0), ("shell".to_string(), 2.0)]);
        Policy {
            system_prompt: "be useful".to_string(),
            response_style: ResponseStyle::Concise,
            tool_preferences: normalize_tool_preferences(&prefs),
            tool_retry_budget: 3,
            deliberation_budget: 5,
            memory_depth: 12,
            safeguards: clawevolve_shared::Safeguards {
                max_risk_score: 0.4,
                disallowed_tools: vec!["rm".to_string()],
            },
        }
    }

    #[test]
    fn encode_is_deterministic() {
        let policy = sample_policy();
        assert_eq!(encode(&policy), encode(&policy.clone()));
    }

    #[test]
    fn decode_round_trips_valid_policy() {
        let policy = sample_policy();
        let (decoded, err) = decode(&Policy::default(), &encode(&policy));
        assert!(err.is_none());
        assert_eq!(decoded, policy);
    }

    #[test]
    fn empty_payload_returns_seed_without_error() {
        let seed = sample_policy();
        let (decoded, err) = decode(&seed, &Candidate::default());
        assert!(err.is_none());
        assert_eq!(decoded, seed);
    }

    #[test]
    fn malformed_payload_falls_back_to_seed() {
        let seed = sample_policy();
        let candidate = Candidate::from_policy_json("{not json".to_string());
        let (decoded, err) = decode(&seed, &candidate);
        assert!(err.unwrap().starts_with("invalid policy_json:"));
        assert_eq!(decoded, seed);
    }

    #[test]
    fn decoded_fields_stay_within_bounds() {
        let candidate = Candidate::from_policy_json(
            r#"{"toolRetryBudget":50,"deliberationBudget":0,"memoryDepth":-3,
                "safeguards":{"maxRiskScore":42.0}}"#
                .to_string(),
        );
        let (decoded, err) = decode(&Policy::default(), &candidate);
        assert!(err.is_none());
        assert_eq!(decoded.tool_retry_budget, 8);
        assert_eq!(decoded.deliberation_budget, 1);
        assert_eq!(decoded.memory_depth, 1);
        assert!((decoded.safeguards.max_risk_score - 0.95).abs() < 1e-9);
    }

    #[test]
    fn decode_renormalizes_tool_preferences() {
        let candidate = Candidate::from_policy_json(
            r#"{"toolPreferences":{"a":4.0,"b":4.0}}"#.to_string(),
        );
        let (decoded, _) = decode(&Policy::default(), &candidate);
        assert!((decoded.tool_preferences["a"] - 0.5).abs() < 1e-9);
        let total: f64 = decoded.tool_preferences.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}
