//! Helpers for integration tests: a canned stub engine and app-state
//! construction without touching the environment.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::optimizer::{OptimizerOutcome, OptimizerRun, PolicyOptimizer};
use crate::AppState;

/// Engine stand-in returning a canned outcome, for exercising the
/// orchestration and transport layers without a real search.
pub struct StubOptimizer {
    pub best_candidate: serde_json::Value,
    pub history: serde_json::Value,
    /// When set, `run` fails with this message instead.
    pub fail_with: Option<String>,
}

impl StubOptimizer {
    /// Stub that hands the seed candidate straight back.
    #[must_use]
    pub fn echo_seed() -> Self {
        Self {
            best_candidate: serde_json::Value::Null,
            history: serde_json::json!([{ "bestScore": 0.5 }]),
            fail_with: None,
        }
    }
}

impl PolicyOptimizer for StubOptimizer {
    fn run(&self, run: OptimizerRun<'_>) -> anyhow::Result<OptimizerOutcome> {
        if let Some(ref message) = self.fail_with {
            anyhow::bail!("{message}");
        }
        let best_candidate = if self.best_candidate.is_null() {
            serde_json::to_value(&run.seed_candidate)?
        } else {
            self.best_candidate.clone()
        };
        Ok(OptimizerOutcome {
            best_candidate,
            history: self.history.clone(),
        })
    }
}

#[must_use]
pub fn create_test_app_state(
    api_key: Option<String>,
    optimizer: Arc<dyn PolicyOptimizer>,
) -> Arc<AppState> {
    Arc::new(AppState {
        config: AppConfig {
            port: 0,
            bind_address: "127.0.0.1".to_string(),
            cors_origins: Vec::new(),
            api_key,
        },
        optimizer,
    })
}
