//! Request/response shapes shared by the orchestrator and every advanced
//! mode engine (spec.md §4.12: "the same response shape as §4.5 plus a
//! mode-specific payload").

use serde::{Deserialize, Serialize};

use crate::embedding::Embedding;
use crate::external::PatternMatch;
use crate::hypergraph::InferenceResult;

/// Which retrieval/inference strategy to run.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Pattern,
    Causal,
    Contextual,
    Hybrid,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Hybrid
    }
}

/// A request to [`crate::orchestrator::ReasoningOrchestrator::reason`] or
/// to any advanced [`crate::orchestrator::ModeEngine`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReasoningRequest {
    pub query_embedding: Embedding,
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub confidence_threshold: Option<f32>,
    #[serde(default)]
    pub min_l_score: Option<f32>,
    #[serde(default)]
    pub enhance_with_gnn: Option<bool>,
    /// Task type hint forwarded to the pattern store; optional.
    #[serde(default)]
    pub task_type: Option<String>,
}

/// Per-result and aggregate provenance/trust scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub per_result_l_scores: Vec<f32>,
    pub total_sources: usize,
    pub combined_l_score: f32,
}

impl Provenance {
    pub fn compute(per_result_l_scores: Vec<f32>) -> Self {
        let combined_l_score = geomean(&per_result_l_scores);
        let total_sources = per_result_l_scores.len();
        Self {
            per_result_l_scores,
            total_sources,
            combined_l_score,
        }
    }
}

/// Geometric mean; `0.0` for an empty slice (no sources, no trust).
pub fn geomean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let log_sum: f64 = values
        .iter()
        .map(|&v| (v.max(1e-12) as f64).ln())
        .sum();
    (log_sum / values.len() as f64).exp() as f32
}

/// The response shape shared by orchestrator dispatch and every advanced
/// mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningResponse {
    pub query_embedding: Vec<f32>,
    pub mode: Mode,
    pub patterns: Vec<PatternMatchOut>,
    pub causal_inferences: Vec<InferenceResult>,
    pub trajectory_id: String,
    pub confidence: f32,
    pub processing_time_ms: f64,
    pub provenance: Provenance,
    pub enhanced_embedding: Option<Vec<f32>>,
    /// Mode-specific payload (explanations / scenarios / temporal chains /
    /// solution) attached by an advanced mode engine; `None` for the
    /// orchestrator's own pattern/causal/contextual/hybrid dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode_payload: Option<serde_json::Value>,
}

/// Serializable projection of [`PatternMatch`] (the external trait's
/// return type doesn't derive `Serialize` since it isn't this crate's
/// wire type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMatchOut {
    pub pattern_id: String,
    pub confidence: f32,
    pub template: String,
    pub task_type: String,
    pub l_score: f32,
}

impl From<PatternMatch> for PatternMatchOut {
    fn from(p: PatternMatch) -> Self {
        Self {
            pattern_id: p.pattern_id,
            confidence: p.confidence,
            template: p.template,
            task_type: p.task_type,
            l_score: p.l_score,
        }
    }
}

impl ReasoningResponse {
    /// A fully empty response with confidence 0, per spec.md §7: "a
    /// request that would otherwise be empty returns confidence 0 rather
    /// than failing."
    pub fn empty(mode: Mode, query_embedding: Vec<f32>, processing_time_ms: f64) -> Self {
        Self {
            query_embedding,
            mode,
            patterns: Vec::new(),
            causal_inferences: Vec::new(),
            trajectory_id: String::new(),
            confidence: 0.0,
            processing_time_ms,
            provenance: Provenance::compute(Vec::new()),
            enhanced_embedding: None,
            mode_payload: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Testable property #7: combined_l_score = geomean(per_result_l_scores)
    #[test]
    fn geomean_matches_manual_computation() {
        let scores = vec![0.5, 0.8, 0.2];
        let expected = (0.5f64 * 0.8 * 0.2).powf(1.0 / 3.0);
        assert!((geomean(&scores) as f64 - expected).abs() < 1e-6);
    }

    #[test]
    fn geomean_empty_is_zero() {
        assert_eq!(geomean(&[]), 0.0);
    }
}
