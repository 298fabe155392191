//! The reasoning orchestrator: validates a request, optionally enhances
//! the query embedding, dispatches to a mode, attaches provenance, and
//! hands the result to the trajectory tracker.

mod types;

pub use types::{geomean, Mode, PatternMatchOut, Provenance, ReasoningRequest, ReasoningResponse};

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::config::OrchestratorConfig;
use crate::embedding::D;
use crate::error::{NoemaError, Result};
use crate::external::{PatternQuery, PatternStore, VectorIndex};
use crate::gnn::GnnEnhancer;
use crate::hypergraph::{CausalHypergraph, TraversalOpts};
use crate::trajectory::TrajectoryTracker;

/// Shared contract for the orchestrator's own dispatch and every advanced
/// mode engine (abductive, counterfactual, temporal, constraint) — see
/// spec.md §4.12.
#[async_trait]
pub trait ModeEngine: Send + Sync {
    async fn reason(&self, request: &ReasoningRequest) -> Result<ReasoningResponse>;
}

fn validate(request: &ReasoningRequest) -> Result<()> {
    if request.query_embedding.len() != D {
        return Err(NoemaError::DimensionError {
            expected: D,
            got: request.query_embedding.len(),
        });
    }
    if let Some(t) = request.confidence_threshold {
        if !(0.0..=1.0).contains(&t) {
            return Err(NoemaError::InvalidArgument(
                "confidence_threshold must be in [0,1]".into(),
            ));
        }
    }
    if let Some(t) = request.min_l_score {
        if !(0.0..=1.0).contains(&t) {
            return Err(NoemaError::InvalidArgument("min_l_score must be in [0,1]".into()));
        }
    }
    if let Some(max) = request.max_results {
        if max == 0 {
            return Err(NoemaError::InvalidArgument("max_results must be > 0".into()));
        }
    }
    Ok(())
}

/// Single entry point fusing pattern recall, causal traversal, and vector
/// search, with an optional GNN enhancement pass in front.
pub struct ReasoningOrchestrator {
    config: OrchestratorConfig,
    hypergraph: Arc<CausalHypergraph>,
    vector_index: Arc<dyn VectorIndex>,
    pattern_store: Arc<dyn PatternStore>,
    gnn: Arc<GnnEnhancer>,
    tracker: Arc<TrajectoryTracker>,
}

impl ReasoningOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        hypergraph: Arc<CausalHypergraph>,
        vector_index: Arc<dyn VectorIndex>,
        pattern_store: Arc<dyn PatternStore>,
        gnn: Arc<GnnEnhancer>,
        tracker: Arc<TrajectoryTracker>,
    ) -> Self {
        Self {
            config,
            hypergraph,
            vector_index,
            pattern_store,
            gnn,
            tracker,
        }
    }

    pub async fn reason(&self, request: ReasoningRequest) -> Result<ReasoningResponse> {
        validate(&request)?;
        let start = Instant::now();

        let max_results = request.max_results.unwrap_or(self.config.default_max_results);
        let confidence_threshold = request
            .confidence_threshold
            .unwrap_or(self.config.default_confidence_threshold);
        let min_l_score = request.min_l_score.unwrap_or(self.config.default_min_l_score);
        let mode = request.mode.unwrap_or_default();

        let enhanced_embedding = if request.enhance_with_gnn.unwrap_or(false) {
            let result = self.gnn.enhance(&request.query_embedding, &[]);
            Some(result.enhanced)
        } else {
            None
        };
        let search_embedding = enhanced_embedding.clone().unwrap_or_else(|| {
            request.query_embedding.as_slice().to_vec()
        });

        let mut response = match mode {
            Mode::Pattern => {
                self.run_pattern(&request, max_results, confidence_threshold, min_l_score)
                    .await
            }
            Mode::Causal => {
                self.run_causal(&search_embedding, max_results, confidence_threshold)
                    .await
            }
            Mode::Contextual => {
                self.run_contextual(&search_embedding, max_results, confidence_threshold)
                    .await
            }
            Mode::Hybrid => {
                self.run_hybrid(
                    &request,
                    &search_embedding,
                    max_results,
                    confidence_threshold,
                    min_l_score,
                )
                .await
            }
        };

        response.query_embedding = request.query_embedding.as_slice().to_vec();
        response.enhanced_embedding = enhanced_embedding.clone();
        response.mode = mode;
        response.processing_time_ms = start.elapsed().as_secs_f64() * 1000.0;

        let trajectory_id = self
            .tracker
            .create(
                &request,
                &response,
                &request.query_embedding,
                enhanced_embedding.as_deref(),
            )
            .await;
        response.trajectory_id = trajectory_id;

        Ok(response)
    }

    async fn run_pattern(
        &self,
        request: &ReasoningRequest,
        max_results: usize,
        confidence_threshold: f32,
        min_l_score: f32,
    ) -> ReasoningResponse {
        let query = PatternQuery {
            embedding: request.query_embedding.clone(),
            task_type: request.task_type.clone(),
            top_k: max_results,
            min_confidence: confidence_threshold,
        };
        let patterns = self.pattern_store.find_patterns(query).await.unwrap_or_default();
        let kept: Vec<PatternMatchOut> = patterns
            .into_iter()
            .filter(|p| p.confidence >= confidence_threshold && p.l_score >= min_l_score)
            .map(PatternMatchOut::from)
            .collect();
        self.finish(Mode::Pattern, kept, Vec::new())
    }

    async fn run_causal(
        &self,
        search_embedding: &[f32],
        max_results: usize,
        confidence_threshold: f32,
    ) -> ReasoningResponse {
        let seeds = match self.seed_node_ids(search_embedding, max_results).await {
            Ok(s) => s,
            Err(_) => Vec::new(),
        };
        if seeds.is_empty() {
            return self.finish(Mode::Causal, Vec::new(), Vec::new());
        }
        let opts = TraversalOpts {
            decay: 0.9,
            confidence_epsilon: 1e-4,
            relaxed_any_cause: false,
        };
        let result = self.hypergraph.infer_consequences(&seeds, 3, &opts);
        let kept: Vec<_> = result
            .effects
            .into_iter()
            .filter(|e| e.confidence >= confidence_threshold)
            .take(max_results)
            .collect();
        self.finish(Mode::Causal, Vec::new(), kept)
    }

    async fn run_contextual(
        &self,
        search_embedding: &[f32],
        max_results: usize,
        confidence_threshold: f32,
    ) -> ReasoningResponse {
        let emb = match crate::embedding::Embedding::from_raw(search_embedding.to_vec()) {
            Ok(e) => e,
            Err(_) => return self.finish(Mode::Contextual, Vec::new(), Vec::new()),
        };
        let hits = self
            .vector_index
            .search(&emb, max_results)
            .await
            .unwrap_or_default();
        let patterns: Vec<PatternMatchOut> = hits
            .into_iter()
            .filter(|h| h.similarity >= confidence_threshold)
            .map(|h| PatternMatchOut {
                pattern_id: h.id,
                confidence: h.similarity.max(0.0),
                template: String::new(),
                task_type: "contextual".to_string(),
                l_score: 0.5,
            })
            .collect();
        self.finish(Mode::Contextual, patterns, Vec::new())
    }

    async fn run_hybrid(
        &self,
        request: &ReasoningRequest,
        search_embedding: &[f32],
        max_results: usize,
        confidence_threshold: f32,
        min_l_score: f32,
    ) -> ReasoningResponse {
        let deadline = self.config.soft_deadline;
        let (pattern_resp, causal_resp, contextual_resp) = tokio::join!(
            tokio::time::timeout(
                deadline,
                self.run_pattern(request, max_results, confidence_threshold, min_l_score)
            ),
            tokio::time::timeout(
                deadline,
                self.run_causal(search_embedding, max_results, confidence_threshold)
            ),
            tokio::time::timeout(
                deadline,
                self.run_contextual(search_embedding, max_results, confidence_threshold)
            ),
        );
        // All-settled: a source that exceeds its soft deadline is demoted to
        // an empty sub-result rather than failing the whole request.
        let pattern_resp = pattern_resp.unwrap_or_else(|_| {
            tracing::warn!(mode = "pattern", "hybrid sub-mode exceeded soft deadline, demoting");
            self.finish(Mode::Pattern, Vec::new(), Vec::new())
        });
        let causal_resp = causal_resp.unwrap_or_else(|_| {
            tracing::warn!(mode = "causal", "hybrid sub-mode exceeded soft deadline, demoting");
            self.finish(Mode::Causal, Vec::new(), Vec::new())
        });
        let contextual_resp = contextual_resp.unwrap_or_else(|_| {
            tracing::warn!(mode = "contextual", "hybrid sub-mode exceeded soft deadline, demoting");
            self.finish(Mode::Contextual, Vec::new(), Vec::new())
        });

        let weights = self.config.mode_weights;
        let pattern_present = !pattern_resp.patterns.is_empty();
        let contextual_present = !contextual_resp.patterns.is_empty();
        let mut patterns = pattern_resp.patterns;
        patterns.extend(contextual_resp.patterns);
        let causal_inferences = causal_resp.causal_inferences;
        let causal_present = !causal_inferences.is_empty();

        let mut weighted_sum = 0.0f32;
        let mut weight_total = 0.0f32;
        for (confidence, weight, present) in [
            (pattern_resp.confidence, weights.pattern, pattern_present),
            (causal_resp.confidence, weights.causal, causal_present),
            (contextual_resp.confidence, weights.contextual, contextual_present),
        ] {
            if present {
                weighted_sum += confidence * weight;
                weight_total += weight;
            }
        }
        let confidence = if weight_total > 0.0 {
            weighted_sum / weight_total
        } else {
            0.0
        };

        let per_result_l_scores: Vec<f32> = patterns
            .iter()
            .map(|p| p.l_score)
            .chain(causal_inferences.iter().map(|c| c.l_score))
            .collect();

        let mut response =
            ReasoningResponse::empty(Mode::Hybrid, request.query_embedding.as_slice().to_vec(), 0.0);
        response.patterns = patterns;
        response.causal_inferences = causal_inferences;
        response.confidence = confidence;
        response.provenance = Provenance::compute(per_result_l_scores);
        response
    }

    fn finish(
        &self,
        mode: Mode,
        patterns: Vec<PatternMatchOut>,
        causal_inferences: Vec<crate::hypergraph::InferenceResult>,
    ) -> ReasoningResponse {
        let per_result_l_scores: Vec<f32> = patterns
            .iter()
            .map(|p| p.l_score)
            .chain(causal_inferences.iter().map(|c| c.l_score))
            .collect();
        let confidence = if patterns.is_empty() && causal_inferences.is_empty() {
            0.0
        } else {
            let pattern_conf = patterns.iter().map(|p| p.confidence).fold(0.0f32, f32::max);
            let causal_conf = causal_inferences.iter().map(|c| c.confidence).fold(0.0f32, f32::max);
            pattern_conf.max(causal_conf)
        };
        let mut response = ReasoningResponse::empty(mode, Vec::new(), 0.0);
        response.provenance = Provenance::compute(per_result_l_scores);
        response.patterns = patterns;
        response.causal_inferences = causal_inferences;
        response.confidence = confidence;
        response
    }

    /// Resolves seed node ids for causal traversal via the vector index,
    /// reusing each hit's id as a hypergraph node id.
    async fn seed_node_ids(&self, search_embedding: &[f32], k: usize) -> Result<Vec<String>> {
        let emb = crate::embedding::Embedding::from_raw(search_embedding.to_vec())?;
        let hits = self.vector_index.search(&emb, k).await?;
        Ok(hits
            .into_iter()
            .filter(|h| self.hypergraph.get_node(&h.id).is_some())
            .map(|h| h.id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_out_of_range_confidence_threshold() {
        let mut request = ReasoningRequest {
            query_embedding: crate::embedding::Embedding::from_raw(vec![0.0; D]).unwrap(),
            mode: None,
            max_results: None,
            confidence_threshold: None,
            min_l_score: None,
            enhance_with_gnn: None,
            task_type: None,
        };
        request.confidence_threshold = Some(1.5);
        assert!(validate(&request).is_err());
    }

    #[test]
    fn validate_rejects_zero_max_results() {
        let request = ReasoningRequest {
            query_embedding: crate::embedding::Embedding::from_raw(vec![0.0; D]).unwrap(),
            mode: None,
            max_results: Some(0),
            confidence_threshold: None,
            min_l_score: None,
            enhance_with_gnn: None,
            task_type: None,
        };
        assert!(validate(&request).is_err());
    }

    struct SlowPatternStore;

    #[async_trait]
    impl PatternStore for SlowPatternStore {
        async fn find_patterns(&self, _query: PatternQuery) -> Result<Vec<crate::external::PatternMatch>> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(Vec::new())
        }

        async fn create_pattern(&self, _template: String, _task_type: String, _confidence: f32) -> Result<String> {
            Ok("unused".to_string())
        }
    }

    struct EmptyVectorIndex;

    #[async_trait]
    impl VectorIndex for EmptyVectorIndex {
        async fn search(&self, _query: &crate::embedding::Embedding, _k: usize) -> Result<Vec<crate::external::VectorHit>> {
            Ok(Vec::new())
        }

        async fn add(&self, _id: &str, _embedding: &crate::embedding::Embedding, _metadata: Option<serde_json::Value>) -> Result<()> {
            Ok(())
        }
    }

    /// A hybrid sub-mode that exceeds `soft_deadline` is demoted to an
    /// empty sub-result, not propagated as a request failure.
    #[tokio::test]
    async fn hybrid_demotes_sub_mode_past_soft_deadline() {
        let hypergraph = Arc::new(CausalHypergraph::new());
        let tracker = Arc::new(TrajectoryTracker::new(
            crate::config::TrajectoryConfig::default(),
            crate::learner::LearnerHandle::unbound(),
            hypergraph.clone(),
            None,
        ));
        let mut config = OrchestratorConfig::default();
        config.soft_deadline = std::time::Duration::from_millis(1);
        let orchestrator = ReasoningOrchestrator::new(
            config,
            hypergraph,
            Arc::new(EmptyVectorIndex),
            Arc::new(SlowPatternStore),
            Arc::new(GnnEnhancer::new(1)),
            tracker,
        );

        let request = ReasoningRequest {
            query_embedding: crate::embedding::Embedding::from_raw(vec![0.0; D]).unwrap(),
            mode: Some(Mode::Hybrid),
            max_results: Some(5),
            confidence_threshold: Some(0.0),
            min_l_score: Some(0.0),
            enhance_with_gnn: None,
            task_type: None,
        };

        let response = orchestrator.reason(request).await.unwrap();
        assert!(response.patterns.is_empty());
        assert_eq!(response.confidence, 0.0);
    }
}
