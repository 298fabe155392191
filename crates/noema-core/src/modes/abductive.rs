//! Abductive reasoning: given observed effects, find the most plausible
//! causal explanations for them.
//!
//! Grounded on [`crate::hypergraph::CausalHypergraph::find_causes`]
//! plus the teacher's `advanced::intent::IntentDetector` shape (score
//! candidate explanations, keep the top-k, report confidence).

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hypergraph::{CausalChain, CausalHypergraph, NodeId, TraversalOpts};
use crate::orchestrator::{Provenance, ReasoningRequest, ReasoningResponse};

#[derive(Debug, Clone)]
pub struct AbductiveConfig {
    pub effect_nodes: Vec<NodeId>,
    pub max_depth: usize,
    pub top_k: usize,
    pub opts: TraversalOpts,
}

impl Default for AbductiveConfig {
    fn default() -> Self {
        Self {
            effect_nodes: Vec::new(),
            max_depth: 3,
            top_k: 3,
            opts: TraversalOpts::default(),
        }
    }
}

/// The best explanation found, plus the runners-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbductiveExplanation {
    pub hypothesis_chain: Option<CausalChain>,
    pub alternative_chains: Vec<CausalChain>,
    pub explanatory_power: f32,
}

/// Explains a set of observed effects by walking causes backward from
/// each and ranking the resulting chains.
pub struct AbductiveEngine {
    hypergraph: Arc<CausalHypergraph>,
}

impl AbductiveEngine {
    pub fn new(hypergraph: Arc<CausalHypergraph>) -> Self {
        Self { hypergraph }
    }

    pub async fn reason(
        &self,
        request: &ReasoningRequest,
        config: AbductiveConfig,
    ) -> Result<ReasoningResponse> {
        let start = Instant::now();

        let mut chains: Vec<CausalChain> = Vec::new();
        for effect in &config.effect_nodes {
            let result = self.hypergraph.find_causes(effect, config.max_depth, &config.opts);
            chains.extend(result.chains);
        }
        chains.sort_by(|a, b| {
            b.total_confidence
                .partial_cmp(&a.total_confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.depth.cmp(&b.depth))
        });
        chains.truncate(config.top_k.max(1));

        let hypothesis_chain = chains.first().cloned();
        let explanatory_power = hypothesis_chain.as_ref().map(|c| c.total_confidence).unwrap_or(0.0);
        let alternative_chains = if chains.len() > 1 { chains[1..].to_vec() } else { Vec::new() };

        let explanation = AbductiveExplanation {
            hypothesis_chain,
            alternative_chains,
            explanatory_power,
        };

        let mut response = ReasoningResponse::empty(
            crate::orchestrator::Mode::Causal,
            request.query_embedding.as_slice().to_vec(),
            start.elapsed().as_secs_f64() * 1000.0,
        );
        response.confidence = explanatory_power;
        response.provenance = Provenance::compute(vec![explanatory_power]);
        response.mode_payload = serde_json::to_value(&explanation).ok();
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{Embedding, D};
    use crate::hypergraph::NodeKind;
    use serde_json::json as j;
    use std::collections::BTreeSet;

    fn request() -> ReasoningRequest {
        ReasoningRequest {
            query_embedding: Embedding::from_raw(vec![0.0; D]).unwrap(),
            mode: None,
            max_results: None,
            confidence_threshold: None,
            min_l_score: None,
            enhance_with_gnn: None,
            task_type: None,
        }
    }

    #[tokio::test]
    async fn finds_best_explanation_for_observed_effect() {
        let graph = Arc::new(CausalHypergraph::new());
        let cause = graph.add_node("rain".into(), NodeKind::State, j!({}));
        let effect = graph.add_node("wet_ground".into(), NodeKind::State, j!({}));
        graph
            .add_causal_link(crate::hypergraph::NewCausalLink {
                causes: BTreeSet::from([cause.id.clone()]),
                effects: BTreeSet::from([effect.id.clone()]),
                confidence: 0.9,
                strength: 0.9,
                metadata: j!({}),
            })
            .unwrap();

        let engine = AbductiveEngine::new(graph);
        let config = AbductiveConfig {
            effect_nodes: vec![effect.id],
            ..Default::default()
        };
        let response = engine.reason(&request(), config).await.unwrap();
        assert!(response.confidence > 0.0);
        assert!(response.mode_payload.is_some());
    }

    #[tokio::test]
    async fn no_effects_yields_zero_confidence() {
        let graph = Arc::new(CausalHypergraph::new());
        let engine = AbductiveEngine::new(graph);
        let response = engine.reason(&request(), AbductiveConfig::default()).await.unwrap();
        assert_eq!(response.confidence, 0.0);
    }
}
