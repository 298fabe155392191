//! Counterfactual reasoning: compare a seed node's real consequences
//! against what they'd be if one hyperedge were removed or weakened.
//!
//! Grounded on the teacher's `advanced::dreams` "what-if" creative-
//! connection scoring (compare two candidate associative structures and
//! report what differs).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hypergraph::{CausalHypergraph, EdgeId, InferenceResult, NodeId, TraversalOpts};
use crate::orchestrator::{Provenance, ReasoningRequest, ReasoningResponse};

/// How to perturb the target hyperedge in the transient what-if graph.
#[derive(Debug, Clone, Copy)]
pub enum Perturbation {
    Remove,
    Weaken(f32),
}

#[derive(Debug, Clone)]
pub struct CounterfactualConfig {
    pub seeds: Vec<NodeId>,
    pub target_edge: EdgeId,
    pub perturbation: Perturbation,
    pub max_depth: usize,
    pub opts: TraversalOpts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterfactualScenario {
    pub baseline_effects: Vec<InferenceResult>,
    pub altered_effects: Vec<InferenceResult>,
    pub divergent_nodes: Vec<NodeId>,
}

/// Runs `infer_consequences` once on the real graph and once on a
/// transient clone with one hyperedge perturbed, diffing the effect
/// sets.
pub struct CounterfactualEngine {
    hypergraph: Arc<CausalHypergraph>,
}

impl CounterfactualEngine {
    pub fn new(hypergraph: Arc<CausalHypergraph>) -> Self {
        Self { hypergraph }
    }

    pub async fn reason(
        &self,
        request: &ReasoningRequest,
        config: CounterfactualConfig,
    ) -> Result<ReasoningResponse> {
        let start = Instant::now();

        let baseline = self
            .hypergraph
            .infer_consequences(&config.seeds, config.max_depth, &config.opts);

        let altered_graph = self.hypergraph.snapshot_clone();
        match config.perturbation {
            Perturbation::Remove => {
                let _ = altered_graph.remove_hyperedge(&config.target_edge);
            }
            Perturbation::Weaken(factor) => {
                if let Some(edge) = altered_graph.get_hyperedge(&config.target_edge) {
                    let _ = altered_graph
                        .set_hyperedge_confidence(&config.target_edge, (edge.confidence * factor).clamp(0.0, 1.0));
                }
            }
        }
        let altered = altered_graph.infer_consequences(&config.seeds, config.max_depth, &config.opts);

        let baseline_ids: HashSet<&str> = baseline.effects.iter().map(|e| e.node_id.as_str()).collect();
        let altered_ids: HashSet<&str> = altered.effects.iter().map(|e| e.node_id.as_str()).collect();
        let mut divergent_nodes: Vec<NodeId> = baseline_ids
            .symmetric_difference(&altered_ids)
            .map(|s| s.to_string())
            .collect();
        divergent_nodes.sort();

        let scenario = CounterfactualScenario {
            baseline_effects: baseline.effects,
            altered_effects: altered.effects,
            divergent_nodes: divergent_nodes.clone(),
        };

        let mut response = ReasoningResponse::empty(
            crate::orchestrator::Mode::Causal,
            request.query_embedding.as_slice().to_vec(),
            start.elapsed().as_secs_f64() * 1000.0,
        );
        response.confidence = if divergent_nodes.is_empty() { 1.0 } else { 0.5 };
        response.provenance = Provenance::compute(vec![response.confidence]);
        response.mode_payload = serde_json::to_value(&scenario).ok();
        Ok(response)
    }
}
