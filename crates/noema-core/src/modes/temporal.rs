//! Temporal reasoning: order the hyperedges touching a set of seed
//! nodes into a Chain-of-History.
//!
//! Grounded on `neuroscience::predictive_retrieval`'s time-ordered
//! access-pattern reasoning.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::external::GraphStore;
use crate::hypergraph::{CausalHyperedge, NodeId};
use crate::orchestrator::{Provenance, ReasoningRequest, ReasoningResponse};

#[derive(Debug, Clone)]
pub struct TemporalConfig {
    pub seed_nodes: Vec<NodeId>,
}

/// One hyperedge's place in the Chain-of-History.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainLink {
    pub edge_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalReasoningResult {
    pub chain: Vec<ChainLink>,
    pub time_span_seconds: Option<i64>,
}

/// Pulls the full hyperedge set from a [`GraphStore`] and orders the
/// ones touching `config.seed_nodes` into a Chain-of-History.
pub struct TemporalEngine {
    graph_store: Arc<dyn GraphStore>,
}

impl TemporalEngine {
    pub fn new(graph_store: Arc<dyn GraphStore>) -> Self {
        Self { graph_store }
    }

    pub async fn reason(
        &self,
        request: &ReasoningRequest,
        config: TemporalConfig,
    ) -> Result<ReasoningResponse> {
        let start = Instant::now();

        let raw_edges = self.graph_store.get_all_hyperedges().await?;
        let seeds: std::collections::HashSet<&str> =
            config.seed_nodes.iter().map(|s| s.as_str()).collect();

        let mut touching: Vec<CausalHyperedge> = raw_edges
            .into_iter()
            .filter_map(|v| serde_json::from_value::<CausalHyperedge>(v).ok())
            .filter(|e| {
                seeds.is_empty()
                    || e.causes.iter().any(|c| seeds.contains(c.as_str()))
                    || e.effects.iter().any(|c| seeds.contains(c.as_str()))
            })
            .collect();
        touching.sort_by_key(|e| e.created_at);

        let time_span_seconds = match (touching.first(), touching.last()) {
            (Some(first), Some(last)) => Some((last.created_at - first.created_at).num_seconds()),
            _ => None,
        };
        let chain: Vec<ChainLink> = touching
            .iter()
            .map(|e| ChainLink {
                edge_id: e.id.clone(),
                created_at: e.created_at,
            })
            .collect();

        let result = TemporalReasoningResult {
            chain,
            time_span_seconds,
        };

        let mut response = ReasoningResponse::empty(
            crate::orchestrator::Mode::Causal,
            request.query_embedding.as_slice().to_vec(),
            start.elapsed().as_secs_f64() * 1000.0,
        );
        response.confidence = if result.chain.is_empty() { 0.0 } else { 1.0 };
        response.provenance = Provenance::compute(if result.chain.is_empty() {
            Vec::new()
        } else {
            vec![1.0]
        });
        response.mode_payload = serde_json::to_value(&result).ok();
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{Embedding, D};
    use async_trait::async_trait;
    use serde_json::{json as j, Value};

    struct FakeGraphStore {
        edges: Vec<Value>,
    }

    #[async_trait]
    impl GraphStore for FakeGraphStore {
        async fn get_all_hyperedges(&self) -> Result<Vec<Value>> {
            Ok(self.edges.clone())
        }
    }

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

    fn edge_json(id: &str, node: &str, created_at: &str) -> Value {
        j!({
            "id": id,
            "causes": [node],
            "effects": ["other"],
            "confidence": 0.8,
            "strength": 0.8,
            "metadata": {},
            "created_at": created_at,
            "expires_at": null,
        })
    }

    #[tokio::test]
    async fn orders_touching_edges_by_created_at() {
        let store = Arc::new(FakeGraphStore {
            edges: vec![
                edge_json("e2", "seed", "2024-01-02T00:00:00Z"),
                edge_json("e1", "seed", "2024-01-01T00:00:00Z"),
            ],
        });
        let engine = TemporalEngine::new(store);
        let config = TemporalConfig {
            seed_nodes: vec!["seed".to_string()],
        };
        let response = engine.reason(&request(), config).await.unwrap();
        assert_eq!(response.confidence, 1.0);
        let payload = response.mode_payload.unwrap();
        let chain = payload.get("chain").unwrap().as_array().unwrap();
        assert_eq!(chain[0]["edge_id"], "e1");
        assert_eq!(chain[1]["edge_id"], "e2");
    }

    #[tokio::test]
    async fn no_touching_edges_is_zero_confidence() {
        let store = Arc::new(FakeGraphStore { edges: vec![] });
        let engine = TemporalEngine::new(store);
        let config = TemporalConfig {
            seed_nodes: vec!["unseen".to_string()],
        };
        let response = engine.reason(&request(), config).await.unwrap();
        assert_eq!(response.confidence, 0.0);
    }
}
