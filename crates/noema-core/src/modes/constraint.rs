//! Constraint-satisfaction reasoning: filter a contextual search pass
//! down to nodes matching a declarative set of node-level constraints.
//!
//! Grounded on the teacher's `advanced::compression::CompressionConfig`
//! declarative constraint-config-as-data pattern.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::external::VectorIndex;
use crate::hypergraph::{CausalHypergraph, NodeId, NodeKind};
use crate::orchestrator::{Provenance, ReasoningRequest, ReasoningResponse};

/// One node-level constraint a candidate must satisfy.
#[derive(Debug, Clone)]
pub enum Constraint {
    MinConfidence(f32),
    Kind(NodeKind),
}

impl Constraint {
    fn describe(&self) -> String {
        match self {
            Constraint::MinConfidence(c) => format!("confidence >= {c}"),
            Constraint::Kind(k) => format!("kind == {k:?}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConstraintConfig {
    pub constraints: Vec<Constraint>,
    pub top_k: usize,
}

impl Default for ConstraintConfig {
    fn default() -> Self {
        Self {
            constraints: Vec::new(),
            top_k: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintSolution {
    pub satisfying_nodes: Vec<NodeId>,
    pub violated_constraints: Vec<String>,
}

/// Runs a contextual (vector-index) search pass, then keeps only
/// candidates whose resolved hypergraph node satisfies every declared
/// constraint.
pub struct ConstraintEngine {
    vector_index: Arc<dyn VectorIndex>,
    hypergraph: Arc<CausalHypergraph>,
}

impl ConstraintEngine {
    pub fn new(vector_index: Arc<dyn VectorIndex>, hypergraph: Arc<CausalHypergraph>) -> Self {
        Self {
            vector_index,
            hypergraph,
        }
    }

    pub async fn reason(
        &self,
        request: &ReasoningRequest,
        config: ConstraintConfig,
    ) -> Result<ReasoningResponse> {
        let start = Instant::now();

        let hits = self
            .vector_index
            .search(&request.query_embedding, config.top_k)
            .await?;

        let mut satisfying_nodes = Vec::new();
        let mut violated: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();

        for hit in &hits {
            let node = self.hypergraph.get_node(&hit.id);
            let mut ok = true;
            for constraint in &config.constraints {
                let satisfied = match constraint {
                    Constraint::MinConfidence(min) => hit.similarity >= *min,
                    Constraint::Kind(kind) => node.as_ref().map(|n| n.kind == *kind).unwrap_or(false),
                };
                if !satisfied {
                    ok = false;
                    violated.insert(constraint.describe());
                }
            }
            if ok {
                satisfying_nodes.push(hit.id.clone());
            }
        }

        let solution = ConstraintSolution {
            satisfying_nodes: satisfying_nodes.clone(),
            violated_constraints: violated.into_iter().collect(),
        };

        let confidence = if hits.is_empty() {
            0.0
        } else {
            satisfying_nodes.len() as f32 / hits.len() as f32
        };

        let mut response = ReasoningResponse::empty(
            crate::orchestrator::Mode::Contextual,
            request.query_embedding.as_slice().to_vec(),
            start.elapsed().as_secs_f64() * 1000.0,
        );
        response.confidence = confidence;
        response.provenance = Provenance::compute(if hits.is_empty() {
            Vec::new()
        } else {
            vec![confidence]
        });
        response.mode_payload = serde_json::to_value(&solution).ok();
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{Embedding, D};
    use crate::external::VectorHit;
    use async_trait::async_trait;
    use serde_json::{json as j, Value};

    struct FakeVectorIndex {
        hits: Vec<VectorHit>,
    }

    #[async_trait]
    impl VectorIndex for FakeVectorIndex {
        async fn search(&self, _query: &Embedding, _k: usize) -> Result<Vec<VectorHit>> {
            Ok(self.hits.clone())
        }
        async fn add(&self, _id: &str, _embedding: &Embedding, _metadata: Option<Value>) -> Result<()> {
            Ok(())
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

    #[tokio::test]
    async fn keeps_only_nodes_above_min_confidence() {
        let index = Arc::new(FakeVectorIndex {
            hits: vec![
                VectorHit {
                    id: "a".to_string(),
                    similarity: 0.9,
                    metadata: None,
                },
                VectorHit {
                    id: "b".to_string(),
                    similarity: 0.1,
                    metadata: None,
                },
            ],
        });
        let hypergraph = Arc::new(CausalHypergraph::new());
        let engine = ConstraintEngine::new(index, hypergraph);
        let config = ConstraintConfig {
            constraints: vec![Constraint::MinConfidence(0.5)],
            top_k: 10,
        };
        let response = engine.reason(&request(), config).await.unwrap();
        assert!((response.confidence - 0.5).abs() < 1e-5);
    }

    #[tokio::test]
    async fn kind_constraint_requires_matching_node() {
        let hypergraph = Arc::new(CausalHypergraph::new());
        let node = hypergraph.add_node("n".into(), NodeKind::Action, j!({}));
        let index = Arc::new(FakeVectorIndex {
            hits: vec![VectorHit {
                id: node.id.clone(),
                similarity: 0.9,
                metadata: None,
            }],
        });
        let engine = ConstraintEngine::new(index, hypergraph);
        let config = ConstraintConfig {
            constraints: vec![Constraint::Kind(NodeKind::Concept)],
            top_k: 10,
        };
        let response = engine.reason(&request(), config).await.unwrap();
        assert_eq!(response.confidence, 0.0);
    }
}
