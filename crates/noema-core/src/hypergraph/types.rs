//! The causal hypergraph's data model: nodes, hyperedges, and the derived
//! chains traversal produces.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type NodeId = String;
pub type EdgeId = String;

/// The kind of thing a [`CausalNode`] represents.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Concept,
    Action,
    State,
}

/// A node in the causal hypergraph. `id` is stable across serializations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalNode {
    pub id: NodeId,
    pub label: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// A directed many-causes-to-many-effects causal relation.
///
/// Invariants (enforced on insertion by
/// [`crate::hypergraph::CausalHypergraph::add_causal_link`]): `causes ∩
/// effects = ∅`, both non-empty, every endpoint resolves to an existing
/// node, `confidence`/`strength` in `[0,1]`, and the insertion must not
/// close a directed cycle over the transitive cause→effect relation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalHyperedge {
    pub id: EdgeId,
    pub causes: BTreeSet<NodeId>,
    pub effects: BTreeSet<NodeId>,
    pub confidence: f32,
    pub strength: f32,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CausalHyperedge {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }
}

/// A derived traversal result: the hyperedges crossed to reach `end_nodes`
/// from `start_nodes`, with accumulated confidence. Never stored — built
/// fresh by [`crate::hypergraph::CausalHypergraph::infer_consequences`]
/// and [`crate::hypergraph::CausalHypergraph::find_causes`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalChain {
    pub path: Vec<EdgeId>,
    pub start_nodes: Vec<NodeId>,
    pub end_nodes: Vec<NodeId>,
    pub total_confidence: f32,
    pub depth: usize,
}

/// One node reached by a traversal, with the chain that reached it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResult {
    pub node_id: NodeId,
    pub probability: f32,
    pub confidence: f32,
    pub chain: Vec<NodeId>,
    pub l_score: f32,
}

/// Options controlling traversal depth, decay, and the AND vs.
/// relaxed-any-cause expansion rule.
#[derive(Debug, Clone)]
pub struct TraversalOpts {
    pub decay: f32,
    pub confidence_epsilon: f32,
    /// When true, a hyperedge expands as soon as *any* of its causes has
    /// been reached, rather than requiring all of them (the default,
    /// stricter AND-semantics).
    pub relaxed_any_cause: bool,
}

impl Default for TraversalOpts {
    fn default() -> Self {
        Self {
            decay: 0.9,
            confidence_epsilon: 1e-4,
            relaxed_any_cause: false,
        }
    }
}

/// Result of a forward or backward traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalResult {
    pub effects: Vec<InferenceResult>,
    pub chains: Vec<CausalChain>,
    pub nodes_explored: usize,
    pub traversal_time_ms: f64,
}

/// Input to [`crate::hypergraph::CausalHypergraph::add_causal_link`].
#[derive(Debug, Clone)]
pub struct NewCausalLink {
    pub causes: BTreeSet<NodeId>,
    pub effects: BTreeSet<NodeId>,
    pub confidence: f32,
    pub strength: f32,
    pub metadata: Value,
}
