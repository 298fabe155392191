//! The causal hypergraph: node/hyperedge store, cycle-safe insertion, and
//! forward/backward traversal with confidence decay.

mod types;

pub use types::{
    CausalChain, CausalHyperedge, CausalNode, EdgeId, InferenceResult, NewCausalLink, NodeId,
    NodeKind, TraversalOpts, TraversalResult,
};

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{EntityKind, NoemaError, Result};
use crate::external::PersistentKV;

const PERSISTENCE_NAMESPACE: &str = "research";
const PERSISTENCE_KEY: &str = "causal-graph";

/// Default per-hop l-score decay applied to freshly-reached traversal
/// nodes: trust falls off the further a node is from the seeds.
const L_SCORE_BASE: f32 = 0.5;
const L_SCORE_DEPTH_DECAY: f32 = 0.9;

struct GraphState {
    nodes: HashMap<NodeId, CausalNode>,
    edges: HashMap<EdgeId, CausalHyperedge>,
}

impl GraphState {
    fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
        }
    }

    fn edges_where_cause(&self, node: &str) -> impl Iterator<Item = &CausalHyperedge> {
        self.edges.values().filter(move |e| e.causes.contains(node))
    }

    fn edges_where_effect(&self, node: &str) -> impl Iterator<Item = &CausalHyperedge> {
        self.edges.values().filter(move |e| e.effects.contains(node))
    }
}

#[derive(Clone)]
struct Reached {
    confidence: f32,
    depth: usize,
    path: Vec<EdgeId>,
    chain_nodes: Vec<NodeId>,
}

/// Node + hyperedge store with cycle-safe mutation and decayed traversal.
pub struct CausalHypergraph {
    state: RwLock<GraphState>,
}

impl Default for CausalHypergraph {
    fn default() -> Self {
        Self::new()
    }
}

impl CausalHypergraph {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(GraphState::new()),
        }
    }

    // -- node CRUD --------------------------------------------------

    pub fn add_node(&self, label: String, kind: NodeKind, metadata: Value) -> CausalNode {
        let node = CausalNode {
            id: Uuid::new_v4().to_string(),
            label,
            kind,
            metadata,
            created_at: Utc::now(),
        };
        self.state.write().nodes.insert(node.id.clone(), node.clone());
        node
    }

    pub fn get_node(&self, id: &str) -> Option<CausalNode> {
        self.state.read().nodes.get(id).cloned()
    }

    pub fn update_node(
        &self,
        id: &str,
        label: Option<String>,
        metadata: Option<Value>,
    ) -> Result<CausalNode> {
        let mut state = self.state.write();
        let node = state
            .nodes
            .get_mut(id)
            .ok_or_else(|| NoemaError::NotFound {
                kind: EntityKind::Node,
                id: id.to_string(),
            })?;
        if let Some(label) = label {
            node.label = label;
        }
        if let Some(metadata) = metadata {
            node.metadata = metadata;
        }
        Ok(node.clone())
    }

    /// Removes a node; cascades to delete any hyperedge that references it
    /// (an edge with a dangling endpoint is meaningless).
    pub fn remove_node(&self, id: &str) -> Result<()> {
        let mut state = self.state.write();
        if state.nodes.remove(id).is_none() {
            return Err(NoemaError::NotFound {
                kind: EntityKind::Node,
                id: id.to_string(),
            });
        }
        state
            .edges
            .retain(|_, e| !e.causes.contains(id) && !e.effects.contains(id));
        Ok(())
    }

    // -- hyperedge CRUD -----------------------------------------------

    pub fn get_hyperedge(&self, id: &str) -> Option<CausalHyperedge> {
        self.state.read().edges.get(id).cloned()
    }

    pub fn list_nodes(&self) -> Vec<CausalNode> {
        self.state.read().nodes.values().cloned().collect()
    }

    pub fn list_hyperedges(&self) -> Vec<CausalHyperedge> {
        self.state.read().edges.values().cloned().collect()
    }

    /// Validates endpoints, confidence/strength ranges, rejects duplicate
    /// endpoint sets, and rejects anything that would close a directed
    /// cycle over the transitive cause→effect relation.
    pub fn add_causal_link(&self, link: NewCausalLink) -> Result<CausalHyperedge> {
        if link.causes.is_empty() || link.effects.is_empty() {
            return Err(NoemaError::InvalidArgument(
                "causal link requires at least one cause and one effect".into(),
            ));
        }
        if !link.causes.is_disjoint(&link.effects) {
            return Err(NoemaError::InvalidArgument(
                "causes and effects must be disjoint".into(),
            ));
        }
        if !(0.0..=1.0).contains(&link.confidence) || !(0.0..=1.0).contains(&link.strength) {
            return Err(NoemaError::InvalidArgument(
                "confidence and strength must be in [0,1]".into(),
            ));
        }

        let mut state = self.state.write();

        for id in link.causes.iter().chain(link.effects.iter()) {
            if !state.nodes.contains_key(id) {
                return Err(NoemaError::NotFound {
                    kind: EntityKind::Node,
                    id: id.clone(),
                });
            }
        }

        if state
            .edges
            .values()
            .any(|e| e.causes == link.causes && e.effects == link.effects)
        {
            return Err(NoemaError::InvalidArgument(
                "duplicate endpoint set for causal link".into(),
            ));
        }

        if would_create_cycle(&state, &link.causes, &link.effects) {
            return Err(NoemaError::IntegrityViolation(
                "causal link would create a directed cycle".into(),
            ));
        }

        let edge = CausalHyperedge {
            id: Uuid::new_v4().to_string(),
            causes: link.causes,
            effects: link.effects,
            confidence: link.confidence,
            strength: link.strength,
            metadata: link.metadata,
            created_at: Utc::now(),
            expires_at: None,
        };
        state.edges.insert(edge.id.clone(), edge.clone());
        Ok(edge)
    }

    /// Removes a hyperedge outright. Used by the counterfactual mode to
    /// build a transient "what if this link didn't exist" graph.
    pub fn remove_hyperedge(&self, id: &str) -> Result<()> {
        let mut state = self.state.write();
        if state.edges.remove(id).is_none() {
            return Err(NoemaError::NotFound {
                kind: EntityKind::Hyperedge,
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Rescales a hyperedge's confidence in place. Used by the
    /// counterfactual mode's "weaken" perturbation.
    pub fn set_hyperedge_confidence(&self, id: &str, confidence: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(NoemaError::InvalidArgument(
                "confidence must be in [0,1]".into(),
            ));
        }
        let mut state = self.state.write();
        let edge = state.edges.get_mut(id).ok_or_else(|| NoemaError::NotFound {
            kind: EntityKind::Hyperedge,
            id: id.to_string(),
        })?;
        edge.confidence = confidence;
        Ok(())
    }

    /// A structurally independent copy (round-tripped through
    /// [`Self::to_json`]/[`Self::from_json`]) for callers that need to
    /// mutate a graph transiently without touching the original.
    pub fn snapshot_clone(&self) -> Self {
        Self::from_json(&self.to_json()).expect("a graph's own snapshot always round-trips")
    }

    // -- traversal ------------------------------------------------------

    /// Forward traversal from `seeds`: expands through hyperedges whose
    /// causes have all been reached (or, in relaxed mode, any of them),
    /// decaying chain confidence by `opts.decay` per hop.
    pub fn infer_consequences(
        &self,
        seeds: &[NodeId],
        max_depth: usize,
        opts: &TraversalOpts,
    ) -> TraversalResult {
        let state = self.state.read();
        traverse(&state, seeds, max_depth, opts, Direction::Forward)
    }

    /// Backward traversal: symmetric to [`Self::infer_consequences`],
    /// starting from a single effect node and walking causes outward.
    pub fn find_causes(
        &self,
        effect: &NodeId,
        max_depth: usize,
        opts: &TraversalOpts,
    ) -> TraversalResult {
        let state = self.state.read();
        traverse(&state, std::slice::from_ref(effect), max_depth, opts, Direction::Backward)
    }

    /// Checks that every hyperedge endpoint resolves to an existing node
    /// and that confidence/strength remain in `[0,1]`.
    pub fn validate_integrity(&self) -> Result<()> {
        let state = self.state.read();
        for edge in state.edges.values() {
            for id in edge.causes.iter().chain(edge.effects.iter()) {
                if !state.nodes.contains_key(id) {
                    return Err(NoemaError::IntegrityViolation(format!(
                        "hyperedge {} references missing node {id}",
                        edge.id
                    )));
                }
            }
            if !(0.0..=1.0).contains(&edge.confidence) || !(0.0..=1.0).contains(&edge.strength) {
                return Err(NoemaError::IntegrityViolation(format!(
                    "hyperedge {} has out-of-range confidence/strength",
                    edge.id
                )));
            }
        }
        Ok(())
    }

    /// Stable `{nodes:[...], links:[...]}` serialization.
    pub fn to_json(&self) -> Value {
        let state = self.state.read();
        let nodes: Vec<&CausalNode> = state.nodes.values().collect();
        let links: Vec<&CausalHyperedge> = state.edges.values().collect();
        json!({ "nodes": nodes, "links": links })
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let nodes: Vec<CausalNode> = serde_json::from_value(
            value.get("nodes").cloned().unwrap_or(Value::Array(vec![])),
        )
        .map_err(|e| NoemaError::PersistenceError(e.to_string()))?;
        let links: Vec<CausalHyperedge> = serde_json::from_value(
            value.get("links").cloned().unwrap_or(Value::Array(vec![])),
        )
        .map_err(|e| NoemaError::PersistenceError(e.to_string()))?;

        let graph = Self::new();
        {
            let mut state = graph.state.write();
            for node in nodes {
                state.nodes.insert(node.id.clone(), node);
            }
            for edge in links {
                state.edges.insert(edge.id.clone(), edge);
            }
        }
        Ok(graph)
    }

    /// Persists the snapshot to `kv` under `research/causal-graph`.
    pub async fn persist(&self, kv: &dyn PersistentKV) -> Result<()> {
        kv.store(PERSISTENCE_NAMESPACE, PERSISTENCE_KEY, self.to_json())
            .await
    }

    /// Loads a snapshot from `kv`; `None` if no snapshot has been stored.
    pub async fn load(kv: &dyn PersistentKV) -> Result<Option<Self>> {
        match kv.retrieve(PERSISTENCE_NAMESPACE, PERSISTENCE_KEY).await? {
            Some(value) => Ok(Some(Self::from_json(&value)?)),
            None => Ok(None),
        }
    }
}

/// Direct, single-cause-to-single-effect reachability: does a structural
/// path already exist from any `effects` node back to any `causes` node?
/// Deliberately ignores AND/relaxed traversal semantics — any single
/// existing edge makes its effects reachable from any one of its causes,
/// so this is the sound (not merely heuristic) check for "would this new
/// edge close a cycle".
fn would_create_cycle(
    state: &GraphState,
    causes: &std::collections::BTreeSet<NodeId>,
    effects: &std::collections::BTreeSet<NodeId>,
) -> bool {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = effects.iter().map(|s| s.as_str()).collect();

    while let Some(node) = stack.pop() {
        if causes.contains(node) {
            return true;
        }
        if !visited.insert(node) {
            continue;
        }
        for edge in state.edges_where_cause(node) {
            for effect in &edge.effects {
                if !visited.contains(effect.as_str()) {
                    stack.push(effect.as_str());
                }
            }
        }
    }
    false
}

enum Direction {
    Forward,
    Backward,
}

fn traverse(
    state: &GraphState,
    seeds: &[NodeId],
    max_depth: usize,
    opts: &TraversalOpts,
    direction: Direction,
) -> TraversalResult {
    let start = Instant::now();
    let now = Utc::now();

    let mut reached: HashMap<NodeId, Reached> = seeds
        .iter()
        .map(|s| {
            (
                s.clone(),
                Reached {
                    confidence: 1.0,
                    depth: 0,
                    path: Vec::new(),
                    chain_nodes: vec![s.clone()],
                },
            )
        })
        .collect();
    let mut frontier: VecDeque<NodeId> = seeds.iter().cloned().collect();
    let mut nodes_explored = 0usize;
    let mut chains: Vec<CausalChain> = Vec::new();

    while let Some(node) = frontier.pop_front() {
        nodes_explored += 1;
        let cur = match reached.get(&node) {
            Some(r) => r.clone(),
            None => continue,
        };
        if cur.depth >= max_depth {
            continue;
        }

        let candidate_edges: Vec<&CausalHyperedge> = match direction {
            Direction::Forward => state.edges_where_cause(&node).collect(),
            Direction::Backward => state.edges_where_effect(&node).collect(),
        };

        for edge in candidate_edges {
            if edge.is_expired(now) {
                continue;
            }
            let (gate_set, expand_set): (&std::collections::BTreeSet<NodeId>, &std::collections::BTreeSet<NodeId>) =
                match direction {
                    Direction::Forward => (&edge.causes, &edge.effects),
                    Direction::Backward => (&edge.effects, &edge.causes),
                };

            let satisfied = if opts.relaxed_any_cause {
                gate_set.iter().any(|n| reached.contains_key(n))
            } else {
                gate_set.iter().all(|n| reached.contains_key(n))
            };
            if !satisfied {
                continue;
            }

            let gate_confidence = gate_set
                .iter()
                .filter_map(|n| reached.get(n))
                .map(|r| r.confidence)
                .fold(f32::INFINITY, f32::min);
            let new_confidence = gate_confidence * edge.confidence * opts.decay;
            if !new_confidence.is_finite() || new_confidence < opts.confidence_epsilon {
                continue;
            }
            let new_depth = cur.depth + 1;
            if new_depth > max_depth {
                continue;
            }

            let mut new_path = cur.path.clone();
            new_path.push(edge.id.clone());

            for next in expand_set {
                let is_better = match reached.get(next) {
                    Some(existing) => new_confidence > existing.confidence,
                    None => true,
                };
                if is_better {
                    let mut chain_nodes = cur.chain_nodes.clone();
                    chain_nodes.push(next.clone());
                    reached.insert(
                        next.clone(),
                        Reached {
                            confidence: new_confidence,
                            depth: new_depth,
                            path: new_path.clone(),
                            chain_nodes,
                        },
                    );
                    frontier.push_back(next.clone());
                }
            }

            chains.push(CausalChain {
                path: new_path,
                start_nodes: seeds.to_vec(),
                end_nodes: expand_set.iter().cloned().collect(),
                total_confidence: new_confidence,
                depth: new_depth,
            });
        }
    }

    chains.sort_by(|a, b| {
        b.total_confidence
            .partial_cmp(&a.total_confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.depth.cmp(&b.depth))
            .then_with(|| a.path.join(",").cmp(&b.path.join(",")))
    });

    let seed_set: HashSet<&str> = seeds.iter().map(|s| s.as_str()).collect();
    let mut effects: Vec<InferenceResult> = reached
        .into_iter()
        .filter(|(id, _)| !seed_set.contains(id.as_str()))
        .map(|(id, r)| InferenceResult {
            node_id: id,
            probability: r.confidence,
            confidence: r.confidence,
            chain: r.chain_nodes,
            l_score: L_SCORE_BASE * L_SCORE_DEPTH_DECAY.powi(r.depth as i32),
        })
        .collect();
    effects.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    TraversalResult {
        effects,
        chains,
        nodes_explored,
        traversal_time_ms: start.elapsed().as_secs_f64() * 1000.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn link(causes: &[&str], effects: &[&str], confidence: f32) -> NewCausalLink {
        NewCausalLink {
            causes: causes.iter().map(|s| s.to_string()).collect(),
            effects: effects.iter().map(|s| s.to_string()).collect(),
            confidence,
            strength: 0.8,
            metadata: Value::Null,
        }
    }

    fn node(graph: &CausalHypergraph, label: &str) -> CausalNode {
        graph.add_node(label.to_string(), NodeKind::Concept, Value::Null)
    }

    #[test]
    fn add_causal_link_rejects_overlapping_cause_effect() {
        let graph = CausalHypergraph::new();
        let a = node(&graph, "a");
        let mut link = link(&[&a.id], &[&a.id], 0.9);
        link.causes = BTreeSet::from([a.id.clone()]);
        link.effects = BTreeSet::from([a.id.clone()]);
        assert!(graph.add_causal_link(link).is_err());
    }

    #[test]
    fn add_causal_link_rejects_missing_node() {
        let graph = CausalHypergraph::new();
        let a = node(&graph, "a");
        let result = graph.add_causal_link(link(&[&a.id], &["missing"], 0.9));
        assert!(result.is_err());
    }

    /// Testable property #6: after any successful add_causal_link, no
    /// directed cycle exists over causes→effects.
    #[test]
    fn add_causal_link_rejects_cycle() {
        let graph = CausalHypergraph::new();
        let a = node(&graph, "a");
        let b = node(&graph, "b");
        let c = node(&graph, "c");
        graph.add_causal_link(link(&[&a.id], &[&b.id], 0.9)).unwrap();
        graph.add_causal_link(link(&[&b.id], &[&c.id], 0.9)).unwrap();
        let cyclic = graph.add_causal_link(link(&[&c.id], &[&a.id], 0.9));
        assert!(matches!(cyclic, Err(NoemaError::IntegrityViolation(_))));
    }

    #[test]
    fn remove_node_cascades_to_dangling_edges() {
        let graph = CausalHypergraph::new();
        let a = node(&graph, "a");
        let b = node(&graph, "b");
        let edge = graph.add_causal_link(link(&[&a.id], &[&b.id], 0.9)).unwrap();
        graph.remove_node(&a.id).unwrap();
        assert!(graph.get_hyperedge(&edge.id).is_none());
    }

    #[test]
    fn forward_traversal_decays_confidence_per_hop() {
        let graph = CausalHypergraph::new();
        let a = node(&graph, "a");
        let b = node(&graph, "b");
        let c = node(&graph, "c");
        graph.add_causal_link(link(&[&a.id], &[&b.id], 1.0)).unwrap();
        graph.add_causal_link(link(&[&b.id], &[&c.id], 1.0)).unwrap();

        let opts = TraversalOpts::default();
        let result = graph.infer_consequences(&[a.id.clone()], 5, &opts);
        let b_result = result.effects.iter().find(|e| e.node_id == b.id).unwrap();
        let c_result = result.effects.iter().find(|e| e.node_id == c.id).unwrap();
        assert!((b_result.confidence - 0.9).abs() < 1e-5);
        assert!((c_result.confidence - 0.81).abs() < 1e-5);
        assert!(c_result.confidence < b_result.confidence);
    }

    #[test]
    fn forward_traversal_respects_max_depth() {
        let graph = CausalHypergraph::new();
        let a = node(&graph, "a");
        let b = node(&graph, "b");
        let c = node(&graph, "c");
        graph.add_causal_link(link(&[&a.id], &[&b.id], 1.0)).unwrap();
        graph.add_causal_link(link(&[&b.id], &[&c.id], 1.0)).unwrap();

        let opts = TraversalOpts::default();
        let result = graph.infer_consequences(&[a.id.clone()], 1, &opts);
        assert!(result.effects.iter().any(|e| e.node_id == b.id));
        assert!(!result.effects.iter().any(|e| e.node_id == c.id));
    }

    #[test]
    fn and_semantics_require_all_causes_reached() {
        let graph = CausalHypergraph::new();
        let a = node(&graph, "a");
        let b = node(&graph, "b");
        let effect = node(&graph, "effect");
        graph
            .add_causal_link(link(&[&a.id, &b.id], &[&effect.id], 1.0))
            .unwrap();

        let opts = TraversalOpts::default();
        let result = graph.infer_consequences(&[a.id.clone()], 5, &opts);
        assert!(!result.effects.iter().any(|e| e.node_id == effect.id));

        let result_both = graph.infer_consequences(&[a.id.clone(), b.id.clone()], 5, &opts);
        assert!(result_both.effects.iter().any(|e| e.node_id == effect.id));
    }

    #[test]
    fn relaxed_any_cause_expands_with_one_cause_reached() {
        let graph = CausalHypergraph::new();
        let a = node(&graph, "a");
        let b = node(&graph, "b");
        let effect = node(&graph, "effect");
        graph
            .add_causal_link(link(&[&a.id, &b.id], &[&effect.id], 1.0))
            .unwrap();

        let opts = TraversalOpts {
            relaxed_any_cause: true,
            ..TraversalOpts::default()
        };
        let result = graph.infer_consequences(&[a.id.clone()], 5, &opts);
        assert!(result.effects.iter().any(|e| e.node_id == effect.id));
    }

    #[test]
    fn find_causes_is_symmetric_to_infer_consequences() {
        let graph = CausalHypergraph::new();
        let a = node(&graph, "a");
        let b = node(&graph, "b");
        graph.add_causal_link(link(&[&a.id], &[&b.id], 1.0)).unwrap();

        let opts = TraversalOpts::default();
        let result = graph.find_causes(&b.id, 5, &opts);
        assert!(result.effects.iter().any(|e| e.node_id == a.id));
    }

    #[test]
    fn to_json_from_json_roundtrips() {
        let graph = CausalHypergraph::new();
        let a = node(&graph, "a");
        let b = node(&graph, "b");
        graph.add_causal_link(link(&[&a.id], &[&b.id], 0.7)).unwrap();

        let json = graph.to_json();
        let restored = CausalHypergraph::from_json(&json).unwrap();
        assert_eq!(restored.list_nodes().len(), 2);
        assert_eq!(restored.list_hyperedges().len(), 1);
        restored.validate_integrity().unwrap();
    }

    #[test]
    fn validate_integrity_catches_out_of_range_confidence() {
        let graph = CausalHypergraph::new();
        let a = node(&graph, "a");
        let b = node(&graph, "b");
        graph.add_causal_link(link(&[&a.id], &[&b.id], 0.5)).unwrap();
        // Mutate directly via JSON round-trip to inject an invalid value,
        // since the public API never allows constructing one.
        let mut json = graph.to_json();
        json["links"][0]["confidence"] = json!(1.5);
        let corrupted = CausalHypergraph::from_json(&json).unwrap();
        assert!(corrupted.validate_integrity().is_err());
    }
}
