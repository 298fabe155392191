//! Minimal in-memory reference implementations of every `noema-core`
//! external trait (SPEC_FULL.md §6). These exist purely so this workspace
//! compiles and exercises the core end to end without a real embedding
//! model, real ANN index, or real graph store attached — they are
//! deliberately not production collaborators.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use noema_core::external::{
    ActivityStream, Embedder, GraphStore, OnlineLearner, PatternMatch, PatternQuery, PatternStore,
    PersistentKV, VectorHit, VectorIndex, WeightUpdateResult,
};
use noema_core::{CausalHypergraph, Embedding, NoemaError, Result, D};

/// Brute-force cosine-similarity scan over everything `add`ed. Fine for
/// hundreds of vectors; not the point of this exercise.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    entries: RwLock<Vec<(String, Embedding, Option<Value>)>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn search(&self, query: &Embedding, k: usize) -> Result<Vec<VectorHit>> {
        let entries = self.entries.read();
        let mut scored: Vec<VectorHit> = entries
            .iter()
            .map(|(id, emb, metadata)| VectorHit {
                id: id.clone(),
                similarity: query.cosine_similarity(emb),
                metadata: metadata.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn add(&self, id: &str, embedding: &Embedding, metadata: Option<Value>) -> Result<()> {
        let mut entries = self.entries.write();
        entries.retain(|(existing, _, _)| existing != id);
        entries.push((id.to_string(), embedding.clone(), metadata));
        Ok(())
    }
}

/// Keyword-free pattern store: exact task-type match plus a seeded
/// similarity-free confidence. Enough to exercise pattern mode without a
/// real store.
#[derive(Default)]
pub struct InMemoryPatternStore {
    patterns: RwLock<HashMap<String, PatternMatch>>,
}

impl InMemoryPatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, pattern: PatternMatch) {
        self.patterns.write().insert(pattern.pattern_id.clone(), pattern);
    }
}

#[async_trait]
impl PatternStore for InMemoryPatternStore {
    async fn find_patterns(&self, query: PatternQuery) -> Result<Vec<PatternMatch>> {
        let patterns = self.patterns.read();
        let mut matches: Vec<PatternMatch> = patterns
            .values()
            .filter(|p| {
                query
                    .task_type
                    .as_ref()
                    .map(|t| &p.task_type == t)
                    .unwrap_or(true)
            })
            .filter(|p| p.confidence >= query.min_confidence)
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(query.top_k);
        Ok(matches)
    }

    async fn create_pattern(&self, template: String, task_type: String, confidence: f32) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.patterns.write().insert(
            id.clone(),
            PatternMatch {
                pattern_id: id.clone(),
                confidence,
                template,
                task_type,
                l_score: 0.5,
            },
        );
        Ok(id)
    }
}

/// Thin wrapper exposing a [`CausalHypergraph`]'s own edges through the
/// `GraphStore` contract, for the temporal advanced mode. Not a separate
/// graph database — the hypergraph already owns this state.
pub struct HypergraphAsGraphStore {
    hypergraph: std::sync::Arc<CausalHypergraph>,
}

impl HypergraphAsGraphStore {
    pub fn new(hypergraph: std::sync::Arc<CausalHypergraph>) -> Self {
        Self { hypergraph }
    }
}

#[async_trait]
impl GraphStore for HypergraphAsGraphStore {
    async fn get_all_hyperedges(&self) -> Result<Vec<Value>> {
        Ok(self
            .hypergraph
            .list_hyperedges()
            .into_iter()
            .map(|e| serde_json::to_value(&e).unwrap_or(Value::Null))
            .collect())
    }
}

/// Process-lifetime key-value store, namespaced the same way a durable one
/// would be. Loses everything on exit — a reference double, not a
/// persistence layer.
#[derive(Default)]
pub struct InMemoryKV {
    values: RwLock<HashMap<(String, String), Value>>,
}

impl InMemoryKV {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistentKV for InMemoryKV {
    async fn store(&self, namespace: &str, key: &str, value: Value) -> Result<()> {
        self.values
            .write()
            .insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn retrieve(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .values
            .read()
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }
}

/// Deterministic hash-based embedder: turns text into a stable,
/// unit-normalized vector so the HTTP surface can accept raw text without
/// a real model attached. Not remotely semantic — a reference double.
#[derive(Default)]
pub struct HashEmbedder;

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut values = vec![0.0f32; D];
        for (i, byte) in text.bytes().enumerate() {
            values[i % D] += (byte as f32) / 255.0;
        }
        if values.iter().all(|v| *v == 0.0) {
            values[0] = 1.0;
        }
        Embedding::new(values)
    }
}

/// Per-pattern weight store driven purely by feedback quality, with no
/// persistence beyond process lifetime. Stands in for the real online
/// learner this crate only consumes through a trait.
#[derive(Default)]
pub struct InMemoryOnlineLearner {
    weights: RwLock<HashMap<(String, String), f32>>,
    trajectories: RwLock<HashMap<String, Value>>,
}

impl InMemoryOnlineLearner {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OnlineLearner for InMemoryOnlineLearner {
    async fn create_trajectory_with_id(
        &self,
        id: &str,
        route: &str,
        pattern_ids: &[String],
        context_ids: &[String],
    ) -> Result<()> {
        self.trajectories.write().insert(
            id.to_string(),
            serde_json::json!({
                "id": id,
                "route": route,
                "pattern_ids": pattern_ids,
                "context_ids": context_ids,
            }),
        );
        Ok(())
    }

    async fn provide_feedback(&self, trajectory_id: &str, quality: f32) -> Result<WeightUpdateResult> {
        let route = self
            .trajectories
            .read()
            .get(trajectory_id)
            .and_then(|v| v.get("route").and_then(|r| r.as_str().map(|s| s.to_string())))
            .unwrap_or_else(|| "hybrid".to_string());
        let key = (trajectory_id.to_string(), route);
        let mut weights = self.weights.write();
        let previous = *weights.get(&key).unwrap_or(&0.5);
        let new_weight = (previous + 0.1 * (quality - previous)).clamp(0.0, 1.0);
        weights.insert(key, new_weight);
        Ok(WeightUpdateResult {
            pattern_id: Some(trajectory_id.to_string()),
            previous_weight: previous,
            new_weight,
            applied: true,
        })
    }

    async fn get_weight(&self, pattern_id: &str, route: &str) -> Result<f32> {
        Ok(*self
            .weights
            .read()
            .get(&(pattern_id.to_string(), route.to_string()))
            .unwrap_or(&0.5))
    }

    async fn get_trajectory(&self, id: &str) -> Result<Option<Value>> {
        Ok(self.trajectories.read().get(id).cloned())
    }

    async fn has_trajectory_in_storage(&self, id: &str) -> Result<bool> {
        Ok(self.trajectories.read().contains_key(id))
    }

    async fn get_trajectory_in_storage(&self, id: &str) -> Result<Option<Value>> {
        Ok(self.trajectories.read().get(id).cloned())
    }
}

/// Logs every emitted event at debug level and discards it. Errors here
/// must never affect reasoning, so this impl never returns `Err`.
#[derive(Default)]
pub struct TracingActivityStream;

#[async_trait]
impl ActivityStream for TracingActivityStream {
    async fn emit(&self, event: Value) -> Result<()> {
        tracing::debug!(%event, "activity event");
        Ok(())
    }
}

/// Turns `Option<T>`-shaped lookups into `404`-friendly results for the
/// HTTP layer; kept here rather than in `http.rs` since both the CLI and
/// HTTP surface need the same not-found mapping.
pub fn not_found(kind: noema_core::EntityKind, id: &str) -> NoemaError {
    NoemaError::NotFound {
        kind,
        id: id.to_string(),
    }
}
