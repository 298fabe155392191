//! Contracts for everything this crate consumes but does not own.
//!
//! Per SPEC_FULL.md §6 / spec.md §6, embedding computation, the vector
//! index, the generic graph store, the pattern store, durable key-value
//! persistence, the online learner, and the activity stream are all
//! external collaborators. This crate depends only on these traits, never
//! on a concrete implementation — `noema-runtime` supplies the real (or
//! in-memory reference) ones at the composition root.

use async_trait::async_trait;
use serde_json::Value;

use crate::embedding::Embedding;
use crate::error::Result;

/// Turns text into a fixed-dimension unit-normalized embedding.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;
}

/// A single approximate-nearest-neighbor search hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub similarity: f32,
    pub metadata: Option<Value>,
}

/// Approximate nearest-neighbor index over embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, query: &Embedding, k: usize) -> Result<Vec<VectorHit>>;
    async fn add(&self, id: &str, embedding: &Embedding, metadata: Option<Value>) -> Result<()>;
}

/// Generic graph store, consumed by the temporal advanced mode to pull
/// the full hyperedge set without going through traversal.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn get_all_hyperedges(&self) -> Result<Vec<Value>>;
}

/// A pattern match returned by [`PatternStore::find_patterns`].
#[derive(Debug, Clone)]
pub struct PatternMatch {
    pub pattern_id: String,
    pub confidence: f32,
    pub template: String,
    pub task_type: String,
    pub l_score: f32,
}

/// Query parameters for [`PatternStore::find_patterns`].
#[derive(Debug, Clone)]
pub struct PatternQuery {
    pub embedding: Embedding,
    pub task_type: Option<String>,
    pub top_k: usize,
    pub min_confidence: f32,
}

#[async_trait]
pub trait PatternStore: Send + Sync {
    async fn find_patterns(&self, query: PatternQuery) -> Result<Vec<PatternMatch>>;
    async fn create_pattern(
        &self,
        template: String,
        task_type: String,
        confidence: f32,
    ) -> Result<String>;
}

/// Durable key-value persistence, namespaced. Used by the hypergraph to
/// persist its JSON snapshot under namespace `research`, key
/// `causal-graph`.
#[async_trait]
pub trait PersistentKV: Send + Sync {
    async fn store(&self, namespace: &str, key: &str, value: Value) -> Result<()>;
    async fn retrieve(&self, namespace: &str, key: &str) -> Result<Option<Value>>;
}

/// Result of [`OnlineLearner::provide_feedback`]: when unbound (no
/// learner registered yet), this is the safe no-op default.
#[derive(Debug, Clone, Default)]
pub struct WeightUpdateResult {
    pub pattern_id: Option<String>,
    pub previous_weight: f32,
    pub new_weight: f32,
    pub applied: bool,
}

/// The online-learner contract proxied by
/// [`crate::learner::LearnerHandle`].
#[async_trait]
pub trait OnlineLearner: Send + Sync {
    async fn create_trajectory_with_id(
        &self,
        id: &str,
        route: &str,
        pattern_ids: &[String],
        context_ids: &[String],
    ) -> Result<()>;
    async fn provide_feedback(&self, trajectory_id: &str, quality: f32) -> Result<WeightUpdateResult>;
    async fn get_weight(&self, pattern_id: &str, route: &str) -> Result<f32>;
    async fn get_trajectory(&self, id: &str) -> Result<Option<Value>>;
    async fn has_trajectory_in_storage(&self, id: &str) -> Result<bool>;
    async fn get_trajectory_in_storage(&self, id: &str) -> Result<Option<Value>>;
}

/// Optional, best-effort telemetry sink. Errors here must never affect
/// reasoning; callers should log and discard.
#[async_trait]
pub trait ActivityStream: Send + Sync {
    async fn emit(&self, event: Value) -> Result<()>;
}
