//! The trajectory tracker: creation, feedback ingestion, retrieval,
//! LRU-with-quality-preference eviction, retention pruning, and
//! high-quality distillation into new causal hyperedges.

mod types;

pub use types::{Feedback, PersistedTrajectorySummary, Trajectory};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use rand::Rng;
use serde_json::json;

use crate::config::TrajectoryConfig;
use crate::embedding::{cosine_similarity, Embedding};
use crate::external::PersistentKV;
use crate::hypergraph::{CausalHypergraph, NewCausalLink, NodeKind};
use crate::learner::LearnerHandle;
use crate::orchestrator::{ReasoningRequest, ReasoningResponse};

struct Store {
    trajectories: HashMap<String, Trajectory>,
}

/// Creates, retrieves, evicts, and prunes [`Trajectory`] records; forwards
/// every creation and feedback event to the (possibly unbound) online
/// learner; distills high-quality trajectories into new causal
/// hyperedges.
pub struct TrajectoryTracker {
    config: TrajectoryConfig,
    store: RwLock<Store>,
    learner: LearnerHandle,
    hypergraph: Arc<CausalHypergraph>,
    persistence: Option<Arc<dyn PersistentKV>>,
}

const TRAJECTORY_NAMESPACE: &str = "trajectories";

impl TrajectoryTracker {
    pub fn new(
        config: TrajectoryConfig,
        learner: LearnerHandle,
        hypergraph: Arc<CausalHypergraph>,
        persistence: Option<Arc<dyn PersistentKV>>,
    ) -> Self {
        Self {
            config,
            store: RwLock::new(Store {
                trajectories: HashMap::new(),
            }),
            learner,
            hypergraph,
            persistence,
        }
    }

    /// Assigns `traj_{epoch_ms}_{rand8}`, stores the record, evicts if
    /// over cap, and forwards `{id, route, pattern_ids, context_ids}` to
    /// the online learner. Returns the new trajectory's id.
    pub async fn create(
        &self,
        request: &ReasoningRequest,
        response: &ReasoningResponse,
        base_embedding: &Embedding,
        enhanced_embedding: Option<&[f32]>,
    ) -> String {
        let id = generate_trajectory_id();
        let l_score = response.provenance.combined_l_score;
        let trajectory = Trajectory {
            id: id.clone(),
            timestamp: Utc::now(),
            request: request.clone(),
            response: response.clone(),
            base_embedding: base_embedding.as_slice().to_vec(),
            enhanced_embedding: enhanced_embedding.map(|e| e.to_vec()),
            l_score,
            feedback: None,
        };

        let route = trajectory.route();
        let pattern_ids = trajectory.pattern_ids();
        let context_ids = trajectory.context_ids();

        {
            let mut store = self.store.write();
            store.trajectories.insert(id.clone(), trajectory);
        }
        self.evict_if_over_cap();

        self.learner
            .create_trajectory_with_id(&id, &route, &pattern_ids, &context_ids)
            .await;

        id
    }

    /// Merges feedback onto a trajectory, lazily rehydrating a
    /// minimal-field record from persistent storage if it isn't held in
    /// memory. Forwards the quality to the online learner and, above the
    /// distillation threshold, attempts to distill a new hyperedge.
    pub async fn update_feedback(&self, id: &str, feedback: Feedback) -> bool {
        let quality = feedback.quality;
        let rehydrated = {
            let mut store = self.store.write();
            match store.trajectories.get_mut(id) {
                Some(traj) => {
                    traj.feedback = Some(feedback.clone());
                    true
                }
                None => false,
            }
        };

        let applied = if rehydrated {
            true
        } else if let Some(summary) = self.rehydrate_summary(id).await {
            let mut store = self.store.write();
            store.trajectories.insert(
                id.to_string(),
                Trajectory {
                    id: summary.id,
                    timestamp: summary.created_at,
                    request: minimal_request(),
                    response: minimal_response(&summary.route, &summary.pattern_ids, &summary.context_ids),
                    base_embedding: Vec::new(),
                    enhanced_embedding: None,
                    l_score: 0.5,
                    feedback: Some(feedback.clone()),
                },
            );
            true
        } else {
            false
        };

        if !applied {
            return false;
        }

        self.learner.provide_feedback(id, quality).await;

        if quality >= self.config.distillation_threshold {
            if let Err(err) = self.try_distill(id) {
                tracing::warn!(error = %err, trajectory_id = id, "hyperedge distillation failed");
            }
        }

        true
    }

    pub fn get(&self, id: &str) -> Option<Trajectory> {
        self.store.read().trajectories.get(id).cloned()
    }

    /// Trajectories with `feedback.quality >= min`, sorted by quality
    /// descending, capped at `limit`.
    pub fn high_quality(&self, min: f32, limit: usize) -> Vec<Trajectory> {
        let store = self.store.read();
        let mut matches: Vec<Trajectory> = store
            .trajectories
            .values()
            .filter(|t| t.feedback.as_ref().map(|f| f.quality >= min).unwrap_or(false))
            .cloned()
            .collect();
        matches.sort_by(|a, b| {
            let qa = a.feedback.as_ref().map(|f| f.quality).unwrap_or(0.0);
            let qb = b.feedback.as_ref().map(|f| f.quality).unwrap_or(0.0);
            qb.partial_cmp(&qa).unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(limit);
        matches
    }

    /// Cosine-similarity search over in-memory trajectories, preferring
    /// each trajectory's enhanced embedding when present.
    pub fn find_similar(&self, embedding: &[f32], k: usize, min_sim: f32) -> Vec<(Trajectory, f32)> {
        let store = self.store.read();
        let mut scored: Vec<(Trajectory, f32)> = store
            .trajectories
            .values()
            .map(|t| (t.clone(), cosine_similarity(embedding, t.search_embedding())))
            .filter(|(_, sim)| *sim >= min_sim)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    /// Drops anything older than `config.retention`.
    pub fn prune_expired(&self) -> usize {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or_else(|_| chrono::Duration::max_value());
        let cutoff = Utc::now() - retention;
        let mut store = self.store.write();
        let before = store.trajectories.len();
        store.trajectories.retain(|_, t| t.timestamp >= cutoff);
        before - store.trajectories.len()
    }

    pub fn len(&self) -> usize {
        self.store.read().trajectories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawns a periodic background task that calls [`Self::prune_expired`]
    /// at `config.prune_interval`. Cooperative — uses `tokio::time::interval`,
    /// no dedicated thread.
    pub fn spawn_auto_prune(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval_duration = self.config.prune_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_duration);
            loop {
                interval.tick().await;
                let pruned = self.prune_expired();
                if pruned > 0 {
                    tracing::info!(pruned, "auto-pruned expired trajectories");
                }
            }
        })
    }

    fn evict_if_over_cap(&self) {
        let mut store = self.store.write();
        if store.trajectories.len() <= self.config.max_trajectories {
            return;
        }
        let now = Utc::now();
        // Priority score per spec: quality / (age_days + 1), minimum evicted
        // first (a brand-new low-quality trajectory goes before an old
        // high-quality one).
        let mut candidates: Vec<(String, f32)> = store
            .trajectories
            .values()
            .map(|t| {
                let quality = t.feedback.as_ref().map(|f| f.quality).unwrap_or(0.0);
                let age_days = (now - t.timestamp).num_days().max(0) as f32;
                (t.id.clone(), quality / (age_days + 1.0))
            })
            .collect();
        candidates.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        let overflow = store.trajectories.len() - self.config.max_trajectories;
        for (id, _) in candidates.into_iter().take(overflow) {
            store.trajectories.remove(&id);
        }
    }

    async fn rehydrate_summary(&self, id: &str) -> Option<PersistedTrajectorySummary> {
        if let Some(value) = self.learner.get_trajectory_in_storage(id).await {
            if let Ok(summary) = serde_json::from_value(value) {
                return Some(summary);
            }
        }
        let kv = self.persistence.as_ref()?;
        let value = kv.retrieve(TRAJECTORY_NAMESPACE, id).await.ok().flatten()?;
        serde_json::from_value(value).ok()
    }

    /// Materializes one "query" cause node, up to 3 "pattern" cause nodes,
    /// up to 3 "effect" nodes from causal inferences, and one "outcome"
    /// effect node labeled with quality, then links causes→effects.
    fn try_distill(&self, id: &str) -> Result<(), String> {
        let trajectory = self.get(id).ok_or_else(|| "trajectory not in memory".to_string())?;
        let feedback = trajectory
            .feedback
            .as_ref()
            .ok_or_else(|| "no feedback to distill from".to_string())?;

        let pattern_ids = trajectory.pattern_ids();
        let context_ids = trajectory.context_ids();
        if pattern_ids.is_empty() && context_ids.is_empty() {
            return Err("no patterns or causal inferences to distill".to_string());
        }

        let query_node = self.hypergraph.add_node(
            format!("query:{id}"),
            NodeKind::Concept,
            json!({ "trajectory_id": id }),
        );

        let mut causes = std::collections::BTreeSet::new();
        causes.insert(query_node.id.clone());
        for pattern_id in pattern_ids.iter().take(3) {
            let node = self
                .hypergraph
                .add_node(format!("pattern:{pattern_id}"), NodeKind::Concept, json!({}));
            causes.insert(node.id);
        }

        let mut effects = std::collections::BTreeSet::new();
        for context_id in context_ids.iter().take(3) {
            let node = self
                .hypergraph
                .add_node(format!("effect:{context_id}"), NodeKind::State, json!({}));
            effects.insert(node.id);
        }
        let outcome_node = self.hypergraph.add_node(
            format!("outcome:quality={:.2}", feedback.quality),
            NodeKind::State,
            json!({ "quality": feedback.quality }),
        );
        effects.insert(outcome_node.id);

        self.hypergraph
            .add_causal_link(NewCausalLink {
                causes,
                effects,
                confidence: feedback.quality,
                strength: feedback.quality,
                metadata: json!({ "source": "high-quality-feedback", "distilled_from": id }),
            })
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

fn generate_trajectory_id() -> String {
    let epoch_ms = Utc::now().timestamp_millis();
    let suffix: String = {
        let mut rng = rand::thread_rng();
        (0..8)
            .map(|_| {
                let n: u8 = rng.gen_range(0..36);
                std::char::from_digit(n as u32, 36).unwrap_or('0')
            })
            .collect()
    };
    format!("traj_{epoch_ms}_{suffix}")
}

fn minimal_request() -> ReasoningRequest {
    ReasoningRequest {
        query_embedding: Embedding::from_raw(vec![0.0; crate::embedding::D])
            .expect("zero vector has correct length"),
        mode: None,
        max_results: None,
        confidence_threshold: None,
        min_l_score: None,
        enhance_with_gnn: None,
        task_type: None,
    }
}

fn minimal_response(route: &str, pattern_ids: &[String], context_ids: &[String]) -> ReasoningResponse {
    use crate::orchestrator::{Mode, PatternMatchOut, Provenance};

    let mode = match route {
        "pattern" => Mode::Pattern,
        "causal" => Mode::Causal,
        "contextual" => Mode::Contextual,
        _ => Mode::Hybrid,
    };
    let patterns: Vec<PatternMatchOut> = pattern_ids
        .iter()
        .map(|id| PatternMatchOut {
            pattern_id: id.clone(),
            confidence: 0.5,
            template: String::new(),
            task_type: String::new(),
            l_score: 0.5,
        })
        .collect();
    let causal_inferences: Vec<crate::hypergraph::InferenceResult> = context_ids
        .iter()
        .map(|id| crate::hypergraph::InferenceResult {
            node_id: id.clone(),
            probability: 0.5,
            confidence: 0.5,
            chain: Vec::new(),
            l_score: 0.5,
        })
        .collect();
    let mut response = ReasoningResponse::empty(mode, Vec::new(), 0.0);
    response.provenance = Provenance::compute(Vec::new());
    response.patterns = patterns;
    response.causal_inferences = causal_inferences;
    response
}
