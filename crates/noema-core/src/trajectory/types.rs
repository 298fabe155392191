//! Trajectory and feedback data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::orchestrator::{ReasoningRequest, ReasoningResponse};

/// User or system feedback on a trajectory's quality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub quality: f32,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub free_text: Option<String>,
}

/// One answered query, its response, and any feedback it later received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub request: ReasoningRequest,
    pub response: ReasoningResponse,
    pub base_embedding: Vec<f32>,
    pub enhanced_embedding: Option<Vec<f32>>,
    pub l_score: f32,
    pub feedback: Option<Feedback>,
}

impl Trajectory {
    /// The embedding used for similarity search: the enhanced one if
    /// present, otherwise the base embedding.
    pub fn search_embedding(&self) -> &[f32] {
        self.enhanced_embedding.as_deref().unwrap_or(&self.base_embedding)
    }

    /// Pattern ids referenced by this trajectory's response, forwarded to
    /// the online learner on creation.
    pub fn pattern_ids(&self) -> Vec<String> {
        self.response.patterns.iter().map(|p| p.pattern_id.clone()).collect()
    }

    /// Context (causal inference) node ids, forwarded alongside pattern
    /// ids on creation.
    pub fn context_ids(&self) -> Vec<String> {
        self.response
            .causal_inferences
            .iter()
            .map(|c| c.node_id.clone())
            .collect()
    }

    pub fn route(&self) -> String {
        format!("{:?}", self.response.mode).to_lowercase()
    }
}

/// Minimal fields used by [`crate::trajectory::TrajectoryTracker::get`]'s
/// lazy rehydration path, matching the persisted-trajectory layout in
/// spec.md §6: `{id, created_at, route, pattern_ids, context_ids, quality?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedTrajectorySummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub route: String,
    pub pattern_ids: Vec<String>,
    pub context_ids: Vec<String>,
    pub quality: Option<f32>,
}
