//! The online-learner proxy: lets the trajectory tracker be constructed
//! before the learner exists (and run perfectly well if one never is).

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::external::{OnlineLearner, WeightUpdateResult};

/// Late-bound handle to an [`OnlineLearner`]. All methods are safe no-ops
/// with default values when unbound, so the tracker never has to branch
/// on "do I have a learner yet".
#[derive(Clone, Default)]
pub struct LearnerHandle {
    inner: Arc<RwLock<Option<Arc<dyn OnlineLearner>>>>,
}

impl LearnerHandle {
    pub fn unbound() -> Self {
        Self::default()
    }

    pub fn bind(&self, learner: Arc<dyn OnlineLearner>) {
        *self.inner.write() = Some(learner);
    }

    pub fn is_bound(&self) -> bool {
        self.inner.read().is_some()
    }

    fn get(&self) -> Option<Arc<dyn OnlineLearner>> {
        self.inner.read().clone()
    }

    pub async fn create_trajectory_with_id(
        &self,
        id: &str,
        route: &str,
        pattern_ids: &[String],
        context_ids: &[String],
    ) {
        if let Some(learner) = self.get() {
            if let Err(err) = learner
                .create_trajectory_with_id(id, route, pattern_ids, context_ids)
                .await
            {
                tracing::warn!(error = %err, trajectory_id = id, "learner forwarding failed");
            }
        }
    }

    pub async fn provide_feedback(&self, trajectory_id: &str, quality: f32) -> WeightUpdateResult {
        match self.get() {
            Some(learner) => match learner.provide_feedback(trajectory_id, quality).await {
                Ok(result) => result,
                Err(err) => {
                    tracing::warn!(error = %err, trajectory_id, "learner feedback forwarding failed");
                    WeightUpdateResult::default()
                }
            },
            None => WeightUpdateResult::default(),
        }
    }

    pub async fn get_weight(&self, pattern_id: &str, route: &str) -> f32 {
        match self.get() {
            Some(learner) => learner.get_weight(pattern_id, route).await.unwrap_or(0.0),
            None => 0.0,
        }
    }

    pub async fn get_trajectory(&self, id: &str) -> Option<Value> {
        match self.get() {
            Some(learner) => learner.get_trajectory(id).await.ok().flatten(),
            None => None,
        }
    }

    pub async fn has_trajectory_in_storage(&self, id: &str) -> bool {
        match self.get() {
            Some(learner) => learner.has_trajectory_in_storage(id).await.unwrap_or(false),
            None => false,
        }
    }

    pub async fn get_trajectory_in_storage(&self, id: &str) -> Option<Value> {
        match self.get() {
            Some(learner) => learner.get_trajectory_in_storage(id).await.ok().flatten(),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unbound_handle_returns_safe_defaults() {
        let handle = LearnerHandle::unbound();
        assert!(!handle.is_bound());
        let result = handle.provide_feedback("traj1", 0.9).await;
        assert_eq!(result.new_weight, 0.0);
        assert!(!result.applied);
        assert_eq!(handle.get_weight("p1", "causal").await, 0.0);
        assert!(handle.get_trajectory("traj1").await.is_none());
    }
}
