//! Explicit configuration structs for every tunable named in spec.md §6's
//! "Numeric constants (defaults)" table. No environment-variable reads
//! happen inside this crate — `noema-runtime` resolves config from CLI
//! args/TOML and hands in `EngineConfig`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::hypergraph::TraversalOpts;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub max_bytes: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: crate::cache::DEFAULT_ENTRY_CAP,
            max_bytes: crate::cache::DEFAULT_BYTE_CAP,
            ttl: crate::cache::DEFAULT_TTL,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GnnConfig {
    pub num_layers: usize,
}

impl Default for GnnConfig {
    fn default() -> Self {
        Self { num_layers: 2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalConfig {
    pub max_depth: usize,
    pub decay: f32,
    pub confidence_epsilon: f32,
    pub relaxed_any_cause: bool,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            decay: 0.9,
            confidence_epsilon: 1e-4,
            relaxed_any_cause: false,
        }
    }
}

impl TraversalConfig {
    pub fn to_opts(&self) -> TraversalOpts {
        TraversalOpts {
            decay: self.decay,
            confidence_epsilon: self.confidence_epsilon,
            relaxed_any_cause: self.relaxed_any_cause,
        }
    }
}

/// Confidence weights applied when merging pattern/causal/contextual
/// results in hybrid mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModeWeights {
    pub pattern: f32,
    pub causal: f32,
    pub contextual: f32,
}

impl Default for ModeWeights {
    fn default() -> Self {
        Self {
            pattern: 0.3,
            causal: 0.3,
            contextual: 0.4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub mode_weights: ModeWeights,
    pub default_max_results: usize,
    pub default_confidence_threshold: f32,
    pub default_min_l_score: f32,
    pub soft_deadline: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            mode_weights: ModeWeights::default(),
            default_max_results: 10,
            default_confidence_threshold: 0.0,
            default_min_l_score: 0.0,
            soft_deadline: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryConfig {
    pub max_trajectories: usize,
    pub retention: Duration,
    pub prune_interval: Duration,
    pub high_quality_threshold: f32,
    pub distillation_threshold: f32,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            max_trajectories: 10_000,
            retention: Duration::from_secs(7 * 24 * 3600),
            prune_interval: Duration::from_secs(3600),
            high_quality_threshold: 0.8,
            distillation_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub trigger_threshold: usize,
    pub trigger_timer: Duration,
    pub margin: f32,
    pub positive_quality: f32,
    pub negative_quality: f32,
    pub clip_max_norm: f32,
    pub learning_rate: f32,
    pub batch_size: usize,
    pub max_epochs: usize,
    pub yield_interval: usize,
    pub worker_threshold: usize,
    pub max_training_time: Duration,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            trigger_threshold: 50,
            trigger_timer: Duration::from_secs(300),
            margin: 0.5,
            positive_quality: 0.7,
            negative_quality: 0.5,
            clip_max_norm: 1.0,
            learning_rate: 0.01,
            batch_size: 32,
            max_epochs: 10,
            yield_interval: 4,
            worker_threshold: 100,
            max_training_time: Duration::from_secs(600),
        }
    }
}

/// Top-level configuration assembled at the composition root.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub gnn: GnnConfig,
    pub traversal: TraversalConfig,
    pub orchestrator: OrchestratorConfig,
    pub trajectory: TrajectoryConfig,
    pub training: TrainingConfig,
}
