//! # Noema Core
//!
//! A self-improving reasoning engine: pattern recall, causal hypergraph
//! traversal, semantic vector search, and GNN-enhanced contextual
//! embeddings, closed over a feedback loop of trajectories, feedback,
//! and online training.
//!
//! ## Modules
//!
//! - [`hypergraph`] — the causal hypergraph: cycle-safe insertion,
//!   forward/backward traversal with decay.
//! - [`gnn`] — the GNN enhancer and its embedding cache.
//! - [`embedding`] — the fixed-dimension [`embedding::Embedding`] type and
//!   distance functions.
//! - [`orchestrator`] — dispatches a [`orchestrator::ReasoningRequest`]
//!   across pattern/causal/contextual/hybrid modes and scores the result.
//! - [`modes`] — the four advanced reasoning modes: abductive,
//!   counterfactual, temporal, constraint.
//! - [`trajectory`] — records and scores reasoning trajectories.
//! - [`training`] — the contrastive trainer, its background runner, and
//!   durable training history.
//! - [`learner`] — late-bound proxy to an [`external::OnlineLearner`].
//! - [`external`] — traits this crate consumes but does not own.
//! - [`cache`] — the similarity-aware embedding cache.
//! - [`config`] — every subsystem's configuration struct.
//! - [`error`] — the crate-wide error type.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use noema_core::prelude::*;
//!
//! let hypergraph = CausalHypergraph::new();
//! let cause = hypergraph.add_node("rain".into(), NodeKind::State, serde_json::json!({}));
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

pub mod cache;
pub mod config;
pub mod embedding;
pub mod error;
pub mod external;
pub mod gnn;
pub mod hypergraph;
pub mod learner;
pub mod modes;
pub mod orchestrator;
pub mod tensor;
pub mod trajectory;
pub mod training;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use cache::{CacheStats, EmbeddingCache, Fingerprint};
pub use config::{
    CacheConfig, EngineConfig, GnnConfig, ModeWeights, OrchestratorConfig, TraversalConfig,
    TrainingConfig, TrajectoryConfig,
};
pub use embedding::{cosine_similarity, euclidean_distance, Embedding, D};
pub use error::{EntityKind, NoemaError, Result};
pub use external::{
    ActivityStream, Embedder, GraphStore, OnlineLearner, PatternMatch, PatternQuery,
    PatternStore, PersistentKV, VectorHit, VectorIndex, WeightUpdateResult,
};
pub use gnn::{ActivationKind, EnhanceResult, GnnEnhancer, LayerWeights};
pub use hypergraph::{
    CausalChain, CausalHyperedge, CausalHypergraph, CausalNode, EdgeId, InferenceResult,
    NewCausalLink, NodeId, NodeKind, TraversalOpts, TraversalResult,
};
pub use learner::LearnerHandle;
pub use modes::{
    AbductiveConfig, AbductiveEngine, AbductiveExplanation, Constraint, ConstraintConfig,
    ConstraintEngine, ConstraintSolution, CounterfactualConfig, CounterfactualEngine,
    CounterfactualScenario, Perturbation, ChainLink, TemporalConfig, TemporalEngine,
    TemporalReasoningResult,
};
pub use orchestrator::{
    geomean, Mode, ModeEngine, PatternMatchOut, Provenance, ReasoningOrchestrator,
    ReasoningRequest, ReasoningResponse,
};
pub use trajectory::{Feedback, PersistedTrajectorySummary, Trajectory, TrajectoryTracker};
pub use training::{
    BackgroundTrainer, BatchResult, BufferedSample, CancelHandle, ContrastiveTrainer,
    EpochResult, HistoryError, HistoryRecord, HistoryStats, TrainingHistory, TrainingMessage,
    TrainingSample, TrainingSummary, TrainingTrigger,
};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::{
        CausalHypergraph, Embedding, EngineConfig, Mode, ModeEngine, NodeKind, NoemaError,
        ReasoningOrchestrator, ReasoningRequest, ReasoningResponse, Result, Trajectory,
        TrajectoryTracker,
    };

    pub use crate::{
        AbductiveEngine, ConstraintEngine, CounterfactualEngine, TemporalEngine,
    };

    pub use crate::{BackgroundTrainer, ContrastiveTrainer, TrainingHistory};
}
