//! Thin HTTP surface over the reasoning engine: `reason`, `provide_feedback`,
//! `get_trajectory`, and `train`. Not the product — a way to drive the core
//! from outside a process without shipping a real front-end, per
//! SPEC_FULL.md's explicit out-of-scope note on "unified search front-end".

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use noema_core::{
    BackgroundTrainer, ContrastiveTrainer, Embedder, Embedding, Feedback, NoemaError,
    ReasoningOrchestrator, ReasoningRequest, ReasoningResponse, TrainingHistory, TrainingSample,
    TrajectoryTracker,
};

use crate::reference::HashEmbedder;

pub struct AppState {
    pub orchestrator: Arc<ReasoningOrchestrator>,
    pub tracker: Arc<TrajectoryTracker>,
    pub embedder: Arc<HashEmbedder>,
    pub background_trainer: Arc<BackgroundTrainer>,
    pub history: Arc<TrainingHistory>,
    pub training_dim: usize,
    pub training_layers: usize,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/reason", post(reason))
        .route("/v1/trajectories/:id/feedback", post(provide_feedback))
        .route("/v1/trajectories/:id", get(get_trajectory))
        .route("/v1/train", post(train))
        .layer(CorsLayer::new().allow_methods(Any).allow_origin(Any))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct ReasonBody {
    text: Option<String>,
    query_embedding: Option<Vec<f32>>,
    mode: Option<noema_core::Mode>,
    max_results: Option<usize>,
    confidence_threshold: Option<f32>,
    min_l_score: Option<f32>,
    enhance_with_gnn: Option<bool>,
    task_type: Option<String>,
}

struct ApiError(NoemaError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            NoemaError::NotFound { .. } => StatusCode::NOT_FOUND,
            NoemaError::InvalidArgument(_) | NoemaError::DimensionError { .. } => {
                StatusCode::BAD_REQUEST
            }
            NoemaError::Timeout { .. } | NoemaError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<NoemaError> for ApiError {
    fn from(e: NoemaError) -> Self {
        ApiError(e)
    }
}

async fn reason(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ReasonBody>,
) -> Result<Json<ReasoningResponse>, ApiError> {
    let query_embedding = if let Some(values) = body.query_embedding {
        Embedding::new(values).map_err(ApiError)?
    } else if let Some(text) = body.text.as_deref() {
        state.embedder.embed(text).await.map_err(ApiError)?
    } else {
        return Err(ApiError(NoemaError::InvalidArgument(
            "request must set either query_embedding or text".to_string(),
        )));
    };

    let request = ReasoningRequest {
        query_embedding,
        mode: body.mode,
        max_results: body.max_results,
        confidence_threshold: body.confidence_threshold,
        min_l_score: body.min_l_score,
        enhance_with_gnn: body.enhance_with_gnn,
        task_type: body.task_type,
    };

    let response = state.orchestrator.reason(request).await.map_err(ApiError)?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct FeedbackBody {
    quality: f32,
}

#[derive(Debug, Serialize)]
struct FeedbackAck {
    trajectory_id: String,
}

async fn provide_feedback(
    State(state): State<Arc<AppState>>,
    Path(trajectory_id): Path<String>,
    Json(body): Json<FeedbackBody>,
) -> Result<Json<FeedbackAck>, ApiError> {
    let feedback = Feedback {
        quality: body.quality,
        outcome: None,
        free_text: None,
    };
    let found = state.tracker.update_feedback(&trajectory_id, feedback).await;
    if !found {
        return Err(ApiError(crate::reference::not_found(noema_core::EntityKind::Trajectory, &trajectory_id)));
    }
    Ok(Json(FeedbackAck { trajectory_id }))
}

async fn get_trajectory(
    State(state): State<Arc<AppState>>,
    Path(trajectory_id): Path<String>,
) -> Result<Json<noema_core::Trajectory>, ApiError> {
    state
        .tracker
        .get(&trajectory_id)
        .ok_or_else(|| ApiError(crate::reference::not_found(noema_core::EntityKind::Trajectory, &trajectory_id)))
        .map(Json)
}

#[derive(Debug, Deserialize)]
struct TrainBody {
    samples: Vec<TrainSampleBody>,
    epochs: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct TrainSampleBody {
    embedding: Vec<f32>,
    quality: f32,
}

#[derive(Debug, Serialize)]
struct TrainAck {
    accepted_samples: usize,
    epochs: usize,
}

async fn train(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TrainBody>,
) -> Result<Json<TrainAck>, ApiError> {
    if body.samples.is_empty() {
        return Err(ApiError(NoemaError::InvalidArgument(
            "train requires at least one sample".to_string(),
        )));
    }
    let epochs = body.epochs.unwrap_or(1);
    let samples: Vec<TrainingSample> = body
        .samples
        .into_iter()
        .map(|s| TrainingSample {
            embedding: s.embedding,
            quality: s.quality,
        })
        .collect();
    let accepted_samples = samples.len();

    let trainer = ContrastiveTrainer::new(Default::default(), state.training_dim, state.training_layers);
    let (_owner, observer) = state.background_trainer.cancel_handle();
    let mut rx = state
        .background_trainer
        .train(trainer, samples, epochs, Some(state.history.clone()), observer);

    while rx.recv().await.is_some() {}

    Ok(Json(TrainAck {
        accepted_samples,
        epochs,
    }))
}
