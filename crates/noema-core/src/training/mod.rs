//! The contrastive training subsystem: a buffer that decides when to
//! fire, a trainer that turns a batch of feedback-scored trajectories
//! into a weight update, a cooperative-or-offloaded runner, and a
//! durable history of every batch trained.

mod background;
mod contrastive;
mod history;
mod trigger;

pub use background::{BackgroundTrainer, CancelHandle, TrainingMessage, TrainingSummary};
pub use contrastive::{BatchResult, ContrastiveTrainer, EpochResult, TrainingSample};
pub use history::{HistoryError, HistoryRecord, HistoryStats, TrainingHistory};
pub use trigger::{BufferedSample, TrainingTrigger};

impl From<BufferedSample> for TrainingSample {
    fn from(sample: BufferedSample) -> Self {
        TrainingSample {
            embedding: sample.enhanced_embedding.unwrap_or(sample.embedding),
            quality: sample.quality,
        }
    }
}
