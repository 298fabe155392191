//! Runs the contrastive trainer either cooperatively in-process or
//! offloaded to a dedicated worker thread, depending on batch count.
//!
//! Grounded on the teacher's `consolidation::sleep::SleepConsolidation`
//! (a `*Run` progress tracker accumulated across a unit of background
//! work, finished into a result struct) for the progress-reporting
//! shape, and on the worker-thread message-passing idiom from spec §9
//! ("Worker offload") for the offloaded half — this crate has no
//! teacher precedent for handing work to a raw OS thread, so the
//! message enum and `thiserror` error are built fresh in the teacher's
//! idiom (typed variants, `tracing` spans per message).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use super::contrastive::{BatchResult, ContrastiveTrainer, EpochResult, TrainingSample};
use super::history::TrainingHistory;
use crate::config::TrainingConfig;

/// One message emitted while a training run is in flight.
#[derive(Debug, Clone)]
pub enum TrainingMessage {
    Progress {
        epoch: usize,
        batch_index: usize,
        batches_in_epoch: usize,
    },
    Batch(BatchResult),
    Epoch(EpochResult),
    Complete(TrainingSummary),
    Error(String),
}

/// Final outcome of a training run. Never constructed as an `Err` —
/// timeouts and cancellation are non-successful results, not failures.
#[derive(Debug, Clone, Default)]
pub struct TrainingSummary {
    pub epochs_completed: usize,
    pub batches_completed: usize,
    pub final_loss: f32,
    pub best_loss: f32,
    pub cancelled: bool,
    pub timed_out: bool,
    pub weights: Vec<u8>,
}

/// A cheaply-clonable flag a caller can set to stop a run at its next
/// batch boundary.
#[derive(Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives a [`ContrastiveTrainer`] over however many epochs/batches the
/// caller asks for, choosing the in-process cooperative path or the
/// worker-thread offload path based on sample count vs
/// `config.worker_threshold`.
pub struct BackgroundTrainer {
    config: TrainingConfig,
}

impl BackgroundTrainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn cancel_handle(&self) -> (CancelHandle, CancelHandle) {
        let flag = Arc::new(AtomicBool::new(false));
        (CancelHandle(flag.clone()), CancelHandle(flag))
    }

    /// Consumes `trainer`, trains it over `epochs` epochs against
    /// `samples`, and streams progress on the returned channel. The
    /// weights blob ships once, inside the final `Complete` message —
    /// batch-persisting mid-run would defeat the point of batching.
    pub fn train(
        &self,
        trainer: ContrastiveTrainer,
        samples: Vec<TrainingSample>,
        epochs: usize,
        history: Option<Arc<TrainingHistory>>,
        cancel: CancelHandle,
    ) -> mpsc::UnboundedReceiver<TrainingMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = self.config.clone();

        if samples.len() < config.worker_threshold {
            tokio::spawn(run_cooperative(trainer, samples, epochs, config, history, cancel, tx));
        } else {
            let tx_for_thread = tx.clone();
            let spawn_config = config.clone();
            let spawned = std::thread::Builder::new()
                .name("noema-training-worker".to_string())
                .spawn(move || {
                    run_offloaded(trainer, samples, epochs, spawn_config, history, cancel, tx_for_thread)
                });
            if let Err(err) = spawned {
                tracing::warn!(error = %err, "failed to spawn training worker thread, falling back to cooperative path");
                let _ = tx.send(TrainingMessage::Error(format!(
                    "worker thread spawn failed: {err}, retrying cooperatively is not possible after move"
                )));
            }
        }

        rx
    }
}

/// In-process cooperative path: yields every `config.yield_interval`
/// batches via `tokio::task::yield_now()` so this never starves the
/// reasoning path sharing the same runtime.
async fn run_cooperative(
    mut trainer: ContrastiveTrainer,
    samples: Vec<TrainingSample>,
    epochs: usize,
    config: TrainingConfig,
    history: Option<Arc<TrainingHistory>>,
    cancel: CancelHandle,
    tx: mpsc::UnboundedSender<TrainingMessage>,
) {
    let start = Instant::now();
    let mut summary = TrainingSummary::default();
    let mut batches_since_yield = 0usize;

    'epochs: for epoch in 0..epochs {
        let chunks: Vec<&[TrainingSample]> = samples.chunks(config.batch_size.max(1)).collect();
        let mut epoch_batches = Vec::with_capacity(chunks.len());

        for (batch_index, chunk) in chunks.iter().enumerate() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break 'epochs;
            }
            if start.elapsed() >= config.max_training_time {
                summary.timed_out = true;
                break 'epochs;
            }

            let _ = tx.send(TrainingMessage::Progress {
                epoch,
                batch_index,
                batches_in_epoch: chunks.len(),
            });
            let result = trainer.train_batch(epoch, batch_index, chunk);
            if let Some(history) = &history {
                if let Err(err) = history.record_batch(&result) {
                    tracing::warn!(error = %err, "failed to persist training batch");
                }
            }
            summary.batches_completed += 1;
            summary.final_loss = result.loss;
            let _ = tx.send(TrainingMessage::Batch(result.clone()));
            epoch_batches.push(result);

            batches_since_yield += 1;
            if batches_since_yield >= config.yield_interval {
                batches_since_yield = 0;
                tokio::task::yield_now().await;
            }
        }

        let epoch_result = trainer.finish_epoch(epoch, &epoch_batches);
        if epoch_result.average_loss < summary.best_loss || summary.epochs_completed == 0 {
            summary.best_loss = epoch_result.average_loss;
        }
        summary.epochs_completed += 1;
        let _ = tx.send(TrainingMessage::Epoch(epoch_result));
    }

    summary.weights = trainer.weights_snapshot();
    let _ = tx.send(TrainingMessage::Complete(summary));
}

/// Worker-thread offload path: the same loop, but run on a dedicated OS
/// thread with no `tokio` involvement at all — `cancel` is observed at
/// batch boundaries exactly as in the cooperative path.
fn run_offloaded(
    mut trainer: ContrastiveTrainer,
    samples: Vec<TrainingSample>,
    epochs: usize,
    config: TrainingConfig,
    history: Option<Arc<TrainingHistory>>,
    cancel: CancelHandle,
    tx: mpsc::UnboundedSender<TrainingMessage>,
) {
    let start = Instant::now();
    let mut summary = TrainingSummary::default();

    'epochs: for epoch in 0..epochs {
        let chunks: Vec<&[TrainingSample]> = samples.chunks(config.batch_size.max(1)).collect();
        let mut epoch_batches = Vec::with_capacity(chunks.len());

        for (batch_index, chunk) in chunks.iter().enumerate() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break 'epochs;
            }
            if start.elapsed() >= config.max_training_time {
                summary.timed_out = true;
                break 'epochs;
            }

            let _ = tx.send(TrainingMessage::Progress {
                epoch,
                batch_index,
                batches_in_epoch: chunks.len(),
            });
            let result = trainer.train_batch(epoch, batch_index, chunk);
            if let Some(history) = &history {
                if let Err(err) = history.record_batch(&result) {
                    tracing::warn!(error = %err, "failed to persist training batch");
                }
            }
            summary.batches_completed += 1;
            summary.final_loss = result.loss;
            let _ = tx.send(TrainingMessage::Batch(result.clone()));
            epoch_batches.push(result);
        }

        let epoch_result = trainer.finish_epoch(epoch, &epoch_batches);
        if epoch_result.average_loss < summary.best_loss || summary.epochs_completed == 0 {
            summary.best_loss = epoch_result.average_loss;
        }
        summary.epochs_completed += 1;
        let _ = tx.send(TrainingMessage::Epoch(epoch_result));
    }

    summary.weights = trainer.weights_snapshot();
    let _ = tx.send(TrainingMessage::Complete(summary));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(quality: f32) -> TrainingSample {
        TrainingSample {
            embedding: vec![0.1, 0.2, 0.3, 0.4],
            quality,
        }
    }

    #[tokio::test]
    async fn cooperative_path_runs_below_worker_threshold() {
        let mut config = TrainingConfig::default();
        config.worker_threshold = 100;
        config.batch_size = 2;
        let trainer = ContrastiveTrainer::new(config.clone(), 4, 1);
        let background = BackgroundTrainer::new(config);
        let (_owner, handle) = background.cancel_handle();

        let samples = vec![sample(0.9), sample(0.1), sample(0.8), sample(0.2)];
        let mut rx = background.train(trainer, samples, 1, None, handle);

        let mut saw_complete = false;
        while let Some(msg) = rx.recv().await {
            if let TrainingMessage::Complete(summary) = msg {
                assert_eq!(summary.epochs_completed, 1);
                assert!(!summary.weights.is_empty());
                saw_complete = true;
            }
        }
        assert!(saw_complete);
    }

    #[tokio::test]
    async fn cancellation_stops_before_all_epochs_complete() {
        let mut config = TrainingConfig::default();
        config.worker_threshold = 100;
        config.batch_size = 1;
        let trainer = ContrastiveTrainer::new(config.clone(), 4, 1);
        let background = BackgroundTrainer::new(config);
        let (owner, handle) = background.cancel_handle();
        owner.cancel();

        let samples = vec![sample(0.9), sample(0.1)];
        let mut rx = background.train(trainer, samples, 5, None, handle);

        let mut summary = None;
        while let Some(msg) = rx.recv().await {
            if let TrainingMessage::Complete(s) = msg {
                summary = Some(s);
            }
        }
        assert!(summary.unwrap().cancelled);
    }
}
