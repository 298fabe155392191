//! Buffers feedback-annotated trajectories and fires training when a
//! sample threshold is reached or a periodic timer elapses.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// One sample buffered for the next training batch.
#[derive(Debug, Clone)]
pub struct BufferedSample {
    pub trajectory_id: String,
    pub embedding: Vec<f32>,
    pub enhanced_embedding: Option<Vec<f32>>,
    pub quality: f32,
}

/// Fires a `Vec<BufferedSample>` onto its channel once the buffer reaches
/// `threshold` samples, or (via [`TrainingTrigger::spawn_timer`]) once a
/// periodic timer elapses with anything non-empty buffered.
pub struct TrainingTrigger {
    threshold: usize,
    buffer: Mutex<Vec<BufferedSample>>,
    fire_tx: mpsc::UnboundedSender<Vec<BufferedSample>>,
}

impl TrainingTrigger {
    pub fn new(threshold: usize) -> (Self, mpsc::UnboundedReceiver<Vec<BufferedSample>>) {
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        (
            Self {
                threshold,
                buffer: Mutex::new(Vec::new()),
                fire_tx,
            },
            fire_rx,
        )
    }

    /// Appends a sample; fires (drains and sends) if the buffer has
    /// reached `threshold`. Returns `true` if firing happened.
    pub fn append(&self, sample: BufferedSample) -> bool {
        let mut buffer = self.buffer.lock();
        buffer.push(sample);
        if buffer.len() >= self.threshold {
            let drained = std::mem::take(&mut *buffer);
            let _ = self.fire_tx.send(drained);
            true
        } else {
            false
        }
    }

    pub fn should_trigger(&self) -> bool {
        self.buffer.lock().len() >= self.threshold
    }

    pub fn get_buffer_size(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Drains and fires whatever is buffered, regardless of threshold.
    /// Used by the periodic timer and by explicit flush callers.
    pub fn flush(&self) -> bool {
        let mut buffer = self.buffer.lock();
        if buffer.is_empty() {
            return false;
        }
        let drained = std::mem::take(&mut *buffer);
        let _ = self.fire_tx.send(drained);
        true
    }

    /// Spawns a periodic task that flushes the buffer every `period`,
    /// regardless of whether the threshold has been reached. Cooperative:
    /// uses `tokio::time::interval`, no dedicated thread.
    pub fn spawn_timer(self: std::sync::Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                self.flush();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, quality: f32) -> BufferedSample {
        BufferedSample {
            trajectory_id: id.to_string(),
            embedding: vec![0.1, 0.2],
            enhanced_embedding: None,
            quality,
        }
    }

    #[test]
    fn fires_at_threshold() {
        let (trigger, mut rx) = TrainingTrigger::new(2);
        assert!(!trigger.append(sample("a", 0.9)));
        assert_eq!(trigger.get_buffer_size(), 1);
        assert!(trigger.append(sample("b", 0.8)));
        assert_eq!(trigger.get_buffer_size(), 0);
        let fired = rx.try_recv().unwrap();
        assert_eq!(fired.len(), 2);
    }

    #[test]
    fn should_trigger_reflects_buffer_state() {
        let (trigger, _rx) = TrainingTrigger::new(3);
        assert!(!trigger.should_trigger());
        trigger.append(sample("a", 0.9));
        trigger.append(sample("b", 0.9));
        assert!(!trigger.should_trigger());
        trigger.append(sample("c", 0.9));
        assert!(!trigger.should_trigger()); // already fired and drained
    }

    #[test]
    fn flush_fires_below_threshold() {
        let (trigger, mut rx) = TrainingTrigger::new(50);
        trigger.append(sample("a", 0.9));
        assert!(trigger.flush());
        let fired = rx.try_recv().unwrap();
        assert_eq!(fired.len(), 1);
        assert!(!trigger.flush());
    }
}
