use std::time::Duration;

use machine_learning::BatchStats;

/// Running counters of a training session.
#[derive(Debug, Default, Clone)]
pub struct SessionMetrics {
    pub compute_time: Duration,
    pub batches: u64,
    pub samples: u64,

    epoch_loss: f64,
    epoch_batches: u64,
}

impl SessionMetrics {
    /// Records a trained batch.
    ///
    /// # Returns
    /// The batch throughput in samples per second.
    pub fn record(&mut self, stats: BatchStats, elapsed: Duration) -> f32 {
        self.compute_time += elapsed;
        self.batches += 1;
        self.samples += stats.samples as u64;

        self.epoch_loss += stats.loss as f64;
        self.epoch_batches += 1;

        let secs = elapsed.as_secs_f32();
        if secs > 0. {
            stats.samples as f32 / secs
        } else {
            0.
        }
    }

    #[inline]
    pub fn start_epoch(&mut self) {
        self.epoch_loss = 0.;
        self.epoch_batches = 0;
    }

    /// Mean batch loss of the current epoch.
    pub fn avg_loss(&self) -> Option<f64> {
        (self.epoch_batches > 0).then(|| self.epoch_loss / self.epoch_batches as f64)
    }
}
