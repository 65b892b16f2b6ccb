use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use chrono::Utc;
use comms::{
    FrameKind, Metadata, frame,
    specs::{TrainingPhase, TrainingProgress, WorkerState},
};
use log::{debug, info, warn};
use machine_learning::{
    Adapter, BatchStats, ComputeEngine, Dataset, Device, aggregate::NUM_EXAMPLES, init,
};
use tokio::{sync::Notify, task};

use crate::{
    Result, WorkerErr,
    checkpoint::CheckpointStore,
    config::TrainingConfig,
    metrics::SessionMetrics,
    net::{Aggregator, TelemetryReport, TelemetrySink},
    state::Reporter,
};

/// How a training session ended.
#[derive(Debug)]
pub enum Outcome {
    /// Carries the encoded delta frame.
    Completed(Vec<u8>),
    Stopped,
    Failed(WorkerErr),
}

/// Everything acquired while initializing, reused by every session until the next `Init`.
#[derive(Clone)]
pub struct Prepared {
    pub config: Arc<TrainingConfig>,
    pub device: Arc<Device>,
    pub store: CheckpointStore,
    pub dataset: Arc<Dataset>,
    pub base_weights: Arc<[f32]>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub aggregator: Arc<dyn Aggregator>,
}

/// A cooperative stop request shared by the control loop and a session.
///
/// The flag is polled between batches, awaiting `requested` lets network calls be
/// abandoned as soon as a stop arrives.
#[derive(Debug, Default)]
pub struct StopSignal {
    flag: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn request(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Resolves once a stop is requested, immediately if it already was.
    pub async fn requested(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_requested() {
            return;
        }

        notified.await;
    }
}

/// One run of the epoch loop, from its resume point until completion, a stop request
/// or a fatal error.
pub struct Session {
    prepared: Prepared,
    reporter: Reporter,
    stop: Arc<StopSignal>,
    metrics: SessionMetrics,
    /// Set while a telemetry report is in flight, later reports are skipped meanwhile.
    reporting: Arc<AtomicBool>,
}

impl Session {
    pub fn new(prepared: Prepared, reporter: Reporter, stop: Arc<StopSignal>) -> Self {
        Self {
            prepared,
            reporter,
            stop,
            metrics: SessionMetrics::default(),
            reporting: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Runs the session to its end.
    ///
    /// Every buffer of the session is released before returning.
    pub async fn run(mut self) -> Outcome {
        match self.train().await {
            Ok(Some(frame)) => Outcome::Completed(frame),
            Ok(None) => Outcome::Stopped,
            Err(e) => Outcome::Failed(e),
        }
    }

    async fn train(&mut self) -> Result<Option<Vec<u8>>> {
        let config = self.prepared.config.clone();
        let Some((initial, current, start_epoch)) = self.starting_point().await? else {
            info!("stopped before training started");
            return Ok(None);
        };

        let mut engine = ComputeEngine::new(
            self.prepared.device.clone(),
            &self.prepared.base_weights,
            &current,
            config.scale(),
        )?;

        let epochs = config.epochs.get();
        let batch_size = config.batch_size.get();
        let total_batches = self.prepared.dataset.total_batches(batch_size);

        info!(
            start_epoch = start_epoch,
            epochs = epochs,
            total_batches = total_batches;
            "training started"
        );

        for epoch in start_epoch..epochs {
            self.metrics.start_epoch();

            for batch in 0..total_batches {
                if self.stop.is_requested() {
                    info!(epoch = epoch, batch = batch; "stopped, discarding the current epoch");
                    engine.release();
                    return Ok(None);
                }

                let started = Instant::now();
                let (returned, stats) = self.train_batch(engine, batch).await?;
                engine = returned;
                let stats = stats?;

                let throughput = self.metrics.record(stats, started.elapsed());
                let progress = TrainingProgress {
                    epoch,
                    total_epochs: epochs,
                    batch: batch + 1,
                    total_batches,
                    loss: stats.loss,
                    throughput,
                };

                self.reporter.progress(progress).await;

                if (batch + 1) % config.telemetry_interval.get() == 0 {
                    self.send_telemetry(progress);
                }
            }

            // A stop observed during the last batch still discards the epoch.
            if self.stop.is_requested() {
                engine.release();
                return Ok(None);
            }

            self.reporter
                .transition(WorkerState::Training(TrainingPhase::Checkpointing))
                .await;

            let snapshot = engine.extract()?;
            self.prepared.store.save(epoch, &snapshot).await?;
            self.reporter.checkpointed(Some(epoch));

            info!(
                epoch = epoch,
                avg_loss = self.metrics.avg_loss().unwrap_or_default();
                "epoch done"
            );

            if epoch + 1 < epochs {
                self.reporter
                    .transition(WorkerState::Training(TrainingPhase::Batches))
                    .await;
            }
        }

        let trained = engine.extract()?;
        engine.release();

        let frame = self.delta_frame(&trained, &initial)?;
        tokio::select! {
            uploaded = self.prepared.aggregator.upload(frame.clone()) => {
                if let Err(e) = uploaded {
                    warn!("delta upload failed: {e}");
                }
            }
            _ = self.stop.requested() => warn!("stopped before the delta upload finished"),
        }

        // The round is over, the next one must not resume from its checkpoints.
        match self.prepared.store.clear().await {
            Ok(()) => self.reporter.checkpointed(None),
            Err(e) => warn!("failed to clear the finished round's checkpoints: {e}"),
        }

        Ok(Some(frame))
    }

    /// Picks the adapter to train from.
    ///
    /// # Returns
    /// The session's initial adapter, the adapter to continue from and the first epoch
    /// left to train, or `None` if a stop arrived while fetching the global adapter.
    async fn starting_point(&self) -> Result<Option<(Adapter, Adapter, usize)>> {
        let dims = self.prepared.config.dims;
        let store = &self.prepared.store;

        if let Some(checkpoint) = store.load_latest().await {
            let epoch = checkpoint.epoch().unwrap_or_default();
            let current = checkpoint.into_adapter(dims);
            let initial = store.load_initial().await.map(|c| c.into_adapter(dims));

            match (current, initial) {
                (Ok(current), Some(Ok(initial))) => {
                    info!(epoch = epoch; "resuming after checkpoint");
                    return Ok(Some((initial, current, epoch + 1)));
                }
                (Err(e), _) | (_, Some(Err(e))) => {
                    warn!("checkpoint doesn't fit this session, starting over: {e}");
                }
                (_, None) => warn!("checkpoint without an initial adapter, starting over"),
            }
        }

        let fetched = tokio::select! {
            fetched = self.prepared.aggregator.fetch_global() => fetched,
            _ = self.stop.requested() => return Ok(None),
        };

        let global = fetched.unwrap_or_else(|e| {
            warn!("failed to fetch the global adapter: {e}");
            None
        });

        let initial = match global {
            Some(frame) => {
                info!("starting from the global adapter");
                Adapter::new(dims, frame.a, frame.b)?
            }
            None => init::init_adapter_seeded(self.prepared.config.seed, dims)?,
        };

        store.save_initial(&initial).await?;
        Ok(Some((initial.clone(), initial, 0)))
    }

    /// Trains a single batch on the blocking pool.
    ///
    /// The engine is moved into the blocking task and handed back along with the result.
    async fn train_batch(
        &self,
        mut engine: ComputeEngine,
        batch: usize,
    ) -> Result<(ComputeEngine, machine_learning::Result<BatchStats>)> {
        let dataset = self.prepared.dataset.clone();
        let batch_size = self.prepared.config.batch_size.get();
        let lr = self.prepared.config.learning_rate;

        let trained = task::spawn_blocking(move || {
            let stats = match dataset.batch(batch, batch_size) {
                Some(rows) => engine.train_batch(rows, lr),
                None => Ok(BatchStats {
                    loss: 0.,
                    samples: 0,
                }),
            };

            (engine, stats)
        })
        .await?;

        Ok(trained)
    }

    fn delta_frame(&self, trained: &Adapter, initial: &Adapter) -> Result<Vec<u8>> {
        let config = &self.prepared.config;
        let delta = trained.delta(initial)?;

        let mut metadata = Metadata::new(delta.a().len(), delta.b().len());
        metadata.kind = Some(FrameKind::Delta);
        metadata.device_id = Some(config.device_id.clone());
        metadata.model_id = Some(config.model_id.clone());
        metadata.task = Some(config.task.clone());
        metadata.timestamp = Some(Utc::now());

        let metrics = [
            ("epochs", config.epochs.get() as f64),
            ("rank", config.dims.rank() as f64),
            (NUM_EXAMPLES, self.prepared.dataset.len() as f64),
            ("avg_loss", self.metrics.avg_loss().unwrap_or(f64::NAN)),
        ];

        metadata.metrics.extend(
            metrics
                .into_iter()
                .filter(|(_, value)| value.is_finite())
                .map(|(name, value)| (name.to_string(), value)),
        );

        let frame = frame::encode(&metadata, delta.a(), delta.b())?;
        debug!(bytes = frame.len(); "encoded delta frame");
        Ok(frame)
    }

    fn send_telemetry(&self, progress: TrainingProgress) {
        if self.reporting.swap(true, Ordering::AcqRel) {
            debug!("previous telemetry report still in flight, skipping");
            return;
        }

        let reporting = self.reporting.clone();
        let config = &self.prepared.config;
        let sink = self.prepared.telemetry.clone();
        let report = TelemetryReport {
            device_id: config.device_id.clone(),
            model_id: config.model_id.clone(),
            task: config.task.clone(),
            progress,
        };

        task::spawn(async move {
            if let Err(e) = sink.report(&report).await {
                warn!("telemetry report failed: {e}");
            }

            reporting.store(false, Ordering::Release);
        });
    }
}
