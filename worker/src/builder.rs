use std::{path::PathBuf, sync::Arc, time::Duration};

use machine_learning::{Backend, CpuBackend};
use tokio::sync::mpsc;

use crate::{
    handle::WorkerHandle,
    net::{Aggregator, Discovery, TelemetrySink},
    worker::{Collaborators, Worker},
};

const DEFAULT_CHECKPOINT_ROOT: &str = "./checkpoints";
const DEFAULT_EVENT_CAPACITY: usize = 64;
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Configures and spawns a `Worker`.
///
/// Collaborators that aren't injected are built from each session's endpoints, falling
/// back to no-ops when an endpoint is missing.
pub struct WorkerBuilder {
    backend: Arc<dyn Backend>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    aggregator: Option<Arc<dyn Aggregator>>,
    discovery: Option<Arc<dyn Discovery>>,
    checkpoint_root: PathBuf,
    event_capacity: usize,
    http_timeout: Duration,
}

impl Default for WorkerBuilder {
    fn default() -> Self {
        Self {
            backend: Arc::new(CpuBackend),
            telemetry: None,
            aggregator: None,
            discovery: None,
            checkpoint_root: PathBuf::from(DEFAULT_CHECKPOINT_ROOT),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl WorkerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_aggregator(mut self, aggregator: Arc<dyn Aggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Sessions checkpoint under `root/<model_id>/<device_id>`.
    pub fn with_checkpoint_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.checkpoint_root = root.into();
        self
    }

    /// Bounds the events the worker may publish ahead of its reader.
    ///
    /// A full channel makes the training loop wait for the reader.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Bounds each request to the telemetry, aggregator and discovery endpoints.
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Spawns the worker on the current tokio runtime.
    ///
    /// # Returns
    /// The handle through which the worker is driven.
    pub fn spawn(self) -> WorkerHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(self.event_capacity);
        let (event_tx, event_rx) = mpsc::channel(self.event_capacity);

        let collaborators = Collaborators {
            backend: self.backend,
            telemetry: self.telemetry,
            aggregator: self.aggregator,
            discovery: self.discovery,
            checkpoint_root: self.checkpoint_root,
            http_timeout: self.http_timeout,
        };

        let worker = Worker::new(collaborators, event_tx);
        let task = tokio::spawn(worker.run(cmd_rx));

        WorkerHandle::new(cmd_tx, event_rx, task)
    }
}
