use std::{path::PathBuf, sync::Arc, time::Duration};

use comms::{
    msg::Command,
    specs::{Event, TrainingPhase, TrainingSpec, WorkerState},
};
use futures::future::OptionFuture;
use log::{debug, info, warn};
use machine_learning::{Backend, Dataset, init};
use reqwest::Client;
use tokio::{
    sync::mpsc,
    task::{self, JoinError, JoinHandle},
};

use crate::{
    Result, WorkerErr,
    checkpoint::CheckpointStore,
    config::TrainingConfig,
    net::{
        Aggregator, Announcement, Discovery, HttpAggregator, HttpDiscovery, HttpTelemetry,
        NoopAggregator, NoopTelemetry, TelemetrySink,
    },
    session::{Outcome, Prepared, Session, StopSignal},
    state::Reporter,
};

/// Collaborators injected by the `WorkerBuilder`, the missing ones are derived from each
/// session's endpoints.
pub(crate) struct Collaborators {
    pub backend: Arc<dyn Backend>,
    pub telemetry: Option<Arc<dyn TelemetrySink>>,
    pub aggregator: Option<Arc<dyn Aggregator>>,
    pub discovery: Option<Arc<dyn Discovery>>,
    pub checkpoint_root: PathBuf,
    /// Bounds every HTTP request made by the collaborators built from endpoints.
    pub http_timeout: Duration,
}

struct Running {
    stop: Arc<StopSignal>,
    task: JoinHandle<Outcome>,
}

/// The training orchestrator of a node.
///
/// Owns at most one training session at a time and drives the worker state machine,
/// receiving commands and publishing events only through channels.
pub struct Worker {
    collaborators: Collaborators,
    reporter: Reporter,
    prepared: Option<Prepared>,
    running: Option<Running>,
}

impl Worker {
    pub(crate) fn new(collaborators: Collaborators, events: mpsc::Sender<Event>) -> Self {
        Self {
            collaborators,
            reporter: Reporter::new(events),
            prepared: None,
            running: None,
        }
    }

    /// Handles commands until a `Disconnect` arrives or every command sender is dropped.
    ///
    /// A running session is stopped and awaited before returning.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Disconnect) | None => break,
                    Some(cmd) => self.handle(cmd).await,
                },
                Some(joined) = OptionFuture::from(self.running.as_mut().map(|r| &mut r.task)) => {
                    self.running = None;
                    self.finish(joined).await;
                }
            }
        }

        if let Some(running) = self.running.take() {
            info!("stopping the running session before disconnecting");
            running.stop.request();
            let joined = running.task.await;
            self.finish(joined).await;
        }

        info!("worker disconnected");
    }

    async fn handle(&mut self, cmd: Command) {
        let state = self.reporter.state();
        debug!("received {} in state {state:?}", command_name(&cmd));

        match cmd {
            Command::Init(spec) => self.init(spec).await,
            Command::Start => self.start().await,
            Command::Stop => self.stop().await,
            Command::Status => {
                let report = self.reporter.snapshot();
                self.reporter.emit(Event::Status(report)).await;
            }
            Command::Disconnect => {}
        }
    }

    async fn init(&mut self, spec: TrainingSpec) {
        let state = self.reporter.state();
        if self.running.is_some() || !(state == WorkerState::Idle || state.is_terminal()) {
            return self.reject("init", state).await;
        }

        self.prepared = None;
        self.reporter.reset();
        self.reporter.transition(WorkerState::Initializing).await;

        match self.prepare(spec).await {
            Ok(prepared) => {
                self.prepared = Some(prepared);
                self.reporter.transition(WorkerState::Ready).await;
            }
            Err(e) => {
                self.reporter.error(&e, true).await;
                self.reporter.transition(WorkerState::Failed).await;
            }
        }
    }

    /// Acquires the device, the checkpoint directory and the session's data.
    async fn prepare(&self, spec: TrainingSpec) -> Result<Prepared> {
        let config = Arc::new(TrainingConfig::from_spec(spec)?);
        let device = self
            .collaborators
            .backend
            .request_device(&config.compute_device)?;

        let dir = config.checkpoint_dir(&self.collaborators.checkpoint_root);
        let store = CheckpointStore::open(dir, &config.model_id, config.keep_checkpoints).await?;
        self.reporter.checkpointed(store.latest_epoch().await);

        let dims = config.dims;
        let base_weights = init::base_weights(&config.base_weights, dims)?;

        let dataset_spec = config.dataset.clone();
        let dataset = task::spawn_blocking(move || Dataset::from_spec(&dataset_spec, dims)).await??;

        info!(
            device = device.id(),
            samples = dataset.len();
            "worker initialized, checkpoints at {}",
            store.dir().display()
        );

        let http = Client::builder()
            .timeout(self.collaborators.http_timeout)
            .build()
            .map_err(|e| WorkerErr::Internal(format!("failed to create the HTTP client: {e}")))?;

        self.announce(&http, &config);

        Ok(Prepared {
            telemetry: self.telemetry(&http, &config),
            aggregator: self.aggregator(&http, &config),
            config,
            device,
            store,
            dataset: Arc::new(dataset),
            base_weights: base_weights.into(),
        })
    }

    async fn start(&mut self) {
        let state = self.reporter.state();

        if state.is_training() {
            return self.reporter.error(&WorkerErr::AlreadyRunning, false).await;
        }

        let Some(prepared) = self.prepared.clone() else {
            return self.reject("start", state).await;
        };

        if !matches!(state, WorkerState::Ready | WorkerState::Stopped) {
            return self.reject("start", state).await;
        }

        self.reporter
            .transition(WorkerState::Training(TrainingPhase::Batches))
            .await;

        let stop = Arc::new(StopSignal::default());
        let session = Session::new(prepared, self.reporter.clone(), stop.clone());

        self.running = Some(Running {
            stop,
            task: task::spawn(session.run()),
        });
    }

    async fn stop(&mut self) {
        let state = self.reporter.state();

        match (&self.running, state) {
            (Some(running), _) => {
                info!("stop requested");
                running.stop.request();
            }
            (None, WorkerState::Ready) => self.reporter.transition(WorkerState::Stopped).await,
            (None, state) => self.reject("stop", state).await,
        }
    }

    async fn finish(&mut self, joined: std::result::Result<Outcome, JoinError>) {
        let outcome = joined.unwrap_or_else(|e| Outcome::Failed(e.into()));

        match outcome {
            Outcome::Completed(frame) => {
                self.reporter.transition(WorkerState::Completed).await;
                self.reporter.emit(Event::Completed(frame)).await;
            }
            Outcome::Stopped => self.reporter.transition(WorkerState::Stopped).await,
            Outcome::Failed(e) => {
                // Device resident state is gone, a new `Init` must acquire everything again.
                self.prepared = None;
                self.reporter.error(&e, true).await;
                self.reporter.transition(WorkerState::Failed).await;
            }
        }
    }

    async fn reject(&self, command: &'static str, state: WorkerState) {
        let err = WorkerErr::InvalidState { command, state };
        self.reporter.error(&err, false).await;
    }

    fn telemetry(&self, http: &Client, config: &TrainingConfig) -> Arc<dyn TelemetrySink> {
        if let Some(telemetry) = &self.collaborators.telemetry {
            return telemetry.clone();
        }

        match &config.server_endpoint {
            Some(server) => Arc::new(HttpTelemetry::new(http.clone(), server)),
            None => Arc::new(NoopTelemetry),
        }
    }

    fn aggregator(&self, http: &Client, config: &TrainingConfig) -> Arc<dyn Aggregator> {
        if let Some(aggregator) = &self.collaborators.aggregator {
            return aggregator.clone();
        }

        match &config.server_endpoint {
            Some(server) => Arc::new(HttpAggregator::new(http.clone(), server)),
            None => Arc::new(NoopAggregator),
        }
    }

    /// Announces the node to the discovery service without waiting for it.
    fn announce(&self, http: &Client, config: &TrainingConfig) {
        let discovery: Arc<dyn Discovery> = match (
            &self.collaborators.discovery,
            &config.discovery_endpoint,
        ) {
            (Some(discovery), _) => discovery.clone(),
            (None, Some(endpoint)) => Arc::new(HttpDiscovery::new(http.clone(), endpoint)),
            (None, None) => return,
        };

        let announcement = Announcement::from(config);
        task::spawn(async move {
            if let Err(e) = discovery.announce(&announcement).await {
                warn!("discovery announcement failed: {e}");
            }
        });
    }
}

fn command_name(cmd: &Command) -> &'static str {
    match cmd {
        Command::Init(_) => "init",
        Command::Start => "start",
        Command::Stop => "stop",
        Command::Status => "status",
        Command::Disconnect => "disconnect",
    }
}
