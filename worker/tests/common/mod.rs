#![allow(dead_code)]

use std::{
    future,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use comms::{
    Frame,
    msg::Command,
    specs::{Event, TrainingSpec, WorkerState},
};
use machine_learning::{Backend, Device};
use parking_lot::Mutex;
use serde_json::json;
use worker::{
    Checkpoint, CheckpointStore, Result, WorkerErr, WorkerHandle,
    net::{Aggregator, TelemetryReport, TelemetrySink},
};

pub const INPUT_SIZE: usize = 16;
pub const OUTPUT_SIZE: usize = 8;
pub const RANK: usize = 4;
pub const SAMPLES: usize = 64;
pub const BATCH_SIZE: usize = 8;

pub fn spec(epochs: usize) -> TrainingSpec {
    serde_json::from_value(json!({
        "model_id": "tiny",
        "task": "regression",
        "capabilities": ["cpu"],
        "epochs": epochs,
        "batch_size": BATCH_SIZE,
        "learning_rate": 0.01,
        "rank": RANK,
        "alpha": 4.0,
        "device_id": "node-a",
        "compute_device": "cpu:0",
        "input_size": INPUT_SIZE,
        "output_size": OUTPUT_SIZE,
        "dataset": { "synthetic": { "samples": SAMPLES, "seed": 7 } },
        "base_weights": { "seeded": { "seed": 3 } },
        "seed": 11,
        "telemetry_interval": 2
    }))
    .unwrap()
}

/// The checkpoints on disk when a delta was uploaded.
#[derive(Debug)]
pub struct OnDisk {
    pub epochs: Vec<usize>,
    pub latest: Option<Checkpoint>,
    pub initial: Option<Checkpoint>,
}

/// Keeps every uploaded frame and serves a fixed global adapter.
///
/// With a `store`, the checkpoints present at each upload are kept as well.
#[derive(Default)]
pub struct RecordingAggregator {
    pub global: Option<Frame>,
    pub store: Option<CheckpointStore>,
    pub uploads: Mutex<Vec<Vec<u8>>>,
    pub on_disk: Mutex<Vec<OnDisk>>,
}

impl RecordingAggregator {
    pub fn watching(store: CheckpointStore) -> Self {
        Self {
            store: Some(store),
            ..Default::default()
        }
    }

    /// Replaces the global adapter served to the next sessions.
    pub fn with_global(mut self, global: Frame) -> Self {
        self.global = Some(global);
        self
    }
}

#[async_trait]
impl Aggregator for RecordingAggregator {
    async fn upload(&self, frame: Vec<u8>) -> Result<()> {
        if let Some(store) = &self.store {
            let on_disk = OnDisk {
                epochs: store.epochs().await?,
                latest: store.load_latest().await,
                initial: store.load_initial().await,
            };
            self.on_disk.lock().push(on_disk);
        }

        self.uploads.lock().push(frame);
        Ok(())
    }

    async fn fetch_global(&self) -> Result<Option<Frame>> {
        Ok(self.global.clone())
    }
}

/// Never answers uploads, like an aggregator whose connection hung.
///
/// Fetches hang too unless `answers_fetch` is set, then there's no global adapter.
pub struct HangingAggregator {
    pub answers_fetch: bool,
}

#[async_trait]
impl Aggregator for HangingAggregator {
    async fn upload(&self, _frame: Vec<u8>) -> Result<()> {
        future::pending().await
    }

    async fn fetch_global(&self) -> Result<Option<Frame>> {
        if self.answers_fetch {
            return Ok(None);
        }

        future::pending().await
    }
}

/// Fails every call, counting them.
#[derive(Default)]
pub struct FailingTelemetry {
    pub calls: AtomicUsize,
}

#[async_trait]
impl TelemetrySink for FailingTelemetry {
    async fn report(&self, _report: &TelemetryReport) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(WorkerErr::Telemetry("unreachable".into()))
    }
}

/// Hands out the same device every time so tests can inspect and break it.
pub struct SharedBackend {
    pub device: Arc<Device>,
}

impl SharedBackend {
    pub fn new() -> Self {
        Self {
            device: Device::new("cpu:0"),
        }
    }
}

impl Backend for SharedBackend {
    fn request_device(&self, _id: &str) -> machine_learning::Result<Arc<Device>> {
        Ok(self.device.clone())
    }
}

/// Collects events until `done` accepts one, that event included.
pub async fn events_until(
    handle: &mut WorkerHandle,
    mut done: impl FnMut(&Event) -> bool,
) -> Vec<Event> {
    let mut events = Vec::new();

    while let Some(event) = handle.next_event().await {
        let last = done(&event);
        events.push(event);

        if last {
            return events;
        }
    }

    panic!("worker exited early, got {events:?}");
}

pub async fn init(handle: &mut WorkerHandle, spec: TrainingSpec) -> Vec<Event> {
    handle.send(Command::Init(spec)).await.unwrap();
    events_until(handle, |e| {
        matches!(
            e,
            Event::State(WorkerState::Ready) | Event::State(WorkerState::Failed)
        )
    })
    .await
}

/// Runs a session to its terminal event.
pub async fn train(handle: &mut WorkerHandle) -> Vec<Event> {
    handle.send(Command::Start).await.unwrap();
    events_until(handle, Event::is_terminal).await
}

pub fn states(events: &[Event]) -> Vec<WorkerState> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::State(state) => Some(*state),
            _ => None,
        })
        .collect()
}

pub fn progress_epochs(events: &[Event]) -> Vec<usize> {
    let mut epochs: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            Event::Progress(p) => Some(p.epoch),
            _ => None,
        })
        .collect();

    epochs.dedup();
    epochs
}
