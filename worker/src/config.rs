use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use comms::specs::{BaseWeightsSpec, DatasetSpec, TrainingSpec};
use machine_learning::AdapterDims;

use crate::{Result, WorkerErr};

/// Immutable configuration of one training session, validated from a `TrainingSpec`.
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub model_id: String,
    pub task: String,
    pub capabilities: Vec<String>,
    pub epochs: NonZeroUsize,
    pub batch_size: NonZeroUsize,
    pub learning_rate: f32,
    pub alpha: f32,
    /// Layers the adapter targets, only carried as metadata.
    pub target_layers: Vec<String>,
    pub device_id: String,
    pub compute_device: String,
    pub server_endpoint: Option<String>,
    pub discovery_endpoint: Option<String>,
    pub dims: AdapterDims,
    pub dataset: DatasetSpec,
    pub base_weights: BaseWeightsSpec,
    pub seed: Option<u64>,
    pub telemetry_interval: NonZeroUsize,
    pub keep_checkpoints: Option<NonZeroUsize>,
}

impl TrainingConfig {
    /// Validates `spec` into a `TrainingConfig`.
    ///
    /// # Returns
    /// `InvalidConfig` if any field can't drive a session.
    pub fn from_spec(spec: TrainingSpec) -> Result<Self> {
        if !spec.learning_rate.is_finite() || spec.learning_rate <= 0. {
            return Err(WorkerErr::InvalidConfig(format!(
                "learning rate must be positive and finite, got {}",
                spec.learning_rate
            )));
        }

        if !spec.alpha.is_finite() {
            return Err(WorkerErr::InvalidConfig(format!(
                "alpha must be finite, got {}",
                spec.alpha
            )));
        }

        for (name, value) in [("model_id", &spec.model_id), ("device_id", &spec.device_id)] {
            if !is_path_safe(value) {
                return Err(WorkerErr::InvalidConfig(format!(
                    "{name} '{value}' must be a non-empty single path segment"
                )));
            }
        }

        Ok(Self {
            dims: AdapterDims::new(spec.input_size, spec.output_size, spec.rank),
            model_id: spec.model_id,
            task: spec.task,
            capabilities: spec.capabilities,
            epochs: spec.epochs,
            batch_size: spec.batch_size,
            learning_rate: spec.learning_rate,
            alpha: spec.alpha,
            target_layers: spec.target_layers,
            device_id: spec.device_id,
            compute_device: spec.compute_device,
            server_endpoint: spec.server_endpoint,
            discovery_endpoint: spec.discovery_endpoint,
            dataset: spec.dataset,
            base_weights: spec.base_weights,
            seed: spec.seed,
            telemetry_interval: spec.telemetry_interval,
            keep_checkpoints: spec.keep_checkpoints,
        })
    }

    /// The effective adapter scale, `alpha / rank`.
    pub fn scale(&self) -> f32 {
        self.alpha / self.dims.rank() as f32
    }

    /// The checkpoint directory of this session under `root`.
    pub fn checkpoint_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.model_id).join(&self.device_id)
    }
}

fn is_path_safe(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\'])
}
