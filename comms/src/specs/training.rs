use std::{num::NonZeroUsize, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Where a worker reads its private training samples from.
///
/// Every sample is a row of `input_size + output_size` floats, the input followed
/// by the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetSpec {
    /// Rows laid out contiguously.
    Inline { data: Vec<f32> },
    /// A local CSV file, one row per line.
    Local { path: PathBuf },
    /// Generated from a seeded random linear map plus noise.
    Synthetic { samples: NonZeroUsize, seed: u64 },
}

/// Where the frozen base weights come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseWeightsSpec {
    /// Drawn from a seeded normal distribution, identical on every node sharing the seed.
    Seeded { seed: u64 },
    /// `output_size × input_size` row-major weights.
    Inline { data: Vec<f32> },
}

impl Default for BaseWeightsSpec {
    fn default() -> Self {
        Self::Seeded { seed: 0 }
    }
}

/// Wire-level training configuration sent inside an `Init` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSpec {
    /// Identifier of the base model being adapted.
    pub model_id: String,
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub epochs: NonZeroUsize,
    pub batch_size: NonZeroUsize,
    pub learning_rate: f32,
    /// Inner dimension of the adapter matrices.
    pub rank: NonZeroUsize,
    /// Adapter scaling numerator, the effective scale is `alpha / rank`.
    #[serde(default = "default_alpha")]
    pub alpha: f32,
    #[serde(default)]
    pub target_layers: Vec<String>,
    /// Stable identifier of this node, generated externally.
    pub device_id: String,
    /// Compute device selector, e.g. `cpu` or `cpu:0`.
    #[serde(default = "default_compute_device")]
    pub compute_device: String,
    #[serde(default)]
    pub server_endpoint: Option<String>,
    #[serde(default)]
    pub discovery_endpoint: Option<String>,
    pub input_size: NonZeroUsize,
    pub output_size: NonZeroUsize,
    pub dataset: DatasetSpec,
    #[serde(default)]
    pub base_weights: BaseWeightsSpec,
    /// Seed for the adapter initialization, random when missing.
    #[serde(default)]
    pub seed: Option<u64>,
    /// A telemetry report is sent every `telemetry_interval` batches.
    #[serde(default = "default_telemetry_interval")]
    pub telemetry_interval: NonZeroUsize,
    /// Keep at most this many epoch checkpoints, all of them when missing.
    #[serde(default)]
    pub keep_checkpoints: Option<NonZeroUsize>,
}

fn default_alpha() -> f32 {
    1.0
}

fn default_compute_device() -> String {
    "cpu".into()
}

fn default_telemetry_interval() -> NonZeroUsize {
    NonZeroUsize::new(10).unwrap_or(NonZeroUsize::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_fields_take_defaults() {
        let json = r#"{
            "model_id": "tiny",
            "epochs": 3,
            "batch_size": 8,
            "learning_rate": 0.01,
            "rank": 4,
            "device_id": "node-a",
            "input_size": 16,
            "output_size": 8,
            "dataset": { "synthetic": { "samples": 64, "seed": 7 } }
        }"#;

        let spec: TrainingSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.alpha, 1.0);
        assert_eq!(spec.compute_device, "cpu");
        assert_eq!(spec.telemetry_interval.get(), 10);
        assert_eq!(spec.base_weights, BaseWeightsSpec::Seeded { seed: 0 });
        assert!(spec.server_endpoint.is_none());
        assert!(spec.keep_checkpoints.is_none());
    }

    #[test]
    fn zero_epochs_is_rejected() {
        let json = r#"{
            "model_id": "tiny", "epochs": 0, "batch_size": 8, "learning_rate": 0.01,
            "rank": 4, "device_id": "node-a", "input_size": 16, "output_size": 8,
            "dataset": { "inline": { "data": [] } }
        }"#;

        assert!(serde_json::from_str::<TrainingSpec>(json).is_err());
    }
}
