use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Sub-phase of the `Training` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingPhase {
    Batches,
    Checkpointing,
}

/// The worker's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Initializing,
    Ready,
    Training(TrainingPhase),
    Completed,
    Stopped,
    Failed,
}

impl WorkerState {
    /// Returns `true` if the state is `Training`, in any of its phases.
    pub fn is_training(&self) -> bool {
        matches!(self, WorkerState::Training(_))
    }

    /// Returns `true` if a session ended in this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerState::Completed | WorkerState::Stopped | WorkerState::Failed
        )
    }
}

/// A snapshot of the training progress, produced every batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingProgress {
    pub epoch: usize,
    pub total_epochs: usize,
    pub batch: usize,
    pub total_batches: usize,
    pub loss: f32,
    /// Samples per second of the last batch.
    pub throughput: f32,
}

/// The classification of every error a worker reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DeviceUnavailable,
    DeviceLost,
    ShapeMismatch,
    FrameTooShort,
    InvalidHeader,
    SizeOverflow,
    AlreadyRunning,
    CheckpointCorrupt,
    InvalidState,
    InvalidConfig,
    Storage,
    Upload,
    Telemetry,
    Internal,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::DeviceUnavailable => "device unavailable",
            ErrorKind::DeviceLost => "device lost",
            ErrorKind::ShapeMismatch => "shape mismatch",
            ErrorKind::FrameTooShort => "frame too short",
            ErrorKind::InvalidHeader => "invalid header",
            ErrorKind::SizeOverflow => "size overflow",
            ErrorKind::AlreadyRunning => "already running",
            ErrorKind::CheckpointCorrupt => "checkpoint corrupt",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::InvalidConfig => "invalid config",
            ErrorKind::Storage => "storage",
            ErrorKind::Upload => "upload",
            ErrorKind::Telemetry => "telemetry",
            ErrorKind::Internal => "internal",
        };

        f.write_str(s)
    }
}

/// The payload of an `Error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    /// `true` if the error ended the current session.
    pub fatal: bool,
}

/// The answer to a `Status` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: WorkerState,
    pub progress: Option<TrainingProgress>,
    pub latest_checkpoint: Option<usize>,
}

/// Everything a worker tells its supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    State(WorkerState),
    Progress(TrainingProgress),
    Status(StatusReport),
    Error(ErrorReport),
    /// Terminal success event carrying the encoded delta frame.
    ///
    /// Travels as raw bytes on the wire instead of JSON.
    #[serde(skip)]
    Completed(Vec<u8>),
}

impl Event {
    /// Returns `true` if this event ends a session.
    pub fn is_terminal(&self) -> bool {
        match self {
            Event::Completed(_) => true,
            Event::Error(report) => report.fatal,
            Event::State(state) => *state == WorkerState::Stopped,
            _ => false,
        }
    }
}
