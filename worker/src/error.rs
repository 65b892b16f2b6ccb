use std::{error::Error, fmt, io, path::PathBuf};

use comms::{
    FrameErr,
    specs::{ErrorKind, ErrorReport, WorkerState},
};
use machine_learning::MlErr;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures.
#[derive(Debug)]
pub enum WorkerErr {
    Ml(MlErr),
    Frame(FrameErr),
    Storage(io::Error),
    CheckpointCorrupt {
        path: PathBuf,
        reason: String,
    },
    AlreadyRunning,
    InvalidState {
        command: &'static str,
        state: WorkerState,
    },
    InvalidConfig(String),
    Upload(String),
    Telemetry(String),
    ChannelClosed,
    Internal(String),
}

impl WorkerErr {
    /// The classification reported to the supervisor.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerErr::Ml(e) => match e {
                MlErr::DeviceUnavailable { .. } => ErrorKind::DeviceUnavailable,
                MlErr::DeviceLost { .. } => ErrorKind::DeviceLost,
                MlErr::ShapeMismatch { .. } => ErrorKind::ShapeMismatch,
                MlErr::Dataset(_) | MlErr::InvalidDistribution(_) => ErrorKind::InvalidConfig,
                MlErr::BufferDestroyed { .. }
                | MlErr::InvalidUsage { .. }
                | MlErr::InvalidSize { .. } => ErrorKind::Internal,
            },
            WorkerErr::Frame(e) => match e {
                FrameErr::FrameTooShort { .. } => ErrorKind::FrameTooShort,
                FrameErr::SizeOverflow { .. } => ErrorKind::SizeOverflow,
                FrameErr::LengthMismatch { .. } => ErrorKind::ShapeMismatch,
                FrameErr::InvalidHeader(_) => ErrorKind::InvalidHeader,
            },
            WorkerErr::Storage(_) => ErrorKind::Storage,
            WorkerErr::CheckpointCorrupt { .. } => ErrorKind::CheckpointCorrupt,
            WorkerErr::AlreadyRunning => ErrorKind::AlreadyRunning,
            WorkerErr::InvalidState { .. } => ErrorKind::InvalidState,
            WorkerErr::InvalidConfig(_) => ErrorKind::InvalidConfig,
            WorkerErr::Upload(_) => ErrorKind::Upload,
            WorkerErr::Telemetry(_) => ErrorKind::Telemetry,
            WorkerErr::ChannelClosed | WorkerErr::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Builds the payload of an `Error` event.
    pub fn report(&self, fatal: bool) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
            fatal,
        }
    }
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Ml(e) => write!(f, "{e}"),
            WorkerErr::Frame(e) => write!(f, "frame error: {e}"),
            WorkerErr::Storage(e) => write!(f, "storage error: {e}"),
            WorkerErr::CheckpointCorrupt { path, reason } => {
                write!(f, "checkpoint {} is corrupt: {reason}", path.display())
            }
            WorkerErr::AlreadyRunning => write!(f, "a training session is already running"),
            WorkerErr::InvalidState { command, state } => {
                write!(f, "can't handle {command} while in state {state:?}")
            }
            WorkerErr::InvalidConfig(e) => write!(f, "invalid training config: {e}"),
            WorkerErr::Upload(e) => write!(f, "upload failed: {e}"),
            WorkerErr::Telemetry(e) => write!(f, "telemetry failed: {e}"),
            WorkerErr::ChannelClosed => write!(f, "the worker channel was closed"),
            WorkerErr::Internal(e) => write!(f, "internal error: {e}"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Ml(e) => Some(e),
            WorkerErr::Frame(e) => Some(e),
            WorkerErr::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MlErr> for WorkerErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

impl From<FrameErr> for WorkerErr {
    fn from(value: FrameErr) -> Self {
        Self::Frame(value)
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Storage(value)
    }
}

impl From<reqwest::Error> for WorkerErr {
    fn from(value: reqwest::Error) -> Self {
        Self::Upload(value.to_string())
    }
}

impl From<tokio::task::JoinError> for WorkerErr {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Internal(format!("compute task failed: {value}"))
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Storage(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        let lost = WorkerErr::from(MlErr::DeviceLost { id: "cpu".into() });
        assert_eq!(lost.kind(), ErrorKind::DeviceLost);

        let short = WorkerErr::from(FrameErr::FrameTooShort { needed: 4, got: 2 });
        assert_eq!(short.kind(), ErrorKind::FrameTooShort);

        let header = serde_json::from_str::<comms::Metadata>("{").unwrap_err();
        let header = WorkerErr::from(FrameErr::InvalidHeader(header));
        assert_eq!(header.kind(), ErrorKind::InvalidHeader);

        assert_eq!(WorkerErr::Telemetry("down".into()).kind(), ErrorKind::Telemetry);
        assert_eq!(WorkerErr::Upload("down".into()).kind(), ErrorKind::Upload);

        let report = WorkerErr::AlreadyRunning.report(false);
        assert_eq!(report.kind, ErrorKind::AlreadyRunning);
        assert!(!report.fatal);
    }
}
