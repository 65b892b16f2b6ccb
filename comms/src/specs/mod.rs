pub mod event;
pub mod training;

pub use event::{
    ErrorKind, ErrorReport, Event, StatusReport, TrainingPhase, TrainingProgress, WorkerState,
};
pub use training::{BaseWeightsSpec, DatasetSpec, TrainingSpec};
