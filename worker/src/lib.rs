pub mod builder;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod handle;
mod metrics;
pub mod net;
mod session;
mod state;
pub mod worker;

pub use builder::WorkerBuilder;
pub use checkpoint::{Checkpoint, CheckpointMeta, CheckpointStore};
pub use config::TrainingConfig;
pub use error::{Result, WorkerErr};
pub use handle::WorkerHandle;
pub use worker::Worker;
