pub mod adapter;
pub mod aggregate;
pub mod arena;
pub mod dataset;
pub mod device;
pub mod engine;
pub mod error;
pub mod init;
pub mod kernels;

pub use adapter::{Adapter, AdapterDims};
pub use dataset::Dataset;
pub use device::{Backend, CpuBackend, Device};
pub use engine::{BatchStats, ComputeEngine};
pub use error::{MlErr, Result};
