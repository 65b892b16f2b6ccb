use std::{
    error::Error,
    fmt::{self, Display},
};

use crate::arena::BufferUsage;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    DeviceUnavailable {
        id: String,
    },
    DeviceLost {
        id: String,
    },
    ShapeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    BufferDestroyed {
        handle: u64,
    },
    InvalidUsage {
        label: String,
        usage: BufferUsage,
        op: &'static str,
    },
    InvalidSize {
        label: String,
        size_bytes: usize,
    },
    InvalidDistribution(String),
    Dataset(String),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::DeviceUnavailable { id } => write!(f, "no compute device matches '{id}'"),
            MlErr::DeviceLost { id } => write!(f, "compute device '{id}' was lost"),
            MlErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "shape mismatch for {what}: got {got} elements, expected {expected}"
            ),
            MlErr::BufferDestroyed { handle } => {
                write!(f, "buffer {handle} was used after being destroyed")
            }
            MlErr::InvalidUsage { label, usage, op } => {
                write!(f, "buffer '{label}' with usage {usage:?} doesn't allow {op}")
            }
            MlErr::InvalidSize { label, size_bytes } => write!(
                f,
                "buffer '{label}' size of {size_bytes} bytes is not a multiple of 4"
            ),
            MlErr::InvalidDistribution(e) => write!(f, "invalid weight distribution: {e}"),
            MlErr::Dataset(e) => write!(f, "dataset error: {e}"),
        }
    }
}

impl Error for MlErr {}

impl From<rand_distr::NormalError> for MlErr {
    fn from(value: rand_distr::NormalError) -> Self {
        Self::InvalidDistribution(value.to_string())
    }
}

impl From<rand_distr::uniform::Error> for MlErr {
    fn from(value: rand_distr::uniform::Error) -> Self {
        Self::InvalidDistribution(value.to_string())
    }
}
