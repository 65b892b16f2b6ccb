use std::num::NonZeroUsize;

use crate::{MlErr, Result, kernels};

/// The shapes of a single adapted projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterDims {
    pub input_size: NonZeroUsize,
    pub output_size: NonZeroUsize,
    pub rank: NonZeroUsize,
}

impl AdapterDims {
    pub fn new(input_size: NonZeroUsize, output_size: NonZeroUsize, rank: NonZeroUsize) -> Self {
        Self {
            input_size,
            output_size,
            rank,
        }
    }

    pub fn input(&self) -> usize {
        self.input_size.get()
    }

    pub fn output(&self) -> usize {
        self.output_size.get()
    }

    pub fn rank(&self) -> usize {
        self.rank.get()
    }

    /// Elements of `A`, `output_size × rank`.
    pub fn a_len(&self) -> usize {
        self.output() * self.rank()
    }

    /// Elements of `B`, `rank × input_size`.
    pub fn b_len(&self) -> usize {
        self.rank() * self.input()
    }

    /// Elements of the base weights, `output_size × input_size`.
    pub fn base_len(&self) -> usize {
        self.output() * self.input()
    }

    /// Elements of a dataset row, the input followed by the target.
    pub fn row_len(&self) -> usize {
        self.input() + self.output()
    }
}

/// Host-side adapter weights.
#[derive(Debug, Clone, PartialEq)]
pub struct Adapter {
    dims: AdapterDims,
    a: Vec<f32>,
    b: Vec<f32>,
}

impl Adapter {
    /// Creates a new `Adapter`, checking both matrices against `dims`.
    pub fn new(dims: AdapterDims, a: Vec<f32>, b: Vec<f32>) -> Result<Self> {
        if a.len() != dims.a_len() {
            return Err(MlErr::ShapeMismatch {
                what: "adapter A",
                got: a.len(),
                expected: dims.a_len(),
            });
        }

        if b.len() != dims.b_len() {
            return Err(MlErr::ShapeMismatch {
                what: "adapter B",
                got: b.len(),
                expected: dims.b_len(),
            });
        }

        Ok(Self { dims, a, b })
    }

    pub fn dims(&self) -> AdapterDims {
        self.dims
    }

    pub fn a(&self) -> &[f32] {
        &self.a
    }

    pub fn b(&self) -> &[f32] {
        &self.b
    }

    pub fn into_parts(self) -> (Vec<f32>, Vec<f32>) {
        (self.a, self.b)
    }

    /// Computes `self - initial` for both matrices.
    pub fn delta(&self, initial: &Adapter) -> Result<Adapter> {
        let a = kernels::compute_delta(&self.a, &initial.a)?;
        let b = kernels::compute_delta(&self.b, &initial.b)?;
        Adapter::new(self.dims, a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(input: usize, output: usize, rank: usize) -> AdapterDims {
        let nz = |n| NonZeroUsize::new(n).unwrap();
        AdapterDims::new(nz(input), nz(output), nz(rank))
    }

    #[test]
    fn lengths() {
        let dims = dims(16, 8, 4);
        assert_eq!(dims.a_len(), 32);
        assert_eq!(dims.b_len(), 64);
        assert_eq!(dims.base_len(), 128);
        assert_eq!(dims.row_len(), 24);
    }

    #[test]
    fn rejects_wrong_shapes() {
        let dims = dims(3, 2, 1);
        assert!(Adapter::new(dims, vec![0.; 2], vec![0.; 3]).is_ok());
        assert!(matches!(
            Adapter::new(dims, vec![0.; 3], vec![0.; 3]),
            Err(MlErr::ShapeMismatch { what: "adapter A", .. })
        ));
        assert!(matches!(
            Adapter::new(dims, vec![0.; 2], vec![0.; 2]),
            Err(MlErr::ShapeMismatch { what: "adapter B", .. })
        ));
    }

    #[test]
    fn delta_of_each_matrix() {
        let dims = dims(2, 1, 1);
        let initial = Adapter::new(dims, vec![1.0], vec![0.0, 0.0]).unwrap();
        let current = Adapter::new(dims, vec![1.5], vec![0.25, -1.0]).unwrap();

        let delta = current.delta(&initial).unwrap();
        assert_eq!(delta.a(), [0.5]);
        assert_eq!(delta.b(), current.b());
    }
}
