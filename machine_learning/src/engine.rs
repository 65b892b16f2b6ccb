use std::sync::Arc;

use log::debug;
use ndarray::{Array2, ArrayView2, Axis, parallel::prelude::*, s};

use crate::{
    MlErr, Result,
    adapter::{Adapter, AdapterDims},
    arena::{BufferArena, BufferHandle, BufferUsage},
    device::Device,
    kernels::{self, Mse},
};

const F32_SIZE: usize = size_of::<f32>();

/// The outcome of a single training step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchStats {
    /// Mean of the per-sample losses.
    pub loss: f32,
    pub samples: usize,
}

/// Trains one adapter against frozen base weights on a device.
///
/// Owns every buffer of the session: the base weights are read-only, `A` and `B` are
/// updated through queued writes which are applied before the next dispatch or readback.
#[derive(Debug)]
pub struct ComputeEngine {
    arena: BufferArena,
    dims: AdapterDims,
    scale: f32,
    base: BufferHandle,
    a: BufferHandle,
    b: BufferHandle,
}

impl ComputeEngine {
    /// Creates a new `ComputeEngine`, uploading the base weights and the adapter.
    ///
    /// # Arguments
    /// * `device` - The device to allocate every buffer on.
    /// * `base_weights` - The frozen `output_size × input_size` weights.
    /// * `adapter` - The starting adapter.
    /// * `scale` - The adapter scaling factor.
    pub fn new(
        device: Arc<Device>,
        base_weights: &[f32],
        adapter: &Adapter,
        scale: f32,
    ) -> Result<Self> {
        let dims = adapter.dims();

        if base_weights.len() != dims.base_len() {
            return Err(MlErr::ShapeMismatch {
                what: "base weights",
                got: base_weights.len(),
                expected: dims.base_len(),
            });
        }

        // The arena releases whatever was already allocated if a later allocation fails.
        let mut arena = BufferArena::new(device);

        let base = arena.allocate(
            "base-weights",
            base_weights.len() * F32_SIZE,
            BufferUsage::Storage,
            Some(base_weights),
        )?;
        let a = arena.allocate(
            "adapter-a",
            dims.a_len() * F32_SIZE,
            BufferUsage::StorageReadWrite,
            Some(adapter.a()),
        )?;
        let b = arena.allocate(
            "adapter-b",
            dims.b_len() * F32_SIZE,
            BufferUsage::StorageReadWrite,
            Some(adapter.b()),
        )?;

        Ok(Self {
            arena,
            dims,
            scale,
            base,
            a,
            b,
        })
    }

    pub fn dims(&self) -> AdapterDims {
        self.dims
    }

    pub fn device(&self) -> &Arc<Device> {
        self.arena.device()
    }

    /// Runs the forward pass for a single input.
    pub fn forward(&mut self, x: &[f32]) -> Result<Vec<f32>> {
        self.arena.flush()?;

        let (w, a, b) = self.views()?;
        let x = ndarray::aview1(x);
        let out = kernels::forward(x, w, a, b, self.scale)?;
        Ok(out.to_vec())
    }

    /// Runs one gradient descent step over `batch`.
    ///
    /// # Arguments
    /// * `batch` - Rows of `input_size` inputs followed by `output_size` targets.
    /// * `lr` - The learning rate.
    ///
    /// # Returns
    /// The batch loss before the update.
    pub fn train_batch(&mut self, batch: ArrayView2<f32>, lr: f32) -> Result<BatchStats> {
        let row_len = self.dims.row_len();
        if batch.ncols() != row_len {
            return Err(MlErr::ShapeMismatch {
                what: "batch row",
                got: batch.ncols(),
                expected: row_len,
            });
        }

        let samples = batch.nrows();
        if samples == 0 {
            return Ok(BatchStats { loss: 0., samples });
        }

        self.arena.flush()?;

        let input = self.dims.input();
        let scale = self.scale;
        let (w, a, b) = self.views()?;

        let (loss, grad_a, grad_b) = batch
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|row| {
                let x = row.slice(s![..input]);
                let y = row.slice(s![input..]);

                let y_pred = kernels::forward(x, w, a, b, scale)?;
                let loss = Mse.loss(y_pred.view(), y);
                let grad_out = Mse.loss_prime(y_pred.view(), y);
                let (grad_a, grad_b) = kernels::backward(x, grad_out.view(), a, b, lr)?;

                Ok::<_, MlErr>((loss, grad_a, grad_b))
            })
            .try_reduce(
                || (0., Array2::zeros(a.raw_dim()), Array2::zeros(b.raw_dim())),
                |(l1, a1, b1), (l2, a2, b2)| Ok((l1 + l2, a1 + &a2, b1 + &b2)),
            )?;

        let n = samples as f32;
        let new_a = &a - &(grad_a / n);
        let new_b = &b - &(grad_b / n);

        self.arena.queue_write(self.a, new_a.into_raw_vec_and_offset().0)?;
        self.arena.queue_write(self.b, new_b.into_raw_vec_and_offset().0)?;

        let loss = loss / n;
        debug!(samples = samples, loss = loss; "trained batch");

        Ok(BatchStats { loss, samples })
    }

    /// Reads back the current adapter.
    ///
    /// Pending writes are flushed first and the returned matrices are host copies.
    pub fn extract(&mut self) -> Result<Adapter> {
        let a = self.read_back(self.a)?;
        let b = self.read_back(self.b)?;
        Adapter::new(self.dims, a, b)
    }

    /// Destroys every buffer owned by the engine.
    pub fn release(&mut self) {
        self.arena.destroy_all();
    }

    fn read_back(&mut self, handle: BufferHandle) -> Result<Vec<f32>> {
        let staging = self.arena.copy_to_staging(handle)?;
        let data = self.arena.map_read(staging);
        self.arena.destroy(staging);
        data
    }

    fn views(&self) -> Result<(ArrayView2<'_, f32>, ArrayView2<'_, f32>, ArrayView2<'_, f32>)> {
        let dims = self.dims;

        let w = kernels::view2(
            "base weights",
            self.arena.read(self.base)?,
            dims.output(),
            dims.input(),
        )?;
        let a = kernels::view2("adapter A", self.arena.read(self.a)?, dims.output(), dims.rank())?;
        let b = kernels::view2("adapter B", self.arena.read(self.b)?, dims.rank(), dims.input())?;

        Ok((w, a, b))
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{dataset::Dataset, init};

    fn dims(input: usize, output: usize, rank: usize) -> AdapterDims {
        let nz = |n| NonZeroUsize::new(n).unwrap();
        AdapterDims::new(nz(input), nz(output), nz(rank))
    }

    #[test]
    fn forward_uses_base_and_adapter() {
        let dims = dims(2, 1, 1);
        let adapter = Adapter::new(dims, vec![2.0], vec![1.0, 1.0]).unwrap();
        let mut engine =
            ComputeEngine::new(Device::new("cpu"), &[1.0, -1.0], &adapter, 0.5).unwrap();

        // 1·3 - 1·1 + 0.5 · 2 · (3 + 1)
        assert_eq!(engine.forward(&[3.0, 1.0]).unwrap(), [6.0]);
    }

    #[test]
    fn single_sample_step_matches_kernels() {
        let dims = dims(2, 1, 1);
        let adapter = Adapter::new(dims, vec![1.0], vec![0.5, 0.5]).unwrap();
        let mut engine =
            ComputeEngine::new(Device::new("cpu"), &[0.0, 0.0], &adapter, 1.0).unwrap();

        // y_pred = 1.5, target = 0.5, g = 2, B·x = 1.5, Aᵀ·g = 2
        let batch = ndarray::arr2(&[[1.0, 2.0, 0.5]]);
        let stats = engine.train_batch(batch.view(), 0.1).unwrap();
        assert_eq!(stats.samples, 1);
        assert!((stats.loss - 1.0).abs() < 1e-6);

        let trained = engine.extract().unwrap();
        assert!((trained.a()[0] - 0.7).abs() < 1e-6);
        assert!((trained.b()[0] - 0.3).abs() < 1e-6);
        assert!((trained.b()[1] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn loss_decreases() {
        let dims = dims(8, 4, 2);
        let mut rng = StdRng::seed_from_u64(1);
        let adapter = init::init_adapter(&mut rng, dims).unwrap();
        let base = vec![0.; dims.base_len()];
        let dataset = Dataset::synthetic(64, 5, 8, 4).unwrap();

        let mut engine = ComputeEngine::new(Device::new("cpu"), &base, &adapter, 1.0).unwrap();

        let epoch_loss = |engine: &mut ComputeEngine| {
            dataset
                .batches(8)
                .map(|batch| engine.train_batch(batch, 0.05).unwrap().loss)
                .sum::<f32>()
        };

        let first = epoch_loss(&mut engine);
        for _ in 0..20 {
            epoch_loss(&mut engine);
        }
        let last = epoch_loss(&mut engine);

        assert!(last < first, "{last} >= {first}");
    }

    #[test]
    fn extract_returns_copies() {
        let dims = dims(2, 2, 1);
        let adapter = Adapter::new(dims, vec![1.0, 2.0], vec![0.0, 0.0]).unwrap();
        let mut engine = ComputeEngine::new(Device::new("cpu"), &[0.; 4], &adapter, 1.0).unwrap();

        let (mut a, _) = engine.extract().unwrap().into_parts();
        a[0] = 42.0;

        assert_eq!(engine.extract().unwrap(), adapter);
        assert_eq!(engine.device().live_buffers(), 3);
    }

    #[test]
    fn wrong_row_width_is_rejected() {
        let dims = dims(2, 1, 1);
        let adapter = Adapter::new(dims, vec![1.0], vec![0.0, 0.0]).unwrap();
        let mut engine = ComputeEngine::new(Device::new("cpu"), &[0.; 2], &adapter, 1.0).unwrap();

        let batch = ndarray::arr2(&[[1.0, 2.0]]);
        assert!(matches!(
            engine.train_batch(batch.view(), 0.1),
            Err(MlErr::ShapeMismatch { what: "batch row", .. })
        ));
    }
}
