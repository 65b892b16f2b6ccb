use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use log::{info, warn};

use crate::{MlErr, Result};

/// A source of compute devices.
pub trait Backend: Send + Sync {
    /// Acquires the device identified by `id`.
    ///
    /// # Returns
    /// The device or `DeviceUnavailable` if nothing matches `id`.
    fn request_device(&self, id: &str) -> Result<Arc<Device>>;
}

/// A backend executing kernels on the host through the rayon thread pool.
///
/// Accepts the `cpu` and `cpu:<n>` identifiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuBackend;

impl Backend for CpuBackend {
    fn request_device(&self, id: &str) -> Result<Arc<Device>> {
        let valid = match id.split_once(':') {
            None => id == "cpu",
            Some((kind, index)) => kind == "cpu" && index.parse::<usize>().is_ok(),
        };

        if !valid {
            return Err(MlErr::DeviceUnavailable { id: id.to_string() });
        }

        info!(device = id, threads = rayon::current_num_threads(); "acquired compute device");
        Ok(Device::new(id))
    }
}

/// A compute device handle.
///
/// Tracks every buffer allocated on it so leaks can be observed, and can be
/// invalidated at any moment, after which every operation dispatched through it fails
/// with `DeviceLost`.
#[derive(Debug)]
pub struct Device {
    id: String,
    lost: AtomicBool,
    live_buffers: AtomicUsize,
    allocated_bytes: AtomicUsize,
}

impl Device {
    /// Creates a new `Device`.
    ///
    /// # Arguments
    /// * `id` - The device identifier.
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            lost: AtomicBool::new(false),
            live_buffers: AtomicUsize::new(0),
            allocated_bytes: AtomicUsize::new(0),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Invalidates the device.
    pub fn lose(&self) {
        if !self.lost.swap(true, Ordering::AcqRel) {
            warn!(device = self.id.as_str(); "compute device lost");
        }
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    /// Fails with `DeviceLost` if the device was invalidated.
    pub fn check(&self) -> Result<()> {
        if self.is_lost() {
            return Err(MlErr::DeviceLost {
                id: self.id.clone(),
            });
        }

        Ok(())
    }

    /// The amount of buffers currently allocated on this device.
    pub fn live_buffers(&self) -> usize {
        self.live_buffers.load(Ordering::Acquire)
    }

    /// The amount of bytes currently allocated on this device.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes.load(Ordering::Acquire)
    }

    pub(crate) fn track_alloc(&self, bytes: usize) {
        self.live_buffers.fetch_add(1, Ordering::AcqRel);
        self.allocated_bytes.fetch_add(bytes, Ordering::AcqRel);
    }

    pub(crate) fn track_free(&self, bytes: usize) {
        self.live_buffers.fetch_sub(1, Ordering::AcqRel);
        self.allocated_bytes.fetch_sub(bytes, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_backend_ids() {
        let backend = CpuBackend;

        assert_eq!(backend.request_device("cpu").unwrap().id(), "cpu");
        assert_eq!(backend.request_device("cpu:3").unwrap().id(), "cpu:3");

        for id in ["gpu", "cpu:", "cpu:x", "", "webgpu:0"] {
            assert!(matches!(
                backend.request_device(id),
                Err(MlErr::DeviceUnavailable { .. })
            ));
        }
    }

    #[test]
    fn lost_device_fails_checks() {
        let device = Device::new("cpu");
        assert!(device.check().is_ok());

        device.lose();
        device.lose();

        assert!(device.is_lost());
        assert!(matches!(device.check(), Err(MlErr::DeviceLost { .. })));
    }
}
