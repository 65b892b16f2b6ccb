use std::{collections::HashMap, sync::Arc};

use log::debug;

use crate::{MlErr, Result, device::Device};

const F32_SIZE: usize = size_of::<f32>();

/// How a buffer may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// Bound read-only by kernels, written only at creation.
    Storage,
    /// Bound by kernels and updated through queued writes.
    StorageReadWrite,
    /// Destination of copies, mapped back to the host.
    MapRead,
}

/// An opaque reference to a buffer living in a `BufferArena`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(u64);

#[derive(Debug)]
struct Buffer {
    label: String,
    usage: BufferUsage,
    data: Box<[f32]>,
}

impl Buffer {
    fn require(&self, usage: BufferUsage, op: &'static str) -> Result<()> {
        if self.usage != usage {
            return Err(MlErr::InvalidUsage {
                label: self.label.clone(),
                usage: self.usage,
                op,
            });
        }

        Ok(())
    }
}

/// Owns every device-resident buffer of a session.
///
/// Writes are queued and only become visible after `flush`, copies flush the queue
/// first. Every buffer still alive when the arena is dropped is destroyed.
#[derive(Debug)]
pub struct BufferArena {
    device: Arc<Device>,
    next_id: u64,
    buffers: HashMap<BufferHandle, Buffer>,
    pending: Vec<(BufferHandle, Vec<f32>)>,
}

impl BufferArena {
    /// Creates a new empty `BufferArena` on `device`.
    pub fn new(device: Arc<Device>) -> Self {
        Self {
            device,
            next_id: 0,
            buffers: HashMap::new(),
            pending: Vec::new(),
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Allocates a new buffer.
    ///
    /// # Arguments
    /// * `label` - A name for diagnostics.
    /// * `size_bytes` - The buffer size, must be a multiple of 4.
    /// * `usage` - How the buffer may be used.
    /// * `initial_data` - Optional contents for the start of the buffer, the rest is zeroed.
    ///
    /// # Returns
    /// A handle to the new buffer.
    pub fn allocate(
        &mut self,
        label: &str,
        size_bytes: usize,
        usage: BufferUsage,
        initial_data: Option<&[f32]>,
    ) -> Result<BufferHandle> {
        self.device.check()?;

        if size_bytes % F32_SIZE != 0 {
            return Err(MlErr::InvalidSize {
                label: label.to_string(),
                size_bytes,
            });
        }

        let len = size_bytes / F32_SIZE;
        let mut data = vec![0.; len].into_boxed_slice();

        if let Some(init) = initial_data {
            if init.len() > len {
                return Err(MlErr::ShapeMismatch {
                    what: "initial buffer data",
                    got: init.len(),
                    expected: len,
                });
            }

            data[..init.len()].copy_from_slice(init);
        }

        let handle = BufferHandle(self.next_id);
        self.next_id += 1;

        self.device.track_alloc(size_bytes);
        self.buffers.insert(
            handle,
            Buffer {
                label: label.to_string(),
                usage,
                data,
            },
        );

        debug!(label = label, size_bytes = size_bytes, handle = handle.0; "allocated buffer");
        Ok(handle)
    }

    /// Binds a storage buffer for reading by a kernel.
    pub fn read(&self, handle: BufferHandle) -> Result<&[f32]> {
        self.device.check()?;

        let buffer = self.get(handle)?;
        if buffer.usage == BufferUsage::MapRead {
            return Err(MlErr::InvalidUsage {
                label: buffer.label.clone(),
                usage: buffer.usage,
                op: "binding",
            });
        }

        Ok(&buffer.data)
    }

    /// Queues a full overwrite of a read-write buffer, applied on the next `flush`.
    pub fn queue_write(&mut self, handle: BufferHandle, data: Vec<f32>) -> Result<()> {
        self.device.check()?;

        let buffer = self.get(handle)?;
        buffer.require(BufferUsage::StorageReadWrite, "writes")?;

        if buffer.data.len() != data.len() {
            return Err(MlErr::ShapeMismatch {
                what: "buffer write",
                got: data.len(),
                expected: buffer.data.len(),
            });
        }

        self.pending.push((handle, data));
        Ok(())
    }

    /// Applies every queued write in submission order.
    pub fn flush(&mut self) -> Result<()> {
        self.device.check()?;

        for (handle, data) in self.pending.drain(..) {
            let Some(buffer) = self.buffers.get_mut(&handle) else {
                return Err(MlErr::BufferDestroyed { handle: handle.0 });
            };

            buffer.data.copy_from_slice(&data);
        }

        Ok(())
    }

    /// Copies `src` into a new map-read staging buffer after flushing pending writes.
    pub fn copy_to_staging(&mut self, src: BufferHandle) -> Result<BufferHandle> {
        self.flush()?;

        let buffer = self.get(src)?;
        let label = format!("{}-staging", buffer.label);
        let data = buffer.data.to_vec();

        self.allocate(
            &label,
            data.len() * F32_SIZE,
            BufferUsage::MapRead,
            Some(&data),
        )
    }

    /// Maps a staging buffer back to the host.
    ///
    /// # Returns
    /// A freshly allocated copy of its contents.
    pub fn map_read(&self, handle: BufferHandle) -> Result<Vec<f32>> {
        self.device.check()?;

        let buffer = self.get(handle)?;
        buffer.require(BufferUsage::MapRead, "mapping")?;
        Ok(buffer.data.to_vec())
    }

    /// Releases a buffer, destroying an already destroyed buffer does nothing.
    pub fn destroy(&mut self, handle: BufferHandle) {
        if let Some(buffer) = self.buffers.remove(&handle) {
            self.pending.retain(|(h, _)| *h != handle);
            self.device.track_free(buffer.data.len() * F32_SIZE);
            debug!(label = buffer.label.as_str(), handle = handle.0; "destroyed buffer");
        }
    }

    /// Releases every buffer in the arena.
    pub fn destroy_all(&mut self) {
        let handles: Vec<_> = self.buffers.keys().copied().collect();
        handles.into_iter().for_each(|handle| self.destroy(handle));
    }

    /// The amount of buffers alive in this arena.
    pub fn live(&self) -> usize {
        self.buffers.len()
    }

    fn get(&self, handle: BufferHandle) -> Result<&Buffer> {
        self.buffers
            .get(&handle)
            .ok_or(MlErr::BufferDestroyed { handle: handle.0 })
    }
}

impl Drop for BufferArena {
    fn drop(&mut self) {
        self.destroy_all();
    }
}
