//! Backend seam: device memory, command queues, compiled kernels and events.
//!
//! The core never talks to an accelerator API directly. Backends implement
//! these object-safe traits and the variables and dispatch groups drive them.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::DeviceInfo;
use crate::error::Result;
use crate::geometry::NdRange;
use crate::status::DeviceResult;
use crate::types::{AccessMode, BufferKind};

/// An allocated device-memory object.
pub trait DeviceMemory: Send + Sync + fmt::Debug {
    /// Size in bytes.
    fn size(&self) -> usize;

    /// What kind of memory object this is.
    fn kind(&self) -> BufferKind;

    /// Width, height and depth for images.
    fn image_extent(&self) -> Option<[usize; 3]> {
        None
    }

    /// Downcast hook for backends.
    fn as_any(&self) -> &dyn Any;
}

/// Handle to an enqueued command.
pub trait EventHandle: Send + Sync + fmt::Debug {
    /// Block until the command has completed.
    fn wait(&self) -> DeviceResult;

    /// Whether the command has completed.
    fn is_complete(&self) -> bool;

    /// Downcast hook for backends.
    fn as_any(&self) -> &dyn Any;
}

/// Shared event handle.
pub type Event = Arc<dyn EventHandle>;

/// A compiled kernel with bindable arguments.
pub trait CompiledKernel: Send + Sync {
    /// Entry point name.
    fn function_name(&self) -> String;

    /// Type name and argument name of argument `index`, when the backend knows them.
    fn arg_info(&self, index: u32) -> Option<(String, String)>;

    /// Bind raw bytes by value.
    fn set_arg_value(&mut self, index: u32, bytes: &[u8]) -> DeviceResult;

    /// Bind a device-memory object.
    fn set_arg_memory(&mut self, index: u32, memory: &Arc<dyn DeviceMemory>) -> DeviceResult;

    /// Downcast hook for backends.
    fn as_any(&self) -> &dyn Any;
}

/// Ordered, asynchronous execution channel to a device.
///
/// Enqueue calls return once the command is queued; `finish` is the only
/// call that waits for the device. Reads always complete before returning
/// because the destination slice is borrowed for the call only.
pub trait CommandQueue: Send + Sync {
    /// Copy `data` into `memory` starting at byte `offset`.
    fn write_buffer(
        &self,
        memory: &dyn DeviceMemory,
        blocking: bool,
        offset: usize,
        data: &[u8],
    ) -> DeviceResult;

    /// Copy `data.len()` bytes out of `memory` starting at byte `offset`.
    fn read_buffer(&self, memory: &dyn DeviceMemory, offset: usize, data: &mut [u8])
        -> DeviceResult;

    /// Write an image region starting at the origin.
    fn write_image(
        &self,
        memory: &dyn DeviceMemory,
        blocking: bool,
        region: [usize; 3],
        data: &[u8],
    ) -> DeviceResult;

    /// Read an image region starting at the origin.
    fn read_image(&self, memory: &dyn DeviceMemory, region: [usize; 3], data: &mut [u8])
        -> DeviceResult;

    /// Fill an image region with a single RGBA colour.
    fn fill_image(&self, memory: &dyn DeviceMemory, color: [u32; 4], region: [usize; 3])
        -> DeviceResult;

    /// Enqueue a kernel launch.
    fn enqueue_kernel(
        &self,
        kernel: &dyn CompiledKernel,
        global: &NdRange,
        local: Option<&NdRange>,
        wait_list: &[Event],
    ) -> DeviceResult<Event>;

    /// Insert a barrier after all previously enqueued commands.
    fn barrier(&self) -> DeviceResult;

    /// Submit queued commands to the device.
    fn flush(&self) -> DeviceResult;

    /// Block until every enqueued command has completed.
    fn finish(&self) -> DeviceResult;
}

/// A device and its context.
pub trait DeviceContext: Send + Sync {
    /// Capability snapshot of the device.
    fn device_info(&self) -> DeviceInfo;

    /// Allocate a device buffer.
    fn create_buffer(&self, access: AccessMode, size: usize) -> DeviceResult<Arc<dyn DeviceMemory>>;

    /// Create a new in-order command queue.
    fn create_queue(&self) -> DeviceResult<Box<dyn CommandQueue>>;

    /// Compile `source` and create the kernel named `entry_point`.
    fn build_kernel(&self, source: &str, entry_point: &str) -> Result<Box<dyn CompiledKernel>>;
}

/// Lazily created, exclusively owned device-memory handle of one variable.
///
/// The handle lives exactly as long as the slot (and so the owning variable)
/// unless it is explicitly discarded by a resize.
#[derive(Default)]
pub struct MemorySlot {
    handle: Mutex<Option<Arc<dyn DeviceMemory>>>,
}

impl MemorySlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a slot that already holds an externally created object.
    pub fn with_memory(memory: Arc<dyn DeviceMemory>) -> Self {
        Self {
            handle: Mutex::new(Some(memory)),
        }
    }

    /// Current handle, if one was created.
    pub fn get(&self) -> Option<Arc<dyn DeviceMemory>> {
        self.handle.lock().clone()
    }

    /// Whether a handle exists.
    pub fn is_allocated(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Return the handle, creating it on first use.
    ///
    /// An existing handle of the requested size is always reused.
    pub fn get_or_create(
        &self,
        context: &dyn DeviceContext,
        access: AccessMode,
        size: usize,
    ) -> DeviceResult<Arc<dyn DeviceMemory>> {
        let mut handle = self.handle.lock();
        if let Some(existing) = handle.as_ref() {
            if existing.size() == size {
                return Ok(Arc::clone(existing));
            }
            tracing::debug!(
                old = existing.size(),
                new = size,
                "Replacing device memory of different size"
            );
        }

        let memory = context.create_buffer(access, size)?;
        *handle = Some(Arc::clone(&memory));
        Ok(memory)
    }

    /// Drop the handle, returning it if it existed.
    pub fn discard(&self) -> Option<Arc<dyn DeviceMemory>> {
        self.handle.lock().take()
    }
}

impl fmt::Debug for MemorySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySlot")
            .field("size", &self.handle.lock().as_ref().map(|m| m.size()))
            .finish()
    }
}
