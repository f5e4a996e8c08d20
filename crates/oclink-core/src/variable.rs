//! The device-variable capability set shared by every host value that can
//! travel to and from a device.
//!
//! Variables carry a small amount of shared state ([`VariableState`]) and
//! implement [`DeviceVariable`]. The default `upload` and `download` methods
//! implement the transfer protocol; ring buffers and memory objects override
//! them.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::error::{OclinkError, Result};
use crate::memory::{CommandQueue, DeviceContext, DeviceMemory, MemorySlot};
use crate::status::Status;
use crate::types::{AccessMode, BufferKind};

/// Guard for a variable's device-memory lock. Released on drop.
pub type DeviceMemoryGuard<'a> = MutexGuard<'a, ()>;

/// Name, transfer flags and lock shared by every variable kind.
pub struct VariableState {
    name: String,
    blocking: bool,
    access: AccessMode,
    uploaded: AtomicBool,
    device_lock: Mutex<()>,
}

impl VariableState {
    /// Create state for a variable named `name`. New variables start dirty.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocking: true,
            access: AccessMode::default(),
            uploaded: AtomicBool::new(false),
            device_lock: Mutex::new(()),
        }
    }

    /// Variable name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether transfers wait for completion.
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Set the blocking flag.
    pub fn set_blocking(&mut self, blocking: bool) {
        self.blocking = blocking;
    }

    /// How the device accesses this variable.
    pub fn access(&self) -> AccessMode {
        self.access
    }

    /// Set the access mode.
    pub fn set_access(&mut self, access: AccessMode) {
        self.access = access;
    }

    /// Whether the host value is already reflected on the device.
    pub fn is_uploaded(&self) -> bool {
        self.uploaded.load(Ordering::Acquire)
    }

    /// Mark the host value as changed (`true`) or as synchronized (`false`).
    pub fn set_changed(&self, changed: bool) {
        self.uploaded.store(!changed, Ordering::Release);
    }

    /// Take the device-memory lock.
    pub fn lock_device(&self) -> DeviceMemoryGuard<'_> {
        self.device_lock.lock()
    }

    /// Whether the device-memory lock is currently held.
    pub fn is_device_locked(&self) -> bool {
        self.device_lock.is_locked()
    }

    /// Wrap a failed device status with this variable's name.
    pub fn device_error(&self, status: Status, operation: &str) -> OclinkError {
        OclinkError::device(status, format!("{operation} of variable `{}`", self.name))
    }

    pub(crate) fn duplicate(&self) -> Self {
        Self {
            name: self.name.clone(),
            blocking: self.blocking,
            access: self.access,
            uploaded: AtomicBool::new(false),
            device_lock: Mutex::new(()),
        }
    }
}

impl fmt::Debug for VariableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableState")
            .field("name", &self.name)
            .field("blocking", &self.blocking)
            .field("access", &self.access)
            .field("uploaded", &self.is_uploaded())
            .finish()
    }
}

/// A host value that may need to be transferred to or from device memory.
///
/// Implementations are shared between threads and handed to dispatch groups
/// as `&dyn DeviceVariable`.
pub trait DeviceVariable: Send + Sync {
    /// Shared name, flags and lock.
    fn state(&self) -> &VariableState;

    /// The device-memory handle cell of this variable.
    fn memory_slot(&self) -> &MemorySlot;

    /// Snapshot of the host value as raw bytes.
    fn read_bytes(&self) -> Vec<u8>;

    /// Overwrite the host value from raw bytes.
    fn write_bytes(&self, bytes: &[u8]) -> Result<()>;

    /// Declared size in bytes.
    fn byte_size(&self) -> usize;

    /// Size of one element in bytes.
    fn element_size(&self) -> usize;

    /// Kind of device object backing this variable.
    fn buffer_kind(&self) -> BufferKind;

    /// Whether the variable is bound through a device-memory handle rather than by value.
    fn needs_device_memory(&self) -> bool;

    /// Variable name.
    fn name(&self) -> &str {
        self.state().name()
    }

    /// Access mode.
    fn access(&self) -> AccessMode {
        self.state().access()
    }

    /// Whether the host value is already on the device.
    fn is_uploaded(&self) -> bool {
        self.state().is_uploaded()
    }

    /// Mark the host value as changed or synchronized.
    fn set_changed(&self, changed: bool) {
        self.state().set_changed(changed);
    }

    /// Bytes that the next upload would transfer.
    fn available_bytes(&self) -> usize {
        self.byte_size()
    }

    /// Byte offset at which the next upload starts.
    fn data_offset(&self) -> usize {
        0
    }

    /// Existing device-memory handle, without creating one.
    fn existing_memory(&self) -> Option<Arc<dyn DeviceMemory>> {
        self.memory_slot().get()
    }

    /// Device-memory handle, created on first use.
    ///
    /// Returns `None` for variables bound by value.
    fn device_memory(&self, context: &dyn DeviceContext) -> Result<Option<Arc<dyn DeviceMemory>>> {
        if !self.needs_device_memory() {
            return Ok(None);
        }
        self.memory_slot()
            .get_or_create(context, self.access(), self.byte_size())
            .map(Some)
            .map_err(|status| self.state().device_error(status, "allocation"))
    }

    /// Transfer pending host data to the device.
    ///
    /// Does nothing when the value is already uploaded, no device memory
    /// exists yet, the device only writes the variable, or nothing is
    /// available to send.
    fn upload(&self, queue: &dyn CommandQueue) -> Result<()> {
        if self.is_uploaded() || self.access() == AccessMode::WriteOnly {
            return Ok(());
        }
        let Some(memory) = self.existing_memory() else {
            return Ok(());
        };

        let available = self.available_bytes();
        if available == 0 {
            return Ok(());
        }

        let offset = self.data_offset();
        let end = offset + available;
        if end > self.byte_size() {
            return Err(OclinkError::precondition(format!(
                "upload of `{}` would read bytes {offset}..{end} past its size {}",
                self.name(),
                self.byte_size()
            )));
        }

        let bytes = self.read_bytes();
        let data = bytes.get(offset..end).ok_or_else(|| {
            OclinkError::precondition(format!(
                "host value of `{}` is shorter than its declared size",
                self.name()
            ))
        })?;

        tracing::debug!(variable = %self.name(), offset, bytes = available, "Uploading");
        queue
            .write_buffer(memory.as_ref(), self.state().is_blocking(), offset, data)
            .map_err(|status| self.state().device_error(status, "upload"))?;

        self.set_changed(false);
        Ok(())
    }

    /// Fetch the full device value back into host memory.
    ///
    /// Does nothing for read-only variables or when no device memory exists.
    fn download(&self, queue: &dyn CommandQueue) -> Result<()> {
        if !self.access().downloads() {
            return Ok(());
        }
        let Some(memory) = self.existing_memory() else {
            return Ok(());
        };

        let mut bytes = vec![0u8; self.byte_size()];
        tracing::debug!(variable = %self.name(), bytes = bytes.len(), "Downloading");
        queue
            .read_buffer(memory.as_ref(), 0, &mut bytes)
            .map_err(|status| self.state().device_error(status, "download"))?;

        // Downloading does not change whether the host value is pending upload.
        let uploaded = self.is_uploaded();
        self.write_bytes(&bytes)?;
        self.set_changed(!uploaded);
        Ok(())
    }

    /// Initialize device memory directly from `data` without touching the host value.
    fn init_with_value(&self, _queue: &dyn CommandQueue, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Take the device-memory lock, if a device-memory handle exists.
    fn acquire_device_memory(&self) -> Option<DeviceMemoryGuard<'_>> {
        if self.memory_slot().is_allocated() {
            Some(self.state().lock_device())
        } else {
            None
        }
    }
}

impl fmt::Debug for dyn DeviceVariable + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceVariable")
            .field("name", &self.name())
            .field("kind", &self.buffer_kind())
            .field("bytes", &self.byte_size())
            .field("uploaded", &self.is_uploaded())
            .finish()
    }
}
