//! Variables wrapping device-memory objects created outside the crate,
//! such as images shared with a renderer.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{OclinkError, Result};
use crate::memory::{CommandQueue, DeviceContext, DeviceMemory, MemorySlot};
use crate::types::{AccessMode, BufferKind};
use crate::variable::{DeviceVariable, VariableState};

/// An externally created device-memory object bound as a kernel argument.
///
/// The host side is an optional staging area. Image objects are transferred
/// over their full `width x height` extent.
pub struct MemoryObject {
    state: VariableState,
    memory: MemorySlot,
    kind: BufferKind,
    staging: Mutex<Option<Vec<u8>>>,
    host_access: AccessMode,
}

impl MemoryObject {
    /// Wrap `memory`. The kind is taken from the object itself.
    pub fn new(name: impl Into<String>, memory: Arc<dyn DeviceMemory>) -> Self {
        let kind = memory.kind();
        Self {
            state: VariableState::new(name),
            memory: MemorySlot::with_memory(memory),
            kind,
            staging: Mutex::new(None),
            host_access: AccessMode::ReadWrite,
        }
    }

    /// Set the blocking flag.
    #[must_use]
    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.state.set_blocking(blocking);
        self
    }

    /// Set how the device accesses the object.
    #[must_use]
    pub fn with_access(mut self, access: AccessMode) -> Self {
        self.state.set_access(access);
        self
    }

    /// Set how the host accesses the staging area. Write-only host access disables uploads.
    #[must_use]
    pub fn with_host_access(mut self, access: AccessMode) -> Self {
        self.host_access = access;
        self
    }

    /// Attach a host staging area.
    #[must_use]
    pub fn with_staging(self, data: Vec<u8>) -> Self {
        *self.staging.lock() = Some(data);
        self
    }

    /// Replace the staging area and mark the object dirty.
    pub fn set_staging(&self, data: Vec<u8>) {
        *self.staging.lock() = Some(data);
        self.state.set_changed(true);
    }

    /// Copy of the staging area.
    pub fn staging(&self) -> Option<Vec<u8>> {
        self.staging.lock().clone()
    }

    /// Host access mode.
    pub fn host_access(&self) -> AccessMode {
        self.host_access
    }

    fn region(&self, memory: &dyn DeviceMemory) -> Result<[usize; 3]> {
        let [width, height, _] = memory.image_extent().ok_or_else(|| {
            OclinkError::precondition(format!("`{}` has no image extent", self.state.name()))
        })?;
        Ok([width, height, 1])
    }

    fn unsupported(&self, operation: &str) -> OclinkError {
        OclinkError::precondition(format!(
            "{operation} is not supported for {:?} object `{}`",
            self.kind,
            self.state.name()
        ))
    }
}

impl DeviceVariable for MemoryObject {
    fn state(&self) -> &VariableState {
        &self.state
    }

    fn memory_slot(&self) -> &MemorySlot {
        &self.memory
    }

    fn read_bytes(&self) -> Vec<u8> {
        self.staging.lock().clone().unwrap_or_default()
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        self.set_staging(bytes.to_vec());
        Ok(())
    }

    fn byte_size(&self) -> usize {
        self.memory.get().map_or(0, |m| m.size())
    }

    fn element_size(&self) -> usize {
        match self.memory.get().and_then(|m| m.image_extent()) {
            Some([w, h, d]) if w * h * d > 0 => self.byte_size() / (w * h * d),
            _ => 1,
        }
    }

    fn buffer_kind(&self) -> BufferKind {
        self.kind
    }

    fn needs_device_memory(&self) -> bool {
        true
    }

    fn device_memory(&self, _context: &dyn DeviceContext) -> Result<Option<Arc<dyn DeviceMemory>>> {
        Ok(self.memory.get())
    }

    fn upload(&self, queue: &dyn CommandQueue) -> Result<()> {
        if self.is_uploaded()
            || self.access() == AccessMode::WriteOnly
            || self.host_access == AccessMode::WriteOnly
        {
            return Ok(());
        }
        let Some(memory) = self.memory.get() else {
            return Ok(());
        };
        let staging = self.staging.lock();
        let Some(data) = staging.as_ref() else {
            return Ok(());
        };

        let blocking = self.state.is_blocking();
        let result = match self.kind {
            BufferKind::DeviceImage => {
                let region = self.region(memory.as_ref())?;
                tracing::debug!(variable = %self.name(), ?region, "Uploading image");
                queue.write_image(memory.as_ref(), blocking, region, data)
            }
            BufferKind::DeviceBuffer => queue.write_buffer(memory.as_ref(), blocking, 0, data),
            _ => return Err(self.unsupported("upload")),
        };
        result.map_err(|status| self.state.device_error(status, "upload"))?;

        self.state.set_changed(false);
        Ok(())
    }

    fn download(&self, queue: &dyn CommandQueue) -> Result<()> {
        if !self.access().downloads() {
            return Ok(());
        }
        let Some(memory) = self.memory.get() else {
            return Ok(());
        };
        let mut staging = self.staging.lock();
        let Some(data) = staging.as_mut() else {
            return Ok(());
        };

        let result = match self.kind {
            BufferKind::DeviceImage => {
                let region = self.region(memory.as_ref())?;
                tracing::debug!(variable = %self.name(), ?region, "Downloading image");
                queue.read_image(memory.as_ref(), region, data)
            }
            BufferKind::DeviceBuffer => {
                data.resize(memory.size(), 0);
                queue.read_buffer(memory.as_ref(), 0, data)
            }
            _ => return Err(self.unsupported("download")),
        };
        result.map_err(|status| self.state.device_error(status, "download"))
    }

    /// Fill an image with one RGBA colour given as four native-endian `u32`s.
    fn init_with_value(&self, queue: &dyn CommandQueue, data: &[u8]) -> Result<()> {
        if self.kind != BufferKind::DeviceImage {
            return Err(self.unsupported("initialisation"));
        }
        if data.len() != 16 {
            return Err(OclinkError::precondition(format!(
                "image fill colour must be 16 bytes, got {}",
                data.len()
            )));
        }
        let color: [u32; 4] = bytemuck::pod_read_unaligned(data);
        let Some(memory) = self.memory.get() else {
            return Ok(());
        };
        let region = self.region(memory.as_ref())?;
        queue
            .fill_image(memory.as_ref(), color, region)
            .map_err(|status| self.state.device_error(status, "fill"))
    }
}

impl fmt::Debug for MemoryObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryObject")
            .field("state", &self.state)
            .field("kind", &self.kind)
            .field("memory", &self.memory)
            .field("host_access", &self.host_access)
            .finish()
    }
}
