//! Host-resident device memory.

use std::any::Any;

use parking_lot::RwLock;

use oclink_core::memory::DeviceMemory;
use oclink_core::status::{DeviceResult, Status};
use oclink_core::types::{AccessMode, BufferKind};

/// A buffer or image backed by host memory.
#[derive(Debug)]
pub struct HostMemory {
    bytes: RwLock<Vec<u8>>,
    kind: BufferKind,
    access: AccessMode,
    extent: Option<[usize; 3]>,
}

impl HostMemory {
    /// Zeroed buffer of `size` bytes.
    pub fn buffer(size: usize, access: AccessMode) -> Self {
        Self {
            bytes: RwLock::new(vec![0; size]),
            kind: BufferKind::DeviceBuffer,
            access,
            extent: None,
        }
    }

    /// Zeroed 2D image with `bytes_per_pixel` bytes per pixel.
    pub fn image(width: usize, height: usize, bytes_per_pixel: usize) -> Self {
        Self {
            bytes: RwLock::new(vec![0; width * height * bytes_per_pixel]),
            kind: BufferKind::DeviceImage,
            access: AccessMode::ReadWrite,
            extent: Some([width, height, 1]),
        }
    }

    /// Access mode the memory was created with.
    pub fn access(&self) -> AccessMode {
        self.access
    }

    /// Copy of the contents.
    pub fn contents(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }

    /// Bytes per pixel for images, 1 for buffers.
    pub fn pixel_size(&self) -> usize {
        match self.extent {
            Some([w, h, d]) if w * h * d > 0 => self.bytes.read().len() / (w * h * d),
            _ => 1,
        }
    }

    pub(crate) fn write_at(&self, offset: usize, data: &[u8]) -> DeviceResult {
        let mut bytes = self.bytes.write();
        let end = offset.checked_add(data.len()).ok_or(Status::INVALID_VALUE)?;
        bytes
            .get_mut(offset..end)
            .ok_or(Status::INVALID_VALUE)?
            .copy_from_slice(data);
        Ok(())
    }

    pub(crate) fn read_at(&self, offset: usize, data: &mut [u8]) -> DeviceResult {
        let bytes = self.bytes.read();
        let end = offset.checked_add(data.len()).ok_or(Status::INVALID_VALUE)?;
        data.copy_from_slice(bytes.get(offset..end).ok_or(Status::INVALID_VALUE)?);
        Ok(())
    }

    /// Byte length of an image region starting at the origin.
    pub(crate) fn region_len(&self, region: [usize; 3]) -> DeviceResult<usize> {
        let [w, h, d] = self.extent.ok_or(Status::INVALID_MEM_OBJECT)?;
        if region[0] > w || region[1] > h || region[2] > d {
            return Err(Status::INVALID_VALUE);
        }
        Ok(region[0] * region[1] * region[2] * self.pixel_size())
    }

    pub(crate) fn fill(&self, pattern: &[u8], region: [usize; 3]) -> DeviceResult {
        let len = self.region_len(region)?;
        let mut bytes = self.bytes.write();
        for (dst, src) in bytes[..len].iter_mut().zip(pattern.iter().cycle()) {
            *dst = *src;
        }
        Ok(())
    }
}

impl DeviceMemory for HostMemory {
    fn size(&self) -> usize {
        self.bytes.read().len()
    }

    fn kind(&self) -> BufferKind {
        self.kind
    }

    fn image_extent(&self) -> Option<[usize; 3]> {
        self.extent
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Downcast a backend-agnostic memory object to host memory.
pub(crate) fn host_memory(memory: &dyn DeviceMemory) -> DeviceResult<&HostMemory> {
    memory
        .as_any()
        .downcast_ref::<HostMemory>()
        .ok_or(Status::INVALID_MEM_OBJECT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_checked_access() {
        let mem = HostMemory::buffer(8, AccessMode::ReadWrite);
        mem.write_at(4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(mem.write_at(6, &[0; 4]), Err(Status::INVALID_VALUE));

        let mut out = [0u8; 2];
        mem.read_at(5, &mut out).unwrap();
        assert_eq!(out, [2, 3]);
    }

    #[test]
    fn test_image_fill_repeats_pattern() {
        let mem = HostMemory::image(2, 1, 4);
        mem.fill(&[9, 8, 7, 6], [2, 1, 1]).unwrap();
        assert_eq!(mem.contents(), vec![9, 8, 7, 6, 9, 8, 7, 6]);
        assert_eq!(mem.region_len([3, 1, 1]), Err(Status::INVALID_VALUE));
    }
}
