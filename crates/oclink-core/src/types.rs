//! Small shared enums describing how a variable lives on the device.

use serde::{Deserialize, Serialize};

/// How the device accesses a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AccessMode {
    /// Device only reads; nothing to download.
    ReadOnly,
    /// Device only writes; nothing to upload.
    WriteOnly,
    /// Device reads and writes.
    #[default]
    ReadWrite,
    /// Read-only. The device buffer is created empty and seeded with the
    /// host data by the first upload.
    ReadOnlyWithInitialCopy,
}

impl AccessMode {
    /// Whether host data ever needs to travel to the device.
    pub fn uploads(self) -> bool {
        !matches!(self, AccessMode::WriteOnly)
    }

    /// Whether device results need to travel back to the host.
    pub fn downloads(self) -> bool {
        matches!(self, AccessMode::WriteOnly | AccessMode::ReadWrite)
    }
}

/// Address space of a kernel argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ArgScope {
    /// `__global` memory, always backed by a device buffer.
    #[default]
    Global,
    /// `__local` work-group memory.
    Local,
    /// Per-work-item private value, passed by value.
    Private,
}

/// What backs a variable on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferKind {
    /// Plain host value or host array copied into a device buffer.
    HostValue,
    /// Device-memory buffer created outside the variable.
    DeviceBuffer,
    /// Device image.
    DeviceImage,
    /// Image shared with a graphics API.
    InteropImage,
}

impl BufferKind {
    /// Whether this kind is an image and transfers by region.
    pub fn is_image(self) -> bool {
        matches!(self, BufferKind::DeviceImage | BufferKind::InteropImage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_mode_transfers() {
        assert!(AccessMode::ReadOnly.uploads());
        assert!(!AccessMode::ReadOnly.downloads());
        assert!(!AccessMode::WriteOnly.uploads());
        assert!(AccessMode::WriteOnly.downloads());
        assert!(AccessMode::ReadWrite.uploads());
        assert!(AccessMode::ReadWrite.downloads());
        assert!(AccessMode::ReadOnlyWithInitialCopy.uploads());
        assert!(!AccessMode::ReadOnlyWithInitialCopy.downloads());
    }
}
