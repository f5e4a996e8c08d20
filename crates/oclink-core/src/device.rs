//! Device capability snapshot.

use serde::{Deserialize, Serialize};

/// Read-only facts about a compute device.
///
/// Backends fill this from their native device queries; the dispatch group
/// only consumes it when computing launch geometry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Maximum number of work-items in one work-group.
    pub max_work_group_size: usize,
    /// Number of work-item dimensions the device supports.
    pub max_work_group_dimensions: usize,
    /// Maximum work-items per dimension (length is `max_work_group_dimensions`).
    pub max_work_items_per_dimension: Vec<usize>,
    /// Global memory size in bytes.
    pub max_global_memory: u64,
    /// Local (work-group shared) memory size in bytes.
    pub max_local_memory: u64,
    /// Whether images are supported.
    pub image_support: bool,
    /// Maximum 2D image width and height.
    pub max_image2d_size: [usize; 2],
    /// Number of compute units.
    pub max_compute_units: u32,
    /// Maximum clock frequency in MHz.
    pub max_clock_frequency: u32,
    /// Largest single allocation in bytes.
    pub max_alloc_size: u64,
    /// Device name.
    pub name: String,
    /// Device version string.
    pub version: String,
    /// Vendor name.
    pub vendor: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            max_work_group_size: 0,
            max_work_group_dimensions: 0,
            max_work_items_per_dimension: Vec::new(),
            max_global_memory: 0,
            max_local_memory: 0,
            image_support: false,
            max_image2d_size: [0, 0],
            max_compute_units: 0,
            max_clock_frequency: 0,
            max_alloc_size: 0,
            name: "None".to_string(),
            version: "0.0".to_string(),
            vendor: "None".to_string(),
        }
    }
}

impl DeviceInfo {
    /// Per-dimension work-item limit.
    ///
    /// Dimensions the device does not report are bounded by the work-group size.
    pub fn item_limit(&self, dim: usize) -> usize {
        self.max_work_items_per_dimension
            .get(dim)
            .copied()
            .unwrap_or(self.max_work_group_size)
    }

    /// One-line description for logs and the CLI.
    pub fn summary(&self) -> String {
        format!(
            "{} ({}, {}) - {} CUs, max WG {}, items {:?}",
            self.name,
            self.vendor,
            self.version,
            self.max_compute_units,
            self.max_work_group_size,
            self.max_work_items_per_dimension
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_empty_snapshot() {
        let info = DeviceInfo::default();
        assert_eq!(info.name, "None");
        assert_eq!(info.version, "0.0");
        assert_eq!(info.max_work_group_size, 0);
        assert!(info.max_work_items_per_dimension.is_empty());
    }

    #[test]
    fn test_item_limit_fallback() {
        let info = DeviceInfo {
            max_work_group_size: 512,
            max_work_group_dimensions: 1,
            max_work_items_per_dimension: vec![256],
            ..Default::default()
        };
        assert_eq!(info.item_limit(0), 256);
        assert_eq!(info.item_limit(2), 512);
    }
}
