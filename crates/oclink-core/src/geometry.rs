//! Launch geometry: per-dimension global and local work sizes.

use std::fmt;

use crate::device::DeviceInfo;

/// Maximum number of work dimensions.
pub const MAX_DIMENSIONS: usize = 3;

/// A 0- to 3-dimensional work size.
///
/// An empty range (zero dimensions) is used for the local size to request
/// automatic work-group sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NdRange {
    dims: usize,
    sizes: [usize; MAX_DIMENSIONS],
}

impl NdRange {
    /// Empty range.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            dims: 0,
            sizes: [1; MAX_DIMENSIONS],
        }
    }

    /// One-dimensional range.
    #[must_use]
    pub const fn d1(x: usize) -> Self {
        Self {
            dims: 1,
            sizes: [x, 1, 1],
        }
    }

    /// Two-dimensional range.
    #[must_use]
    pub const fn d2(x: usize, y: usize) -> Self {
        Self {
            dims: 2,
            sizes: [x, y, 1],
        }
    }

    /// Three-dimensional range.
    #[must_use]
    pub const fn d3(x: usize, y: usize, z: usize) -> Self {
        Self {
            dims: 3,
            sizes: [x, y, z],
        }
    }

    /// Build from a slice of at most three sizes.
    #[must_use]
    pub fn from_slice(sizes: &[usize]) -> Option<Self> {
        match *sizes {
            [] => Some(Self::empty()),
            [x] => Some(Self::d1(x)),
            [x, y] => Some(Self::d2(x, y)),
            [x, y, z] => Some(Self::d3(x, y, z)),
            _ => None,
        }
    }

    /// Number of dimensions.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dims
    }

    /// Whether no dimension is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dims == 0
    }

    /// Size of dimension `i` (1 for unused dimensions).
    #[must_use]
    pub fn get(&self, i: usize) -> usize {
        if i < self.dims {
            self.sizes[i]
        } else {
            1
        }
    }

    /// Set dimension `i`, which must already exist.
    pub fn set(&mut self, i: usize, value: usize) {
        if i < self.dims {
            self.sizes[i] = value;
        }
    }

    /// Sizes of the used dimensions.
    #[must_use]
    pub fn as_slice(&self) -> &[usize] {
        &self.sizes[..self.dims]
    }

    /// All three sizes, unused dimensions padded with 1.
    #[must_use]
    pub fn padded(&self) -> [usize; MAX_DIMENSIONS] {
        let mut out = [1; MAX_DIMENSIONS];
        out[..self.dims].copy_from_slice(self.as_slice());
        out
    }

    /// Total number of work-items.
    #[must_use]
    pub fn product(&self) -> usize {
        self.as_slice().iter().product()
    }
}

impl fmt::Display for NdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "auto");
        }
        let parts: Vec<String> = self.as_slice().iter().map(|s| s.to_string()).collect();
        write!(f, "{}", parts.join("x"))
    }
}

/// Greatest common divisor.
#[must_use]
pub fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn smallest_prime_factor(n: usize) -> usize {
    let mut f = 2;
    while f * f <= n {
        if n % f == 0 {
            return f;
        }
        f += 1;
    }
    n
}

/// Resolved launch geometry for one kernel enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGeometry {
    /// Total work-items per dimension.
    pub global: NdRange,
    /// Work-items per work-group per dimension.
    pub local: NdRange,
}

impl LaunchGeometry {
    /// Resolve the local size for `global`.
    ///
    /// A non-empty `local` is taken as is. Otherwise each dimension keeps the
    /// global size when it fits the device's per-dimension limit and falls
    /// back to `gcd(limit, global)` when it does not, so the local size always
    /// divides the global size. If the product of the chosen sizes exceeds the
    /// device's work-group limit, the largest dimension is divided by its
    /// smallest prime factor until it fits.
    #[must_use]
    pub fn resolve(global: NdRange, local: NdRange, device: &DeviceInfo) -> Self {
        if !local.is_empty() {
            return Self { global, local };
        }

        let mut local = global;
        for i in 0..global.dimensions() {
            let limit = device.item_limit(i);
            if limit > 0 && limit < global.get(i) {
                local.set(i, gcd(limit, global.get(i)).max(1));
            }
        }

        let cap = device.max_work_group_size;
        if cap > 0 {
            while local.product() > cap {
                let Some((dim, size)) = local
                    .as_slice()
                    .iter()
                    .copied()
                    .enumerate()
                    .max_by_key(|&(_, s)| s)
                else {
                    break;
                };
                if size <= 1 {
                    break;
                }
                local.set(dim, size / smallest_prime_factor(size));
            }
        }

        Self { global, local }
    }

    /// Whether every local dimension divides its global dimension.
    #[must_use]
    pub fn is_uniform(&self) -> bool {
        (0..self.global.dimensions()).all(|i| {
            let l = self.local.get(i);
            l > 0 && self.global.get(i) % l == 0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(max_wg: usize, limits: Vec<usize>) -> DeviceInfo {
        DeviceInfo {
            max_work_group_size: max_wg,
            max_work_group_dimensions: limits.len(),
            max_work_items_per_dimension: limits,
            ..Default::default()
        }
    }

    #[test]
    fn test_gcd() {
        assert_eq!(gcd(256, 1024), 256);
        assert_eq!(gcd(256, 1000), 8);
        assert_eq!(gcd(7, 13), 1);
        assert_eq!(gcd(5, 0), 5);
    }

    #[test]
    fn test_auto_local_1d() {
        let dev = device(256, vec![256, 256, 64]);
        let geo = LaunchGeometry::resolve(NdRange::d1(1024), NdRange::empty(), &dev);
        assert_eq!(geo.local, NdRange::d1(256));
        assert!(geo.is_uniform());
        assert!(geo.local.get(0) <= 256);
    }

    #[test]
    fn test_auto_local_keeps_small_global() {
        let dev = device(256, vec![256, 256, 64]);
        let geo = LaunchGeometry::resolve(NdRange::d1(100), NdRange::empty(), &dev);
        assert_eq!(geo.local, NdRange::d1(100));
    }

    #[test]
    fn test_explicit_local_is_kept() {
        let dev = device(256, vec![256]);
        let geo = LaunchGeometry::resolve(NdRange::d1(1024), NdRange::d1(64), &dev);
        assert_eq!(geo.local, NdRange::d1(64));
    }

    #[test]
    fn test_product_capped_by_work_group_size() {
        // Generous per-dimension limits but a small total cap.
        let dev = device(256, vec![1024, 1024, 64]);
        let geo = LaunchGeometry::resolve(NdRange::d2(512, 512), NdRange::empty(), &dev);
        assert!(geo.local.product() <= 256);
        assert!(geo.is_uniform());
    }

    #[test]
    fn test_odd_global_size() {
        let dev = device(256, vec![256]);
        let geo = LaunchGeometry::resolve(NdRange::d1(1001), NdRange::empty(), &dev);
        assert!(geo.is_uniform());
        assert!(geo.local.get(0) <= 256);
    }

    #[test]
    fn test_ndrange_display() {
        assert_eq!(NdRange::d2(16, 8).to_string(), "16x8");
        assert_eq!(NdRange::empty().to_string(), "auto");
        assert_eq!(NdRange::d3(2, 3, 4).product(), 24);
        assert_eq!(NdRange::from_slice(&[1, 2, 3, 4]), None);
    }
}
