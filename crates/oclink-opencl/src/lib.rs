//! OpenCL backend for oclink.
//!
//! This crate implements the oclink backend traits on top of the `ocl`
//! crate. Build with the `opencl` feature to enable it; without the feature
//! [`OpenClContext::new`] reports `BackendUnavailable`.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use oclink_opencl::OpenClContext;
//!
//! let context = Arc::new(OpenClContext::new(0)?);
//! println!("{}", context.device_info().summary());
//! ```

#![warn(missing_docs)]

#[cfg(feature = "opencl")]
mod context;
#[cfg(feature = "opencl")]
mod device;
#[cfg(feature = "opencl")]
mod queue;

#[cfg(feature = "opencl")]
pub use context::{OpenClContext, OpenClKernel, OpenClMemory};
#[cfg(feature = "opencl")]
pub use queue::{OpenClEvent, OpenClQueue};

#[cfg(not(feature = "opencl"))]
mod stub {
    oclink_core::unavailable_backend!(OpenClContext, "OpenCL");
}

#[cfg(not(feature = "opencl"))]
pub use stub::OpenClContext;

/// Check if an OpenCL device is available at runtime.
///
/// Returns false when the `opencl` feature is disabled, no ICD loader is
/// installed, or no platform exposes a device.
pub fn is_opencl_available() -> bool {
    #[cfg(feature = "opencl")]
    {
        device::list_devices().map(|d| !d.is_empty()).unwrap_or(false)
    }
    #[cfg(not(feature = "opencl"))]
    {
        false
    }
}

/// Number of OpenCL devices across every platform.
pub fn device_count() -> usize {
    #[cfg(feature = "opencl")]
    {
        device::list_devices().map(|d| d.len()).unwrap_or(0)
    }
    #[cfg(not(feature = "opencl"))]
    {
        0
    }
}
