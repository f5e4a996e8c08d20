//! # oclink core
//!
//! Host and device variable synchronization for kernel-dispatch APIs.
//!
//! The crate tracks which host values must reach device memory before a
//! kernel runs and which must come back afterwards, and sequences kernel
//! launches on a command queue.
//!
//! ## Core Abstractions
//!
//! - [`DeviceVariable`] - capability set shared by every transferable host value
//! - [`DeviceValue`] and [`TypedBuffer`] - fixed and runtime-sized arrays
//! - [`RingBuffer`] - circular buffer with wrap-aware partial uploads
//! - [`MemoryObject`] - externally created buffers and images
//! - [`KernelDescriptor`] - source, entry point, arguments and launch size
//! - [`DispatchGroup`] - upload, bind, launch and wait for one kernel
//!
//! Backends implement the traits in [`memory`].
//!
//! ## Example
//!
//! ```ignore
//! use oclink_core::prelude::*;
//!
//! let input = TypedBuffer::from_vec("input", vec![1.0f32; 1024])
//!     .with_access(AccessMode::ReadOnly);
//! let output = TypedBuffer::<f32>::new("output", 1024).with_access(AccessMode::WriteOnly);
//!
//! let kernel = KernelDescriptor::new(source)
//!     .with_argument(&input)
//!     .with_argument(&output)
//!     .with_global(NdRange::d1(1024))
//!     .compiled_for(context)?;
//!
//! let mut group = DispatchGroup::new(kernel)?;
//! group.run(&[], None)?;
//! group.wait_for_group()?;
//! group.download_result(&output)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend_stub;
pub mod buffer;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod geometry;
pub mod image;
pub mod kernel;
pub mod memory;
pub mod ring;
pub mod source;
pub mod status;
pub mod types;
pub mod value;
pub mod variable;

#[cfg(test)]
mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::buffer::TypedBuffer;
    pub use crate::config::OclinkConfig;
    pub use crate::device::DeviceInfo;
    pub use crate::dispatch::DispatchGroup;
    pub use crate::error::{OclinkError, Result};
    pub use crate::geometry::{LaunchGeometry, NdRange};
    pub use crate::image::MemoryObject;
    pub use crate::kernel::KernelDescriptor;
    pub use crate::memory::{
        CommandQueue, CompiledKernel, DeviceContext, DeviceMemory, Event, EventHandle,
    };
    pub use crate::ring::RingBuffer;
    pub use crate::source::{apply_constants, KernelSource, KernelSourceLoader};
    pub use crate::status::{DeviceResult, Status};
    pub use crate::types::{AccessMode, ArgScope, BufferKind};
    pub use crate::value::DeviceValue;
    pub use crate::variable::{DeviceMemoryGuard, DeviceVariable, VariableState};
    pub use bytemuck::Pod;
}

pub use buffer::TypedBuffer;
pub use bytemuck::Pod;
pub use dispatch::DispatchGroup;
pub use error::{OclinkError, Result};
pub use image::MemoryObject;
pub use kernel::KernelDescriptor;
pub use ring::RingBuffer;
pub use value::DeviceValue;
pub use variable::DeviceVariable;
