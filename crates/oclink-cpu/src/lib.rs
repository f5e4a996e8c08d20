//! Host-simulated device backend for oclink.
//!
//! [`HostContext`] implements the core backend traits entirely in host
//! memory. Kernels are Rust closures registered by entry-point name, queues
//! execute commands as soon as they are enqueued, and every command is
//! appended to a log that tests can inspect. Queue failures can be injected
//! with [`HostContext::fail_next`].
//!
//! # Example
//!
//! ```ignore
//! use oclink_cpu::HostContext;
//!
//! let context = HostContext::new();
//! context.register_kernel("scale", |inv| {
//!     let factor: f32 = inv.value(1).expect("factor is bound by value");
//!     inv.update::<f32>(0, |v| v.iter_mut().for_each(|x| *x *= factor))
//!         .expect("data is bound as memory");
//! });
//! ```

#![warn(missing_docs)]

mod context;
mod kernel;
mod memory;
mod queue;

pub use context::HostContext;
pub use kernel::{HostKernel, KernelArg, KernelFn, KernelInvocation};
pub use memory::HostMemory;
pub use queue::{CommandLog, HostEvent, HostQueue, QueueCommand, QueueOp};
