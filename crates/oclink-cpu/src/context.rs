//! Host-simulated device context.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use oclink_core::device::DeviceInfo;
use oclink_core::error::{OclinkError, Result};
use oclink_core::memory::{CommandQueue, CompiledKernel, DeviceContext, DeviceMemory};
use oclink_core::status::{DeviceResult, Status};
use oclink_core::types::AccessMode;

use crate::kernel::{parse_arg_names, HostKernel, KernelFn, KernelInvocation};
use crate::memory::HostMemory;
use crate::queue::{CommandLog, FaultTable, HostQueue, QueueCommand, QueueOp};

/// Device context that runs everything on the host.
///
/// Kernels are Rust closures registered by entry-point name. Every queue
/// created from the context appends to one shared command log.
pub struct HostContext {
    info: DeviceInfo,
    kernels: RwLock<HashMap<String, KernelFn>>,
    log: CommandLog,
    faults: FaultTable,
    allocations: AtomicU64,
}

impl HostContext {
    /// Create a context with the default simulated device.
    pub fn new() -> Self {
        Self::with_device_info(Self::default_device_info())
    }

    /// Create a context reporting `info` as its capabilities.
    pub fn with_device_info(info: DeviceInfo) -> Self {
        info!(device = %info.name, "Initializing host context");
        Self {
            info,
            kernels: RwLock::new(HashMap::new()),
            log: Arc::new(Mutex::new(Vec::new())),
            faults: Arc::new(Mutex::new(HashMap::new())),
            allocations: AtomicU64::new(0),
        }
    }

    /// Capabilities of the default simulated device.
    pub fn default_device_info() -> DeviceInfo {
        DeviceInfo {
            max_work_group_size: 256,
            max_work_group_dimensions: 3,
            max_work_items_per_dimension: vec![256, 256, 64],
            max_global_memory: 1 << 30,
            max_local_memory: 48 * 1024,
            image_support: true,
            max_image2d_size: [8192, 8192],
            max_compute_units: std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1),
            max_clock_frequency: 0,
            max_alloc_size: 256 << 20,
            name: "Host Simulator".to_string(),
            version: "OpenCL 1.2 host".to_string(),
            vendor: "oclink".to_string(),
        }
    }

    /// Register the body run for kernels named `entry_point`.
    pub fn register_kernel<F>(&self, entry_point: impl Into<String>, body: F)
    where
        F: Fn(&KernelInvocation<'_>) + Send + Sync + 'static,
    {
        let entry_point = entry_point.into();
        debug!(kernel = %entry_point, "Registered host kernel");
        self.kernels.write().insert(entry_point, Arc::new(body));
    }

    /// Create a concrete host queue, e.g. for sharing between dispatch groups.
    pub fn host_queue(&self) -> HostQueue {
        HostQueue::new(self.info.clone(), Arc::clone(&self.log), Arc::clone(&self.faults))
    }

    /// Create an image object.
    pub fn create_image(&self, width: usize, height: usize, bytes_per_pixel: usize) -> Arc<dyn DeviceMemory> {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Arc::new(HostMemory::image(width, height, bytes_per_pixel))
    }

    /// Commands executed by every queue of this context.
    pub fn commands(&self) -> Vec<QueueCommand> {
        self.log.lock().clone()
    }

    /// Clear the command log.
    pub fn clear_commands(&self) {
        self.log.lock().clear();
    }

    /// Make the next `op` on any queue of this context fail with `status`.
    pub fn fail_next(&self, op: QueueOp, status: Status) {
        self.faults.lock().insert(op, status);
    }

    /// Number of memory objects created.
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }
}

impl Default for HostContext {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceContext for HostContext {
    fn device_info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn create_buffer(&self, access: AccessMode, size: usize) -> DeviceResult<Arc<dyn DeviceMemory>> {
        if size == 0 {
            return Err(Status::INVALID_VALUE);
        }
        if self.info.max_alloc_size > 0 && size as u64 > self.info.max_alloc_size {
            return Err(Status::OUT_OF_RESOURCES);
        }
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(HostMemory::buffer(size, access)))
    }

    fn create_queue(&self) -> DeviceResult<Box<dyn CommandQueue>> {
        Ok(Box::new(self.host_queue()))
    }

    fn build_kernel(&self, source: &str, entry_point: &str) -> Result<Box<dyn CompiledKernel>> {
        let body = self.kernels.read().get(entry_point).cloned();
        if body.is_none() && !source.contains(entry_point) {
            return Err(OclinkError::Compilation(format!(
                "kernel `{entry_point}` not found in program"
            )));
        }
        Ok(Box::new(HostKernel::new(
            entry_point.to_string(),
            parse_arg_names(source, entry_point),
            body,
        )))
    }
}
