//! OpenCL device context, memory objects and kernels.

use std::any::Any;
use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

use ocl::core::{
    self, ArgVal, ImageChannelDataType, ImageChannelOrder, ImageDescriptor, ImageFormat,
    KernelArgInfo, KernelArgInfoResult, MemObjectType,
};
use ocl::{flags, Context, Device, Platform, Program};
use parking_lot::Mutex;

use oclink_core::device::DeviceInfo;
use oclink_core::error::{OclinkError, Result};
use oclink_core::memory::{CommandQueue, CompiledKernel, DeviceContext, DeviceMemory};
use oclink_core::status::{DeviceResult, Status};
use oclink_core::types::{AccessMode, BufferKind};

use crate::device::{list_devices, query_device_info};
use crate::queue::OpenClQueue;

/// Map an `ocl` error onto a device status.
///
/// Errors raised by `ocl` itself rather than the driver carry no API status
/// and are reported as `INVALID_VALUE`.
pub(crate) fn status_of(err: &core::Error) -> Status {
    match err.api_status() {
        Some(status) => Status(status as i32),
        None => {
            tracing::debug!(error = %err, "OpenCL error without API status");
            Status::INVALID_VALUE
        }
    }
}

/// An OpenCL device, its platform and context.
pub struct OpenClContext {
    platform: Platform,
    device: Device,
    context: Context,
    info: DeviceInfo,
}

impl OpenClContext {
    /// Open the device at `device_index`, counting devices across all platforms.
    pub fn new(device_index: usize) -> Result<Self> {
        let devices = list_devices()
            .map_err(|e| OclinkError::BackendUnavailable(format!("OpenCL: {}", e)))?;
        let count = devices.len();
        let (platform, device) = devices.into_iter().nth(device_index).ok_or_else(|| {
            OclinkError::BackendUnavailable(format!(
                "OpenCL device {} not found ({} available)",
                device_index, count
            ))
        })?;

        let context = Context::builder()
            .platform(platform)
            .devices(device)
            .build()
            .map_err(|e| OclinkError::BackendUnavailable(format!("OpenCL context: {}", e)))?;

        let info = query_device_info(&device);
        tracing::info!(device = %info.summary(), index = device_index, "Opened OpenCL device");

        Ok(Self {
            platform,
            device,
            context,
            info,
        })
    }

    /// Platform name.
    pub fn platform_name(&self) -> String {
        self.platform.name().unwrap_or_default()
    }

    /// The underlying `ocl` context.
    pub fn ocl_context(&self) -> &Context {
        &self.context
    }

    /// Create an RGBA8 2D image.
    pub fn create_image(
        &self,
        access: AccessMode,
        width: usize,
        height: usize,
    ) -> DeviceResult<Arc<dyn DeviceMemory>> {
        if !self.info.image_support {
            return Err(Status::IMAGE_FORMAT_NOT_SUPPORTED);
        }
        let format = ImageFormat::new(ImageChannelOrder::Rgba, ImageChannelDataType::UnsignedInt8);
        let descriptor =
            ImageDescriptor::new(MemObjectType::Image2d, width, height, 0, 0, 0, 0, None);

        // SAFETY: no host pointer is passed, so the driver owns the storage.
        let mem = unsafe {
            core::create_image::<_, u8>(
                self.context.as_core(),
                mem_flags(access),
                &format,
                &descriptor,
                None,
                None,
            )
        }
        .map_err(|e| status_of(&e))?;

        Ok(Arc::new(OpenClMemory {
            mem,
            size: width * height * 4,
            kind: BufferKind::DeviceImage,
            extent: Some([width, height, 1]),
        }))
    }
}

fn mem_flags(access: AccessMode) -> core::MemFlags {
    match access {
        AccessMode::ReadOnly | AccessMode::ReadOnlyWithInitialCopy => flags::MEM_READ_ONLY,
        AccessMode::WriteOnly => flags::MEM_WRITE_ONLY,
        AccessMode::ReadWrite => flags::MEM_READ_WRITE,
    }
}

impl fmt::Debug for OpenClContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenClContext")
            .field("device", &self.info.name)
            .finish()
    }
}

impl DeviceContext for OpenClContext {
    fn device_info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn create_buffer(&self, access: AccessMode, size: usize) -> DeviceResult<Arc<dyn DeviceMemory>> {
        if size == 0 {
            return Err(Status::INVALID_VALUE);
        }
        // SAFETY: no host pointer is passed, so the driver owns the storage.
        let mem = unsafe {
            core::create_buffer::<_, u8>(self.context.as_core(), mem_flags(access), size, None)
        }
        .map_err(|e| status_of(&e))?;

        tracing::trace!(size, ?access, "Allocated OpenCL buffer");
        Ok(Arc::new(OpenClMemory {
            mem,
            size,
            kind: BufferKind::DeviceBuffer,
            extent: None,
        }))
    }

    fn create_queue(&self) -> DeviceResult<Box<dyn CommandQueue>> {
        let queue = ocl::Queue::new(&self.context, self.device, None)
            .map_err(|e| e.api_status().map(|s| Status(s as i32)).unwrap_or(Status::INVALID_VALUE))?;
        Ok(Box::new(OpenClQueue::new(queue)))
    }

    fn build_kernel(&self, source: &str, entry_point: &str) -> Result<Box<dyn CompiledKernel>> {
        let program = Program::builder()
            .src(source)
            .devices(self.device)
            .build(&self.context)
            .map_err(|e| OclinkError::Compilation(e.to_string()))?;

        let kernel = core::create_kernel(program.as_core(), entry_point).map_err(|e| {
            OclinkError::Compilation(format!("kernel '{}': {}", entry_point, e))
        })?;

        tracing::debug!(entry_point, "Built OpenCL kernel");
        Ok(Box::new(OpenClKernel {
            name: entry_point.to_string(),
            kernel: Mutex::new(kernel),
            _program: program,
        }))
    }
}

/// An OpenCL buffer or image.
#[derive(Debug)]
pub struct OpenClMemory {
    mem: core::Mem,
    size: usize,
    kind: BufferKind,
    extent: Option<[usize; 3]>,
}

impl OpenClMemory {
    /// The raw memory object.
    pub fn as_core(&self) -> &core::Mem {
        &self.mem
    }
}

impl DeviceMemory for OpenClMemory {
    fn size(&self) -> usize {
        self.size
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

pub(crate) fn opencl_memory(memory: &dyn DeviceMemory) -> DeviceResult<&OpenClMemory> {
    memory
        .as_any()
        .downcast_ref::<OpenClMemory>()
        .ok_or(Status::INVALID_MEM_OBJECT)
}

/// A kernel created from a built program.
pub struct OpenClKernel {
    name: String,
    kernel: Mutex<core::Kernel>,
    _program: Program,
}

impl OpenClKernel {
    pub(crate) fn with_core<R>(&self, f: impl FnOnce(&core::Kernel) -> R) -> R {
        f(&*self.kernel.lock())
    }
}

impl CompiledKernel for OpenClKernel {
    fn function_name(&self) -> String {
        self.name.clone()
    }

    fn arg_info(&self, index: u32) -> Option<(String, String)> {
        let kernel = self.kernel.lock();
        let type_name = match core::get_kernel_arg_info(&kernel, index, KernelArgInfo::TypeName, None) {
            KernelArgInfoResult::TypeName(name) => name,
            _ => return None,
        };
        let arg_name = match core::get_kernel_arg_info(&kernel, index, KernelArgInfo::Name, None) {
            KernelArgInfoResult::Name(name) => name,
            _ => return None,
        };
        Some((type_name, arg_name))
    }

    fn set_arg_value(&mut self, index: u32, bytes: &[u8]) -> DeviceResult {
        // SAFETY: the driver copies `bytes.len()` bytes during the call.
        let value = unsafe { ArgVal::from_raw(bytes.len(), bytes.as_ptr() as *const c_void, false) };
        core::set_kernel_arg(&self.kernel.lock(), index, value).map_err(|e| status_of(&e))
    }

    fn set_arg_memory(&mut self, index: u32, memory: &Arc<dyn DeviceMemory>) -> DeviceResult {
        let memory = opencl_memory(&**memory)?;
        core::set_kernel_arg(&self.kernel.lock(), index, ArgVal::mem(memory.as_core()))
            .map_err(|e| status_of(&e))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_flags_follow_access() {
        assert_eq!(mem_flags(AccessMode::ReadOnly), flags::MEM_READ_ONLY);
        assert_eq!(mem_flags(AccessMode::ReadOnlyWithInitialCopy), flags::MEM_READ_ONLY);
        assert_eq!(mem_flags(AccessMode::WriteOnly), flags::MEM_WRITE_ONLY);
        assert_eq!(mem_flags(AccessMode::ReadWrite), flags::MEM_READ_WRITE);
    }

    #[test]
    #[ignore] // Requires an OpenCL device
    fn test_open_first_device() {
        let ctx = OpenClContext::new(0).unwrap();
        let info = ctx.device_info();
        assert!(info.max_work_group_size > 0);
        assert_ne!(info.name, "None");
    }

    #[test]
    #[ignore] // Requires an OpenCL device
    fn test_build_failure_is_compilation_error() {
        let ctx = OpenClContext::new(0).unwrap();
        let err = ctx
            .build_kernel("__kernel void main_kernel( {", "main_kernel")
            .err()
            .unwrap();
        assert!(matches!(err, OclinkError::Compilation(_)));
    }
}
