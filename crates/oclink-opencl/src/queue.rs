//! OpenCL command queue and events.

use std::any::Any;

use ocl::core;
use oclink_core::geometry::NdRange;
use oclink_core::memory::{CommandQueue, CompiledKernel, DeviceMemory, Event, EventHandle};
use oclink_core::status::{DeviceResult, Status};

use crate::context::{opencl_memory, status_of, OpenClKernel};

/// Completion event of an enqueued OpenCL command.
#[derive(Debug, Clone)]
pub struct OpenClEvent(core::Event);

impl EventHandle for OpenClEvent {
    fn wait(&self) -> DeviceResult {
        core::wait_for_event(&self.0).map_err(|e| status_of(&e))
    }

    fn is_complete(&self) -> bool {
        core::event_is_complete(&self.0).unwrap_or(false)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// In-order OpenCL command queue.
///
/// Host writes are always enqueued blocking: the source slice is only
/// borrowed for the duration of the call.
#[derive(Debug, Clone)]
pub struct OpenClQueue {
    queue: ocl::Queue,
}

impl OpenClQueue {
    pub(crate) fn new(queue: ocl::Queue) -> Self {
        Self { queue }
    }

    /// The underlying `ocl` queue.
    pub fn ocl_queue(&self) -> &ocl::Queue {
        &self.queue
    }

    fn core(&self) -> &core::CommandQueue {
        self.queue.as_core()
    }
}

impl CommandQueue for OpenClQueue {
    fn write_buffer(
        &self,
        memory: &dyn DeviceMemory,
        blocking: bool,
        offset: usize,
        data: &[u8],
    ) -> DeviceResult {
        let memory = opencl_memory(memory)?;
        if !blocking {
            tracing::trace!(len = data.len(), "Non-blocking write enqueued as blocking");
        }
        // SAFETY: the call blocks until `data` has been copied.
        unsafe {
            core::enqueue_write_buffer(
                self.core(),
                memory.as_core(),
                true,
                offset,
                data,
                None::<&core::Event>,
                None::<&mut core::Event>,
            )
        }
        .map_err(|e| status_of(&e))
    }

    fn read_buffer(
        &self,
        memory: &dyn DeviceMemory,
        offset: usize,
        data: &mut [u8],
    ) -> DeviceResult {
        let memory = opencl_memory(memory)?;
        // SAFETY: the call blocks until `data` has been filled.
        unsafe {
            core::enqueue_read_buffer(
                self.core(),
                memory.as_core(),
                true,
                offset,
                data,
                None::<&core::Event>,
                None::<&mut core::Event>,
            )
        }
        .map_err(|e| status_of(&e))
    }

    fn write_image(
        &self,
        memory: &dyn DeviceMemory,
        _blocking: bool,
        region: [usize; 3],
        data: &[u8],
    ) -> DeviceResult {
        let memory = opencl_memory(memory)?;
        // SAFETY: the call blocks until `data` has been copied.
        unsafe {
            core::enqueue_write_image(
                self.core(),
                memory.as_core(),
                true,
                [0, 0, 0],
                region,
                0,
                0,
                data,
                None::<&core::Event>,
                None::<&mut core::Event>,
            )
        }
        .map_err(|e| status_of(&e))
    }

    fn read_image(
        &self,
        memory: &dyn DeviceMemory,
        region: [usize; 3],
        data: &mut [u8],
    ) -> DeviceResult {
        let memory = opencl_memory(memory)?;
        // SAFETY: the call blocks until `data` has been filled.
        unsafe {
            core::enqueue_read_image(
                self.core(),
                memory.as_core(),
                true,
                [0, 0, 0],
                region,
                0,
                0,
                data,
                None::<&core::Event>,
                None::<&mut core::Event>,
            )
        }
        .map_err(|e| status_of(&e))
    }

    fn fill_image(
        &self,
        memory: &dyn DeviceMemory,
        color: [u32; 4],
        region: [usize; 3],
    ) -> DeviceResult {
        let memory = opencl_memory(memory)?;
        core::enqueue_fill_image(
            self.core(),
            memory.as_core(),
            &color[..],
            [0, 0, 0],
            region,
            None::<&core::Event>,
            None::<&mut core::Event>,
            None,
        )
        .map_err(|e| status_of(&e))
    }

    fn enqueue_kernel(
        &self,
        kernel: &dyn CompiledKernel,
        global: &NdRange,
        local: Option<&NdRange>,
        wait_list: &[Event],
    ) -> DeviceResult<Event> {
        let kernel = kernel
            .as_any()
            .downcast_ref::<OpenClKernel>()
            .ok_or(Status::INVALID_KERNEL)?;

        let waits: Vec<core::Event> = wait_list
            .iter()
            .filter_map(|e| e.as_any().downcast_ref::<OpenClEvent>())
            .map(|e| e.0.clone())
            .collect();
        if waits.len() != wait_list.len() {
            tracing::warn!(
                skipped = wait_list.len() - waits.len(),
                "Ignoring events from another backend"
            );
        }

        let dims = global.dimensions().max(1) as u32;
        let global_size = global.padded();
        let local_size = local.filter(|l| !l.is_empty()).map(NdRange::padded);
        let mut event = core::Event::null();

        kernel.with_core(|k| {
            // SAFETY: every argument was bound by the dispatch group before launch.
            unsafe {
                if waits.is_empty() {
                    core::enqueue_kernel(
                        self.core(),
                        k,
                        dims,
                        None,
                        &global_size,
                        local_size,
                        None::<&core::Event>,
                        Some(&mut event),
                    )
                } else {
                    core::enqueue_kernel(
                        self.core(),
                        k,
                        dims,
                        None,
                        &global_size,
                        local_size,
                        Some(&waits[..]),
                        Some(&mut event),
                    )
                }
            }
        })
        .map_err(|e| status_of(&e))?;

        Ok(std::sync::Arc::new(OpenClEvent(event)))
    }

    fn barrier(&self) -> DeviceResult {
        core::enqueue_barrier_with_wait_list(
            self.core(),
            None::<&core::Event>,
            None::<&mut core::Event>,
            None,
        )
        .map_err(|e| status_of(&e))
    }

    fn flush(&self) -> DeviceResult {
        core::flush(self.core()).map_err(|e| status_of(&e))
    }

    fn finish(&self) -> DeviceResult {
        core::finish(self.core()).map_err(|e| status_of(&e))
    }
}
