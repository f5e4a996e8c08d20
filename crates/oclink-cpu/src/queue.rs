//! Command queue that executes every command immediately on the host and
//! records it.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use oclink_core::device::DeviceInfo;
use oclink_core::geometry::NdRange;
use oclink_core::memory::{CommandQueue, CompiledKernel, DeviceMemory, Event, EventHandle};
use oclink_core::status::{DeviceResult, Status};

use crate::kernel::HostKernel;
use crate::memory::host_memory;

/// Queue operation kinds, used for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOp {
    /// `write_buffer`.
    WriteBuffer,
    /// `read_buffer`.
    ReadBuffer,
    /// `write_image`.
    WriteImage,
    /// `read_image`.
    ReadImage,
    /// `fill_image`.
    FillImage,
    /// `enqueue_kernel`.
    Kernel,
    /// `barrier`.
    Barrier,
    /// `flush`.
    Flush,
    /// `finish`.
    Finish,
}

/// A command executed by a [`HostQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueCommand {
    /// Buffer write.
    WriteBuffer {
        /// Byte offset.
        offset: usize,
        /// Byte count.
        len: usize,
        /// Blocking flag.
        blocking: bool,
    },
    /// Buffer read.
    ReadBuffer {
        /// Byte offset.
        offset: usize,
        /// Byte count.
        len: usize,
    },
    /// Image write.
    WriteImage {
        /// Region written.
        region: [usize; 3],
    },
    /// Image read.
    ReadImage {
        /// Region read.
        region: [usize; 3],
    },
    /// Image fill.
    FillImage {
        /// Fill colour.
        color: [u32; 4],
        /// Region filled.
        region: [usize; 3],
    },
    /// Kernel launch.
    Kernel {
        /// Entry point.
        name: String,
        /// Global size.
        global: NdRange,
        /// Local size.
        local: NdRange,
    },
    /// Barrier.
    Barrier,
    /// Flush.
    Flush,
    /// Finish.
    Finish,
}

impl QueueCommand {
    /// Whether this is a buffer write.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::WriteBuffer { .. })
    }

    /// Whether this is a buffer read.
    pub fn is_read(&self) -> bool {
        matches!(self, Self::ReadBuffer { .. })
    }
}

/// Shared command log.
pub type CommandLog = Arc<Mutex<Vec<QueueCommand>>>;

/// Pending injected failures.
pub(crate) type FaultTable = Arc<Mutex<HashMap<QueueOp, Status>>>;

/// Completed host event.
#[derive(Debug)]
pub struct HostEvent {
    id: u64,
}

impl HostEvent {
    /// Sequence number of the command.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl EventHandle for HostEvent {
    fn wait(&self) -> DeviceResult {
        Ok(())
    }

    fn is_complete(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// In-order queue running on the calling thread.
pub struct HostQueue {
    info: DeviceInfo,
    log: CommandLog,
    faults: FaultTable,
    sequence: AtomicU64,
}

impl HostQueue {
    pub(crate) fn new(info: DeviceInfo, log: CommandLog, faults: FaultTable) -> Self {
        Self {
            info,
            log,
            faults,
            sequence: AtomicU64::new(0),
        }
    }

    /// Make the next `op` on any queue of the same context fail with `status`.
    pub fn fail_next(&self, op: QueueOp, status: Status) {
        self.faults.lock().insert(op, status);
    }

    /// Commands executed so far by every queue of the same context.
    pub fn commands(&self) -> Vec<QueueCommand> {
        self.log.lock().clone()
    }

    fn check_fault(&self, op: QueueOp) -> DeviceResult {
        match self.faults.lock().remove(&op) {
            Some(status) => {
                tracing::debug!(?op, %status, "Injected queue failure");
                Err(status)
            }
            None => Ok(()),
        }
    }

    fn record(&self, command: QueueCommand) {
        self.log.lock().push(command);
    }

    fn validate_geometry(&self, global: &NdRange, local: &NdRange) -> DeviceResult {
        if local.dimensions() != global.dimensions() {
            return Err(Status::INVALID_WORK_GROUP_SIZE);
        }
        for dim in 0..global.dimensions() {
            let l = local.get(dim);
            if l == 0 || global.get(dim) % l != 0 || l > self.info.item_limit(dim) {
                return Err(Status::INVALID_WORK_GROUP_SIZE);
            }
        }
        if self.info.max_work_group_size > 0 && local.product() > self.info.max_work_group_size {
            return Err(Status::INVALID_WORK_GROUP_SIZE);
        }
        Ok(())
    }
}

impl CommandQueue for HostQueue {
    fn write_buffer(
        &self,
        memory: &dyn DeviceMemory,
        blocking: bool,
        offset: usize,
        data: &[u8],
    ) -> DeviceResult {
        self.check_fault(QueueOp::WriteBuffer)?;
        host_memory(memory)?.write_at(offset, data)?;
        self.record(QueueCommand::WriteBuffer {
            offset,
            len: data.len(),
            blocking,
        });
        Ok(())
    }

    fn read_buffer(&self, memory: &dyn DeviceMemory, offset: usize, data: &mut [u8]) -> DeviceResult {
        self.check_fault(QueueOp::ReadBuffer)?;
        host_memory(memory)?.read_at(offset, data)?;
        self.record(QueueCommand::ReadBuffer {
            offset,
            len: data.len(),
        });
        Ok(())
    }

    fn write_image(
        &self,
        memory: &dyn DeviceMemory,
        _blocking: bool,
        region: [usize; 3],
        data: &[u8],
    ) -> DeviceResult {
        self.check_fault(QueueOp::WriteImage)?;
        let host = host_memory(memory)?;
        let len = host.region_len(region)?;
        host.write_at(0, data.get(..len).ok_or(Status::INVALID_HOST_PTR)?)?;
        self.record(QueueCommand::WriteImage { region });
        Ok(())
    }

    fn read_image(&self, memory: &dyn DeviceMemory, region: [usize; 3], data: &mut [u8]) -> DeviceResult {
        self.check_fault(QueueOp::ReadImage)?;
        let host = host_memory(memory)?;
        let len = host.region_len(region)?;
        host.read_at(0, data.get_mut(..len).ok_or(Status::INVALID_HOST_PTR)?)?;
        self.record(QueueCommand::ReadImage { region });
        Ok(())
    }

    fn fill_image(&self, memory: &dyn DeviceMemory, color: [u32; 4], region: [usize; 3]) -> DeviceResult {
        self.check_fault(QueueOp::FillImage)?;
        host_memory(memory)?.fill(bytemuck::cast_slice(&color), region)?;
        self.record(QueueCommand::FillImage { color, region });
        Ok(())
    }

    fn enqueue_kernel(
        &self,
        kernel: &dyn CompiledKernel,
        global: &NdRange,
        local: Option<&NdRange>,
        wait_list: &[Event],
    ) -> DeviceResult<Event> {
        self.check_fault(QueueOp::Kernel)?;
        let host = kernel
            .as_any()
            .downcast_ref::<HostKernel>()
            .ok_or(Status::INVALID_KERNEL)?;

        let local = local.copied().unwrap_or(*global);
        self.validate_geometry(global, &local)?;

        for event in wait_list {
            event.wait()?;
        }

        tracing::debug!(kernel = %host.function_name(), %global, %local, "Executing host kernel");
        host.execute(*global, local)?;
        self.record(QueueCommand::Kernel {
            name: host.function_name(),
            global: *global,
            local,
        });

        Ok(Arc::new(HostEvent {
            id: self.sequence.fetch_add(1, Ordering::Relaxed),
        }))
    }

    fn barrier(&self) -> DeviceResult {
        self.check_fault(QueueOp::Barrier)?;
        self.record(QueueCommand::Barrier);
        Ok(())
    }

    fn flush(&self) -> DeviceResult {
        self.check_fault(QueueOp::Flush)?;
        self.record(QueueCommand::Flush);
        Ok(())
    }

    fn finish(&self) -> DeviceResult {
        self.check_fault(QueueOp::Finish)?;
        self.record(QueueCommand::Finish);
        Ok(())
    }
}
