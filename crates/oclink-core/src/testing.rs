//! Recording in-memory backend for unit tests.

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::DeviceInfo;
use crate::error::Result;
use crate::geometry::NdRange;
use crate::memory::{
    CommandQueue, CompiledKernel, DeviceContext, DeviceMemory, Event, EventHandle,
};
use crate::status::{DeviceResult, Status};
use crate::types::{AccessMode, BufferKind};

#[derive(Debug)]
pub struct TestMemory {
    pub bytes: Mutex<Vec<u8>>,
    pub kind: BufferKind,
    pub extent: Option<[usize; 3]>,
}

impl TestMemory {
    pub fn buffer(size: usize) -> Arc<Self> {
        Arc::new(Self {
            bytes: Mutex::new(vec![0; size]),
            kind: BufferKind::DeviceBuffer,
            extent: None,
        })
    }

    pub fn image(width: usize, height: usize) -> Arc<Self> {
        Arc::new(Self {
            bytes: Mutex::new(vec![0; width * height * 16]),
            kind: BufferKind::DeviceImage,
            extent: Some([width, height, 1]),
        })
    }
}

impl DeviceMemory for TestMemory {
    fn size(&self) -> usize {
        self.bytes.lock().len()
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

fn test_memory(memory: &dyn DeviceMemory) -> DeviceResult<&TestMemory> {
    memory
        .as_any()
        .downcast_ref::<TestMemory>()
        .ok_or(Status::INVALID_MEM_OBJECT)
}

#[derive(Debug)]
pub struct DoneEvent;

impl EventHandle for DoneEvent {
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

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Write { offset: usize, len: usize },
    Read { len: usize },
    WriteImage { region: [usize; 3] },
    ReadImage { region: [usize; 3] },
    FillImage { color: [u32; 4] },
    Launch { global: NdRange, local: Option<NdRange> },
    Barrier,
    Flush,
    Finish,
}

#[derive(Default)]
pub struct TestQueue {
    pub ops: Mutex<Vec<Op>>,
    pub finish_status: Mutex<Option<Status>>,
    pub write_status: Mutex<Option<Status>>,
}

impl TestQueue {
    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().clone()
    }

    pub fn writes(&self) -> Vec<(usize, usize)> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                Op::Write { offset, len } => Some((*offset, *len)),
                _ => None,
            })
            .collect()
    }

    pub fn reads(&self) -> usize {
        self.ops
            .lock()
            .iter()
            .filter(|op| matches!(op, Op::Read { .. }))
            .count()
    }
}

impl CommandQueue for TestQueue {
    fn write_buffer(
        &self,
        memory: &dyn DeviceMemory,
        _blocking: bool,
        offset: usize,
        data: &[u8],
    ) -> DeviceResult {
        if let Some(status) = self.write_status.lock().take() {
            return Err(status);
        }
        let mem = test_memory(memory)?;
        let mut bytes = mem.bytes.lock();
        bytes
            .get_mut(offset..offset + data.len())
            .ok_or(Status::INVALID_VALUE)?
            .copy_from_slice(data);
        self.ops.lock().push(Op::Write {
            offset,
            len: data.len(),
        });
        Ok(())
    }

    fn read_buffer(&self, memory: &dyn DeviceMemory, offset: usize, data: &mut [u8]) -> DeviceResult {
        let mem = test_memory(memory)?;
        let bytes = mem.bytes.lock();
        data.copy_from_slice(
            bytes
                .get(offset..offset + data.len())
                .ok_or(Status::INVALID_VALUE)?,
        );
        self.ops.lock().push(Op::Read { len: data.len() });
        Ok(())
    }

    fn write_image(
        &self,
        memory: &dyn DeviceMemory,
        _blocking: bool,
        region: [usize; 3],
        data: &[u8],
    ) -> DeviceResult {
        let mem = test_memory(memory)?;
        let mut bytes = mem.bytes.lock();
        let len = data.len().min(bytes.len());
        bytes[..len].copy_from_slice(&data[..len]);
        self.ops.lock().push(Op::WriteImage { region });
        Ok(())
    }

    fn read_image(&self, memory: &dyn DeviceMemory, region: [usize; 3], data: &mut [u8]) -> DeviceResult {
        let mem = test_memory(memory)?;
        let bytes = mem.bytes.lock();
        let len = data.len().min(bytes.len());
        data[..len].copy_from_slice(&bytes[..len]);
        self.ops.lock().push(Op::ReadImage { region });
        Ok(())
    }

    fn fill_image(&self, _memory: &dyn DeviceMemory, color: [u32; 4], _region: [usize; 3]) -> DeviceResult {
        self.ops.lock().push(Op::FillImage { color });
        Ok(())
    }

    fn enqueue_kernel(
        &self,
        _kernel: &dyn CompiledKernel,
        global: &NdRange,
        local: Option<&NdRange>,
        _wait_list: &[Event],
    ) -> DeviceResult<Event> {
        self.ops.lock().push(Op::Launch {
            global: *global,
            local: local.copied(),
        });
        Ok(Arc::new(DoneEvent))
    }

    fn barrier(&self) -> DeviceResult {
        self.ops.lock().push(Op::Barrier);
        Ok(())
    }

    fn flush(&self) -> DeviceResult {
        self.ops.lock().push(Op::Flush);
        Ok(())
    }

    fn finish(&self) -> DeviceResult {
        self.ops.lock().push(Op::Finish);
        match self.finish_status.lock().take() {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct TestKernel {
    pub values: Mutex<Vec<(u32, Vec<u8>)>>,
    pub memories: Mutex<Vec<u32>>,
    pub fail_arg: Option<(u32, Status)>,
}

impl CompiledKernel for TestKernel {
    fn function_name(&self) -> String {
        "main_kernel".to_string()
    }

    fn arg_info(&self, index: u32) -> Option<(String, String)> {
        Some(("int*".to_string(), format!("arg{index}")))
    }

    fn set_arg_value(&mut self, index: u32, bytes: &[u8]) -> DeviceResult {
        if let Some((i, status)) = self.fail_arg {
            if i == index {
                return Err(status);
            }
        }
        self.values.lock().push((index, bytes.to_vec()));
        Ok(())
    }

    fn set_arg_memory(&mut self, index: u32, _memory: &Arc<dyn DeviceMemory>) -> DeviceResult {
        if let Some((i, status)) = self.fail_arg {
            if i == index {
                return Err(status);
            }
        }
        self.memories.lock().push(index);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct TestContext {
    pub info: DeviceInfo,
    pub allocations: Mutex<usize>,
    pub fail_arg: Option<(u32, Status)>,
}

impl TestContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_info(DeviceInfo {
            max_work_group_size: 256,
            max_work_group_dimensions: 3,
            max_work_items_per_dimension: vec![256, 256, 64],
            ..Default::default()
        }))
    }

    pub fn with_info(info: DeviceInfo) -> Self {
        Self {
            info,
            allocations: Mutex::new(0),
            fail_arg: None,
        }
    }

    pub fn allocations(&self) -> usize {
        *self.allocations.lock()
    }
}

impl DeviceContext for TestContext {
    fn device_info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn create_buffer(&self, _access: AccessMode, size: usize) -> DeviceResult<Arc<dyn DeviceMemory>> {
        *self.allocations.lock() += 1;
        Ok(TestMemory::buffer(size))
    }

    fn create_queue(&self) -> DeviceResult<Box<dyn CommandQueue>> {
        Ok(Box::<TestQueue>::default())
    }

    fn build_kernel(&self, _source: &str, _entry_point: &str) -> Result<Box<dyn CompiledKernel>> {
        Ok(Box::new(TestKernel {
            fail_arg: self.fail_arg,
            ..Default::default()
        }))
    }
}
