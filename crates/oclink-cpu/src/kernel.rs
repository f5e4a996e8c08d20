//! Host kernels: Rust closures standing in for compiled device code.

use std::any::Any;
use std::sync::Arc;

use bytemuck::Pod;

use oclink_core::geometry::NdRange;
use oclink_core::memory::{CompiledKernel, DeviceMemory};
use oclink_core::status::{DeviceResult, Status};

use crate::memory::host_memory;

/// Body of a host kernel.
pub type KernelFn = Arc<dyn Fn(&KernelInvocation<'_>) + Send + Sync>;

/// A bound kernel argument.
#[derive(Debug, Clone)]
pub enum KernelArg {
    /// Raw bytes bound by value.
    Value(Vec<u8>),
    /// A device-memory object.
    Memory(Arc<dyn DeviceMemory>),
}

/// One launch of a host kernel: arguments and geometry.
pub struct KernelInvocation<'a> {
    /// Global size.
    pub global: NdRange,
    /// Local size.
    pub local: NdRange,
    args: &'a [Option<KernelArg>],
}

impl<'a> KernelInvocation<'a> {
    /// Number of bound arguments.
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// By-value argument `index` read as `T`.
    pub fn value<T: Pod>(&self, index: usize) -> Option<T> {
        match self.args.get(index)? {
            Some(KernelArg::Value(bytes)) if bytes.len() >= std::mem::size_of::<T>() => {
                Some(bytemuck::pod_read_unaligned(&bytes[..std::mem::size_of::<T>()]))
            }
            _ => None,
        }
    }

    /// Copy of memory argument `index` as elements of `T`.
    pub fn read<T: Pod>(&self, index: usize) -> Option<Vec<T>> {
        let memory = self.memory(index)?;
        let mut bytes = vec![0u8; memory.size()];
        host_memory(&**memory).ok()?.read_at(0, &mut bytes).ok()?;
        Some(bytemuck::pod_collect_to_vec(&bytes))
    }

    /// Overwrite the start of memory argument `index` with `values`.
    pub fn write<T: Pod>(&self, index: usize, values: &[T]) -> DeviceResult {
        let memory = self.memory(index).ok_or(Status::INVALID_ARG_VALUE)?;
        host_memory(&**memory)?.write_at(0, bytemuck::cast_slice(values))
    }

    /// Read memory argument `index`, let `f` modify it, and write it back.
    pub fn update<T: Pod>(&self, index: usize, f: impl FnOnce(&mut [T])) -> DeviceResult {
        let mut values = self.read::<T>(index).ok_or(Status::INVALID_ARG_VALUE)?;
        f(&mut values);
        self.write(index, &values)
    }

    fn memory(&self, index: usize) -> Option<&'a Arc<dyn DeviceMemory>> {
        match self.args.get(index)? {
            Some(KernelArg::Memory(memory)) => Some(memory),
            _ => None,
        }
    }
}

/// A kernel built by [`HostContext`](crate::HostContext).
pub struct HostKernel {
    name: String,
    args: Vec<Option<KernelArg>>,
    arg_names: Vec<(String, String)>,
    body: Option<KernelFn>,
}

impl HostKernel {
    pub(crate) fn new(name: String, arg_names: Vec<(String, String)>, body: Option<KernelFn>) -> Self {
        Self {
            name,
            args: Vec::new(),
            arg_names,
            body,
        }
    }

    /// Bound arguments by index.
    pub fn args(&self) -> &[Option<KernelArg>] {
        &self.args
    }

    fn slot(&mut self, index: u32) -> &mut Option<KernelArg> {
        let index = index as usize;
        if self.args.len() <= index {
            self.args.resize(index + 1, None);
        }
        &mut self.args[index]
    }

    /// Run the body once for the given geometry.
    pub(crate) fn execute(&self, global: NdRange, local: NdRange) -> DeviceResult {
        if self.args.iter().any(Option::is_none) {
            return Err(Status::INVALID_KERNEL_ARGS);
        }
        if let Some(body) = &self.body {
            body(&KernelInvocation {
                global,
                local,
                args: &self.args,
            });
        }
        Ok(())
    }
}

impl CompiledKernel for HostKernel {
    fn function_name(&self) -> String {
        self.name.clone()
    }

    fn arg_info(&self, index: u32) -> Option<(String, String)> {
        self.arg_names.get(index as usize).cloned()
    }

    fn set_arg_value(&mut self, index: u32, bytes: &[u8]) -> DeviceResult {
        *self.slot(index) = Some(KernelArg::Value(bytes.to_vec()));
        Ok(())
    }

    fn set_arg_memory(&mut self, index: u32, memory: &Arc<dyn DeviceMemory>) -> DeviceResult {
        host_memory(&**memory)?;
        *self.slot(index) = Some(KernelArg::Memory(Arc::clone(memory)));
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Parse `(type, name)` pairs of the entry point's parameter list.
pub(crate) fn parse_arg_names(source: &str, entry_point: &str) -> Vec<(String, String)> {
    let Some(pos) = source.find(&format!("{entry_point}(")) else {
        return Vec::new();
    };
    let params = &source[pos + entry_point.len() + 1..];
    let Some(end) = params.find(')') else {
        return Vec::new();
    };
    params[..end]
        .split(',')
        .filter_map(|param| {
            let param = param.trim();
            let split = param.rfind(|c: char| c.is_whitespace() || c == '*')?;
            let name = param[split + 1..].trim();
            let ty = param[..=split].trim();
            (!name.is_empty()).then(|| (ty.to_string(), name.to_string()))
        })
        .collect()
}
