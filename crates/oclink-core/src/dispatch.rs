//! Dispatch groups: upload, bind, launch and wait for one kernel.
//!
//! A group moves through `Idle -> ArgumentsBound -> Running -> Idle`.
//! [`DispatchGroup::run`] uploads pending arguments, binds them, resolves the
//! launch geometry and enqueues the kernel. [`DispatchGroup::wait_for_group`]
//! drains the queue and releases any device-memory locks taken by the run.
//!
//! Device statuses are split in two classes. Broken-context statuses are
//! returned as [`OclinkError::Fatal`]; every other status is logged with the
//! variable or argument involved and the call carries on.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::{OclinkError, Result};
use crate::geometry::LaunchGeometry;
use crate::kernel::{KernelDescriptor, SharedKernel};
use crate::memory::{CommandQueue, CompiledKernel, DeviceContext, DeviceMemory, Event};
use crate::status::{DeviceResult, Status};
use crate::variable::{DeviceMemoryGuard, DeviceVariable};

enum QueueHandle<'a> {
    Owned(Box<dyn CommandQueue>),
    Borrowed(&'a dyn CommandQueue),
}

impl QueueHandle<'_> {
    fn get(&self) -> &dyn CommandQueue {
        match self {
            Self::Owned(queue) => queue.as_ref(),
            Self::Borrowed(queue) => *queue,
        }
    }
}

/// Runs one kernel descriptor on a command queue.
pub struct DispatchGroup<'a> {
    kernel: KernelDescriptor<'a>,
    context: Arc<dyn DeviceContext>,
    compiled: SharedKernel,
    queue: QueueHandle<'a>,
    block_variables: bool,
    sync_upload: bool,
    running: bool,
    arguments_uploaded: bool,
    held_locks: Vec<DeviceMemoryGuard<'a>>,
}

impl<'a> DispatchGroup<'a> {
    /// Create a group with its own queue on the kernel's context.
    ///
    /// The kernel must be compiled.
    pub fn new(kernel: KernelDescriptor<'a>) -> Result<Self> {
        let (context, compiled) = Self::compiled_parts(&kernel)?;
        let queue = context
            .create_queue()
            .map_err(|status| OclinkError::device(status, "command queue creation"))?;
        tracing::info!(kernel = %kernel.entry_point(), "Created dispatch group with owned queue");
        Ok(Self::assemble(kernel, context, compiled, QueueHandle::Owned(queue)))
    }

    /// Create a group on an existing queue. The queue is not dropped with the group.
    pub fn with_queue(kernel: KernelDescriptor<'a>, queue: &'a dyn CommandQueue) -> Result<Self> {
        let (context, compiled) = Self::compiled_parts(&kernel)?;
        tracing::info!(kernel = %kernel.entry_point(), "Created dispatch group on shared queue");
        Ok(Self::assemble(kernel, context, compiled, QueueHandle::Borrowed(queue)))
    }

    fn compiled_parts(kernel: &KernelDescriptor<'_>) -> Result<(Arc<dyn DeviceContext>, SharedKernel)> {
        match (kernel.context(), kernel.compiled()) {
            (Some(context), Some(compiled)) => Ok((Arc::clone(context), Arc::clone(compiled))),
            _ => Err(OclinkError::config(format!(
                "kernel `{}` must be compiled before dispatch",
                kernel.entry_point()
            ))),
        }
    }

    fn assemble(
        kernel: KernelDescriptor<'a>,
        context: Arc<dyn DeviceContext>,
        compiled: SharedKernel,
        queue: QueueHandle<'a>,
    ) -> Self {
        Self {
            kernel,
            context,
            compiled,
            queue,
            block_variables: false,
            sync_upload: true,
            running: false,
            arguments_uploaded: false,
            held_locks: Vec::new(),
        }
    }

    /// Hold every argument's device-memory lock from `run` until `wait_for_group`.
    #[must_use]
    pub fn block_variables(mut self, block: bool) -> Self {
        self.block_variables = block;
        self
    }

    /// Whether the implicit upload in `run` waits for the queue to drain. On by default.
    #[must_use]
    pub fn sync_upload(mut self, sync: bool) -> Self {
        self.sync_upload = sync;
        self
    }

    /// The group's private copy of the kernel descriptor.
    pub fn kernel(&self) -> &KernelDescriptor<'a> {
        &self.kernel
    }

    /// Queue used by this group.
    pub fn queue(&self) -> &dyn CommandQueue {
        self.queue.get()
    }

    /// Whether a run is in flight.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Whether arguments have been uploaded since the last wait.
    pub fn arguments_uploaded(&self) -> bool {
        self.arguments_uploaded
    }

    /// Number of device-memory locks currently held.
    pub fn held_locks(&self) -> usize {
        self.held_locks.len()
    }

    /// Upload argument `index`, creating its device memory first if needed.
    pub fn update_variable(&self, index: usize) -> Result<()> {
        let variable = self.kernel.argument(index).ok_or_else(|| {
            OclinkError::precondition(format!("kernel has no argument {index}"))
        })?;
        let outcome = variable
            .device_memory(self.context.as_ref())
            .and_then(|_| variable.upload(self.queue.get()));
        absorb_recoverable(outcome, index, variable.name())
    }

    /// Upload every argument in order.
    ///
    /// With `force` every argument is marked changed first. With `sync` the
    /// call waits until the queue has drained.
    pub fn upload_arguments(&mut self, sync: bool, force: bool) -> Result<()> {
        for index in 0..self.kernel.arguments().len() {
            if force {
                if let Some(variable) = self.kernel.argument(index) {
                    variable.set_changed(true);
                }
            }
            self.update_variable(index)?;
        }

        let queue = self.queue.get();
        report(queue.flush(), "flush after argument upload")?;
        if sync {
            report(queue.barrier(), "barrier after argument upload")?;
            report(queue.finish(), "finish after argument upload")?;
        }

        self.arguments_uploaded = true;
        Ok(())
    }

    /// Launch the kernel and return its completion event.
    ///
    /// `override_kernel` replaces the group's descriptor for this and later
    /// runs and forces a fresh argument upload. Every call must be followed
    /// by [`wait_for_group`](Self::wait_for_group) before the next run.
    pub fn run(
        &mut self,
        wait_list: &[Event],
        override_kernel: Option<&KernelDescriptor<'a>>,
    ) -> Result<Event> {
        if self.running {
            return Err(OclinkError::precondition(format!(
                "kernel `{}` is still running; wait for the group first",
                self.kernel.entry_point()
            )));
        }

        if let Some(kernel) = override_kernel {
            let (context, compiled) = Self::compiled_parts(kernel)?;
            self.kernel = kernel.clone();
            self.context = context;
            self.compiled = compiled;
            self.arguments_uploaded = false;
        }

        let memories = self.prepare_memory()?;
        if self.block_variables {
            self.lock_arguments();
        }
        self.running = true;

        match self.launch(&memories, wait_list) {
            Ok(event) => Ok(event),
            Err(err) => {
                self.held_locks.clear();
                self.running = false;
                Err(err)
            }
        }
    }

    fn prepare_memory(&self) -> Result<Vec<Option<Arc<dyn DeviceMemory>>>> {
        let mut memories = Vec::with_capacity(self.kernel.arguments().len());
        for (index, variable) in self.kernel.arguments().iter().enumerate() {
            match variable.device_memory(self.context.as_ref()) {
                Ok(memory) => memories.push(memory),
                Err(err) => {
                    absorb_recoverable(Err(err), index, variable.name())?;
                    memories.push(None);
                }
            }
        }
        Ok(memories)
    }

    /// Locks are taken in address order so groups sharing variables in a
    /// different argument order cannot deadlock.
    fn lock_arguments(&mut self) {
        let mut arguments: Vec<&'a dyn DeviceVariable> = self.kernel.arguments().to_vec();
        arguments.sort_by_key(|variable| lock_address(*variable));
        arguments.dedup_by_key(|variable| lock_address(*variable));
        for variable in arguments {
            if let Some(guard) = variable.acquire_device_memory() {
                tracing::trace!(variable = %variable.name(), "Acquired device memory");
                self.held_locks.push(guard);
            }
        }
    }

    fn launch(
        &mut self,
        memories: &[Option<Arc<dyn DeviceMemory>>],
        wait_list: &[Event],
    ) -> Result<Event> {
        if !self.arguments_uploaded {
            self.upload_arguments(self.sync_upload, false)?;
        }

        let mut compiled = self.compiled.lock();
        for (index, (variable, memory)) in self.kernel.arguments().iter().zip(memories).enumerate() {
            let arg = index as u32;
            let bound = match memory {
                Some(memory) => compiled.set_arg_memory(arg, memory),
                None if !variable.needs_device_memory() => {
                    compiled.set_arg_value(arg, &variable.read_bytes())
                }
                None => {
                    tracing::warn!(index, variable = %variable.name(), "No device memory to bind");
                    continue;
                }
            };
            if let Err(status) = bound {
                if status.is_fatal() {
                    tracing::error!(index, variable = %variable.name(), %status, "Kernel argument binding failed");
                    return Err(OclinkError::Fatal {
                        status,
                        context: format!("binding argument {index} (`{}`)", variable.name()),
                    });
                }
                tracing::warn!(index, variable = %variable.name(), %status, "Could not bind kernel argument");
            }
        }

        let geometry = LaunchGeometry::resolve(
            self.kernel.global(),
            self.kernel.local(),
            &self.context.device_info(),
        );
        if self.kernel.local().is_empty() {
            self.kernel.set_local(geometry.local);
        }

        let queue = self.queue.get();
        let event = queue
            .enqueue_kernel(&**compiled, &geometry.global, Some(&geometry.local), wait_list)
            .map_err(|status| self.launch_failure(status, &**compiled))?;
        queue
            .flush()
            .map_err(|status| self.launch_failure(status, &**compiled))?;

        tracing::debug!(
            kernel = %self.kernel.entry_point(),
            global = %geometry.global,
            local = %geometry.local,
            "Kernel enqueued"
        );
        Ok(event)
    }

    fn launch_failure(&self, status: Status, compiled: &dyn CompiledKernel) -> OclinkError {
        let info = describe_arguments(compiled, self.kernel.arguments().len());
        tracing::error!(kernel = %self.kernel.entry_point(), %status, "Could not start kernel");
        OclinkError::Fatal {
            status,
            context: format!("starting kernel\n  -> {info}"),
        }
    }

    /// Block until the queue drains and release the locks taken by `run`.
    pub fn wait_for_group(&mut self) -> Result<()> {
        let finished = self.queue.get().finish();

        if self.running {
            let released = self.held_locks.len();
            self.held_locks.clear();
            tracing::trace!(released, "Released device memory");
        }
        self.running = false;
        self.arguments_uploaded = false;

        report(finished, "waiting for dispatch group")
    }

    /// Download one variable.
    pub fn download_result(&self, variable: &dyn DeviceVariable) -> Result<()> {
        match variable.download(self.queue.get()) {
            Err(err) if err.is_recoverable() => {
                tracing::warn!(variable = %variable.name(), error = %err, "Could not read buffer from device");
                Ok(())
            }
            other => other,
        }
    }

    /// Download argument `index`.
    pub fn download_argument(&self, index: usize) -> Result<()> {
        let variable = self.kernel.argument(index).ok_or_else(|| {
            OclinkError::precondition(format!("kernel has no argument {index}"))
        })?;
        self.download_result(variable)
    }

    /// Download each of `variables`.
    pub fn download_results(&self, variables: &[&dyn DeviceVariable]) -> Result<()> {
        variables.iter().try_for_each(|v| self.download_result(*v))
    }

    /// Download every argument.
    pub fn download_all(&self) -> Result<()> {
        (0..self.kernel.arguments().len()).try_for_each(|i| self.download_argument(i))
    }

    /// Entry point and argument type and name list, for diagnostics.
    pub fn kernel_arg_info(&self) -> String {
        describe_arguments(&**self.compiled.lock(), self.kernel.arguments().len())
    }
}

impl Drop for DispatchGroup<'_> {
    fn drop(&mut self) {
        if self.running {
            tracing::debug!(
                kernel = %self.kernel.entry_point(),
                locks = self.held_locks.len(),
                "Dropping running dispatch group"
            );
        }
    }
}

fn lock_address(variable: &dyn DeviceVariable) -> usize {
    variable as *const dyn DeviceVariable as *const () as usize
}

fn describe_arguments(kernel: &dyn CompiledKernel, count: usize) -> String {
    let mut out = format!("Method: {}\nArgs:\n", kernel.function_name());
    for index in 0..count {
        let (type_name, name) = kernel
            .arg_info(index as u32)
            .unwrap_or_else(|| ("?".to_string(), format!("arg{index}")));
        let _ = writeln!(out, "{type_name}  {name}");
    }
    out
}

/// Escalate fatal statuses and log the rest.
fn report(result: DeviceResult, operation: &str) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(status) if status.is_fatal() => {
            tracing::error!(%status, operation, "Broken command queue");
            Err(OclinkError::device(status, operation))
        }
        Err(status) => {
            tracing::warn!(%status, operation, "Device operation failed");
            Ok(())
        }
    }
}

fn absorb_recoverable(result: Result<()>, index: usize, name: &str) -> Result<()> {
    match result {
        Err(err) if err.is_recoverable() => {
            tracing::warn!(index, variable = %name, error = %err, "Could not write buffer to device");
            Ok(())
        }
        Err(err) => {
            if err.is_fatal() {
                tracing::error!(index, variable = %name, error = %err, "Cannot continue with broken command queue");
            }
            Err(err)
        }
        Ok(()) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::TypedBuffer;
    use crate::geometry::NdRange;
    use crate::testing::{Op, TestContext, TestQueue};
    use crate::types::{AccessMode, ArgScope};
    use crate::value::DeviceValue;

    fn compiled<'a>(ctx: Arc<TestContext>, args: Vec<&'a dyn DeviceVariable>) -> KernelDescriptor<'a> {
        KernelDescriptor::new("__kernel void main_kernel() {}")
            .with_arguments(args)
            .with_global(NdRange::d1(1024))
            .compiled_for(ctx)
            .unwrap()
    }

    #[test]
    fn test_uncompiled_kernel_is_rejected() {
        let err = DispatchGroup::new(KernelDescriptor::new("src")).err().unwrap();
        assert!(matches!(err, OclinkError::InvalidConfig(_)));
    }

    #[test]
    fn test_run_uploads_binds_and_launches() {
        let ctx = TestContext::new();
        let queue = TestQueue::default();
        let data = TypedBuffer::from_vec("data", vec![1.0f32; 1024]);
        let scale = DeviceValue::new("scale", 2.0f32).with_scope(ArgScope::Private);
        let kernel = compiled(ctx, vec![&data as &dyn DeviceVariable, &scale]);

        let mut group = DispatchGroup::with_queue(kernel, &queue).unwrap();
        group.run(&[], None).unwrap();
        assert!(group.is_running());
        assert!(data.is_uploaded());

        let ops = queue.ops();
        assert_eq!(ops[0], Op::Write { offset: 0, len: 4096 });
        assert!(ops.contains(&Op::Launch {
            global: NdRange::d1(1024),
            local: Some(NdRange::d1(256)),
        }));

        let bound = group.compiled.lock();
        let kernel = bound
            .as_any()
            .downcast_ref::<crate::testing::TestKernel>()
            .unwrap();
        assert_eq!(*kernel.memories.lock(), vec![0]);
        assert_eq!(kernel.values.lock()[0], (1, 2.0f32.to_ne_bytes().to_vec()));
        drop(bound);

        group.wait_for_group().unwrap();
        assert!(!group.is_running());
    }

    #[test]
    fn test_run_twice_without_wait_fails() {
        let ctx = TestContext::new();
        let queue = TestQueue::default();
        let mut group = DispatchGroup::with_queue(compiled(ctx, vec![]), &queue).unwrap();
        group.run(&[], None).unwrap();
        assert!(matches!(group.run(&[], None), Err(OclinkError::Precondition(_))));
        group.wait_for_group().unwrap();
        group.run(&[], None).unwrap();
    }

    #[test]
    fn test_sync_upload_drains_queue() {
        let ctx = TestContext::new();
        let queue = TestQueue::default();
        let data = TypedBuffer::<u32>::new("data", 4);
        let mut group = DispatchGroup::with_queue(compiled(ctx, vec![&data as &dyn DeviceVariable]), &queue).unwrap();

        group.upload_arguments(true, false).unwrap();
        assert_eq!(
            queue.ops(),
            vec![Op::Write { offset: 0, len: 16 }, Op::Flush, Op::Barrier, Op::Finish]
        );

        group.upload_arguments(false, false).unwrap();
        assert_eq!(queue.writes().len(), 1);

        group.upload_arguments(false, true).unwrap();
        assert_eq!(queue.writes().len(), 2);
    }

    #[test]
    fn test_blocking_group_holds_and_releases_locks() {
        let ctx = TestContext::new();
        let queue = TestQueue::default();
        let a = TypedBuffer::<u32>::new("a", 4);
        let b = TypedBuffer::<u32>::new("b", 4).with_access(AccessMode::WriteOnly);
        let kernel = compiled(ctx, vec![&a as &dyn DeviceVariable, &b, &a]);

        let mut group = DispatchGroup::with_queue(kernel, &queue)
            .unwrap()
            .block_variables(true);
        group.run(&[], None).unwrap();
        assert_eq!(group.held_locks(), 2);
        assert!(a.state().is_device_locked());
        assert!(b.state().is_device_locked());

        group.wait_for_group().unwrap();
        assert_eq!(group.held_locks(), 0);
        assert!(!a.state().is_device_locked());
        assert!(!b.state().is_device_locked());
    }

    #[test]
    fn test_recoverable_bind_error_still_releases_locks() {
        let mut ctx = TestContext::with_info(TestContext::new().info.clone());
        ctx.fail_arg = Some((0, Status::INVALID_ARG_VALUE));
        let ctx = Arc::new(ctx);
        let queue = TestQueue::default();
        let a = TypedBuffer::<u32>::new("a", 4);

        let mut group = DispatchGroup::with_queue(compiled(ctx, vec![&a as &dyn DeviceVariable]), &queue)
            .unwrap()
            .block_variables(true);
        group.run(&[], None).unwrap();
        assert!(a.state().is_device_locked());
        group.wait_for_group().unwrap();
        assert!(!a.state().is_device_locked());
    }

    #[test]
    fn test_broken_queue_on_wait_is_fatal() {
        let ctx = TestContext::new();
        let queue = TestQueue::default();
        let a = TypedBuffer::<u32>::new("a", 4);
        let mut group = DispatchGroup::with_queue(compiled(ctx, vec![&a as &dyn DeviceVariable]), &queue)
            .unwrap()
            .block_variables(true);
        group.run(&[], None).unwrap();

        *queue.finish_status.lock() = Some(Status::INVALID_COMMAND_QUEUE);
        let err = group.wait_for_group().unwrap_err();
        assert!(err.is_fatal());
        assert!(!a.state().is_device_locked());
        assert!(!group.is_running());
    }

    #[test]
    fn test_non_fatal_wait_status_is_logged() {
        let ctx = TestContext::new();
        let queue = TestQueue::default();
        let mut group = DispatchGroup::with_queue(compiled(ctx, vec![]), &queue).unwrap();
        *queue.finish_status.lock() = Some(Status::OUT_OF_RESOURCES);
        group.wait_for_group().unwrap();
    }

    #[test]
    fn test_dropping_running_group_releases_locks() {
        let ctx = TestContext::new();
        let queue = TestQueue::default();
        let a = TypedBuffer::<u32>::new("a", 4);
        {
            let mut group = DispatchGroup::with_queue(compiled(ctx, vec![&a as &dyn DeviceVariable]), &queue)
                .unwrap()
                .block_variables(true);
            group.run(&[], None).unwrap();
            assert!(a.state().is_device_locked());
        }
        assert!(!a.state().is_device_locked());
    }

    #[test]
    fn test_download_argument_respects_access() {
        let ctx = TestContext::new();
        let queue = TestQueue::default();
        let input = TypedBuffer::<u32>::new("in", 4).with_access(AccessMode::ReadOnly);
        let output = TypedBuffer::<u32>::new("out", 4).with_access(AccessMode::WriteOnly);
        let mut group =
            DispatchGroup::with_queue(compiled(ctx, vec![&input as &dyn DeviceVariable, &output]), &queue).unwrap();
        group.run(&[], None).unwrap();
        group.wait_for_group().unwrap();

        group.download_all().unwrap();
        assert_eq!(queue.reads(), 1);
        assert!(group.download_argument(5).is_err());
    }

    #[test]
    fn test_kernel_arg_info_lists_arguments() {
        let ctx = TestContext::new();
        let queue = TestQueue::default();
        let a = TypedBuffer::<u32>::new("a", 4);
        let group = DispatchGroup::with_queue(compiled(ctx, vec![&a as &dyn DeviceVariable]), &queue).unwrap();
        let info = group.kernel_arg_info();
        assert!(info.contains("Method: main_kernel"));
        assert!(info.contains("int*  arg0"));
    }
}
