//! Runtime-sized typed buffers.

use std::fmt;

use bytemuck::Pod;
use parking_lot::Mutex;

use crate::error::{OclinkError, Result};
use crate::memory::MemorySlot;
use crate::types::{AccessMode, ArgScope, BufferKind};
use crate::variable::{DeviceVariable, VariableState};

/// An array of `T` whose length is chosen at runtime.
///
/// Cloning duplicates the host elements and settings. The clone starts
/// without a device-memory handle and is dirty.
pub struct TypedBuffer<T: Pod> {
    state: VariableState,
    data: Mutex<Vec<T>>,
    scope: ArgScope,
    force_buffer: bool,
    memory: MemorySlot,
}

impl<T: Pod + Default + Send + Sync> TypedBuffer<T> {
    /// Create a buffer of `len` default elements.
    pub fn new(name: impl Into<String>, len: usize) -> Self {
        Self::from_vec(name, vec![T::default(); len])
    }

    /// Create a buffer holding `data`.
    pub fn from_vec(name: impl Into<String>, data: Vec<T>) -> Self {
        Self {
            state: VariableState::new(name),
            data: Mutex::new(data),
            scope: ArgScope::Global,
            force_buffer: false,
            memory: MemorySlot::new(),
        }
    }

    /// Set the blocking flag.
    #[must_use]
    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.state.set_blocking(blocking);
        self
    }

    /// Set the access mode.
    #[must_use]
    pub fn with_access(mut self, access: AccessMode) -> Self {
        self.state.set_access(access);
        self
    }

    /// Set the argument scope.
    #[must_use]
    pub fn with_scope(mut self, scope: ArgScope) -> Self {
        self.scope = scope;
        self
    }

    /// Always bind through a device buffer.
    #[must_use]
    pub fn force_device_buffer(mut self) -> Self {
        self.force_buffer = true;
        self
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Whether the buffer has no elements.
    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    /// Argument scope.
    pub fn scope(&self) -> ArgScope {
        self.scope
    }

    /// Change the number of elements.
    ///
    /// Resizing to the current length does nothing. Any other length resets
    /// every element to its default and discards the device-memory handle.
    pub fn resize(&self, len: usize) {
        let mut data = self.data.lock();
        if data.len() == len {
            return;
        }
        tracing::debug!(variable = %self.state.name(), old = data.len(), new = len, "Resizing buffer");
        *data = vec![T::default(); len];
        self.memory.discard();
        self.state.set_changed(true);
    }

    /// Element at `index`.
    pub fn get(&self, index: usize) -> Option<T> {
        self.data.lock().get(index).copied()
    }

    /// Overwrite the element at `index` and mark the buffer dirty.
    pub fn set(&self, index: usize, value: T) -> Result<()> {
        let mut data = self.data.lock();
        let len = data.len();
        let slot = data.get_mut(index).ok_or_else(|| {
            OclinkError::precondition(format!(
                "index {index} out of range for `{}` of length {len}",
                self.state.name()
            ))
        })?;
        *slot = value;
        self.state.set_changed(true);
        Ok(())
    }

    /// Overwrite elements starting at 0 and mark the buffer dirty.
    pub fn set_values(&self, values: &[T]) -> Result<()> {
        let mut data = self.data.lock();
        if values.len() > data.len() {
            return Err(OclinkError::precondition(format!(
                "{} values do not fit `{}` of length {}",
                values.len(),
                self.state.name(),
                data.len()
            )));
        }
        data[..values.len()].copy_from_slice(values);
        self.state.set_changed(true);
        Ok(())
    }

    /// Run `f` with mutable access to the elements and mark the buffer dirty.
    pub fn update<R>(&self, f: impl FnOnce(&mut [T]) -> R) -> R {
        let result = f(&mut self.data.lock());
        self.state.set_changed(true);
        result
    }

    /// Copy of the elements.
    pub fn to_vec(&self) -> Vec<T> {
        self.data.lock().clone()
    }
}

impl<T: Pod + Default + Send + Sync> Clone for TypedBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.duplicate(),
            data: Mutex::new(self.data.lock().clone()),
            scope: self.scope,
            force_buffer: self.force_buffer,
            memory: MemorySlot::new(),
        }
    }
}

impl<T: Pod + Default + Send + Sync> DeviceVariable for TypedBuffer<T> {
    fn state(&self) -> &VariableState {
        &self.state
    }

    fn memory_slot(&self) -> &MemorySlot {
        &self.memory
    }

    fn read_bytes(&self) -> Vec<u8> {
        bytemuck::cast_slice(&self.data.lock()[..]).to_vec()
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        let mut data = self.data.lock();
        let dest: &mut [u8] = bytemuck::cast_slice_mut(&mut data[..]);
        if bytes.len() != dest.len() {
            return Err(OclinkError::precondition(format!(
                "`{}` expects {} bytes, got {}",
                self.state.name(),
                dest.len(),
                bytes.len()
            )));
        }
        dest.copy_from_slice(bytes);
        self.state.set_changed(true);
        Ok(())
    }

    fn byte_size(&self) -> usize {
        self.len() * std::mem::size_of::<T>()
    }

    fn element_size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    fn buffer_kind(&self) -> BufferKind {
        BufferKind::DeviceBuffer
    }

    fn needs_device_memory(&self) -> bool {
        self.force_buffer || !(self.scope == ArgScope::Private && self.len() == 1)
    }
}

impl<T: Pod + fmt::Debug> fmt::Debug for TypedBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedBuffer")
            .field("state", &self.state)
            .field("len", &self.data.lock().len())
            .field("scope", &self.scope)
            .field("memory", &self.memory)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestContext, TestQueue};

    #[test]
    fn test_resize_same_length_keeps_handle() {
        let ctx = TestContext::new();
        let buf = TypedBuffer::<f32>::new("weights", 16);
        buf.device_memory(ctx.as_ref()).unwrap();
        buf.set(3, 1.5).unwrap();

        buf.resize(16);
        assert!(buf.memory_slot().is_allocated());
        assert_eq!(buf.get(3), Some(1.5));

        buf.device_memory(ctx.as_ref()).unwrap();
        assert_eq!(ctx.allocations(), 1);
    }

    #[test]
    fn test_resize_new_length_discards_handle() {
        let ctx = TestContext::new();
        let buf = TypedBuffer::<u32>::new("ids", 4);
        buf.device_memory(ctx.as_ref()).unwrap();
        buf.set(0, 9).unwrap();

        buf.resize(8);
        assert!(!buf.memory_slot().is_allocated());
        assert_eq!(buf.to_vec(), vec![0; 8]);
        assert!(!buf.is_uploaded());

        let mem = buf.device_memory(ctx.as_ref()).unwrap().unwrap();
        assert_eq!(mem.size(), 32);
        assert_eq!(ctx.allocations(), 2);
    }

    #[test]
    fn test_clone_duplicates_elements_not_handle() {
        let ctx = TestContext::new();
        let buf = TypedBuffer::from_vec("src", vec![1u16, 2, 3]).with_access(AccessMode::ReadOnly);
        buf.device_memory(ctx.as_ref()).unwrap();

        let copy = buf.clone();
        copy.set(0, 42).unwrap();
        assert_eq!(buf.get(0), Some(1));
        assert_eq!(copy.get(0), Some(42));
        assert_eq!(copy.access(), AccessMode::ReadOnly);
        assert!(copy.existing_memory().is_none());
    }

    #[test]
    fn test_private_single_element_needs_no_memory() {
        let buf = TypedBuffer::<i32>::new("n", 1).with_scope(ArgScope::Private);
        assert!(!buf.needs_device_memory());
        buf.resize(2);
        assert!(buf.needs_device_memory());
    }

    #[test]
    fn test_write_only_never_uploads() {
        let ctx = TestContext::new();
        let queue = TestQueue::default();
        let buf = TypedBuffer::<u8>::new("out", 64).with_access(AccessMode::WriteOnly);
        buf.device_memory(ctx.as_ref()).unwrap();
        buf.upload(&queue).unwrap();
        assert!(queue.writes().is_empty());
    }

    #[test]
    fn test_initial_copy_is_seeded_by_first_upload() {
        let ctx = TestContext::new();
        let queue = TestQueue::default();
        let buf = TypedBuffer::from_vec("lut", vec![5u32, 6])
            .with_access(AccessMode::ReadOnlyWithInitialCopy);
        buf.device_memory(ctx.as_ref()).unwrap();
        assert!(queue.writes().is_empty());

        buf.upload(&queue).unwrap();
        assert_eq!(queue.writes(), vec![(0, 8)]);
        buf.upload(&queue).unwrap();
        assert_eq!(queue.writes().len(), 1);

        buf.update(|d| d.fill(0));
        buf.download(&queue).unwrap();
        assert_eq!(queue.reads(), 0);
        assert_eq!(buf.to_vec(), vec![0, 0]);
    }

    #[test]
    fn test_download_round_trip() {
        let ctx = TestContext::new();
        let queue = TestQueue::default();
        let buf = TypedBuffer::from_vec("rw", vec![1u32, 2, 3, 4]);
        buf.device_memory(ctx.as_ref()).unwrap();
        buf.upload(&queue).unwrap();
        buf.update(|d| d.fill(0));
        buf.download(&queue).unwrap();
        assert_eq!(buf.to_vec(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_device_lock_only_with_memory() {
        let ctx = TestContext::new();
        let buf = TypedBuffer::<u32>::new("locked", 2);
        assert!(buf.acquire_device_memory().is_none());
        buf.device_memory(ctx.as_ref()).unwrap();
        let guard = buf.acquire_device_memory();
        assert!(guard.is_some());
        assert!(buf.state().is_device_locked());
        drop(guard);
        assert!(!buf.state().is_device_locked());
    }
}
