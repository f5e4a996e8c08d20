//! Fixed-length device values.

use std::fmt;

use bytemuck::Pod;
use parking_lot::Mutex;

use crate::error::{OclinkError, Result};
use crate::memory::MemorySlot;
use crate::types::{AccessMode, ArgScope, BufferKind};
use crate::variable::{DeviceVariable, VariableState};

/// A fixed number `N` of plain elements, by default a single scalar.
///
/// Private-scope values are bound to kernels by value and never allocate
/// device memory unless [`DeviceValue::force_device_buffer`] is set.
pub struct DeviceValue<T: Pod, const N: usize = 1> {
    state: VariableState,
    values: Mutex<[T; N]>,
    scope: ArgScope,
    force_buffer: bool,
    memory: MemorySlot,
}

impl<T: Pod + Send + Sync> DeviceValue<T, 1> {
    /// Create a single-element value.
    pub fn new(name: impl Into<String>, value: T) -> Self {
        Self::build(name.into(), [value])
    }
}

impl<T: Pod + Send + Sync, const N: usize> DeviceValue<T, N> {
    /// Create a single-element value through the generic path.
    ///
    /// Fails with [`OclinkError::InvalidConfig`] unless `N == 1`.
    pub fn scalar(name: impl Into<String>, value: T) -> Result<Self> {
        let name = name.into();
        if N != 1 {
            return Err(OclinkError::config(format!(
                "scalar constructor used for `{name}` which holds {N} elements"
            )));
        }
        Ok(Self::build(name, [value; N]))
    }

    /// Create a value holding `values`.
    ///
    /// Fails with [`OclinkError::InvalidConfig`] for `N == 0`.
    pub fn from_array(name: impl Into<String>, values: [T; N]) -> Result<Self> {
        let name = name.into();
        if N == 0 {
            return Err(OclinkError::config(format!("`{name}` must hold at least one element")));
        }
        Ok(Self::build(name, values))
    }

    fn build(name: String, values: [T; N]) -> Self {
        Self {
            state: VariableState::new(name),
            values: Mutex::new(values),
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

    /// Always bind through a device buffer, even for private scope.
    #[must_use]
    pub fn force_device_buffer(mut self) -> Self {
        self.force_buffer = true;
        self
    }

    /// Argument scope.
    pub fn scope(&self) -> ArgScope {
        self.scope
    }

    /// First element.
    pub fn get(&self) -> T {
        self.values.lock()[0]
    }

    /// Element `index`.
    pub fn get_at(&self, index: usize) -> Option<T> {
        self.values.lock().get(index).copied()
    }

    /// Copy of every element.
    pub fn values(&self) -> [T; N] {
        *self.values.lock()
    }

    /// Overwrite the first element and mark the value dirty.
    pub fn set(&self, value: T) {
        self.values.lock()[0] = value;
        self.state.set_changed(true);
    }

    /// Overwrite element `index` and mark the value dirty.
    pub fn set_at(&self, index: usize, value: T) -> Result<()> {
        let mut values = self.values.lock();
        let slot = values.get_mut(index).ok_or_else(|| {
            OclinkError::precondition(format!(
                "index {index} out of range for `{}` with {N} elements",
                self.state.name()
            ))
        })?;
        *slot = value;
        self.state.set_changed(true);
        Ok(())
    }

    /// Overwrite every element and mark the value dirty.
    pub fn set_values(&self, values: [T; N]) {
        *self.values.lock() = values;
        self.state.set_changed(true);
    }
}

impl<T: Pod + Send + Sync, const N: usize> DeviceVariable for DeviceValue<T, N> {
    fn state(&self) -> &VariableState {
        &self.state
    }

    fn memory_slot(&self) -> &MemorySlot {
        &self.memory
    }

    fn read_bytes(&self) -> Vec<u8> {
        bytemuck::cast_slice(&self.values.lock()[..]).to_vec()
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        let mut values = self.values.lock();
        let dest: &mut [u8] = bytemuck::cast_slice_mut(&mut values[..]);
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
        N * std::mem::size_of::<T>()
    }

    fn element_size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    fn buffer_kind(&self) -> BufferKind {
        BufferKind::HostValue
    }

    fn needs_device_memory(&self) -> bool {
        self.force_buffer || self.scope != ArgScope::Private
    }
}

impl<T: Pod + fmt::Debug, const N: usize> fmt::Debug for DeviceValue<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceValue")
            .field("state", &self.state)
            .field("values", &*self.values.lock())
            .field("scope", &self.scope)
            .finish()
    }
}
