//! Ring buffer variable with producer/consumer cursors and wrap-aware
//! partial uploads.
//!
//! The host producer appends with [`RingBuffer::write_next`]. Once the host
//! is done with a segment it moves the device read boundary with
//! [`RingBuffer::set_read_boundary`]; the next upload then sends only the
//! slots between the read cursor and that boundary, split in two writes when
//! the range wraps past the end of the ring.
//!
//! The read cursor and the boundary share one lock. Slot contents are guarded
//! separately, so the protocol assumes a single producer and a single
//! boundary setter. When both locks are needed, slots are locked first.

use std::fmt;

use bytemuck::Pod;
use parking_lot::Mutex;

use crate::error::{OclinkError, Result};
use crate::memory::{CommandQueue, MemorySlot};
use crate::types::{AccessMode, ArgScope, BufferKind};
use crate::variable::{DeviceVariable, VariableState};

struct Slots<T> {
    values: Vec<T>,
    /// Next slot to write, in `0..=capacity`.
    write: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct Cursors {
    read: usize,
    boundary: usize,
}

/// Fixed-capacity circular buffer of `T`.
pub struct RingBuffer<T: Pod> {
    state: VariableState,
    slots: Mutex<Slots<T>>,
    cursors: Mutex<Cursors>,
    sentinel: T,
    capacity: usize,
    scope: ArgScope,
    memory: MemorySlot,
}

impl<T: Pod + Default + Send + Sync> RingBuffer<T> {
    /// Create an empty ring with room for `capacity` elements.
    pub fn new(name: impl Into<String>, capacity: usize) -> Result<Self> {
        Self::with_data(name, capacity, &[])
    }

    /// Create a ring whose first slots hold `data`. The write cursor starts after it.
    pub fn with_data(name: impl Into<String>, capacity: usize, data: &[T]) -> Result<Self> {
        let name = name.into();
        if capacity == 0 {
            return Err(OclinkError::config(format!("ring buffer `{name}` needs a non-zero capacity")));
        }
        if data.len() > capacity {
            return Err(OclinkError::config(format!(
                "{} initial elements exceed capacity {capacity} of `{name}`",
                data.len()
            )));
        }

        let mut values = vec![T::default(); capacity];
        values[..data.len()].copy_from_slice(data);

        Ok(Self {
            state: VariableState::new(name),
            slots: Mutex::new(Slots {
                values,
                write: data.len(),
            }),
            cursors: Mutex::new(Cursors::default()),
            sentinel: T::default(),
            capacity,
            scope: ArgScope::Global,
            memory: MemorySlot::new(),
        })
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

    /// Value returned by [`RingBuffer::get`] for slots that hold no data.
    #[must_use]
    pub fn with_sentinel(mut self, sentinel: T) -> Self {
        self.sentinel = sentinel;
        self
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append one element and mark the ring dirty.
    pub fn write_next(&self, value: T) {
        let mut slots = self.slots.lock();
        let index = slots.write % self.capacity;
        slots.values[index] = value;
        slots.write = index + 1;
        self.state.set_changed(true);
    }

    /// Append `value` `count` times.
    pub fn write_repeated(&self, value: T, count: usize) {
        let mut slots = self.slots.lock();
        for _ in 0..count {
            let index = slots.write % self.capacity;
            slots.values[index] = value;
            slots.write = index + 1;
        }
        self.state.set_changed(true);
    }

    /// Consume the element at the read cursor.
    ///
    /// Fails with [`OclinkError::Precondition`] when the read cursor has
    /// caught up with the write cursor. A write cursor at `capacity` marks a
    /// full ring, so the raw cursors are compared.
    pub fn read_next(&self) -> Result<T> {
        let slots = self.slots.lock();
        let mut cursors = self.cursors.lock();
        if cursors.read == slots.write {
            return Err(OclinkError::precondition(format!(
                "read from empty ring buffer `{}`",
                self.state.name()
            )));
        }
        let index = cursors.read % self.capacity;
        cursors.read = index + 1;
        Ok(slots.values[index])
    }

    /// Element at `index` (taken modulo capacity).
    ///
    /// While the read cursor is not ahead of the write cursor, slots at or
    /// past the write cursor hold no data and yield the sentinel.
    pub fn get(&self, index: usize) -> T {
        let slots = self.slots.lock();
        let read = self.cursors.lock().read;
        let index = index % self.capacity;
        if read <= slots.write && index >= slots.write {
            return self.sentinel;
        }
        slots.values[index]
    }

    /// Let the device read up to slot `pos` on the next upload.
    ///
    /// Call after the host has finished with the preceding segment.
    pub fn set_read_boundary(&self, pos: usize) -> Result<()> {
        if pos > self.capacity {
            return Err(OclinkError::precondition(format!(
                "read boundary {pos} exceeds capacity {} of `{}`",
                self.capacity,
                self.state.name()
            )));
        }
        let mut cursors = self.cursors.lock();
        if cursors.boundary != pos {
            cursors.boundary = pos;
            self.state.set_changed(true);
        }
        Ok(())
    }

    /// Current device read boundary.
    pub fn read_boundary(&self) -> usize {
        self.cursors.lock().boundary
    }

    /// Elements between the read cursor and the boundary, wrapping past the end.
    pub fn available(&self) -> usize {
        let cursors = self.cursors.lock();
        if cursors.boundary >= cursors.read {
            cursors.boundary - cursors.read
        } else {
            self.capacity - cursors.read + cursors.boundary
        }
    }

    /// Next slot to write.
    pub fn write_cursor(&self) -> usize {
        self.slots.lock().write
    }

    /// Move the write cursor.
    pub fn set_write_cursor(&self, pos: usize) -> Result<()> {
        if pos > self.capacity {
            return Err(OclinkError::precondition(format!(
                "write cursor {pos} exceeds capacity {}",
                self.capacity
            )));
        }
        self.slots.lock().write = pos;
        Ok(())
    }

    /// Next slot to consume.
    pub fn read_cursor(&self) -> usize {
        self.cursors.lock().read
    }

    /// Move the read cursor.
    pub fn set_read_cursor(&self, pos: usize) -> Result<()> {
        if pos > self.capacity {
            return Err(OclinkError::precondition(format!(
                "read cursor {pos} exceeds capacity {}",
                self.capacity
            )));
        }
        self.cursors.lock().read = pos;
        Ok(())
    }

    /// Copy of every slot in storage order.
    pub fn to_vec(&self) -> Vec<T> {
        self.slots.lock().values.clone()
    }
}

impl<T: Pod + Default + Send + Sync> DeviceVariable for RingBuffer<T> {
    fn state(&self) -> &VariableState {
        &self.state
    }

    fn memory_slot(&self) -> &MemorySlot {
        &self.memory
    }

    fn read_bytes(&self) -> Vec<u8> {
        bytemuck::cast_slice(&self.slots.lock().values[..]).to_vec()
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        let mut slots = self.slots.lock();
        let dest: &mut [u8] = bytemuck::cast_slice_mut(&mut slots.values[..]);
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
        self.capacity * std::mem::size_of::<T>()
    }

    fn element_size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    fn buffer_kind(&self) -> BufferKind {
        BufferKind::DeviceBuffer
    }

    fn needs_device_memory(&self) -> bool {
        !(self.scope == ArgScope::Private && self.capacity == 1)
    }

    fn available_bytes(&self) -> usize {
        self.available() * std::mem::size_of::<T>()
    }

    fn data_offset(&self) -> usize {
        (self.read_cursor() % self.capacity) * std::mem::size_of::<T>()
    }

    /// Send the slots in `[read cursor, boundary)` and advance the read
    /// cursor to the boundary.
    ///
    /// A wrapped range is written as the tail `[read, capacity)` followed by
    /// the head `[0, boundary)`.
    fn upload(&self, queue: &dyn CommandQueue) -> Result<()> {
        if self.is_uploaded() || self.access() == AccessMode::WriteOnly {
            return Ok(());
        }
        let Some(memory) = self.existing_memory() else {
            return Ok(());
        };

        let elem = std::mem::size_of::<T>();
        let (read, boundary, segments) = {
            let slots = self.slots.lock();
            let Cursors { read, boundary } = *self.cursors.lock();
            if read == boundary {
                return Ok(());
            }
            // A read cursor at `capacity` sits on slot 0.
            let read = read % self.capacity;
            if read == boundary {
                return Ok(());
            }

            let bytes: &[u8] = bytemuck::cast_slice(&slots.values[..]);
            let mut segments: Vec<(usize, Vec<u8>)> = Vec::with_capacity(2);
            if read < boundary {
                segments.push((read * elem, bytes[read * elem..boundary * elem].to_vec()));
            } else {
                segments.push((read * elem, bytes[read * elem..self.capacity * elem].to_vec()));
                if boundary > 0 {
                    segments.push((0, bytes[..boundary * elem].to_vec()));
                }
            }
            (read, boundary, segments)
        };

        let blocking = self.state.is_blocking();
        for (offset, data) in &segments {
            tracing::debug!(
                variable = %self.name(),
                offset,
                bytes = data.len(),
                read,
                boundary,
                "Uploading ring segment"
            );
            queue
                .write_buffer(memory.as_ref(), blocking, *offset, data)
                .map_err(|status| self.state.device_error(status, "ring upload"))?;
        }

        let mut cursors = self.cursors.lock();
        cursors.read = boundary % self.capacity;
        if cursors.boundary == boundary {
            self.state.set_changed(false);
        }
        Ok(())
    }
}

impl<T: Pod + fmt::Debug> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cursors = *self.cursors.lock();
        f.debug_struct("RingBuffer")
            .field("state", &self.state)
            .field("capacity", &self.capacity)
            .field("write", &self.slots.lock().write)
            .field("read", &cursors.read)
            .field("boundary", &cursors.boundary)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestContext, TestQueue};

    fn ring(capacity: usize) -> (RingBuffer<u32>, TestQueue) {
        let ctx = TestContext::new();
        let ring = RingBuffer::new("samples", capacity).unwrap();
        ring.device_memory(ctx.as_ref()).unwrap();
        (ring, TestQueue::default())
    }

    #[test]
    fn test_fresh_ring_has_nothing_available() {
        let ring = RingBuffer::<u32>::new("r", 8).unwrap();
        assert_eq!(ring.available(), 0);
        assert_eq!(ring.available_bytes(), 0);
    }

    #[test]
    fn test_available_follows_boundary() {
        let ring = RingBuffer::<u32>::new("r", 8).unwrap();
        for k in 0..=8 {
            ring.set_read_boundary(k).unwrap();
            assert_eq!(ring.available(), k);
        }

        ring.set_read_cursor(6).unwrap();
        ring.set_read_boundary(2).unwrap();
        assert_eq!(ring.available(), 4);

        assert!(ring.set_read_boundary(9).is_err());
    }

    #[test]
    fn test_wrapping_upload_splits_segments() {
        let (ring, queue) = ring(8);
        for v in 0..5 {
            ring.write_next(v);
        }
        assert_eq!(ring.write_cursor(), 5);
        ring.set_read_boundary(5).unwrap();
        ring.upload(&queue).unwrap();
        assert_eq!(queue.writes(), vec![(0, 20)]);
        assert_eq!(ring.read_cursor(), 5);

        for v in 5..9 {
            ring.write_next(v);
        }
        assert_eq!(ring.write_cursor(), 1);
        ring.set_read_boundary(1).unwrap();
        assert_eq!(ring.available(), 4);
        ring.upload(&queue).unwrap();
        assert_eq!(queue.writes(), vec![(0, 20), (20, 12), (0, 4)]);
        assert_eq!(ring.read_cursor(), 1);
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn test_upload_twice_transfers_once() {
        let (ring, queue) = ring(4);
        ring.write_next(1);
        ring.write_next(2);
        ring.set_read_boundary(2).unwrap();
        ring.upload(&queue).unwrap();
        ring.upload(&queue).unwrap();
        assert_eq!(queue.writes().len(), 1);
    }

    #[test]
    fn test_full_ring_upload_is_contiguous() {
        let (ring, queue) = ring(4);
        ring.write_repeated(7, 4);
        ring.set_read_boundary(4).unwrap();
        ring.upload(&queue).unwrap();
        assert_eq!(queue.writes(), vec![(0, 16)]);
        assert_eq!(ring.read_cursor(), 0);
    }

    #[test]
    fn test_read_cursor_at_capacity_uploads_from_start() {
        let (ring, queue) = ring(4);
        ring.set_read_cursor(4).unwrap();
        ring.write_next(1);
        ring.write_next(2);
        ring.set_read_boundary(2).unwrap();
        ring.upload(&queue).unwrap();
        assert_eq!(queue.writes(), vec![(0, 8)]);
        assert_eq!(ring.read_cursor(), 2);
        assert!(ring.is_uploaded());
    }

    #[test]
    fn test_read_cursor_at_capacity_with_zero_boundary_is_idle() {
        let (ring, queue) = ring(4);
        ring.write_repeated(5, 4);
        for _ in 0..4 {
            ring.read_next().unwrap();
        }
        assert_eq!(ring.read_cursor(), 4);
        ring.set_read_boundary(0).unwrap();
        ring.upload(&queue).unwrap();
        assert!(queue.writes().is_empty());
    }

    #[test]
    fn test_get_returns_sentinel_past_write_cursor() {
        let ring = RingBuffer::<i32>::new("r", 4).unwrap().with_sentinel(-1);
        ring.write_next(10);
        ring.write_next(11);
        assert_eq!(ring.get(0), 10);
        assert_eq!(ring.get(1), 11);
        assert_eq!(ring.get(2), -1);
        assert_eq!(ring.get(5), 11);
    }

    #[test]
    fn test_read_next_on_empty_is_error() {
        let ring = RingBuffer::<u32>::new("r", 4).unwrap();
        assert!(matches!(ring.read_next(), Err(OclinkError::Precondition(_))));
        ring.write_next(3);
        assert_eq!(ring.read_next().unwrap(), 3);
        assert!(ring.read_next().is_err());
    }

    #[test]
    fn test_read_next_on_full_ring() {
        let ring = RingBuffer::<u32>::new("r", 4).unwrap();
        for v in 10..14 {
            ring.write_next(v);
        }
        assert_eq!(ring.write_cursor(), 4);
        assert_eq!(ring.read_next().unwrap(), 10);
        assert_eq!(ring.read_next().unwrap(), 11);
        assert_eq!(ring.read_next().unwrap(), 12);
        assert_eq!(ring.read_next().unwrap(), 13);
        assert_eq!(ring.read_cursor(), 4);
        assert!(ring.read_next().is_err());
    }

    #[test]
    fn test_failed_upload_keeps_cursor() {
        let (ring, queue) = ring(4);
        ring.write_next(1);
        ring.set_read_boundary(1).unwrap();
        *queue.write_status.lock() = Some(crate::status::Status::OUT_OF_RESOURCES);
        assert!(ring.upload(&queue).unwrap_err().is_recoverable());
        assert_eq!(ring.read_cursor(), 0);
        assert!(!ring.is_uploaded());
        ring.upload(&queue).unwrap();
        assert_eq!(ring.read_cursor(), 1);
    }

    #[test]
    fn test_invalid_construction() {
        assert!(RingBuffer::<u8>::new("r", 0).is_err());
        assert!(RingBuffer::with_data("r", 2, &[1u8, 2, 3]).is_err());
        let ring = RingBuffer::with_data("r", 4, &[1u8, 2]).unwrap();
        assert_eq!(ring.write_cursor(), 2);
    }
}
