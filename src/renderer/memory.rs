use gfx_hal::{adapter::MemoryType, memory as m, prelude::*, Backend, MemoryTypeId};
use std::iter;
use std::mem::ManuallyDrop;
use std::ptr;
use std::slice;

use super::buffer::Buffer;
use crate::platform::BufferFlags;

/// A buffer bound to its own allocation, mappable when the flags allow it.
pub struct Memory<'a, B: Backend> {
    pub buffer: ManuallyDrop<Buffer<'a, B>>,
    memory: ManuallyDrop<B::Memory>,
    mapping: Option<*mut u8>,
}

impl<'a, B: Backend> Memory<'a, B> {
    pub fn new(mut buffer: Buffer<'a, B>, memory_types: &[MemoryType], flags: BufferFlags) -> Self {
        let memory = Self::allocate_gpu_memory(&mut buffer, memory_types, flags);
        Memory {
            buffer: ManuallyDrop::new(buffer),
            memory,
            mapping: None,
        }
    }

    fn allocate_gpu_memory(
        buffer: &mut Buffer<'a, B>,
        memory_types: &[MemoryType],
        flags: BufferFlags,
    ) -> ManuallyDrop<B::Memory> {
        let device = buffer.device;
        unsafe {
            let buffer_req = device.get_buffer_requirements(&buffer.buf);
            let memory_type = Self::memory_type(memory_types, &buffer_req, flags);
            let memory = device
                .allocate_memory(memory_type, buffer_req.size)
                .expect("Can't allocate buffer memory");
            device
                .bind_buffer_memory(&memory, 0, &mut buffer.buf)
                .expect("Can't bind buffer memory");
            ManuallyDrop::new(memory)
        }
    }

    fn memory_type(
        properties: &[MemoryType],
        buffer_req: &m::Requirements,
        flags: BufferFlags,
    ) -> MemoryTypeId {
        let wanted = if flags.cpu_visible() {
            m::Properties::CPU_VISIBLE
        } else {
            m::Properties::DEVICE_LOCAL
        };
        let allowed = |id: usize| buffer_req.type_mask & (1 << id) != 0;

        properties
            .iter()
            .enumerate()
            .position(|(id, mem_type)| allowed(id) && mem_type.properties.contains(wanted))
            .or_else(|| {
                if flags.cpu_visible() {
                    None
                } else {
                    (0..properties.len()).find(|&id| allowed(id))
                }
            })
            .expect("No memory type fits the buffer")
            .into()
    }

    /// Maps the buffer and exposes exactly the requested bytes.
    pub fn map(&mut self) -> &mut [u8] {
        let device = self.buffer.device;
        let mapping = match self.mapping {
            Some(mapping) => mapping,
            None => unsafe {
                let mapping = device
                    .map_memory(&self.memory, m::Segment::ALL)
                    .expect("Can't map buffer memory");
                device
                    .invalidate_mapped_memory_ranges(iter::once((&*self.memory, m::Segment::ALL)))
                    .expect("Can't invalidate mapped memory");
                self.mapping = Some(mapping);
                mapping
            },
        };
        unsafe { slice::from_raw_parts_mut(mapping, self.buffer.len as usize) }
    }

    /// Flushes CPU writes and drops the mapping.
    pub fn unmap(&mut self) {
        if self.mapping.take().is_none() {
            return;
        }
        let device = self.buffer.device;
        unsafe {
            device
                .flush_mapped_memory_ranges(iter::once((&*self.memory, m::Segment::ALL)))
                .expect("Can't flush mapped memory");
            device.unmap_memory(&self.memory);
        }
    }
}

impl<'a, B: Backend> Drop for Memory<'a, B> {
    fn drop(&mut self) {
        self.unmap();
        unsafe {
            let device = self.buffer.device;
            ManuallyDrop::drop(&mut self.buffer);
            device.free_memory(ManuallyDrop::into_inner(ptr::read(&self.memory)))
        }
    }
}
