use gfx_hal::{buffer, prelude::*, Backend, Limits};
use std::mem::ManuallyDrop;
use std::ptr;

use crate::platform::BufferFlags;

pub struct Buffer<'a, B: Backend> {
    pub device: &'a B::Device,
    pub buf: ManuallyDrop<B::Buffer>,
    /// Requested size; the allocation may be padded past it.
    pub len: u64,
}

impl<'a, B: Backend> Buffer<'a, B> {
    pub fn new(device: &'a B::Device, len: u64, flags: BufferFlags, limits: &Limits) -> Self {
        let non_coherent_alignment = limits.non_coherent_atom_size as u64;

        assert_ne!(len, 0);
        let memory_size =
            ((len + non_coherent_alignment - 1) / non_coherent_alignment) * non_coherent_alignment;

        Buffer {
            device,
            buf: ManuallyDrop::new({
                unsafe {
                    device
                        .create_buffer(memory_size, usage(flags))
                        .expect("Can't create buffer")
                }
            }),
            len,
        }
    }
}

fn usage(flags: BufferFlags) -> buffer::Usage {
    let mut usage = buffer::Usage::empty();
    if flags.contains(BufferFlags::BIND_VERTEX_BUFFER) {
        usage |= buffer::Usage::VERTEX;
    }
    if flags.contains(BufferFlags::BIND_INDEX_BUFFER) {
        usage |= buffer::Usage::INDEX;
    }
    if flags.contains(BufferFlags::BIND_UNIFORM_BLOCK) {
        usage |= buffer::Usage::UNIFORM;
    }
    usage
}

impl<'a, B: Backend> Drop for Buffer<'a, B> {
    fn drop(&mut self) {
        unsafe {
            self.device
                .destroy_buffer(ManuallyDrop::into_inner(ptr::read(&self.buf)))
        }
    }
}
