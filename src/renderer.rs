//! gfx-hal implementation of [`Platform`]: one window per output, GLSL
//! compiled at runtime, host-visible vertex buffers.

use gfx_hal::{adapter::Adapter, prelude::*, queue::family::QueueFamilyId, window, Backend};
use log::{debug, trace, warn};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

mod buffer;
mod glsl;
mod inflight;
mod memory;
mod pipeline;
mod swapchain;
mod target;

use buffer::Buffer;
use inflight::{InFlightReads, Submitted};
use memory::Memory;
use pipeline::{Pipeline, PipelineKey};
use target::RenderTarget;

use crate::logging;
use crate::platform::{
    Attribute, BufferHandle, FetchShader, GpuBuffer, PixelShader, Platform, PrimitiveMode,
    Target, VertexShader,
};
use crate::shader::{reflect_inputs, InfoLog, ShaderInput, ShaderStage};

/// A window surface waiting to become a render target.
pub struct Output<'a, B: Backend> {
    pub target: Target,
    pub surface: &'a mut B::Surface,
    pub dims: window::Extent2D,
}

struct CompiledShader<B: Backend> {
    module: B::ShaderModule,
    inputs: Vec<ShaderInput>,
}

#[derive(Debug, Clone, Copy)]
struct Stream {
    buffer: BufferHandle,
    stride: u32,
    offset: u32,
}

/// Shader and stream state the next draw uses.
#[derive(Debug, Default)]
struct Bindings {
    fetch: Option<FetchShader>,
    vertex: Option<VertexShader>,
    pixel: Option<PixelShader>,
    streams: BTreeMap<u32, Stream>,
}

pub struct HalPlatform<'a, B: Backend> {
    adapter: &'a Adapter<B>,
    device: &'a B::Device,
    family: QueueFamilyId,
    queue: &'a mut B::CommandQueue,
    running: Arc<AtomicBool>,
    outputs: Vec<Output<'a, B>>,
    targets: Vec<RenderTarget<'a, B>>,
    shaders: Vec<Option<CompiledShader<B>>>,
    fetch_shaders: Vec<Vec<Attribute>>,
    buffers: Vec<Option<Memory<'a, B>>>,
    bindings: Bindings,
    reads: InFlightReads,
    active: Option<Target>,
    frames: u64,
    fps_counter: fps_counter::FPSCounter,
}

impl<'a, B: Backend> HalPlatform<'a, B> {
    pub fn new(
        adapter: &'a Adapter<B>,
        device: &'a B::Device,
        family: QueueFamilyId,
        queue: &'a mut B::CommandQueue,
        outputs: Vec<Output<'a, B>>,
        running: Arc<AtomicBool>,
    ) -> Self {
        HalPlatform {
            adapter,
            device,
            family,
            queue,
            running,
            outputs,
            targets: Vec::new(),
            shaders: Vec::new(),
            fetch_shaders: Vec::new(),
            buffers: Vec::new(),
            bindings: Bindings::default(),
            reads: InFlightReads::default(),
            active: None,
            frames: 0,
            fps_counter: fps_counter::FPSCounter::new(),
        }
    }

    fn target_mut(&mut self, target: Target) -> Option<&mut RenderTarget<'a, B>> {
        self.targets.iter_mut().find(|t| t.target() == target)
    }

    fn memory_mut(&mut self, buffer: &GpuBuffer) -> &mut Memory<'a, B> {
        let handle = buffer.handle.expect("Buffer used before creation");
        self.buffers[handle.0]
            .as_mut()
            .expect("Buffer used after destruction")
    }

    fn add_shader(&mut self, module: B::ShaderModule, inputs: Vec<ShaderInput>) -> usize {
        self.shaders.push(Some(CompiledShader { module, inputs }));
        self.shaders.len() - 1
    }

    fn release_shaders(&mut self) {
        for shader in self.shaders.drain(..).flatten() {
            unsafe { self.device.destroy_shader_module(shader.module) };
        }
    }
}

impl<'a, B: Backend> Platform for HalPlatform<'a, B> {
    fn log_init(&mut self) {
        logging::init();
    }

    fn log_deinit(&mut self) {
        logging::flush();
    }

    fn proc_init(&mut self) {
        debug!(
            "process running: {}",
            self.running.load(Ordering::Relaxed)
        );
    }

    fn proc_is_running(&mut self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn proc_shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }

    fn gfx_init(&mut self) {
        for output in self.outputs.drain(..) {
            self.targets.push(RenderTarget::new(
                output.target,
                output.surface,
                self.adapter,
                self.device,
                self.family,
                output.dims,
            ));
        }
    }

    fn gfx_shutdown(&mut self) {
        self.device.wait_idle().expect("Can't wait for device");
        self.targets.clear();
        self.release_shaders();
        debug!("graphics shut down after {} frames", self.frames);
    }

    fn begin_render(&mut self) {
        trace!("frame {} begins", self.frames);
    }

    fn begin_target(&mut self, target: Target) {
        self.active = Some(target);
        if let Some(output) = self.target_mut(target) {
            output.begin();
        }
    }

    fn clear_color(&mut self, rgba: [f32; 4]) {
        let active = self.active;
        match active.and_then(|target| self.target_mut(target)) {
            Some(output) => output.clear(rgba),
            None => warn!("clear issued outside a render target"),
        }
    }

    fn finish_target(&mut self, target: Target) {
        let queue = &mut *self.queue;
        let slot = self
            .targets
            .iter_mut()
            .find(|t| t.target() == target)
            .and_then(|output| output.finish(queue));
        match slot {
            Some(slot) => self.reads.submit(Submitted { target, slot }),
            None => self.reads.discard(),
        }
        self.active = None;
    }

    fn finish_render(&mut self) {
        self.frames += 1;
        let fps = self.fps_counter.tick();
        trace!("frame {} done, {} fps", self.frames, fps);
    }

    fn compile_vertex_shader(&mut self, source: &str) -> Result<VertexShader, InfoLog> {
        let inputs = reflect_inputs(source)?;
        let module = glsl::compile::<B>(self.device, source, ShaderStage::Vertex)?;
        Ok(VertexShader(self.add_shader(module, inputs)))
    }

    fn compile_pixel_shader(&mut self, source: &str) -> Result<PixelShader, InfoLog> {
        let module = glsl::compile::<B>(self.device, source, ShaderStage::Pixel)?;
        Ok(PixelShader(self.add_shader(module, Vec::new())))
    }

    fn attribute_location(&self, shader: VertexShader, name: &str) -> Option<u32> {
        self.shaders
            .get(shader.0)?
            .as_ref()?
            .inputs
            .iter()
            .find(|input| input.name == name)
            .map(|input| input.location)
    }

    fn create_fetch_shader(&mut self, attributes: &[Attribute]) -> FetchShader {
        self.fetch_shaders.push(attributes.to_vec());
        FetchShader(self.fetch_shaders.len() - 1)
    }

    fn set_fetch_shader(&mut self, shader: FetchShader) {
        self.bindings.fetch = Some(shader);
    }

    fn set_vertex_shader(&mut self, shader: VertexShader) {
        self.bindings.vertex = Some(shader);
    }

    fn set_pixel_shader(&mut self, shader: PixelShader) {
        self.bindings.pixel = Some(shader);
    }

    fn create_buffer(&mut self, buffer: &mut GpuBuffer) {
        let physical_device = &self.adapter.physical_device;
        let raw = Buffer::new(
            self.device,
            buffer.size() as u64,
            buffer.flags,
            &physical_device.limits(),
        );
        let memory = Memory::new(
            raw,
            &physical_device.memory_properties().memory_types,
            buffer.flags,
        );
        self.buffers.push(Some(memory));
        buffer.handle = Some(BufferHandle(self.buffers.len() - 1));
        trace!(
            "created buffer {:?}: {} x {} bytes, {:?}",
            buffer.handle,
            buffer.elem_count,
            buffer.elem_size,
            buffer.flags
        );
    }

    fn lock_buffer(&mut self, buffer: &GpuBuffer) -> &mut [u8] {
        if let Some(handle) = buffer.handle {
            assert!(
                !self.reads.is_recording(handle),
                "Buffer locked while an open target draws from it"
            );
            for frame in self.reads.take(handle) {
                if let Some(output) = self.targets.iter().find(|t| t.target() == frame.target) {
                    output.wait(frame.slot);
                }
            }
        }
        self.memory_mut(buffer).map()
    }

    fn unlock_buffer(&mut self, buffer: &GpuBuffer) {
        self.memory_mut(buffer).unmap();
    }

    fn destroy_buffer(&mut self, buffer: &mut GpuBuffer) {
        match buffer.handle.take() {
            Some(handle) => {
                self.device.wait_idle().expect("Can't wait for device");
                self.buffers[handle.0] = None;
                self.reads.forget(handle);
                self.bindings.streams.retain(|_, stream| stream.buffer != handle);
            }
            None => trace!("destroying a buffer that was never created"),
        }
    }

    fn set_attribute_buffer(&mut self, buffer: &GpuBuffer, index: u32, stride: u32, offset: u32) {
        match buffer.handle {
            Some(handle) => {
                self.bindings.streams.insert(
                    index,
                    Stream {
                        buffer: handle,
                        stride,
                        offset,
                    },
                );
            }
            None => warn!("attribute stream {} bound to an uncreated buffer", index),
        }
    }

    fn draw(&mut self, mode: PrimitiveMode, count: u32, first: u32, instances: u32) {
        let active = match self.active {
            Some(target) => target,
            None => {
                warn!("draw issued outside a render target");
                return;
            }
        };
        let (fetch, vertex, pixel) = match (
            self.bindings.fetch,
            self.bindings.vertex,
            self.bindings.pixel,
        ) {
            (Some(fetch), Some(vertex), Some(pixel)) => (fetch, vertex, pixel),
            _ => {
                warn!("draw issued without fetch, vertex and pixel shaders bound");
                return;
            }
        };

        let attributes = &self.fetch_shaders[fetch.0];
        let mut streams = Vec::new();
        let mut strides = Vec::new();
        for binding in pipeline::bindings(attributes) {
            let stream = self.bindings.streams.get(&binding);
            let buffers = &self.buffers;
            let memory = stream.and_then(|s| buffers.get(s.buffer.0)?.as_ref());
            match (stream, memory) {
                (Some(stream), Some(memory)) => {
                    strides.push((binding, stream.stride));
                    self.reads.record(stream.buffer);
                    streams.push((binding, &*memory.buffer.buf, stream.offset as u64));
                }
                _ => {
                    warn!("attribute stream {} has no buffer bound", binding);
                    return;
                }
            }
        }

        let modules = (
            self.shaders.get(vertex.0).and_then(Option::as_ref),
            self.shaders.get(pixel.0).and_then(Option::as_ref),
        );
        let (vs, ps) = match modules {
            (Some(vs), Some(ps)) => (&vs.module, &ps.module),
            _ => {
                warn!("draw issued with released shaders");
                return;
            }
        };

        let key = PipelineKey {
            fetch,
            vertex,
            pixel,
            mode,
            strides,
        };
        let device = self.device;
        if let Some(output) = self.targets.iter_mut().find(|t| t.target() == active) {
            output.draw(
                &key,
                |render_pass| Pipeline::new(device, vs, ps, render_pass, attributes, &key),
                &streams,
                first..first + count,
                0..instances,
            );
        }
    }

    fn unmount_sd_card(&mut self) {
        debug!("no removable storage mounted");
    }
}

impl<'a, B: Backend> Drop for HalPlatform<'a, B> {
    fn drop(&mut self) {
        if self.targets.is_empty() && self.shaders.is_empty() && self.buffers.is_empty() {
            return;
        }
        self.device.wait_idle().expect("Can't wait for device");
        self.buffers.clear();
        self.targets.clear();
        self.release_shaders();
    }
}
