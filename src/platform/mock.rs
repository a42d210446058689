//! A [`Platform`] that keeps buffers in memory and records every call.

use super::{
    Attribute, BufferFlags, BufferHandle, FetchShader, GpuBuffer, PixelShader, Platform,
    PrimitiveMode, Target, VertexShader,
};
use crate::shader::{reflect_inputs, InfoLog, ShaderInput};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    LogInit,
    LogDeinit,
    ProcInit,
    ProcIsRunning(bool),
    ProcShutdown,
    GfxInit,
    GfxShutdown,
    BeginRender,
    BeginTarget(Target),
    ClearColor([f32; 4]),
    FinishTarget(Target),
    FinishRender,
    CompileVertex(bool),
    CompilePixel(bool),
    CreateFetchShader(Vec<Attribute>),
    SetFetchShader(FetchShader),
    SetVertexShader(VertexShader),
    SetPixelShader(PixelShader),
    CreateBuffer {
        handle: BufferHandle,
        flags: BufferFlags,
        elem_size: u32,
        elem_count: u32,
    },
    LockBuffer(BufferHandle),
    UnlockBuffer(BufferHandle),
    /// `None` when the descriptor was never created.
    DestroyBuffer(Option<BufferHandle>),
    SetAttributeBuffer {
        handle: BufferHandle,
        index: u32,
        stride: u32,
        offset: u32,
    },
    Draw {
        mode: PrimitiveMode,
        count: u32,
        first: u32,
        instances: u32,
    },
    UnmountSdCard,
}

#[derive(Debug, Default)]
pub struct RecordingPlatform {
    events: Vec<Event>,
    vertex_error: Option<String>,
    pixel_error: Option<String>,
    running_polls: usize,
    vertex_inputs: Vec<Vec<ShaderInput>>,
    pixel_shaders: usize,
    fetch_shaders: usize,
    buffers: Vec<Option<Vec<u8>>>,
    streams: Vec<(u32, BufferHandle)>,
    open_reads: Vec<BufferHandle>,
    unlocked: Vec<(BufferHandle, Vec<u8>)>,
}

impl RecordingPlatform {
    /// A platform whose lifecycle service reports "not running" on first poll.
    pub fn new() -> Self {
        RecordingPlatform::default()
    }

    /// Report "running" for the first `frames` polls.
    pub fn running_for(mut self, frames: usize) -> Self {
        self.running_polls = frames;
        self
    }

    pub fn fail_vertex(mut self, log: &str) -> Self {
        self.vertex_error = Some(log.to_owned());
        self
    }

    pub fn fail_pixel(mut self, log: &str) -> Self {
        self.pixel_error = Some(log.to_owned());
        self
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|&event| pred(event)).count()
    }

    /// Contents of `handle` as they were at each unlock, oldest first.
    pub fn unlock_history(&self, handle: BufferHandle) -> Vec<&[u8]> {
        self.unlocked
            .iter()
            .filter(|(h, _)| *h == handle)
            .map(|(_, bytes)| bytes.as_slice())
            .collect()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.iter().filter(|b| b.is_some()).count()
    }

    fn storage(&mut self, buffer: &GpuBuffer) -> (BufferHandle, &mut Vec<u8>) {
        let handle = buffer.handle.expect("buffer used before creation");
        let bytes = self.buffers[handle.0]
            .as_mut()
            .expect("buffer used after destruction");
        (handle, bytes)
    }
}

impl Platform for RecordingPlatform {
    fn log_init(&mut self) {
        self.events.push(Event::LogInit);
    }

    fn log_deinit(&mut self) {
        self.events.push(Event::LogDeinit);
    }

    fn proc_init(&mut self) {
        self.events.push(Event::ProcInit);
    }

    fn proc_is_running(&mut self) -> bool {
        let running = self.running_polls > 0;
        if running {
            self.running_polls -= 1;
        }
        self.events.push(Event::ProcIsRunning(running));
        running
    }

    fn proc_shutdown(&mut self) {
        self.events.push(Event::ProcShutdown);
    }

    fn gfx_init(&mut self) {
        self.events.push(Event::GfxInit);
    }

    fn gfx_shutdown(&mut self) {
        self.events.push(Event::GfxShutdown);
    }

    fn begin_render(&mut self) {
        self.events.push(Event::BeginRender);
    }

    fn begin_target(&mut self, target: Target) {
        self.events.push(Event::BeginTarget(target));
    }

    fn clear_color(&mut self, rgba: [f32; 4]) {
        self.events.push(Event::ClearColor(rgba));
    }

    fn finish_target(&mut self, target: Target) {
        self.open_reads.clear();
        self.events.push(Event::FinishTarget(target));
    }

    fn finish_render(&mut self) {
        self.events.push(Event::FinishRender);
    }

    fn compile_vertex_shader(&mut self, source: &str) -> Result<VertexShader, InfoLog> {
        let inputs = match &self.vertex_error {
            Some(log) => Err(InfoLog::new(log)),
            None => reflect_inputs(source),
        };
        self.events.push(Event::CompileVertex(inputs.is_ok()));
        self.vertex_inputs.push(inputs?);
        Ok(VertexShader(self.vertex_inputs.len() - 1))
    }

    fn compile_pixel_shader(&mut self, _source: &str) -> Result<PixelShader, InfoLog> {
        self.events.push(Event::CompilePixel(self.pixel_error.is_none()));
        if let Some(log) = &self.pixel_error {
            return Err(InfoLog::new(log));
        }
        self.pixel_shaders += 1;
        Ok(PixelShader(self.pixel_shaders - 1))
    }

    fn attribute_location(&self, shader: VertexShader, name: &str) -> Option<u32> {
        self.vertex_inputs
            .get(shader.0)?
            .iter()
            .find(|input| input.name == name)
            .map(|input| input.location)
    }

    fn create_fetch_shader(&mut self, attributes: &[Attribute]) -> FetchShader {
        self.events
            .push(Event::CreateFetchShader(attributes.to_vec()));
        self.fetch_shaders += 1;
        FetchShader(self.fetch_shaders - 1)
    }

    fn set_fetch_shader(&mut self, shader: FetchShader) {
        self.events.push(Event::SetFetchShader(shader));
    }

    fn set_vertex_shader(&mut self, shader: VertexShader) {
        self.events.push(Event::SetVertexShader(shader));
    }

    fn set_pixel_shader(&mut self, shader: PixelShader) {
        self.events.push(Event::SetPixelShader(shader));
    }

    fn create_buffer(&mut self, buffer: &mut GpuBuffer) {
        let handle = BufferHandle(self.buffers.len());
        self.buffers.push(Some(vec![0; buffer.size()]));
        buffer.handle = Some(handle);
        self.events.push(Event::CreateBuffer {
            handle,
            flags: buffer.flags,
            elem_size: buffer.elem_size,
            elem_count: buffer.elem_count,
        });
    }

    fn lock_buffer(&mut self, buffer: &GpuBuffer) -> &mut [u8] {
        let handle = buffer.handle.expect("buffer locked before creation");
        assert!(
            !self.open_reads.contains(&handle),
            "buffer {:?} locked while an open target draws from it",
            handle
        );
        self.events.push(Event::LockBuffer(handle));
        let (_, bytes) = self.storage(buffer);
        bytes.as_mut_slice()
    }

    fn unlock_buffer(&mut self, buffer: &GpuBuffer) {
        let (handle, bytes) = self.storage(buffer);
        let snapshot = bytes.clone();
        self.unlocked.push((handle, snapshot));
        self.events.push(Event::UnlockBuffer(handle));
    }

    fn destroy_buffer(&mut self, buffer: &mut GpuBuffer) {
        let handle = buffer.handle.take();
        if let Some(handle) = handle {
            self.buffers[handle.0] = None;
        }
        self.events.push(Event::DestroyBuffer(handle));
    }

    fn set_attribute_buffer(&mut self, buffer: &GpuBuffer, index: u32, stride: u32, offset: u32) {
        let (handle, _) = self.storage(buffer);
        self.streams.retain(|&(bound, _)| bound != index);
        self.streams.push((index, handle));
        self.events.push(Event::SetAttributeBuffer {
            handle,
            index,
            stride,
            offset,
        });
    }

    fn draw(&mut self, mode: PrimitiveMode, count: u32, first: u32, instances: u32) {
        for &(_, handle) in &self.streams {
            if !self.open_reads.contains(&handle) {
                self.open_reads.push(handle);
            }
        }
        self.events.push(Event::Draw {
            mode,
            count,
            first,
            instances,
        });
    }

    fn unmount_sd_card(&mut self) {
        self.events.push(Event::UnmountSdCard);
    }
}
