//! Collaborator services the triangle program drives.
//!
//! Everything the program needs from the outside world (logging transport,
//! process lifecycle, display outputs, GPU resources and shader compilation)
//! goes through [`Platform`]. The procedure in `app` is written once against
//! this trait; `renderer::HalPlatform` implements it on gfx-hal and the test
//! double in `mock` records every call.

use bitflags::bitflags;

use crate::shader::InfoLog;

#[cfg(test)]
pub mod mock;

bitflags! {
    /// Binding and usage bits of a GPU buffer.
    pub struct BufferFlags: u32 {
        const BIND_VERTEX_BUFFER = 1 << 0;
        const BIND_INDEX_BUFFER = 1 << 1;
        const BIND_UNIFORM_BLOCK = 1 << 2;
        const USAGE_CPU_READ = 1 << 8;
        const USAGE_CPU_WRITE = 1 << 9;
        const USAGE_GPU_READ = 1 << 10;
        const USAGE_GPU_WRITE = 1 << 11;
    }
}

impl Default for BufferFlags {
    fn default() -> Self {
        BufferFlags::empty()
    }
}

impl BufferFlags {
    /// Whether the CPU is allowed to map the buffer.
    pub fn cpu_visible(self) -> bool {
        self.intersects(BufferFlags::USAGE_CPU_READ | BufferFlags::USAGE_CPU_WRITE)
    }
}

/// One of the two display outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// The primary television output.
    Tv,
    /// The gamepad's own screen.
    Drc,
}

impl Target {
    pub fn name(self) -> &'static str {
        match self {
            Target::Tv => "TV",
            Target::Drc => "DRC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttribFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveMode {
    Triangles,
    TriangleStrip,
}

/// A named vertex input fed from one attribute buffer stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    /// Shader input location the name resolved to.
    pub location: u32,
    /// Attribute buffer stream index.
    pub buffer: u32,
    /// Byte offset of the attribute inside one element.
    pub offset: u32,
    pub format: AttribFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexShader(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelShader(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchShader(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) usize);

/// Description of a GPU buffer plus the handle of its backing storage.
///
/// A default value describes nothing and owns nothing; passing it to
/// [`Platform::destroy_buffer`] is allowed and releases nothing.
#[derive(Debug, Default)]
pub struct GpuBuffer {
    pub flags: BufferFlags,
    pub elem_size: u32,
    pub elem_count: u32,
    pub handle: Option<BufferHandle>,
}

impl GpuBuffer {
    pub fn new(flags: BufferFlags, elem_size: u32, elem_count: u32) -> Self {
        GpuBuffer {
            flags,
            elem_size,
            elem_count,
            handle: None,
        }
    }

    /// Size of the buffer contents in bytes.
    pub fn size(&self) -> usize {
        self.elem_size as usize * self.elem_count as usize
    }
}

/// The services a program run is allowed to use.
///
/// Calls other than shader compilation are infallible from the caller's point
/// of view; implementations panic on conditions they cannot recover from.
pub trait Platform {
    // Logging transport.
    fn log_init(&mut self);
    fn log_deinit(&mut self);

    // Process lifecycle.
    fn proc_init(&mut self);
    /// Polled once per frame; `false` asks the program to wind down.
    fn proc_is_running(&mut self) -> bool;
    fn proc_shutdown(&mut self);

    // Graphics context.
    fn gfx_init(&mut self);
    fn gfx_shutdown(&mut self);
    fn begin_render(&mut self);
    fn begin_target(&mut self, target: Target);
    fn clear_color(&mut self, rgba: [f32; 4]);
    fn finish_target(&mut self, target: Target);
    fn finish_render(&mut self);

    // Shader compilation.
    fn compile_vertex_shader(&mut self, source: &str) -> Result<VertexShader, InfoLog>;
    fn compile_pixel_shader(&mut self, source: &str) -> Result<PixelShader, InfoLog>;
    /// Input location of the named vertex attribute, if the shader declares it.
    fn attribute_location(&self, shader: VertexShader, name: &str) -> Option<u32>;
    fn create_fetch_shader(&mut self, attributes: &[Attribute]) -> FetchShader;
    fn set_fetch_shader(&mut self, shader: FetchShader);
    fn set_vertex_shader(&mut self, shader: VertexShader);
    fn set_pixel_shader(&mut self, shader: PixelShader);

    // GPU resources.
    fn create_buffer(&mut self, buffer: &mut GpuBuffer);
    /// Opens the CPU-visible window onto `buffer`: exactly `buffer.size()` bytes.
    fn lock_buffer(&mut self, buffer: &GpuBuffer) -> &mut [u8];
    fn unlock_buffer(&mut self, buffer: &GpuBuffer);
    fn destroy_buffer(&mut self, buffer: &mut GpuBuffer);
    fn set_attribute_buffer(&mut self, buffer: &GpuBuffer, index: u32, stride: u32, offset: u32);
    fn draw(&mut self, mode: PrimitiveMode, count: u32, first: u32, instances: u32);

    // Storage.
    fn unmount_sd_card(&mut self);

    /// Runs `f` over the mapped contents of `buffer`, unlocking afterwards.
    fn map_buffer<F, R>(&mut self, buffer: &GpuBuffer, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let result = f(self.lock_buffer(buffer));
        self.unlock_buffer(buffer);
        result
    }
}
