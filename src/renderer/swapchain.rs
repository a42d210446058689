use gfx_hal::{adapter::Adapter, format as f, prelude::*, pso, window, Backend};
use log::debug;

use crate::platform::Target;

/// Why an output's swapchain was (re)configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconfigure {
    Initial,
    AcquireFailed,
    PresentFailed,
}

/// The presentable images of one output, configured for FIFO presentation at
/// the output's fixed size.
pub struct Swapchain<'a, B: Backend> {
    target: Target,
    device: &'a B::Device,
    adapter: &'a Adapter<B>,
    pub surface: &'a mut B::Surface,
    pub format: f::Format,
    pub viewport: pso::Viewport,
    dims: window::Extent2D,
    generation: u32,
    last_reason: Reconfigure,
}

impl<'a, B: Backend> Swapchain<'a, B> {
    pub fn new(
        target: Target,
        device: &'a B::Device,
        surface: &'a mut B::Surface,
        adapter: &'a Adapter<B>,
        dims: window::Extent2D,
    ) -> Self {
        let format = pick_format(surface.supported_formats(&adapter.physical_device));

        let mut swapchain = Swapchain {
            target,
            device,
            adapter,
            surface,
            format,
            viewport: viewport(dims),
            dims,
            generation: 0,
            last_reason: Reconfigure::Initial,
        };
        swapchain.configure(Reconfigure::Initial);
        swapchain
    }

    /// Reconfigures after the surface refused an acquire or a present.
    pub fn recreate(&mut self, reason: Reconfigure) {
        self.configure(reason);
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn last_reason(&self) -> Reconfigure {
        self.last_reason
    }

    fn configure(&mut self, reason: Reconfigure) {
        let caps = self.surface.capabilities(&self.adapter.physical_device);
        let mut config = window::SwapchainConfig::from_caps(&caps, self.format, self.dims);
        config.present_mode = window::PresentMode::FIFO;
        let extent = config.extent;

        unsafe {
            self.surface
                .configure_swapchain(self.device, config)
                .expect("Can't create swapchain");
        }

        self.viewport = viewport(extent);
        self.generation += 1;
        self.last_reason = reason;
        debug!(
            "{} swapchain #{} ({:?}): {}x{} {:?}",
            self.target.name(),
            self.generation,
            reason,
            extent.width,
            extent.height,
            self.format
        );
    }
}

impl<'a, B: Backend> Drop for Swapchain<'a, B> {
    fn drop(&mut self) {
        unsafe { self.surface.unconfigure_swapchain(self.device) }
    }
}

/// Prefers an sRGB format; a surface that states no preference gets
/// `Rgba8Srgb`.
fn pick_format(supported: Option<Vec<f::Format>>) -> f::Format {
    match supported {
        Some(formats) => formats
            .iter()
            .find(|format| format.base_format().1 == f::ChannelType::Srgb)
            .or_else(|| formats.first())
            .copied()
            .unwrap_or(f::Format::Rgba8Srgb),
        None => f::Format::Rgba8Srgb,
    }
}

fn viewport(extent: window::Extent2D) -> pso::Viewport {
    pso::Viewport {
        rect: pso::Rect {
            x: 0,
            y: 0,
            w: extent.width as _,
            h: extent.height as _,
        },
        depth: 0.0..1.0,
    }
}
