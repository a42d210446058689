use gfx_hal::{
    adapter, buffer as b, command, format as f, image as i, pass, pool,
    prelude::*,
    queue::{family::QueueFamilyId, Submission},
    window::{self, PresentationSurface},
    Backend,
};
use log::{debug, trace};

use std::borrow::Borrow;
use std::iter;
use std::mem::ManuallyDrop;
use std::ops::Range;
use std::ptr;

use super::pipeline::{Pipeline, PipelineKey};
use super::swapchain::{Reconfigure, Swapchain};
use crate::platform::Target;

type SwapchainImage<B> = <<B as Backend>::Surface as PresentationSurface<B>>::SwapchainImage;

const FRAMES_IN_FLIGHT: usize = 2;

/// The image being recorded for this output between begin and finish.
struct Acquired<B: Backend> {
    image: SwapchainImage<B>,
    slot: usize,
    clear: [f32; 4],
    in_pass: bool,
}

/// One display output: its swapchain, render pass and per-frame command state.
pub struct RenderTarget<'a, B: Backend> {
    target: Target,
    frame: usize,
    device: &'a B::Device,
    command_buffers: Vec<B::CommandBuffer>,
    submission_complete_semaphores: Vec<B::Semaphore>,
    submission_complete_fences: Vec<B::Fence>,
    framebuffers: Vec<Option<B::Framebuffer>>,
    command_pool: ManuallyDrop<B::CommandPool>,
    swapchain: ManuallyDrop<Swapchain<'a, B>>,
    render_pass: ManuallyDrop<B::RenderPass>,
    pipeline: Option<(PipelineKey, Pipeline<'a, B>)>,
    acquired: Option<Acquired<B>>,
}

impl<'a, B> RenderTarget<'a, B>
where
    B: Backend,
{
    pub fn new(
        target: Target,
        surface: &'a mut B::Surface,
        adapter: &'a adapter::Adapter<B>,
        device: &'a B::Device,
        family: QueueFamilyId,
        dims: window::Extent2D,
    ) -> Self {
        let swapchain = Swapchain::new(target, device, surface, adapter, dims);
        let render_pass = Self::create_render_pass(device, swapchain.format);

        let mut command_pool = Self::create_command_pool(device, family);
        let command_buffers = Self::allocate_command_buffer(&mut command_pool, FRAMES_IN_FLIGHT);
        let submission_complete_semaphores = Self::create_semaphores(device, FRAMES_IN_FLIGHT);
        let submission_complete_fences = Self::create_fences(device, FRAMES_IN_FLIGHT);

        debug!("{} output ready", target.name());

        RenderTarget {
            target,
            frame: 0,
            device,
            command_buffers,
            submission_complete_semaphores,
            submission_complete_fences,
            framebuffers: (0..FRAMES_IN_FLIGHT).map(|_| None).collect(),
            command_pool: ManuallyDrop::new(command_pool),
            swapchain: ManuallyDrop::new(swapchain),
            render_pass,
            pipeline: None,
            acquired: None,
        }
    }

    pub fn target(&self) -> Target {
        self.target
    }

    /// Acquires the next image and opens its command buffer. When the
    /// swapchain is out of date the output sits this frame out.
    pub fn begin(&mut self) {
        let surface_image = unsafe {
            match self.swapchain.surface.acquire_image(!0) {
                Ok((image, _)) => image,
                Err(err) => {
                    debug!("{}: acquire failed ({:?})", self.target.name(), err);
                    self.swapchain.recreate(Reconfigure::AcquireFailed);
                    return;
                }
            }
        };

        let slot = self.frame % FRAMES_IN_FLIGHT;
        let rect = self.swapchain.viewport.rect;

        unsafe {
            let fence = &self.submission_complete_fences[slot];
            self.device
                .wait_for_fence(fence, !0)
                .expect("Can't wait for fence");
            self.device
                .reset_fence(fence)
                .expect("Can't reset fence");

            if let Some(old) = self.framebuffers[slot].take() {
                self.device.destroy_framebuffer(old);
            }
            let view: &B::ImageView = surface_image.borrow();
            let frame_buffer = self
                .device
                .create_framebuffer(
                    &self.render_pass,
                    iter::once(view),
                    i::Extent {
                        width: rect.w as u32,
                        height: rect.h as u32,
                        depth: 1,
                    },
                )
                .expect("Could not create frame buffer");
            self.framebuffers[slot] = Some(frame_buffer);

            let cmd_buffer = &mut self.command_buffers[slot];
            cmd_buffer.begin_primary(command::CommandBufferFlags::ONE_TIME_SUBMIT);
            cmd_buffer.set_viewports(0, &[self.swapchain.viewport.clone()]);
            cmd_buffer.set_scissors(0, &[rect]);
        }

        self.acquired = Some(Acquired {
            image: surface_image,
            slot,
            clear: [0.0, 0.0, 0.0, 1.0],
            in_pass: false,
        });
    }

    /// Sets the colour the render pass clears to.
    pub fn clear(&mut self, rgba: [f32; 4]) {
        match &mut self.acquired {
            Some(acquired) if !acquired.in_pass => acquired.clear = rgba,
            Some(_) => debug!(
                "{}: clear after drawing started is ignored",
                self.target.name()
            ),
            None => {}
        }
    }

    /// Starts the render pass if it is not running yet and returns the slot
    /// being recorded, or `None` when this output skips the frame.
    fn begin_pass(&mut self) -> Option<usize> {
        let acquired = self.acquired.as_mut()?;
        if !acquired.in_pass {
            let framebuffer = self.framebuffers[acquired.slot].as_ref()?;
            unsafe {
                self.command_buffers[acquired.slot].begin_render_pass(
                    &self.render_pass,
                    framebuffer,
                    self.swapchain.viewport.rect,
                    &[command::ClearValue {
                        color: command::ClearColor {
                            float32: acquired.clear,
                        },
                    }],
                    command::SubpassContents::Inline,
                );
            }
            acquired.in_pass = true;
        }
        Some(acquired.slot)
    }

    /// Records one draw, building the pipeline for `key` first if needed.
    pub fn draw<F>(
        &mut self,
        key: &PipelineKey,
        build: F,
        streams: &[(u32, &B::Buffer, u64)],
        vertices: Range<u32>,
        instances: Range<u32>,
    ) where
        F: FnOnce(&B::RenderPass) -> Pipeline<'a, B>,
    {
        let slot = match self.begin_pass() {
            Some(slot) => slot,
            None => return,
        };

        let stale = self
            .pipeline
            .as_ref()
            .map_or(true, |(cached, _)| cached != key);
        if stale {
            if self.pipeline.is_some() {
                self.device.wait_idle().expect("Can't wait for device");
            }
            trace!("{}: building pipeline for {:?}", self.target.name(), key);
            self.pipeline = Some((key.clone(), build(&*self.render_pass)));
        }
        let pipeline = match &self.pipeline {
            Some((_, pipeline)) => pipeline,
            None => return,
        };

        let cmd_buffer = &mut self.command_buffers[slot];
        unsafe {
            cmd_buffer.bind_graphics_pipeline(&pipeline.pipeline);
            for &(binding, buffer, offset) in streams {
                cmd_buffer.bind_vertex_buffers(
                    binding,
                    iter::once((
                        buffer,
                        b::SubRange {
                            offset,
                            size: None,
                        },
                    )),
                );
            }
            cmd_buffer.draw(vertices, instances);
        }
    }

    /// Ends the pass, submits and presents. Returns the fence slot of the
    /// submission, or `None` when this output skipped the frame.
    pub fn finish(&mut self, queue: &mut B::CommandQueue) -> Option<usize> {
        self.begin_pass()?;
        let acquired = self.acquired.take()?;
        let slot = acquired.slot;

        unsafe {
            let cmd_buffer = &mut self.command_buffers[slot];
            cmd_buffer.end_render_pass();
            cmd_buffer.finish();

            let submission = Submission {
                command_buffers: iter::once(&*cmd_buffer),
                wait_semaphores: None,
                signal_semaphores: iter::once(&self.submission_complete_semaphores[slot]),
            };

            queue.submit(submission, Some(&self.submission_complete_fences[slot]));

            let result = queue.present_surface(
                &mut self.swapchain.surface,
                acquired.image,
                Some(&self.submission_complete_semaphores[slot]),
            );

            if result.is_err() {
                debug!("{}: present failed; recreating swapchain", self.target.name());
                self.swapchain.recreate(Reconfigure::PresentFailed);
            }
        }

        self.frame += 1;
        Some(slot)
    }

    /// Blocks until the frame submitted from `slot` is done on the GPU.
    pub fn wait(&self, slot: usize) {
        // The slot being recorded was already waited on in `begin`.
        if self.acquired.as_ref().map_or(false, |a| a.slot == slot) {
            return;
        }
        unsafe {
            self.device
                .wait_for_fence(&self.submission_complete_fences[slot], !0)
                .expect("Can't wait for fence");
        }
    }

    fn create_render_pass(device: &B::Device, format: f::Format) -> ManuallyDrop<B::RenderPass> {
        let attachment = pass::Attachment {
            format: Some(format),
            samples: 1,
            ops: pass::AttachmentOps::new(
                pass::AttachmentLoadOp::Clear,
                pass::AttachmentStoreOp::Store,
            ),
            stencil_ops: pass::AttachmentOps::DONT_CARE,
            layouts: i::Layout::Undefined..i::Layout::Present,
        };

        let subpass = pass::SubpassDesc {
            colors: &[(0, i::Layout::ColorAttachmentOptimal)],
            depth_stencil: None,
            inputs: &[],
            resolves: &[],
            preserves: &[],
        };

        ManuallyDrop::new(
            unsafe { device.create_render_pass(&[attachment], &[subpass], &[]) }
                .expect("Can't create render pass"),
        )
    }

    fn create_command_pool(device: &B::Device, family: QueueFamilyId) -> B::CommandPool {
        unsafe {
            device.create_command_pool(family, pool::CommandPoolCreateFlags::RESET_INDIVIDUAL)
        }
        .expect("Can't create command pool")
    }

    fn allocate_command_buffer(
        command_pool: &mut B::CommandPool,
        frames_in_flight: usize,
    ) -> Vec<B::CommandBuffer> {
        (0..frames_in_flight)
            .map(|_| unsafe { command_pool.allocate_one(command::Level::Primary) })
            .collect()
    }

    fn create_semaphores(device: &B::Device, frames_in_flight: usize) -> Vec<B::Semaphore> {
        (0..frames_in_flight)
            .map(|_| {
                device
                    .create_semaphore()
                    .expect("Could not create semaphore")
            })
            .collect()
    }

    fn create_fences(device: &B::Device, frames_in_flight: usize) -> Vec<B::Fence> {
        (0..frames_in_flight)
            .map(|_| device.create_fence(true).expect("Could not create fence"))
            .collect()
    }
}

impl<'a, B: Backend> Drop for RenderTarget<'a, B> {
    fn drop(&mut self) {
        let device = &self.device;
        device.wait_idle().expect("Can't wait for device");
        debug!(
            "{} output closed after {} frames, {} swapchain configurations (last: {:?})",
            self.target.name(),
            self.frame,
            self.swapchain.generation(),
            self.swapchain.last_reason()
        );
        self.acquired = None;
        self.pipeline = None;
        unsafe {
            for frame_buffer in self.framebuffers.drain(..).flatten() {
                device.destroy_framebuffer(frame_buffer);
            }
            device.destroy_command_pool(ManuallyDrop::into_inner(ptr::read(&self.command_pool)));
            for s in self.submission_complete_semaphores.drain(..) {
                device.destroy_semaphore(s);
            }

            for f in self.submission_complete_fences.drain(..) {
                device.destroy_fence(f);
            }

            device.destroy_render_pass(ManuallyDrop::into_inner(ptr::read(&self.render_pass)));
            ManuallyDrop::drop(&mut self.swapchain);
        }
    }
}
