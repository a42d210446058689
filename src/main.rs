#[cfg(feature = "metal")]
use gfx_backend_metal as back;

#[cfg(feature = "vulkan")]
use gfx_backend_vulkan as back;

mod app;
mod logging;
mod platform;
mod renderer;
mod scene;
mod shader;

use renderer::{HalPlatform, Output};

use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use gfx_hal::{prelude::*, window, Features};
use log::{debug, error};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::window::Window;

use platform::Target;

const TITLE: &str = "dual-screen triangle";

const TV_DIMS: window::Extent2D = window::Extent2D {
    width: 1280,
    height: 720,
};

const DRC_DIMS: window::Extent2D = window::Extent2D {
    width: 854,
    height: 480,
};

/// Exit code when the host cannot bring up a window or a GPU.
const EXIT_HOST_FAILURE: i32 = 1;

#[derive(Debug)]
enum HostEvent {
    /// The render thread returned.
    Finished,
}

/// Calls its closure when dropped, unwinding included.
struct OnExit<F: FnMut()>(F);

impl<F: FnMut()> Drop for OnExit<F> {
    fn drop(&mut self) {
        (self.0)()
    }
}

fn main() {
    logging::init();

    let event_loop = EventLoop::<HostEvent>::with_user_event();
    let windows = build_window(&event_loop, Target::Tv, TV_DIMS).and_then(|tv| {
        build_window(&event_loop, Target::Drc, DRC_DIMS).map(|drc| (tv, drc))
    });
    let (tv_window, drc_window) = match windows {
        Ok(windows) => windows,
        Err(err) => {
            error!("{:#}", err);
            process::exit(EXIT_HOST_FAILURE);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let render_running = Arc::clone(&running);
    let proxy = event_loop.create_proxy();
    let handler = thread::spawn(move || {
        let _finished = OnExit(move || {
            if proxy.send_event(HostEvent::Finished).is_err() {
                debug!("event loop already closed");
            }
        });
        match render(&tv_window, &drc_window, render_running) {
            Ok(code) => code,
            Err(err) => {
                error!("{:#}", err);
                EXIT_HOST_FAILURE
            }
        }
    });

    let mut handler = Some(handler);

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Wait;
        match event {
            winit::event::Event::WindowEvent { event, .. } => match event {
                winit::event::WindowEvent::CloseRequested
                | winit::event::WindowEvent::KeyboardInput {
                    input:
                        winit::event::KeyboardInput {
                            virtual_keycode: Some(winit::event::VirtualKeyCode::Escape),
                            ..
                        },
                    ..
                } => {
                    debug!("exit requested");
                    running.store(false, Ordering::Relaxed);
                }
                _ => {}
            },
            winit::event::Event::UserEvent(HostEvent::Finished) => {
                let code = handler
                    .take()
                    .map_or(EXIT_HOST_FAILURE, |handler| {
                        handler.join().unwrap_or_else(|_| {
                            error!("render thread panicked");
                            EXIT_HOST_FAILURE
                        })
                    });
                process::exit(code);
            }
            _ => {}
        }
    });
}

fn build_window(
    event_loop: &EventLoop<HostEvent>,
    target: Target,
    dims: window::Extent2D,
) -> Result<Window> {
    winit::window::WindowBuilder::new()
        .with_title(format!("{} ({})", TITLE, target.name()))
        .with_inner_size(winit::dpi::Size::Physical(winit::dpi::PhysicalSize::new(
            dims.width,
            dims.height,
        )))
        .with_resizable(false)
        .build(event_loop)
        .with_context(|| format!("failed to create the {} window", target.name()))
}

/// Brings up the GPU for both windows and runs the program on it.
fn render(tv_window: &Window, drc_window: &Window, running: Arc<AtomicBool>) -> Result<i32> {
    let instance = back::Instance::create(TITLE, 1)
        .map_err(|_| anyhow!("the selected gfx backend is not supported here"))?;
    let mut tv_surface = unsafe { instance.create_surface(tv_window) }
        .map_err(|err| anyhow!("failed to create the TV surface: {:?}", err))?;
    let mut drc_surface = unsafe { instance.create_surface(drc_window) }
        .map_err(|err| anyhow!("failed to create the DRC surface: {:?}", err))?;

    let mut adapters = instance.enumerate_adapters();
    anyhow::ensure!(!adapters.is_empty(), "no graphics adapter found");
    let adapter = adapters.remove(0);
    debug!("using adapter {:?}", adapter.info);

    let family = adapter
        .queue_families
        .iter()
        .find(|family| {
            family.queue_type().supports_graphics()
                && tv_surface.supports_queue_family(family)
                && drc_surface.supports_queue_family(family)
        })
        .context("no queue family can present to both windows")?;
    let mut gpu = unsafe {
        adapter
            .physical_device
            .open(&[(family, &[1.0])], Features::empty())
    }
    .map_err(|err| anyhow!("failed to open the device: {:?}", err))?;

    let mut queue_group = gpu
        .queue_groups
        .pop()
        .context("device exposes no queue group")?;
    let queue = queue_group
        .queues
        .first_mut()
        .context("queue group has no queue")?;

    let code = {
        let outputs = vec![
            Output {
                target: Target::Tv,
                surface: &mut tv_surface,
                dims: TV_DIMS,
            },
            Output {
                target: Target::Drc,
                surface: &mut drc_surface,
                dims: DRC_DIMS,
            },
        ];
        let mut platform = HalPlatform::new(
            &adapter,
            &gpu.device,
            queue_group.family,
            queue,
            outputs,
            running,
        );
        app::run(&mut platform)
    };

    unsafe {
        instance.destroy_surface(tv_surface);
        instance.destroy_surface(drc_surface);
    }

    Ok(code)
}
