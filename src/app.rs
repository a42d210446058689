//! The program proper: bring the services up, draw until told to stop, and
//! tear everything down again in a fixed order.

use log::{error, info};

use crate::platform::{AttribFormat, BufferFlags, GpuBuffer, Platform, PrimitiveMode};
use crate::scene::{self, Record};
use crate::shader::{ShaderError, ShaderGroup};

const VERTEX_SHADER: &str = include_str!("data/triangle.vert");
const PIXEL_SHADER: &str = include_str!("data/triangle.frag");

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_SHADER_FAILURE: i32 = -1;

fn vertex_buffer_flags() -> BufferFlags {
    BufferFlags::BIND_VERTEX_BUFFER
        | BufferFlags::USAGE_CPU_READ
        | BufferFlags::USAGE_CPU_WRITE
        | BufferFlags::USAGE_GPU_READ
}

/// Runs the triangle program on `platform` and returns its exit code.
pub fn run<P: Platform>(platform: &mut P) -> i32 {
    let mut session = Session::open(platform);
    match session.render() {
        Ok(()) => EXIT_SUCCESS,
        Err(err) => {
            info!("Shader compilation failed");
            error!("{}", err);
            EXIT_SHADER_FAILURE
        }
    }
}

/// Owns everything acquired during a run. Dropping it releases the vertex
/// buffers (created or not) and shuts the services down.
struct Session<'p, P: Platform> {
    platform: &'p mut P,
    position: GpuBuffer,
    colour: GpuBuffer,
}

impl<'p, P: Platform> Session<'p, P> {
    fn open(platform: &'p mut P) -> Self {
        platform.log_init();
        platform.proc_init();
        platform.gfx_init();

        Session {
            platform,
            position: GpuBuffer::default(),
            colour: GpuBuffer::default(),
        }
    }

    fn render(&mut self) -> Result<(), ShaderError> {
        let mut group = ShaderGroup::compile(&mut *self.platform, VERTEX_SHADER, PIXEL_SHADER)?;
        group.init_attribute(&*self.platform, "in_position", 0, 0, AttribFormat::Float32x4);
        group.init_attribute(&*self.platform, "in_color", 1, 0, AttribFormat::Float32x4);
        group.init_fetch_shader(&mut *self.platform);

        provision(&mut *self.platform, &mut self.position, &scene::POSITIONS);
        provision(&mut *self.platform, &mut self.colour, &scene::COLOURS);

        info!("Begin rendering...");
        while self.platform.proc_is_running() {
            self.platform
                .map_buffer(&self.colour, scene::animate_bytes);

            self.platform.begin_render();
            for &(target, clear) in scene::TARGETS.iter() {
                self.platform.begin_target(target);
                self.platform.clear_color(clear);
                self.draw_triangle(&group);
                self.platform.finish_target(target);
            }
            self.platform.finish_render();
        }

        Ok(())
    }

    fn draw_triangle(&mut self, group: &ShaderGroup) {
        let platform = &mut *self.platform;
        if let Some(fetch_shader) = group.fetch_shader {
            platform.set_fetch_shader(fetch_shader);
        }
        platform.set_vertex_shader(group.vertex_shader);
        platform.set_pixel_shader(group.pixel_shader);
        platform.set_attribute_buffer(&self.position, 0, self.position.elem_size, 0);
        platform.set_attribute_buffer(&self.colour, 1, self.colour.elem_size, 0);
        platform.draw(PrimitiveMode::Triangles, scene::VERTEX_COUNT, 0, 1);
    }
}

impl<'p, P: Platform> Drop for Session<'p, P> {
    fn drop(&mut self) {
        info!("Exiting...");
        self.platform.destroy_buffer(&mut self.position);
        self.platform.destroy_buffer(&mut self.colour);
        self.platform.unmount_sd_card();
        self.platform.gfx_shutdown();
        self.platform.proc_shutdown();
        self.platform.log_deinit();
    }
}

/// Creates `buffer` as a CPU-writable vertex buffer holding `records`.
fn provision<P: Platform>(platform: &mut P, buffer: &mut GpuBuffer, records: &[Record]) {
    *buffer = GpuBuffer::new(vertex_buffer_flags(), scene::STRIDE, records.len() as u32);
    platform.create_buffer(buffer);
    platform.map_buffer(buffer, |mapping| {
        mapping.copy_from_slice(bytemuck::cast_slice(records))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{Event, RecordingPlatform};
    use crate::platform::{BufferHandle, Target};
    use log::{Level, LevelFilter};
    use std::sync::{Mutex, Once};
    use std::thread;

    /// Keeps every log line together with the name of the test thread that
    /// wrote it.
    struct CaptureLogger(Mutex<Vec<(Option<String>, Level, String)>>);

    impl log::Log for CaptureLogger {
        fn enabled(&self, _: &log::Metadata<'_>) -> bool {
            true
        }

        fn log(&self, record: &log::Record<'_>) {
            let thread = thread::current().name().map(str::to_owned);
            self.0
                .lock()
                .unwrap()
                .push((thread, record.level(), record.args().to_string()));
        }

        fn flush(&self) {}
    }

    static CAPTURE: CaptureLogger = CaptureLogger(Mutex::new(Vec::new()));
    static INSTALL: Once = Once::new();

    fn capture_logs() {
        INSTALL.call_once(|| {
            log::set_logger(&CAPTURE).unwrap();
            log::set_max_level(LevelFilter::Info);
        });
    }

    fn logged_here() -> Vec<(Level, String)> {
        let thread = thread::current().name().map(str::to_owned);
        CAPTURE
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _, _)| *name == thread)
            .map(|(_, level, line)| (*level, line.clone()))
            .collect()
    }

    fn records(bytes: &[u8]) -> Vec<Record> {
        bytes
            .chunks_exact(16)
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }

    fn teardown() -> Vec<Event> {
        vec![
            Event::UnmountSdCard,
            Event::GfxShutdown,
            Event::ProcShutdown,
            Event::LogDeinit,
        ]
    }

    #[test]
    fn vertex_failure_skips_to_teardown() {
        let mut platform = RecordingPlatform::new().running_for(5).fail_vertex("oops");
        assert_eq!(run(&mut platform), EXIT_SHADER_FAILURE);

        let mut expected = vec![
            Event::LogInit,
            Event::ProcInit,
            Event::GfxInit,
            Event::CompileVertex(false),
            Event::DestroyBuffer(None),
            Event::DestroyBuffer(None),
        ];
        expected.extend(teardown());
        assert_eq!(platform.events(), expected.as_slice());
    }

    #[test]
    fn pixel_failure_skips_to_teardown() {
        let mut platform = RecordingPlatform::new().running_for(5).fail_pixel("oops");
        assert_eq!(run(&mut platform), EXIT_SHADER_FAILURE);

        let mut expected = vec![
            Event::LogInit,
            Event::ProcInit,
            Event::GfxInit,
            Event::CompileVertex(true),
            Event::CompilePixel(false),
            Event::DestroyBuffer(None),
            Event::DestroyBuffer(None),
        ];
        expected.extend(teardown());
        assert_eq!(platform.events(), expected.as_slice());
        assert_eq!(platform.count(|e| matches!(e, Event::ProcIsRunning(_))), 0);
    }

    #[test]
    fn shader_failure_logs_status_and_diagnostic_apart() {
        capture_logs();
        let mut platform = RecordingPlatform::new().fail_pixel("bad output");
        run(&mut platform);

        assert_eq!(
            logged_here(),
            vec![
                (Level::Info, "Shader compilation failed".to_owned()),
                (
                    Level::Error,
                    "Failed to compile pixel shader. Infolog: bad output".to_owned()
                ),
                (Level::Info, "Exiting...".to_owned()),
            ]
        );
    }

    #[test]
    fn not_running_on_first_poll_draws_nothing() {
        let mut platform = RecordingPlatform::new();
        assert_eq!(run(&mut platform), EXIT_SUCCESS);

        assert_eq!(platform.count(|e| *e == Event::ProcIsRunning(false)), 1);
        assert_eq!(platform.count(|e| matches!(e, Event::Draw { .. })), 0);
        assert_eq!(platform.count(|e| *e == Event::BeginRender), 0);

        let events = platform.events();
        let tail = &events[events.len() - 6..];
        let mut expected = vec![
            Event::DestroyBuffer(Some(BufferHandle(0))),
            Event::DestroyBuffer(Some(BufferHandle(1))),
        ];
        expected.extend(teardown());
        assert_eq!(tail, expected.as_slice());
        assert_eq!(platform.live_buffers(), 0);
    }

    #[test]
    fn buffers_are_seeded_from_the_constant_tables() {
        let mut platform = RecordingPlatform::new();
        run(&mut platform);

        for handle in 0..2 {
            assert!(platform.events().contains(&Event::CreateBuffer {
                handle: BufferHandle(handle),
                flags: vertex_buffer_flags(),
                elem_size: 16,
                elem_count: 3,
            }));
        }
        let position = platform.unlock_history(BufferHandle(0));
        let colour = platform.unlock_history(BufferHandle(1));
        assert_eq!(position.len(), 1);
        assert_eq!(colour.len(), 1);
        assert_eq!(records(position[0]), scene::POSITIONS.to_vec());
        assert_eq!(records(colour[0]), scene::COLOURS.to_vec());
    }

    #[test]
    fn attributes_bind_to_streams_zero_and_one() {
        let mut platform = RecordingPlatform::new();
        run(&mut platform);

        let fetch = platform.events().iter().find_map(|e| match e {
            Event::CreateFetchShader(attributes) => Some(attributes.clone()),
            _ => None,
        });
        let attributes = fetch.unwrap();
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes[0].name, "in_position");
        assert_eq!((attributes[0].location, attributes[0].buffer), (0, 0));
        assert_eq!(attributes[1].name, "in_color");
        assert_eq!((attributes[1].location, attributes[1].buffer), (1, 1));
        for attribute in &attributes {
            assert_eq!(attribute.offset, 0);
            assert_eq!(attribute.format, AttribFormat::Float32x4);
        }
    }

    #[test]
    fn each_frame_draws_once_per_target() {
        let frames = 4;
        let mut platform = RecordingPlatform::new().running_for(frames);
        assert_eq!(run(&mut platform), EXIT_SUCCESS);

        let draws = platform.count(|e| matches!(e, Event::Draw { .. }));
        assert_eq!(draws, 2 * frames);
        assert_eq!(platform.count(|e| *e == Event::BeginRender), frames);
        assert_eq!(platform.count(|e| *e == Event::FinishRender), frames);
        assert_eq!(platform.count(|e| matches!(e, Event::ProcIsRunning(_))), frames + 1);
    }

    #[test]
    fn frame_sequence_and_bindings() {
        let mut platform = RecordingPlatform::new().running_for(1);
        run(&mut platform);

        let events = platform.events();
        let start = events
            .iter()
            .position(|e| *e == Event::ProcIsRunning(true))
            .unwrap();
        let frame = &events[start + 1..];

        let colour = BufferHandle(1);
        assert_eq!(frame[0], Event::LockBuffer(colour));
        assert_eq!(frame[1], Event::UnlockBuffer(colour));
        assert_eq!(frame[2], Event::BeginRender);

        let draw = |target: Target, clear: [f32; 4]| {
            vec![
                Event::BeginTarget(target),
                Event::ClearColor(clear),
                Event::SetFetchShader(crate::platform::FetchShader(0)),
                Event::SetVertexShader(crate::platform::VertexShader(0)),
                Event::SetPixelShader(crate::platform::PixelShader(0)),
                Event::SetAttributeBuffer {
                    handle: BufferHandle(0),
                    index: 0,
                    stride: 16,
                    offset: 0,
                },
                Event::SetAttributeBuffer {
                    handle: colour,
                    index: 1,
                    stride: 16,
                    offset: 0,
                },
                Event::Draw {
                    mode: PrimitiveMode::Triangles,
                    count: 3,
                    first: 0,
                    instances: 1,
                },
                Event::FinishTarget(target),
            ]
        };
        let mut expected = draw(Target::Tv, [0.0, 0.0, 1.0, 1.0]);
        expected.extend(draw(Target::Drc, [1.0, 0.0, 1.0, 1.0]));
        expected.push(Event::FinishRender);
        expected.push(Event::ProcIsRunning(false));

        assert_eq!(&frame[3..3 + expected.len()], expected.as_slice());
    }

    #[test]
    fn colour_buffer_animates_once_per_frame() {
        let frames = 150;
        let mut platform = RecordingPlatform::new().running_for(frames);
        run(&mut platform);

        let history = platform.unlock_history(BufferHandle(1));
        // Initial upload plus one write per frame.
        assert_eq!(history.len(), frames + 1);

        let mut expected = scene::COLOURS;
        assert_eq!(records(history[0]), expected.to_vec());
        for snapshot in &history[1..] {
            scene::animate(&mut expected);
            assert_eq!(records(snapshot), expected.to_vec());
        }

        let position = platform.unlock_history(BufferHandle(0));
        assert_eq!(position.len(), 1);
    }

    #[test]
    fn colour_is_only_mapped_between_targets() {
        let frames = 3;
        let mut platform = RecordingPlatform::new().running_for(frames);
        run(&mut platform);

        let mut open = false;
        for event in platform.events() {
            match event {
                Event::BeginTarget(_) => open = true,
                Event::FinishTarget(_) => open = false,
                Event::LockBuffer(_) => assert!(!open),
                _ => {}
            }
        }
        // Two uploads, then one animation step per frame.
        assert_eq!(
            platform.count(|e| matches!(e, Event::LockBuffer(_))),
            2 + frames
        );
    }

    #[test]
    #[should_panic(expected = "locked while an open target draws from it")]
    fn locking_a_buffer_an_open_target_draws_from_is_refused() {
        let mut platform = RecordingPlatform::new();
        let mut colour = GpuBuffer::default();
        provision(&mut platform, &mut colour, &scene::COLOURS);

        platform.begin_target(Target::Tv);
        platform.set_attribute_buffer(&colour, 1, scene::STRIDE, 0);
        platform.draw(PrimitiveMode::Triangles, scene::VERTEX_COUNT, 0, 1);
        platform.map_buffer(&colour, scene::animate_bytes);
    }
}
