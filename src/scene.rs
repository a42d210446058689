use crate::platform::Target;

/// One four-component float vertex record.
pub type Record = [f32; 4];

/// Bytes per record in both vertex buffers.
pub const STRIDE: u32 = std::mem::size_of::<Record>() as u32;

pub const VERTEX_COUNT: u32 = 3;

pub const POSITIONS: [Record; 3] = [
    [1.0, -1.0, 0.0, 1.0],
    [0.0, 1.0, 0.0, 1.0],
    [-1.0, -1.0, 1.0, 1.0],
];

pub const COLOURS: [Record; 3] = [
    [1.0, 0.0, 0.0, 1.0],
    [0.0, 1.0, 0.0, 1.0],
    [0.0, 0.0, 1.0, 1.0],
];

/// What the per-frame step does to one colour channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Held at 1.0.
    Pinned,
    /// Climbs by [`STEP`] and wraps to 0.0 once it reaches 1.0.
    Animated,
}

use self::Channel::{Animated, Pinned};

/// Channel roles per vertex: each vertex keeps its own primary and alpha
/// pinned and cycles the other two.
pub const CHANNEL_ROLES: [[Channel; 4]; 3] = [
    [Pinned, Animated, Animated, Pinned],
    [Animated, Pinned, Animated, Pinned],
    [Animated, Animated, Pinned, Pinned],
];

pub const STEP: f32 = 0.01;

/// Clear colour of each output, in draw order.
pub const TARGETS: [(Target, [f32; 4]); 2] = [
    (Target::Tv, [0.0, 0.0, 1.0, 1.0]),
    (Target::Drc, [1.0, 0.0, 1.0, 1.0]),
];

/// Next value of an animated channel.
pub fn advance(value: f32) -> f32 {
    if value >= 1.0 {
        0.0
    } else {
        value + STEP
    }
}

/// Applies one frame of colour animation in place.
pub fn animate(colours: &mut [Record; 3]) {
    for (record, roles) in colours.iter_mut().zip(CHANNEL_ROLES.iter()) {
        for (value, role) in record.iter_mut().zip(roles.iter()) {
            *value = match role {
                Pinned => 1.0,
                Animated => advance(*value),
            };
        }
    }
}

/// Same as [`animate`], over the raw bytes of a mapped colour buffer.
pub fn animate_bytes(mapping: &mut [u8]) {
    let mut colours = [[0.0; 4]; 3];
    for (record, chunk) in colours.iter_mut().zip(mapping.chunks_exact(STRIDE as usize)) {
        *record = bytemuck::pod_read_unaligned(chunk);
    }
    animate(&mut colours);
    mapping.copy_from_slice(bytemuck::cast_slice(&colours));
}
