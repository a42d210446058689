use std::collections::HashMap;

use crate::platform::{BufferHandle, Target};

/// A frame handed to the queue: the output it was drawn on and the fence
/// slot guarding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submitted {
    pub target: Target,
    pub slot: usize,
}

/// Which submitted frames may still be reading which buffers.
#[derive(Debug, Default)]
pub struct InFlightReads {
    recording: Vec<BufferHandle>,
    submitted: HashMap<BufferHandle, Vec<Submitted>>,
}

impl InFlightReads {
    /// Notes that the target being recorded reads `buffer`.
    pub fn record(&mut self, buffer: BufferHandle) {
        if !self.recording.contains(&buffer) {
            self.recording.push(buffer);
        }
    }

    /// Whether the target being recorded has drawn from `buffer`.
    pub fn is_recording(&self, buffer: BufferHandle) -> bool {
        self.recording.contains(&buffer)
    }

    /// The recorded reads went to the queue as `frame`.
    pub fn submit(&mut self, frame: Submitted) {
        for buffer in self.recording.drain(..) {
            let frames = self.submitted.entry(buffer).or_insert_with(Vec::new);
            if !frames.contains(&frame) {
                frames.push(frame);
            }
        }
    }

    /// The target skipped its frame; nothing recorded reaches the GPU.
    pub fn discard(&mut self) {
        self.recording.clear();
    }

    /// Frames that must complete before the CPU may touch `buffer`. The
    /// caller is expected to wait on all of them.
    pub fn take(&mut self, buffer: BufferHandle) -> Vec<Submitted> {
        self.submitted.remove(&buffer).unwrap_or_default()
    }

    pub fn forget(&mut self, buffer: BufferHandle) {
        self.recording.retain(|&b| b != buffer);
        self.submitted.remove(&buffer);
    }
}
