//! Timestamp-based frame selection
//!
//! Picks the buffered frame closest to a target time. The recording path
//! drains buffers in order and does not need this; it serves collaborators
//! that sample frames against the clock.

use crate::capture::traits::{AudioChunk, Frame};
use crate::recorder::buffer::BoundedBuffer;
use crate::recorder::clock::Clock;
use std::sync::Arc;
use std::time::Duration;

/// Frames examined per lookup
pub const SCAN_LIMIT: usize = 10;

const SCAN_WAIT: Duration = Duration::from_millis(10);

pub struct Synchronizer {
    frames: Arc<BoundedBuffer<Frame>>,
    audio: Option<Arc<BoundedBuffer<AudioChunk>>>,
    clock: Arc<Clock>,
}

impl Synchronizer {
    pub fn new(
        frames: Arc<BoundedBuffer<Frame>>,
        audio: Option<Arc<BoundedBuffer<AudioChunk>>>,
        clock: Arc<Clock>,
    ) -> Self {
        Self {
            frames,
            audio,
            clock,
        }
    }

    /// Frame whose timestamp is nearest `target`. Frames passed over are put
    /// back at the tail of the buffer.
    pub fn next_frame(&self, target: f64) -> Option<Frame> {
        let scan = self.frames.size().clamp(1, SCAN_LIMIT);
        let mut best: Option<(Frame, f64)> = None;

        for _ in 0..scan {
            let Some((frame, ts)) = self.frames.get(SCAN_WAIT) else {
                break;
            };
            match &best {
                Some((_, best_ts)) if (best_ts - target).abs() <= (ts - target).abs() => {
                    self.frames.requeue(frame, ts);
                }
                _ => {
                    if let Some((previous, previous_ts)) = best.replace((frame, ts)) {
                        self.frames.requeue(previous, previous_ts);
                    }
                }
            }
        }

        best.map(|(frame, _)| frame)
    }

    /// Frame nearest the clock's current elapsed time
    pub fn next_frame_now(&self) -> Option<Frame> {
        self.next_frame(self.clock.elapsed())
    }

    /// Oldest buffered audio chunk, if one arrives within a short wait
    pub fn next_audio(&self) -> Option<AudioChunk> {
        self.audio
            .as_ref()
            .and_then(|buffer| buffer.get(SCAN_WAIT))
            .map(|(chunk, _)| chunk)
    }
}
