//! screenrec - screen and microphone recording to a single file.
//!
//! Frames from the display and PCM chunks from an input device are captured
//! on their own threads, pass through bounded drop-on-full buffers, and are
//! encoded by an external `ffmpeg` process. [`recorder::RecordingCoordinator`]
//! ties the pieces together.

pub mod capture;
pub mod encoder;
pub mod recorder;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use recorder::{RecordingConfig, RecordingCoordinator, RecordingOutput, RecordingState};
pub use utils::error::{RecorderError, RecorderResult};
