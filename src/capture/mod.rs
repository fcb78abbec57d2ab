//! Capture sources
//!
//! Screen frames come from `xcap`, microphone audio from `cpal`. Both sit
//! behind small backend traits so tests can run without a display or sound card.

pub mod audio;
pub mod screen;
pub mod traits;

pub use audio::{AudioSource, ChunkCallback, CpalBackend, CHUNK_FRAMES};
pub use screen::{MonitorBounds, ScreenSource, XcapBackend, ALL_MONITORS};
pub use traits::{
    AudioBackend, AudioChunk, AudioDeviceInfo, AudioFormat, AudioStream, BackendFactory,
    CaptureBackend, DisplayInfo, Frame,
};
