//! Capture trait definitions
//!
//! Platform-agnostic types and traits for capture sources. Production
//! backends live next to their source (`screen::XcapBackend`,
//! `audio::CpalBackend`); tests plug in fakes through the same traits.

use crate::utils::error::RecorderResult;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Bytes per pixel of the packed RGB24 frame format
pub const BYTES_PER_PIXEL: usize = 3;

/// Bytes per sample of the s16le PCM format
pub const BYTES_PER_SAMPLE: usize = 2;

/// Information about a display/screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    /// Backend display index
    pub id: u32,

    /// Display name
    pub name: String,

    /// Origin in the virtual desktop
    pub x: i32,
    pub y: i32,

    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Scale factor (e.g., 2.0 for Retina)
    pub scale_factor: f32,

    /// Whether this is the primary display
    pub is_primary: bool,
}

/// Information about an audio input device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDeviceInfo {
    /// Position in the backend's enumeration
    pub index: usize,

    /// Device name
    pub name: String,

    /// Maximum input channels
    pub channels: u16,

    /// Default sample rate in Hz
    pub default_sample_rate: u32,
}

/// PCM layout shared by every chunk of a session (always s16le)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * BYTES_PER_SAMPLE
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * BYTES_PER_SAMPLE
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
        }
    }
}

/// One captured image
#[derive(Debug, Clone)]
pub struct Frame {
    data: Arc<[u8]>,
    width: u32,
    height: u32,
    timestamp: f64,
    sequence: u64,
}

impl Frame {
    /// Wrap packed RGB24 bytes. The length must be `width * height * 3`.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize * BYTES_PER_PIXEL);
        Self {
            data: data.into(),
            width,
            height,
            timestamp: 0.0,
            sequence: 0,
        }
    }

    /// Convert an RGBA capture, dropping the alpha channel
    pub fn from_rgba(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        let rgb = image::DynamicImage::ImageRgba8(image).into_rgb8();
        Self::new(rgb.into_raw(), width, height)
    }

    /// Tag the frame with its session timestamp and sequence number
    pub fn stamped(self, timestamp: f64, sequence: u64) -> Self {
        Self {
            timestamp,
            sequence,
            ..self
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Seconds since session start, pause excluded
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One block of interleaved s16le samples
#[derive(Debug, Clone)]
pub struct AudioChunk {
    data: Arc<[u8]>,
    format: AudioFormat,
    timestamp: f64,
}

impl AudioChunk {
    pub fn new(data: Vec<u8>, format: AudioFormat, timestamp: f64) -> Self {
        Self {
            data: data.into(),
            format,
            timestamp,
        }
    }

    pub fn stamped(self, timestamp: f64) -> Self {
        Self { timestamp, ..self }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Playback length in seconds
    pub fn duration(&self) -> f64 {
        let per_second = self.format.bytes_per_second();
        if per_second == 0 {
            return 0.0;
        }
        self.data.len() as f64 / per_second as f64
    }
}

/// Native screen grabbing handle.
///
/// Handles are not assumed to be thread-safe; `ScreenSource` keeps one per
/// capture thread.
pub trait CaptureBackend {
    /// Physical displays, in backend order
    fn displays(&mut self) -> RecorderResult<Vec<DisplayInfo>>;

    /// Grab the full contents of the display at `index` (into `displays()`)
    fn grab(&mut self, index: usize) -> RecorderResult<RgbaImage>;
}

/// Opens a capture handle for the calling thread
pub type BackendFactory = Arc<dyn Fn() -> RecorderResult<Box<dyn CaptureBackend>> + Send + Sync>;

/// Audio input subsystem
pub trait AudioBackend: Send + Sync {
    /// Input-capable devices
    fn input_devices(&self) -> RecorderResult<Vec<AudioDeviceInfo>>;

    /// Index of the platform default input, if the platform reports one
    fn default_input_index(&self) -> Option<usize>;

    /// Open a device for s16le capture. Called on the capture thread.
    fn open_input(
        &self,
        device_index: usize,
        format: AudioFormat,
    ) -> RecorderResult<Box<dyn AudioStream>>;
}

/// An open input stream
pub trait AudioStream {
    /// Read exactly `frames` sample frames as s16le bytes.
    ///
    /// `Ok(None)` means not enough samples arrived yet; callers retry.
    fn read(&mut self, frames: usize) -> RecorderResult<Option<Vec<u8>>>;
}
