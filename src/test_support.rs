//! Fakes shared by unit tests: capture and audio backends that need no
//! hardware, and a shell script that stands in for ffmpeg.

use crate::capture::screen::ScreenSource;
use crate::capture::traits::{
    AudioBackend, AudioDeviceInfo, AudioFormat, AudioStream, CaptureBackend, DisplayInfo,
};
use crate::utils::error::{RecorderError, RecorderResult};
use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub fn fake_display(id: u32, x: i32, y: i32, width: u32, height: u32) -> DisplayInfo {
    DisplayInfo {
        id,
        name: format!("Fake {}", id),
        x,
        y,
        width,
        height,
        scale_factor: 1.0,
        is_primary: id == 0,
    }
}

/// Displays painted a solid colour whose red channel is the display id
#[derive(Clone)]
pub struct FakeScreen {
    displays: Vec<DisplayInfo>,
    fail_every: Option<u64>,
    grabs: u64,
}

impl FakeScreen {
    pub fn new(displays: Vec<DisplayInfo>) -> Self {
        Self {
            displays,
            fail_every: None,
            grabs: 0,
        }
    }

    /// Every `n`-th grab on a handle fails
    pub fn failing_grabs(mut self, n: u64) -> Self {
        self.fail_every = Some(n);
        self
    }

    pub fn single(width: u32, height: u32) -> Self {
        Self::new(vec![fake_display(0, 0, 0, width, height)])
    }

    pub fn into_source(self) -> ScreenSource {
        ScreenSource::with_factory(Arc::new(move || {
            Ok(Box::new(self.clone()) as Box<dyn CaptureBackend>)
        }))
    }
}

impl CaptureBackend for FakeScreen {
    fn displays(&mut self) -> RecorderResult<Vec<DisplayInfo>> {
        Ok(self.displays.clone())
    }

    fn grab(&mut self, index: usize) -> RecorderResult<RgbaImage> {
        self.grabs += 1;
        if self.fail_every.is_some_and(|n| self.grabs % n == 0) {
            return Err(RecorderError::Capture("grab timed out".to_string()));
        }
        let display = self
            .displays
            .get(index)
            .ok_or_else(|| RecorderError::Capture(format!("no display {}", index)))?;
        Ok(RgbaImage::from_pixel(
            display.width,
            display.height,
            Rgba([display.id as u8, 0x40, 0x80, 0xff]),
        ))
    }
}

pub fn fake_input(index: usize, name: &str) -> AudioDeviceInfo {
    AudioDeviceInfo {
        index,
        name: name.to_string(),
        channels: 2,
        default_sample_rate: 44_100,
    }
}

/// Audio backend producing constant samples at roughly real-time pace
pub struct FakeAudio {
    devices: Vec<AudioDeviceInfo>,
    default: Option<usize>,
    fail_open: bool,
    fail_every: Option<u64>,
}

impl FakeAudio {
    pub fn new(devices: Vec<AudioDeviceInfo>) -> Self {
        Self {
            devices,
            default: None,
            fail_open: false,
            fail_every: None,
        }
    }

    pub fn with_default(mut self, index: usize) -> Self {
        self.default = Some(index);
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Every `n`-th read on an opened stream fails
    pub fn failing_reads(mut self, n: u64) -> Self {
        self.fail_every = Some(n);
        self
    }
}

impl AudioBackend for FakeAudio {
    fn input_devices(&self) -> RecorderResult<Vec<AudioDeviceInfo>> {
        Ok(self.devices.clone())
    }

    fn default_input_index(&self) -> Option<usize> {
        self.default
    }

    fn open_input(
        &self,
        _device_index: usize,
        format: AudioFormat,
    ) -> RecorderResult<Box<dyn AudioStream>> {
        if self.fail_open {
            return Err(RecorderError::DeviceUnavailable("device busy".to_string()));
        }
        Ok(Box::new(FakeStream {
            format,
            fail_every: self.fail_every,
            reads: 0,
        }))
    }
}

struct FakeStream {
    format: AudioFormat,
    fail_every: Option<u64>,
    reads: u64,
}

impl AudioStream for FakeStream {
    fn read(&mut self, frames: usize) -> RecorderResult<Option<Vec<u8>>> {
        std::thread::sleep(Duration::from_millis(5));
        self.reads += 1;
        if self.fail_every.is_some_and(|n| self.reads % n == 0) {
            return Err(RecorderError::DeviceUnavailable("buffer overrun".to_string()));
        }
        Ok(Some(vec![1; frames * self.format.bytes_per_frame()]))
    }
}

/// Behaviour of the fake ffmpeg script
#[derive(Debug, Clone, Copy)]
pub enum FakeFfmpeg {
    /// Consume stdin, write the output file, exit 0
    Ok,
    /// Fail any invocation that carries raw audio
    FailAudio,
    /// Write the output, then die from SIGKILL
    KillAfterWrite,
    /// Consume stdin, write nothing, exit 1
    NoOutput,
    /// Exit immediately without reading stdin
    ExitEarly,
    /// Never exit on its own
    Hang,
}

/// Write an executable stand-in for ffmpeg into `dir`. The last argument is
/// taken as the output path.
#[cfg(unix)]
pub fn fake_ffmpeg(dir: &Path, behaviour: FakeFfmpeg) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let body = match behaviour {
        FakeFfmpeg::Ok => "cat > /dev/null\nprintf 'fake-media' > \"$last\"\nexit 0\n",
        FakeFfmpeg::FailAudio => concat!(
            "case \" $* \" in *\" s16le \"*) echo 'audio mux failed' >&2; exit 1;; esac\n",
            "cat > /dev/null\nprintf 'fake-media' > \"$last\"\nexit 0\n"
        ),
        FakeFfmpeg::KillAfterWrite => {
            "cat > /dev/null\nprintf 'partial-media' > \"$last\"\nkill -9 $$\n"
        }
        FakeFfmpeg::NoOutput => "cat > /dev/null\necho 'encoder crashed' >&2\nexit 1\n",
        FakeFfmpeg::ExitEarly => "exit 1\n",
        FakeFfmpeg::Hang => "exec sleep 60\n",
    };
    let script = format!(
        concat!(
            "#!/bin/sh\nfor last; do :; done\n",
            "case \"$1\" in -version) echo 'ffmpeg version fake'; exit 0;; esac\n{}"
        ),
        body
    );

    let path = dir.join(format!("fake-ffmpeg-{:?}", behaviour).to_lowercase());
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
