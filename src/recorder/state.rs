//! Recording state management
//!
//! Defines the recording state machine, the session configuration and what a
//! finished session hands back.

use crate::encoder::types::{quality_preset, EncoderStrategy, OutputFormat, QualityPreset};
use crate::utils::error::{RecorderError, RecorderResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Current state of the recording system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No recording in progress
    #[default]
    Idle,
    /// Currently recording
    Recording,
    /// Recording is paused
    Paused,
    /// Capture has ended, encoder is finishing
    Stopping,
    /// Recording completed
    Finished,
    /// Encoder failed unrecoverably
    Failed,
}

impl RecordingState {
    /// Recording or paused
    pub fn is_active(&self) -> bool {
        matches!(self, RecordingState::Recording | RecordingState::Paused)
    }
}

/// Sub-rectangle of a monitor, origin relative to the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Which input device to record from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AudioDeviceSelector {
    Index(usize),
    /// Case-insensitive substring of the device name
    Name(String),
}

fn default_fps() -> u32 {
    30
}

fn default_monitor() -> usize {
    1
}

fn default_format() -> String {
    "mp4".to_string()
}

fn default_quality() -> String {
    "High".to_string()
}

fn default_sample_rate() -> u32 {
    44_100
}

fn default_channels() -> u16 {
    2
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_video_buffer() -> usize {
    100
}

fn default_audio_buffer() -> usize {
    200
}

/// Configuration for starting a recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingConfig {
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Stop automatically after this many seconds of (unpaused) recording
    #[serde(default)]
    pub duration_secs: Option<f64>,

    /// Capture only this part of the monitor
    #[serde(default)]
    pub region: Option<Region>,

    /// 0 = every monitor, 1.. = a single monitor
    #[serde(default = "default_monitor")]
    pub monitor: usize,

    #[serde(default = "default_format")]
    pub format: String,

    /// High, Medium or Low
    #[serde(default = "default_quality")]
    pub quality: String,

    #[serde(default)]
    pub enable_audio: bool,

    #[serde(default)]
    pub audio_device: Option<AudioDeviceSelector>,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Destination file. The extension is replaced by the format's.
    pub output_path: PathBuf,

    #[serde(default)]
    pub strategy: EncoderStrategy,

    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    #[serde(default = "default_video_buffer")]
    pub video_buffer_capacity: usize,

    #[serde(default = "default_audio_buffer")]
    pub audio_buffer_capacity: usize,
}

impl RecordingConfig {
    /// Defaults for everything except the output path
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            fps: default_fps(),
            duration_secs: None,
            region: None,
            monitor: default_monitor(),
            format: default_format(),
            quality: default_quality(),
            enable_audio: false,
            audio_device: None,
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            output_path: output_path.into(),
            strategy: EncoderStrategy::default(),
            ffmpeg_path: default_ffmpeg_path(),
            video_buffer_capacity: default_video_buffer(),
            audio_buffer_capacity: default_audio_buffer(),
        }
    }

    pub fn output_format(&self) -> RecorderResult<OutputFormat> {
        self.format.parse()
    }

    pub fn quality_preset(&self) -> RecorderResult<&'static QualityPreset> {
        quality_preset(&self.quality)
    }

    /// Reject settings that could never record. Touches no device or file.
    pub fn validate(&self) -> RecorderResult<()> {
        if self.fps == 0 {
            return Err(RecorderError::Configuration("fps must be positive".to_string()));
        }
        if let Some(duration) = self.duration_secs {
            if !duration.is_finite() || duration <= 0.0 {
                return Err(RecorderError::Configuration(format!(
                    "duration must be a positive number of seconds, got {}",
                    duration
                )));
            }
        }
        if let Some(region) = self.region {
            if region.width == 0 || region.height == 0 {
                return Err(RecorderError::Configuration(format!(
                    "region {}x{} is empty",
                    region.width, region.height
                )));
            }
        }
        self.output_format()?;
        self.quality_preset()?;
        if self.sample_rate == 0 || self.channels == 0 {
            return Err(RecorderError::Configuration(format!(
                "invalid audio format {} Hz / {} channels",
                self.sample_rate, self.channels
            )));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(RecorderError::Configuration("output path is empty".to_string()));
        }
        if self.video_buffer_capacity == 0 || self.audio_buffer_capacity == 0 {
            return Err(RecorderError::Configuration(
                "buffer capacities must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// One recording, from `start` to `cleanup`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Frame size, fixed for the session
    pub width: u32,
    pub height: u32,
    pub config: RecordingConfig,
}

impl Session {
    pub fn new(config: RecordingConfig, width: u32, height: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            width,
            height,
            config,
        }
    }
}

/// Result of a completed recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOutput {
    pub path: PathBuf,
    pub has_audio: bool,

    /// Audio was captured but had to be dropped to produce a file
    pub audio_fallback: bool,
    pub frames_captured: u64,
    pub frames_dropped: u64,

    /// Recorded time, pauses excluded
    pub duration_secs: f64,
    pub session_id: Uuid,
}

/// Progress snapshot passed to the progress callback
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub elapsed: f64,
    pub remaining: Option<f64>,
    pub frames_captured: u64,
    pub audio_megabytes: f64,
}

pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_json() {
        let config: RecordingConfig =
            serde_json::from_str(r#"{"outputPath": "/tmp/take.mp4"}"#).unwrap();

        assert_eq!(config.fps, 30);
        assert_eq!(config.monitor, 1);
        assert_eq!(config.format, "mp4");
        assert_eq!(config.quality, "High");
        assert!(!config.enable_audio);
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.channels, 2);
        assert_eq!(config.strategy, EncoderStrategy::Finalize);
        assert_eq!(config.video_buffer_capacity, 100);
        assert_eq!(config.audio_buffer_capacity, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_output_path_is_required() {
        assert!(serde_json::from_str::<RecordingConfig>(r#"{"fps": 10}"#).is_err());
    }

    #[test]
    fn test_device_selector_by_index_or_name() {
        let config: RecordingConfig = serde_json::from_str(
            r#"{
                "outputPath": "a.mp4",
                "enableAudio": true,
                "audioDevice": 2,
                "strategy": "livePipe"
            }"#,
        )
        .unwrap();
        assert_eq!(config.audio_device, Some(AudioDeviceSelector::Index(2)));
        assert_eq!(config.strategy, EncoderStrategy::LivePipe);

        let config: RecordingConfig =
            serde_json::from_str(r#"{"outputPath": "a.mp4", "audioDevice": "usb"}"#).unwrap();
        assert_eq!(
            config.audio_device,
            Some(AudioDeviceSelector::Name("usb".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let base = RecordingConfig::new("/tmp/take.mp4");

        let cases: [fn(&mut RecordingConfig); 8] = [
            |c| c.fps = 0,
            |c| c.duration_secs = Some(0.0),
            |c| c.duration_secs = Some(f64::NAN),
            |c| {
                c.region = Some(Region {
                    x: 0,
                    y: 0,
                    width: 0,
                    height: 10,
                })
            },
            |c| c.format = "webm".to_string(),
            |c| c.quality = "Ultra".to_string(),
            |c| c.sample_rate = 0,
            |c| c.output_path = PathBuf::new(),
        ];

        for mutate in cases {
            let mut config = base.clone();
            mutate(&mut config);
            assert!(matches!(
                config.validate(),
                Err(RecorderError::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_labels_ignore_case() {
        let mut config = RecordingConfig::new("/tmp/take");
        config.quality = "medium".to_string();
        config.format = "MKV".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(config.quality_preset().unwrap().crf, 23);
        assert_eq!(config.output_format().unwrap(), OutputFormat::Mkv);
    }

    #[test]
    fn test_state_activity() {
        assert!(RecordingState::Recording.is_active());
        assert!(RecordingState::Paused.is_active());
        assert!(!RecordingState::Stopping.is_active());
        assert_eq!(RecordingState::default(), RecordingState::Idle);
    }
}
