//! Encoder types and configuration
//!
//! Container formats, quality presets and the settings an `Encoder` is built
//! from.

use crate::capture::traits::AudioFormat;
use crate::utils::error::{RecorderError, RecorderResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Output container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Avi,
    Mov,
    Mkv,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [
        OutputFormat::Mp4,
        OutputFormat::Avi,
        OutputFormat::Mov,
        OutputFormat::Mkv,
    ];

    /// File extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Avi => "avi",
            OutputFormat::Mov => "mov",
            OutputFormat::Mkv => "mkv",
        }
    }

    /// FFmpeg audio codec for this container
    pub fn audio_codec(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "aac",
            _ => "libmp3lame",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = RecorderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().trim_start_matches('.');
        OutputFormat::ALL
            .into_iter()
            .find(|format| format.extension().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                RecorderError::Configuration(format!(
                    "unsupported format '{}' (expected one of mp4, avi, mov, mkv)",
                    s
                ))
            })
    }
}

/// Encoder parameters for one quality level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityPreset {
    pub label: &'static str,
    pub video_bitrate: &'static str,
    pub audio_bitrate: &'static str,
    pub crf: u8,
}

const PRESETS: [QualityPreset; 3] = [
    QualityPreset {
        label: "High",
        video_bitrate: "5000k",
        audio_bitrate: "192k",
        crf: 18,
    },
    QualityPreset {
        label: "Medium",
        video_bitrate: "3000k",
        audio_bitrate: "128k",
        crf: 23,
    },
    QualityPreset {
        label: "Low",
        video_bitrate: "1000k",
        audio_bitrate: "96k",
        crf: 28,
    },
];

/// Look up a preset by label, ignoring case
pub fn quality_preset(label: &str) -> RecorderResult<&'static QualityPreset> {
    PRESETS
        .iter()
        .find(|preset| preset.label.eq_ignore_ascii_case(label.trim()))
        .ok_or_else(|| {
            RecorderError::Configuration(format!(
                "unknown quality '{}' (expected High, Medium or Low)",
                label
            ))
        })
}

impl QualityPreset {
    /// `-bufsize` value: twice the video bitrate
    pub fn buffer_size(&self) -> String {
        match self.video_bitrate.strip_suffix('k').and_then(|n| n.parse::<u32>().ok()) {
            Some(kbps) => format!("{}k", kbps * 2),
            None => self.video_bitrate.to_string(),
        }
    }
}

/// How frames reach ffmpeg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EncoderStrategy {
    /// Raw scratch files, encoded and muxed once at finish
    #[default]
    Finalize,
    /// Video streamed to ffmpeg's stdin while recording
    LivePipe,
}

/// Everything an `Encoder` needs
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub output_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: OutputFormat,
    pub quality: &'static QualityPreset,
    pub strategy: EncoderStrategy,
    pub ffmpeg_path: PathBuf,
    /// `None` records video only
    pub audio: Option<AudioFormat>,
    /// Where scratch files go. Defaults to the output directory.
    pub scratch_dir: Option<PathBuf>,
}

impl EncoderSettings {
    pub fn new(output_path: impl Into<PathBuf>, width: u32, height: u32, fps: u32) -> Self {
        Self {
            output_path: output_path.into(),
            width,
            height,
            fps,
            format: OutputFormat::Mp4,
            quality: &PRESETS[0],
            strategy: EncoderStrategy::Finalize,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            audio: None,
            scratch_dir: None,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * crate::capture::traits::BYTES_PER_PIXEL
    }

    /// Final output path with the container's extension
    pub fn resolved_output(&self) -> PathBuf {
        ensure_extension(&self.output_path, self.format)
    }
}

/// What `finish()` produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodeOutput {
    pub path: PathBuf,
    pub has_audio: bool,
    /// Audio was recorded but dropped because the mux failed
    pub audio_fallback: bool,
    pub frames_written: u64,
    pub video_bytes: u64,
}

/// Replace the path's extension with the container's
pub fn ensure_extension(path: &Path, format: OutputFormat) -> PathBuf {
    path.with_extension(format.extension())
}
