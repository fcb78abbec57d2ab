//! Encoding stage: raw frames and samples to a container file via ffmpeg

pub mod ffmpeg;
pub mod types;

pub use ffmpeg::{encode_from_files, is_available, Encoder, EncoderProcess};
pub use types::{
    ensure_extension, quality_preset, EncodeOutput, EncoderSettings, EncoderStrategy,
    OutputFormat, QualityPreset,
};
