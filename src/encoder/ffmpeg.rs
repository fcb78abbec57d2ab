//! FFmpeg encoder
//!
//! Turns raw RGB24 frames and s16le audio into a single container file by
//! driving an external `ffmpeg` process. Two strategies are supported:
//!
//! - `Finalize`: frames and samples go to raw scratch files; one ffmpeg run at
//!   `finish()` encodes and muxes them.
//! - `LivePipe`: frames stream into ffmpeg's stdin while recording. Audio is
//!   staged on disk and muxed in with `-c:v copy` at `finish()`.
//!
//! Either way a failed audio mux falls back to the video-only file and is
//! reported through `EncodeOutput::audio_fallback`.

use crate::capture::traits::AudioFormat;
use crate::encoder::types::{EncodeOutput, EncoderSettings, EncoderStrategy};
use crate::utils::error::{RecorderError, RecorderResult};
use crossbeam_channel::{bounded, Receiver};
use parking_lot::Mutex;
use std::fs;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStderr, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

/// Wait for a live encoder to drain after its stdin closes
pub const FINALIZE_TIMEOUT: Duration = Duration::from_secs(30);

/// Wait for a mux (or the base of a scratch encode)
pub const MUX_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const STDERR_TAIL: usize = 2048;

/// Check whether `program` runs and answers `-version`
pub fn is_available(program: impl AsRef<Path>) -> bool {
    Command::new(program.as_ref())
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// How an encoder process ended
#[derive(Debug, Clone)]
pub struct ProcessExit {
    pub success: bool,
    pub timed_out: bool,
    /// Tail of the process's stderr
    pub stderr: String,
}

/// A running ffmpeg child with its stderr drained on a helper thread
pub struct EncoderProcess {
    child: Child,
    stderr_rx: Option<Receiver<String>>,
    label: String,
}

impl EncoderProcess {
    pub fn spawn(
        program: &Path,
        args: &[String],
        piped_stdin: bool,
        label: &str,
    ) -> RecorderResult<Self> {
        tracing::debug!("Spawning {} {}", program.display(), args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(if piped_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                RecorderError::EncoderProcess(format!(
                    "Failed to start {}: {}",
                    program.display(),
                    e
                ))
            })?;

        let stderr_rx = match child.stderr.take().map(drain_stderr).transpose() {
            Ok(rx) => rx,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e.into());
            }
        };

        Ok(Self {
            child,
            stderr_rx,
            label: label.to_string(),
        })
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Wait for exit, killing the process once `timeout` passes
    pub fn wait(mut self, timeout: Duration) -> RecorderResult<ProcessExit> {
        let deadline = Instant::now() + timeout;
        let (status, timed_out) = loop {
            match self.child.try_wait()? {
                Some(status) => break (Some(status), false),
                None if Instant::now() >= deadline => {
                    let err = RecorderError::ShutdownTimeout(format!(
                        "{} did not exit within {:?}, killing it",
                        self.label, timeout
                    ));
                    tracing::warn!("{}", err);
                    let _ = self.child.kill();
                    break (self.child.wait().ok(), true);
                }
                None => std::thread::sleep(POLL_INTERVAL),
            }
        };

        let stderr = self
            .stderr_rx
            .take()
            .and_then(|rx| rx.recv_timeout(Duration::from_secs(1)).ok())
            .unwrap_or_default();

        if let Some(status) = status.filter(|s| !s.success()) {
            tracing::debug!("{} exited with {}: {}", self.label, status, stderr.trim());
        }

        Ok(ProcessExit {
            success: !timed_out && status.is_some_and(|s| s.success()),
            timed_out,
            stderr,
        })
    }
}

impl Drop for EncoderProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            tracing::warn!("Killing abandoned {} process", self.label);
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn drain_stderr(mut stderr: ChildStderr) -> std::io::Result<Receiver<String>> {
    let (tx, rx) = bounded(1);
    std::thread::Builder::new()
        .name("ffmpeg-stderr".to_string())
        .spawn(move || {
            let mut raw = Vec::new();
            let _ = stderr.read_to_end(&mut raw);
            let text = String::from_utf8_lossy(&raw);
            let start = text
                .char_indices()
                .rev()
                .nth(STDERR_TAIL)
                .map(|(i, _)| i)
                .unwrap_or(0);
            let _ = tx.send(text[start..].to_string());
        })?;
    Ok(rx)
}

fn run(
    program: &Path,
    args: &[String],
    timeout: Duration,
    label: &str,
) -> RecorderResult<ProcessExit> {
    EncoderProcess::spawn(program, args, false, label)?.wait(timeout)
}

fn output_usable(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

/// A non-zero exit only matters when it left nothing usable behind
fn check_exit(output: &Path, exit: &ProcessExit) -> RecorderResult<()> {
    if !output_usable(output) {
        return Err(RecorderError::EncoderProcess(format!(
            "no output written to {}: {}",
            output.display(),
            exit.stderr.trim()
        )));
    }
    if !exit.success {
        tracing::warn!(
            "Encoder ended abnormally but {} has data, keeping it",
            output.display()
        );
    }
    Ok(())
}

fn encode_timeout(frames: u64, fps: u32) -> Duration {
    let recorded = frames as f64 / fps.max(1) as f64;
    MUX_TIMEOUT + Duration::from_secs_f64(recorded * 2.0)
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn video_input_args(settings: &EncoderSettings, input: &str) -> Vec<String> {
    vec![
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgb24".into(),
        "-s".into(),
        format!("{}x{}", settings.width, settings.height),
        "-r".into(),
        settings.fps.to_string(),
        "-i".into(),
        input.to_string(),
    ]
}

fn audio_input_args(format: AudioFormat, input: &str) -> Vec<String> {
    vec![
        "-f".into(),
        "s16le".into(),
        "-ar".into(),
        format.sample_rate.to_string(),
        "-ac".into(),
        format.channels.to_string(),
        "-i".into(),
        input.to_string(),
    ]
}

fn audio_codec_args(settings: &EncoderSettings) -> Vec<String> {
    vec![
        "-c:a".into(),
        settings.format.audio_codec().into(),
        "-b:a".into(),
        settings.quality.audio_bitrate.into(),
        "-shortest".into(),
    ]
}

/// Full encode command: raw video (and optionally raw audio) to the container
pub fn encode_args(
    settings: &EncoderSettings,
    video_input: &str,
    audio_input: Option<(&str, AudioFormat)>,
    output: &Path,
) -> Vec<String> {
    let preset = settings.quality;
    let mut args: Vec<String> = vec!["-y".into(), "-loglevel".into(), "error".into()];
    args.extend(video_input_args(settings, video_input));
    if let Some((input, format)) = audio_input {
        args.extend(audio_input_args(format, input));
    }
    args.extend([
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "medium".into(),
        "-crf".into(),
        preset.crf.to_string(),
        "-maxrate".into(),
        preset.video_bitrate.into(),
        "-bufsize".into(),
        preset.buffer_size(),
        // libx264 with yuv420p needs even dimensions
        "-vf".into(),
        "pad=ceil(iw/2)*2:ceil(ih/2)*2".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
    ]);
    if audio_input.is_some() {
        args.extend(audio_codec_args(settings));
    }
    args.push(path_arg(output));
    args
}

/// Mux command: already-encoded video plus raw audio, video stream copied
pub fn mux_args(
    settings: &EncoderSettings,
    video: &Path,
    audio: &Path,
    format: AudioFormat,
    output: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        path_arg(video),
    ];
    args.extend(audio_input_args(format, &path_arg(audio)));
    args.extend(["-c:v".into(), "copy".into()]);
    args.extend(audio_codec_args(settings));
    args.push(path_arg(output));
    args
}

/// Encode raw scratch files into `settings.resolved_output()`.
///
/// If the audio run fails the output is rebuilt from video alone and
/// `audio_fallback` is set.
pub fn encode_from_files(
    settings: &EncoderSettings,
    video: &Path,
    audio: Option<&Path>,
) -> RecorderResult<EncodeOutput> {
    let output = settings.resolved_output();
    let video_bytes = fs::metadata(video)?.len();
    let frames = video_bytes / settings.frame_size().max(1) as u64;
    let timeout = encode_timeout(frames, settings.fps);
    let video_arg = path_arg(video);
    let audio = audio.filter(|path| output_usable(path));

    let mut audio_fallback = false;
    if let Some(audio) = audio {
        let format = settings.audio.unwrap_or_default();
        let audio_arg = path_arg(audio);
        let args = encode_args(settings, &video_arg, Some((&audio_arg, format)), &output);
        let exit = run(&settings.ffmpeg_path, &args, timeout, "ffmpeg")?;

        if exit.success && output_usable(&output) {
            tracing::info!("Encoded {} frames with audio to {:?}", frames, output);
            return Ok(EncodeOutput {
                path: output,
                has_audio: true,
                audio_fallback: false,
                frames_written: frames,
                video_bytes,
            });
        }

        let err = RecorderError::Mux(exit.stderr.trim().to_string());
        tracing::warn!("{}; retrying without audio", err);
        let _ = fs::remove_file(&output);
        audio_fallback = true;
    }

    let args = encode_args(settings, &video_arg, None, &output);
    let exit = run(&settings.ffmpeg_path, &args, timeout, "ffmpeg")?;
    check_exit(&output, &exit)?;

    tracing::info!("Encoded {} frames to {:?}", frames, output);
    Ok(EncodeOutput {
        path: output,
        has_audio: false,
        audio_fallback,
        frames_written: frames,
        video_bytes,
    })
}

enum VideoSink {
    Scratch(BufWriter<NamedTempFile>),
    Live {
        process: EncoderProcess,
        stdin: BufWriter<ChildStdin>,
    },
    Closed,
}

fn scratch_file(dir: &Path, kind: &str, suffix: &str) -> RecorderResult<NamedTempFile> {
    Ok(tempfile::Builder::new()
        .prefix(&format!(".screenrec-{}-", kind))
        .suffix(suffix)
        .tempfile_in(dir)?)
}

fn into_temp(writer: BufWriter<NamedTempFile>) -> RecorderResult<NamedTempFile> {
    writer.into_inner().map_err(|e| RecorderError::Io(e.into_error()))
}

/// Session encoder. Writers take `&self` so the video and audio drain threads
/// can share one `Arc<Encoder>`.
pub struct Encoder {
    settings: EncoderSettings,
    output_path: PathBuf,
    frame_size: usize,
    video: Mutex<VideoSink>,
    audio: Mutex<Option<BufWriter<NamedTempFile>>>,
    scratch_video: Option<PathBuf>,
    scratch_audio: Option<PathBuf>,
    stopped: AtomicBool,
    frames_written: AtomicU64,
    video_bytes: AtomicU64,
    audio_bytes: AtomicU64,
    finished: Mutex<Option<Option<EncodeOutput>>>,
}

impl Encoder {
    /// Prepare scratch storage, or spawn ffmpeg for `LivePipe`
    pub fn new(settings: EncoderSettings) -> RecorderResult<Self> {
        if settings.width == 0 || settings.height == 0 {
            return Err(RecorderError::Configuration(format!(
                "frame size {}x{} is empty",
                settings.width, settings.height
            )));
        }
        if settings.fps == 0 {
            return Err(RecorderError::Configuration("fps must be positive".to_string()));
        }

        let output_path = settings.resolved_output();
        let output_dir = output_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&output_dir)?;
        let scratch_dir = settings.scratch_dir.clone().unwrap_or(output_dir);
        fs::create_dir_all(&scratch_dir)?;

        let audio = settings
            .audio
            .map(|_| scratch_file(&scratch_dir, "audio", ".pcm"))
            .transpose()?;
        let scratch_audio = audio.as_ref().map(|f| f.path().to_path_buf());

        let (video, scratch_video) = match settings.strategy {
            EncoderStrategy::Finalize => {
                let file = scratch_file(&scratch_dir, "video", ".rgb")?;
                let path = file.path().to_path_buf();
                (VideoSink::Scratch(BufWriter::new(file)), Some(path))
            }
            EncoderStrategy::LivePipe => {
                let args = encode_args(&settings, "-", None, &output_path);
                let mut process =
                    EncoderProcess::spawn(&settings.ffmpeg_path, &args, true, "ffmpeg")?;
                let stdin = process.take_stdin().ok_or_else(|| {
                    RecorderError::EncoderProcess("Failed to capture ffmpeg stdin".to_string())
                })?;
                (
                    VideoSink::Live {
                        process,
                        stdin: BufWriter::new(stdin),
                    },
                    None,
                )
            }
        };

        tracing::info!(
            "Encoder ready ({:?}): {}x{} @ {}fps, quality {}, audio {}, output {:?}",
            settings.strategy,
            settings.width,
            settings.height,
            settings.fps,
            settings.quality.label,
            settings.audio.is_some(),
            output_path
        );

        Ok(Self {
            frame_size: settings.frame_size(),
            settings,
            output_path,
            video: Mutex::new(video),
            audio: Mutex::new(audio.map(BufWriter::new)),
            scratch_video,
            scratch_audio,
            stopped: AtomicBool::new(false),
            frames_written: AtomicU64::new(0),
            video_bytes: AtomicU64::new(0),
            audio_bytes: AtomicU64::new(0),
            finished: Mutex::new(None),
        })
    }

    fn mark_stopped(&self, reason: &str) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            tracing::warn!("Encoder stopped accepting data: {}", reason);
        }
    }

    /// Append one RGB24 frame. Returns `false` if it was not written.
    pub fn write_frame(&self, data: &[u8]) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            return false;
        }
        if data.len() != self.frame_size {
            let err = RecorderError::Capture(format!(
                "frame is {} bytes, expected {}",
                data.len(),
                self.frame_size
            ));
            tracing::warn!("{}", err);
            return false;
        }

        let result = match &mut *self.video.lock() {
            VideoSink::Scratch(writer) => writer.write_all(data),
            VideoSink::Live { stdin, .. } => stdin.write_all(data),
            VideoSink::Closed => return false,
        };

        match result {
            Ok(()) => {
                self.frames_written.fetch_add(1, Ordering::Relaxed);
                self.video_bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.mark_stopped(&format!("video write failed: {}", e));
                false
            }
        }
    }

    /// Append s16le samples. No-op for video-only sessions.
    pub fn write_audio(&self, data: &[u8]) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            return false;
        }

        let mut audio = self.audio.lock();
        let Some(writer) = audio.as_mut() else {
            return false;
        };
        match writer.write_all(data) {
            Ok(()) => {
                self.audio_bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.mark_stopped(&format!("audio write failed: {}", e));
                false
            }
        }
    }

    pub fn flush(&self) -> RecorderResult<()> {
        match &mut *self.video.lock() {
            VideoSink::Scratch(writer) => writer.flush()?,
            VideoSink::Live { stdin, .. } => stdin.flush()?,
            VideoSink::Closed => {}
        }
        if let Some(writer) = self.audio.lock().as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Bytes in the raw video scratch file, if this encoder keeps one
    pub fn scratch_video_len(&self) -> RecorderResult<Option<u64>> {
        match &mut *self.video.lock() {
            VideoSink::Scratch(writer) => {
                writer.flush()?;
                Ok(Some(writer.get_ref().as_file().metadata()?.len()))
            }
            _ => Ok(None),
        }
    }

    pub fn scratch_video_path(&self) -> Option<&Path> {
        self.scratch_video.as_deref()
    }

    pub fn scratch_audio_path(&self) -> Option<&Path> {
        self.scratch_audio.as_deref()
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    pub fn audio_bytes(&self) -> u64 {
        self.audio_bytes.load(Ordering::Relaxed)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Close the streams and produce the container file.
    ///
    /// Returns `Ok(None)` when no frame was ever written. Later calls return
    /// the first call's output without touching ffmpeg again.
    pub fn finish(&self) -> RecorderResult<Option<EncodeOutput>> {
        let mut finished = self.finished.lock();
        if let Some(output) = finished.as_ref() {
            return Ok(output.clone());
        }
        self.stopped.store(true, Ordering::SeqCst);

        let video = std::mem::replace(&mut *self.video.lock(), VideoSink::Closed);
        let audio = self.audio.lock().take();

        let result = match video {
            VideoSink::Scratch(writer) => self.finish_scratch(writer, audio),
            VideoSink::Live { process, stdin } => self.finish_live(process, stdin, audio),
            VideoSink::Closed => Ok(None),
        };

        *finished = Some(result.as_ref().ok().cloned().flatten());
        result
    }

    fn finish_scratch(
        &self,
        writer: BufWriter<NamedTempFile>,
        audio: Option<BufWriter<NamedTempFile>>,
    ) -> RecorderResult<Option<EncodeOutput>> {
        let video = into_temp(writer)?;
        let audio = audio.map(into_temp).transpose()?;

        if self.frames_written() == 0 {
            tracing::warn!("No frames were recorded, nothing to encode");
            return Ok(None);
        }

        let audio_path = audio
            .as_ref()
            .filter(|_| self.audio_bytes() > 0)
            .map(|file| file.path());
        let output = encode_from_files(&self.settings, video.path(), audio_path)?;
        // Scratch files are removed when `video` and `audio` drop
        Ok(Some(output))
    }

    fn finish_live(
        &self,
        process: EncoderProcess,
        mut stdin: BufWriter<ChildStdin>,
        audio: Option<BufWriter<NamedTempFile>>,
    ) -> RecorderResult<Option<EncodeOutput>> {
        if let Err(e) = stdin.flush() {
            tracing::debug!("Flushing encoder stdin on close failed: {}", e);
        }
        drop(stdin);
        let exit = process.wait(FINALIZE_TIMEOUT)?;

        if self.frames_written() == 0 {
            tracing::warn!("No frames were recorded, discarding encoder output");
            let _ = fs::remove_file(&self.output_path);
            return Ok(None);
        }
        check_exit(&self.output_path, &exit)?;

        let audio = audio.map(into_temp).transpose()?;
        let mut has_audio = false;
        let mut audio_fallback = false;
        if let Some(audio) = audio.filter(|_| self.audio_bytes() > 0) {
            match self.mux_audio(audio.path()) {
                Ok(()) => has_audio = true,
                Err(e) => {
                    tracing::warn!("{}; keeping video-only output", e);
                    audio_fallback = true;
                }
            }
        }

        tracing::info!(
            "Live encode finished: {} frames to {:?}",
            self.frames_written(),
            self.output_path
        );
        Ok(Some(EncodeOutput {
            path: self.output_path.clone(),
            has_audio,
            audio_fallback,
            frames_written: self.frames_written(),
            video_bytes: self.video_bytes.load(Ordering::Relaxed),
        }))
    }

    /// Mux staged audio into the finished live output, restoring the
    /// video-only file if ffmpeg fails
    fn mux_audio(&self, audio: &Path) -> RecorderResult<()> {
        let output = &self.output_path;
        let dir = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let staged = tempfile::Builder::new()
            .prefix(".screenrec-video-")
            .suffix(&format!(".{}", self.settings.format.extension()))
            .tempfile_in(dir)?
            .into_temp_path();
        fs::rename(output, &staged)?;

        let format = self.settings.audio.unwrap_or_default();
        let args = mux_args(&self.settings, &staged, audio, format, output);
        let result = run(&self.settings.ffmpeg_path, &args, MUX_TIMEOUT, "ffmpeg mux");

        if matches!(&result, Ok(exit) if exit.success) && output_usable(output) {
            return Ok(());
        }

        let _ = fs::remove_file(output);
        staged
            .persist(output)
            .map_err(|e| RecorderError::Io(e.error))?;
        let reason = match result {
            Ok(exit) => exit.stderr.trim().to_string(),
            Err(e) => e.to_string(),
        };
        Err(RecorderError::Mux(reason))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::encoder::types::{quality_preset, OutputFormat};
    use crate::test_support::{fake_ffmpeg, FakeFfmpeg};

    fn settings(dir: &Path, ffmpeg: PathBuf, strategy: EncoderStrategy) -> EncoderSettings {
        let mut settings = EncoderSettings::new(dir.join("take.mov"), 4, 2, 10);
        settings.ffmpeg_path = ffmpeg;
        settings.strategy = strategy;
        settings
    }

    fn frame(settings: &EncoderSettings) -> Vec<u8> {
        vec![0x80; settings.frame_size()]
    }

    #[test]
    fn test_rejects_empty_frame_size() {
        let dir = tempfile::tempdir().unwrap();
        let settings = EncoderSettings::new(dir.path().join("out.mp4"), 0, 2, 10);
        assert!(matches!(
            Encoder::new(settings),
            Err(RecorderError::Configuration(_))
        ));
    }

    #[test]
    fn test_scratch_length_matches_frames() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(dir.path(), FakeFfmpeg::Ok);
        let settings = settings(dir.path(), ffmpeg, EncoderStrategy::Finalize);
        let data = frame(&settings);
        let encoder = Encoder::new(settings.clone()).unwrap();

        for _ in 0..7 {
            assert!(encoder.write_frame(&data));
        }
        assert_eq!(
            encoder.scratch_video_len().unwrap(),
            Some(7 * settings.frame_size() as u64)
        );

        let scratch = encoder.scratch_video_path().unwrap().to_path_buf();
        let output = encoder.finish().unwrap().unwrap();
        assert_eq!(output.path, dir.path().join("take.mp4"));
        assert_eq!(output.frames_written, 7);
        assert!(output.path.exists());
        assert!(!scratch.exists());
    }

    #[test]
    fn test_wrong_size_frame_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(dir.path(), FakeFfmpeg::Ok);
        let settings = settings(dir.path(), ffmpeg, EncoderStrategy::Finalize);
        let encoder = Encoder::new(settings).unwrap();

        assert!(!encoder.write_frame(&[0u8; 5]));
        assert_eq!(encoder.frames_written(), 0);
        assert!(!encoder.is_stopped());
    }

    #[test]
    fn test_finish_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(dir.path(), FakeFfmpeg::Ok);
        let settings = settings(dir.path(), ffmpeg, EncoderStrategy::Finalize);
        let data = frame(&settings);
        let encoder = Encoder::new(settings).unwrap();
        encoder.write_frame(&data);

        let first = encoder.finish().unwrap();
        let second = encoder.finish().unwrap();
        assert!(first.is_some());
        assert_eq!(first, second);
        assert!(!encoder.write_frame(&data));
    }

    #[test]
    fn test_no_frames_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(dir.path(), FakeFfmpeg::Ok);
        let settings = settings(dir.path(), ffmpeg, EncoderStrategy::Finalize);
        let encoder = Encoder::new(settings).unwrap();
        assert!(encoder.finish().unwrap().is_none());
    }

    #[test]
    fn test_finalize_with_audio() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(dir.path(), FakeFfmpeg::Ok);
        let mut settings = settings(dir.path(), ffmpeg, EncoderStrategy::Finalize);
        settings.audio = Some(AudioFormat::default());
        let data = frame(&settings);
        let encoder = Encoder::new(settings).unwrap();

        encoder.write_frame(&data);
        assert!(encoder.write_audio(&[0u8; 4096]));
        let audio_scratch = encoder.scratch_audio_path().unwrap().to_path_buf();

        let output = encoder.finish().unwrap().unwrap();
        assert!(output.has_audio);
        assert!(!output.audio_fallback);
        assert!(!audio_scratch.exists());
    }

    #[test]
    fn test_mux_failure_falls_back_to_video_only() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(dir.path(), FakeFfmpeg::FailAudio);
        let mut settings = settings(dir.path(), ffmpeg, EncoderStrategy::Finalize);
        settings.audio = Some(AudioFormat::default());
        let data = frame(&settings);
        let encoder = Encoder::new(settings).unwrap();

        encoder.write_frame(&data);
        encoder.write_audio(&[1u8; 4096]);

        let output = encoder.finish().unwrap().unwrap();
        assert!(!output.has_audio);
        assert!(output.audio_fallback);
        assert!(output.path.exists());
    }

    #[test]
    fn test_live_mux_failure_restores_video() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(dir.path(), FakeFfmpeg::FailAudio);
        let mut settings = settings(dir.path(), ffmpeg, EncoderStrategy::LivePipe);
        settings.audio = Some(AudioFormat::default());
        let data = frame(&settings);
        let encoder = Encoder::new(settings).unwrap();

        encoder.write_frame(&data);
        encoder.write_audio(&[1u8; 4096]);

        let output = encoder.finish().unwrap().unwrap();
        assert!(output.audio_fallback);
        assert!(fs::metadata(&output.path).unwrap().len() > 0);
    }

    #[test]
    fn test_live_mux_with_audio() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(dir.path(), FakeFfmpeg::Ok);
        let mut settings = settings(dir.path(), ffmpeg, EncoderStrategy::LivePipe);
        settings.audio = Some(AudioFormat::default());
        let data = frame(&settings);
        let encoder = Encoder::new(settings).unwrap();

        encoder.write_frame(&data);
        encoder.write_audio(&[1u8; 4096]);

        let output = encoder.finish().unwrap().unwrap();
        assert!(output.has_audio);
        assert!(output.path.exists());
    }

    #[test]
    fn test_killed_encoder_with_output_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(dir.path(), FakeFfmpeg::KillAfterWrite);
        let settings = settings(dir.path(), ffmpeg, EncoderStrategy::LivePipe);
        let data = frame(&settings);
        let encoder = Encoder::new(settings).unwrap();

        for _ in 0..3 {
            encoder.write_frame(&data);
        }
        let output = encoder.finish().unwrap().unwrap();
        assert!(fs::metadata(&output.path).unwrap().len() > 0);
    }

    #[test]
    fn test_missing_output_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(dir.path(), FakeFfmpeg::NoOutput);
        let settings = settings(dir.path(), ffmpeg, EncoderStrategy::LivePipe);
        let data = frame(&settings);
        let encoder = Encoder::new(settings).unwrap();

        encoder.write_frame(&data);
        assert!(matches!(
            encoder.finish(),
            Err(RecorderError::EncoderProcess(_))
        ));
    }

    #[test]
    fn test_broken_pipe_stops_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(dir.path(), FakeFfmpeg::ExitEarly);
        let mut settings = EncoderSettings::new(dir.path().join("big.mp4"), 128, 128, 10);
        settings.ffmpeg_path = ffmpeg;
        settings.strategy = EncoderStrategy::LivePipe;
        let data = vec![0u8; settings.frame_size()];
        let encoder = Encoder::new(settings).unwrap();

        let mut attempts = 0;
        while encoder.write_frame(&data) && attempts < 100 {
            attempts += 1;
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(encoder.is_stopped());
        // Later writes are quiet no-ops
        assert!(!encoder.write_frame(&data));
    }

    #[test]
    fn test_spawn_failure_is_encoder_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(
            dir.path(),
            dir.path().join("no-such-ffmpeg"),
            EncoderStrategy::LivePipe,
        );
        assert!(matches!(
            Encoder::new(settings),
            Err(RecorderError::EncoderProcess(_))
        ));
    }

    #[test]
    fn test_hung_process_is_killed_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(dir.path(), FakeFfmpeg::Hang);
        let process = EncoderProcess::spawn(&ffmpeg, &[], false, "hung ffmpeg").unwrap();

        let started = Instant::now();
        let exit = process.wait(Duration::from_millis(300)).unwrap();

        assert!(exit.timed_out);
        assert!(!exit.success);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_is_available() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_available(fake_ffmpeg(dir.path(), FakeFfmpeg::Ok)));
        assert!(!is_available(dir.path().join("missing")));
    }

    #[test]
    fn test_encode_args_follow_preset() {
        let mut settings = EncoderSettings::new("/tmp/out.avi", 640, 480, 24);
        settings.format = OutputFormat::Avi;
        settings.quality = quality_preset("low").unwrap();
        let args = encode_args(
            &settings,
            "video.rgb",
            Some(("audio.pcm", AudioFormat::default())),
            Path::new("/tmp/out.avi"),
        );
        let joined = args.join(" ");

        assert!(joined.contains("-pix_fmt rgb24 -s 640x480 -r 24 -i video.rgb"));
        assert!(joined.contains("-f s16le -ar 44100 -ac 2 -i audio.pcm"));
        assert!(joined.contains("-crf 28 -maxrate 1000k -bufsize 2000k"));
        assert!(joined.contains("-c:a libmp3lame -b:a 96k -shortest"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.avi"));
    }
}
