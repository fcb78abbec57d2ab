//! Recording coordinator
//!
//! Owns one recording session at a time and drives the capture → buffer →
//! encode pipeline. Threads per session:
//!
//! - `video-capture`: paced screen grabs into the frame buffer
//! - `audio-capture` (optional, owned by `AudioSource`): chunks into the audio buffer
//! - `video-drain` / `audio-drain`: buffers into the encoder
//!
//! Shutdown order is fixed: stop flag, join capture, stop audio device, join
//! drains, finish encoder (which removes scratch files), release capture handles.

use crate::capture::audio::{AudioSource, ChunkCallback, CpalBackend};
use crate::capture::screen::{check_region, ScreenSource};
use crate::capture::traits::{AudioBackend, AudioChunk, AudioDeviceInfo, AudioFormat, Frame};
use crate::encoder::ffmpeg::Encoder;
use crate::encoder::types::EncoderSettings;
use crate::recorder::buffer::{BoundedBuffer, BufferStats};
use crate::recorder::clock::Clock;
use crate::recorder::state::{
    AudioDeviceSelector, Progress, ProgressCallback, RecordingConfig, RecordingOutput,
    RecordingState, Region, Session,
};
use crate::recorder::sync::Synchronizer;
use crate::utils::error::{RecorderError, RecorderResult};
use crate::utils::logging::should_log_failure;
use crate::utils::threads::join_with_timeout;
use parking_lot::{Condvar, Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);
const PAUSE_WAIT: Duration = Duration::from_millis(100);
const DRAIN_WAIT: Duration = Duration::from_millis(100);
const LOOP_SLEEP: Duration = Duration::from_millis(1);
const PROGRESS_INTERVAL: Duration = Duration::from_millis(50);
const CLEANUP_WAIT: Duration = Duration::from_secs(120);

/// Events emitted during recording
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingEvent {
    /// Recording started
    Started { session_id: Uuid },
    /// Recording paused
    Paused,
    /// Recording resumed
    Resumed,
    /// Recording stopped; `None` when nothing was produced
    Stopped { path: Option<PathBuf> },
    /// Audio was requested but no usable device was found
    AudioUnavailable(String),
    /// Audio was recorded but left out of the output
    AudioDiscarded,
    /// Error occurred
    Error(String),
}

/// Per-session resources, owned by the coordinator until `stop`
struct SessionRuntime {
    encoder: Arc<Encoder>,
    frames: Arc<BoundedBuffer<Frame>>,
    audio_buffer: Option<Arc<BoundedBuffer<AudioChunk>>>,
    audio: Option<AudioSource>,
    video_thread: Option<JoinHandle<()>>,
    drain_threads: Vec<JoinHandle<()>>,
    video_done: Arc<AtomicBool>,
    audio_done: Arc<AtomicBool>,
}

struct Inner {
    state: RwLock<RecordingState>,
    clock: Arc<Clock>,
    running: Arc<AtomicBool>,
    frames_captured: AtomicU64,
    has_audio: AtomicBool,
    audio_bytes: Mutex<Option<Arc<AtomicU64>>>,
    session: RwLock<Option<Session>>,
    runtime: Mutex<Option<SessionRuntime>>,
    event_tx: broadcast::Sender<RecordingEvent>,
    progress: RwLock<Option<ProgressCallback>>,
    last_output: Mutex<Option<RecordingOutput>>,
    last_error: Mutex<Option<String>>,
    signal: Mutex<()>,
    state_changed: Condvar,
    screen: Arc<ScreenSource>,
    audio_backend: Arc<dyn AudioBackend>,
}

/// Screen recorder state machine
///
/// `Idle → Recording ⇄ Paused → Stopping → Finished`, with `Failed` when the
/// encoder cannot produce a file. `cleanup()` returns to `Idle` from anywhere.
pub struct RecordingCoordinator {
    inner: Arc<Inner>,
}

impl RecordingCoordinator {
    /// Coordinator on the native screen and audio backends
    pub fn new() -> Self {
        Self::with_backends(ScreenSource::new(), Arc::new(CpalBackend))
    }

    pub fn with_backends(screen: ScreenSource, audio_backend: Arc<dyn AudioBackend>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(RecordingState::Idle),
                clock: Arc::new(Clock::new()),
                running: Arc::new(AtomicBool::new(false)),
                frames_captured: AtomicU64::new(0),
                has_audio: AtomicBool::new(false),
                audio_bytes: Mutex::new(None),
                session: RwLock::new(None),
                runtime: Mutex::new(None),
                event_tx,
                progress: RwLock::new(None),
                last_output: Mutex::new(None),
                last_error: Mutex::new(None),
                signal: Mutex::new(()),
                state_changed: Condvar::new(),
                screen: Arc::new(screen),
                audio_backend,
            }),
        }
    }

    /// Get the current recording state
    pub fn state(&self) -> RecordingState {
        *self.inner.state.read()
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Called from the capture thread while recording
    pub fn set_progress_callback(&self, callback: Option<ProgressCallback>) {
        *self.inner.progress.write() = callback;
    }

    /// Recorded seconds, pauses excluded. Frozen once stopped, zero when idle.
    pub fn elapsed(&self) -> f64 {
        match self.state() {
            RecordingState::Idle => 0.0,
            _ => self.inner.clock.elapsed(),
        }
    }

    /// Seconds left for duration-bound sessions
    pub fn remaining(&self) -> Option<f64> {
        let duration = self.inner.session.read().as_ref()?.config.duration_secs?;
        Some((duration - self.elapsed()).max(0.0))
    }

    pub fn frames_captured(&self) -> u64 {
        self.inner.frames_captured.load(Ordering::Relaxed)
    }

    /// Whether the current session records audio
    pub fn has_audio(&self) -> bool {
        self.inner.has_audio.load(Ordering::SeqCst)
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.session.read().clone()
    }

    /// Output of the last successful `stop`
    pub fn last_output(&self) -> Option<RecordingOutput> {
        self.inner.last_output.lock().clone()
    }

    /// Why the last session failed. Set whichever thread ran the stop, so a
    /// duration-bound session that failed on its own still reports it.
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }

    pub fn video_buffer_stats(&self) -> Option<BufferStats> {
        self.inner
            .runtime
            .lock()
            .as_ref()
            .map(|runtime| runtime.frames.stats())
    }

    /// Nearest-timestamp access to the live buffers. Frames it takes are no
    /// longer seen by the encoder.
    pub fn synchronizer(&self) -> Option<Synchronizer> {
        self.inner.runtime.lock().as_ref().map(|runtime| {
            Synchronizer::new(
                runtime.frames.clone(),
                runtime.audio_buffer.clone(),
                self.inner.clock.clone(),
            )
        })
    }

    /// Start recording
    pub fn start(&self, config: RecordingConfig) -> RecorderResult<Session> {
        let inner = &self.inner;
        let mut state = inner.state.write();
        if *state != RecordingState::Idle {
            return Err(RecorderError::InvalidState(format!(
                "cannot start while {:?}",
                *state
            )));
        }

        config.validate()?;
        let format = config.output_format()?;
        let quality = config.quality_preset()?;

        let (monitor_width, monitor_height) = inner.screen.screen_size(config.monitor)?;
        let (width, height) = match config.region {
            Some(region) => {
                check_region(
                    region.x,
                    region.y,
                    region.width,
                    region.height,
                    monitor_width,
                    monitor_height,
                )?;
                (region.width, region.height)
            }
            None => (monitor_width, monitor_height),
        };

        let audio_format = AudioFormat {
            sample_rate: config.sample_rate,
            channels: config.channels,
        };
        let mut audio = None;
        if config.enable_audio {
            let source = AudioSource::with_backend(inner.audio_backend.clone(), audio_format);
            match resolve_device(&source, config.audio_device.as_ref()) {
                Ok(device) => audio = Some((source, device)),
                Err(e) if e.is_recoverable() => {
                    tracing::warn!("{}; recording video only", e);
                    let _ = inner
                        .event_tx
                        .send(RecordingEvent::AudioUnavailable(e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        let session = Session::new(config.clone(), width, height);
        tracing::info!(
            "Starting recording {}: {}x{} @ {}fps, monitor {}, {} / {}",
            session.id,
            width,
            height,
            config.fps,
            config.monitor,
            format,
            quality.label
        );

        let encoder = Arc::new(Encoder::new(EncoderSettings {
            output_path: config.output_path.clone(),
            width,
            height,
            fps: config.fps,
            format,
            quality,
            strategy: config.strategy,
            ffmpeg_path: config.ffmpeg_path.clone(),
            audio: audio.as_ref().map(|_| audio_format),
            scratch_dir: None,
        })?);

        let frames = Arc::new(BoundedBuffer::new(config.video_buffer_capacity));
        inner.frames_captured.store(0, Ordering::Relaxed);
        inner.running.store(true, Ordering::SeqCst);
        inner.clock.start();

        let mut audio_source = None;
        let mut audio_buffer = None;
        if let Some((source, device)) = audio {
            let buffer = Arc::new(BoundedBuffer::new(config.audio_buffer_capacity));
            match source.start(Some(device.index), Some(audio_callback(inner, &buffer))) {
                Ok(device) => {
                    tracing::info!("Recording audio from {}", device.name);
                    audio_buffer = Some(buffer);
                    audio_source = Some(source);
                }
                Err(e) => {
                    tracing::warn!("Audio capture failed to start: {}; recording video only", e);
                    let _ = inner
                        .event_tx
                        .send(RecordingEvent::AudioUnavailable(e.to_string()));
                }
            }
        }

        let video_done = Arc::new(AtomicBool::new(false));
        let audio_done = Arc::new(AtomicBool::new(audio_buffer.is_none()));
        let threads = spawn_threads(
            inner,
            &config,
            &encoder,
            &frames,
            audio_buffer.as_ref(),
            &video_done,
            &audio_done,
        );
        let (video_thread, drain_threads) = match threads {
            Ok(threads) => threads,
            Err(e) => {
                inner.running.store(false, Ordering::SeqCst);
                video_done.store(true, Ordering::SeqCst);
                audio_done.store(true, Ordering::SeqCst);
                if let Some(source) = audio_source {
                    source.stop();
                }
                return Err(e);
            }
        };

        inner.has_audio.store(audio_source.is_some(), Ordering::SeqCst);
        *inner.audio_bytes.lock() = audio_source.as_ref().map(AudioSource::bytes_counter);
        *inner.session.write() = Some(session.clone());
        *inner.last_output.lock() = None;
        *inner.last_error.lock() = None;
        *inner.runtime.lock() = Some(SessionRuntime {
            encoder,
            frames,
            audio_buffer,
            audio: audio_source,
            video_thread: Some(video_thread),
            drain_threads,
            video_done,
            audio_done,
        });
        *state = RecordingState::Recording;
        drop(state);

        let _ = inner.event_tx.send(RecordingEvent::Started {
            session_id: session.id,
        });
        tracing::info!("Recording started");
        Ok(session)
    }

    /// Pause recording
    pub fn pause(&self) -> RecorderResult<()> {
        let mut state = self.inner.state.write();
        if *state != RecordingState::Recording {
            return Err(RecorderError::InvalidState(format!(
                "cannot pause while {:?}",
                *state
            )));
        }

        self.inner.clock.pause();
        *state = RecordingState::Paused;
        drop(state);

        tracing::info!("Recording paused at {:.2}s", self.inner.clock.elapsed());
        let _ = self.inner.event_tx.send(RecordingEvent::Paused);
        Ok(())
    }

    /// Resume recording
    pub fn resume(&self) -> RecorderResult<()> {
        let mut state = self.inner.state.write();
        if *state != RecordingState::Paused {
            return Err(RecorderError::InvalidState(format!(
                "cannot resume while {:?}",
                *state
            )));
        }

        self.inner.clock.resume();
        *state = RecordingState::Recording;
        drop(state);

        tracing::info!("Recording resumed");
        let _ = self.inner.event_tx.send(RecordingEvent::Resumed);
        Ok(())
    }

    /// Stop recording and produce the output file.
    ///
    /// Returns `Ok(None)` when not recording (including a second call) or when
    /// no frame was captured.
    pub fn stop(&self) -> RecorderResult<Option<RecordingOutput>> {
        self.inner.stop()
    }

    /// Block until the session leaves `Recording`/`Paused`/`Stopping`.
    /// A timeout too large to represent waits without a deadline.
    pub fn wait_until_finished(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let settled = |state: RecordingState| {
            !state.is_active() && state != RecordingState::Stopping
        };

        let mut guard = self.inner.signal.lock();
        while !settled(self.state()) {
            match deadline {
                Some(deadline) => {
                    if self
                        .inner
                        .state_changed
                        .wait_until(&mut guard, deadline)
                        .timed_out()
                    {
                        return settled(self.state());
                    }
                }
                None => self.inner.state_changed.wait(&mut guard),
            }
        }
        true
    }

    /// Stop if needed, release every resource, return to `Idle`. Safe to call
    /// repeatedly and from any state.
    pub fn cleanup(&self) {
        let state = self.state();
        if state.is_active() {
            if let Err(e) = self.inner.stop() {
                tracing::warn!("Stop during cleanup failed: {}", e);
            }
        } else if state == RecordingState::Stopping && !self.wait_until_finished(CLEANUP_WAIT) {
            tracing::warn!("Recorder still stopping after {:?}", CLEANUP_WAIT);
        }

        if let Some(runtime) = self.inner.runtime.lock().take() {
            // Only reachable when a stop was interrupted
            self.inner.running.store(false, Ordering::SeqCst);
            runtime.video_done.store(true, Ordering::SeqCst);
            runtime.audio_done.store(true, Ordering::SeqCst);
            if let Some(audio) = runtime.audio {
                audio.stop();
            }
        }

        self.inner.screen.release_thread_handle();
        self.inner.has_audio.store(false, Ordering::SeqCst);
        *self.inner.audio_bytes.lock() = None;
        *self.inner.session.write() = None;
        self.inner.set_state(RecordingState::Idle);
        tracing::debug!("Recorder cleaned up");
    }
}

impl Default for RecordingCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RecordingCoordinator {
    fn drop(&mut self) {
        if self.state() != RecordingState::Idle {
            self.cleanup();
        }
    }
}

impl Inner {
    /// Change state and wake `wait_until_finished` callers
    fn set_state(&self, next: RecordingState) {
        let _guard = self.signal.lock();
        *self.state.write() = next;
        self.state_changed.notify_all();
    }

    fn stop(&self) -> RecorderResult<Option<RecordingOutput>> {
        {
            let mut state = self.state.write();
            if !state.is_active() {
                tracing::debug!("Stop ignored while {:?}", *state);
                return Ok(None);
            }
            *state = RecordingState::Stopping;
        }
        tracing::info!("Stopping recording");

        self.running.store(false, Ordering::SeqCst);
        // Freeze elapsed at the stop point and wake a paused capture loop
        self.clock.pause();
        self.clock.wake_all();

        let Some(mut runtime) = self.runtime.lock().take() else {
            self.set_state(RecordingState::Finished);
            return Ok(None);
        };

        if let Some(handle) = runtime.video_thread.take() {
            if handle.thread().id() == thread::current().id() {
                tracing::debug!("Stop requested by the capture thread itself, not joining");
            } else {
                join_with_timeout(handle, JOIN_TIMEOUT, "video-capture");
            }
        }
        runtime.video_done.store(true, Ordering::SeqCst);

        if let Some(audio) = runtime.audio.take() {
            audio.stop();
        }
        runtime.audio_done.store(true, Ordering::SeqCst);

        for handle in runtime.drain_threads.drain(..) {
            join_with_timeout(handle, JOIN_TIMEOUT, "drain");
        }

        let frames_dropped = runtime.frames.dropped();
        if frames_dropped > 0 {
            tracing::warn!("{} frames dropped on a full buffer", frames_dropped);
        }
        if let Some(audio_buffer) = &runtime.audio_buffer {
            if audio_buffer.dropped() > 0 {
                tracing::warn!("{} audio chunks dropped on a full buffer", audio_buffer.dropped());
            }
        }

        let result = runtime.encoder.finish();
        self.screen.release_thread_handle();

        let session_id = self
            .session
            .read()
            .as_ref()
            .map(|session| session.id)
            .unwrap_or_default();

        match result {
            Ok(Some(encoded)) => {
                if encoded.audio_fallback {
                    tracing::warn!("Audio could not be muxed, output is video only");
                    let _ = self.event_tx.send(RecordingEvent::AudioDiscarded);
                }
                let output = RecordingOutput {
                    path: encoded.path,
                    has_audio: encoded.has_audio,
                    audio_fallback: encoded.audio_fallback,
                    frames_captured: self.frames_captured.load(Ordering::Relaxed),
                    frames_dropped,
                    duration_secs: self.clock.elapsed(),
                    session_id,
                };
                tracing::info!(
                    "Recording saved to {:?} ({} frames, {:.2}s)",
                    output.path,
                    output.frames_captured,
                    output.duration_secs
                );

                *self.last_output.lock() = Some(output.clone());
                self.set_state(RecordingState::Finished);
                let _ = self.event_tx.send(RecordingEvent::Stopped {
                    path: Some(output.path.clone()),
                });
                Ok(Some(output))
            }
            Ok(None) => {
                tracing::warn!("Recording stopped without output");
                self.set_state(RecordingState::Finished);
                let _ = self.event_tx.send(RecordingEvent::Stopped { path: None });
                Ok(None)
            }
            Err(e) => {
                tracing::error!("Recording failed: {}", e);
                *self.last_error.lock() = Some(e.to_string());
                self.set_state(RecordingState::Failed);
                let _ = self.event_tx.send(RecordingEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    fn report_progress(&self, duration: Option<f64>) {
        let Some(callback) = self.progress.read().clone() else {
            return;
        };
        let elapsed = self.clock.elapsed();
        let audio_megabytes = self
            .audio_bytes
            .lock()
            .as_ref()
            .map(|bytes| bytes.load(Ordering::Relaxed) as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0);

        callback(Progress {
            elapsed,
            remaining: duration.map(|d| (d - elapsed).max(0.0)),
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            audio_megabytes,
        });
    }
}

fn resolve_device(
    source: &AudioSource,
    selector: Option<&AudioDeviceSelector>,
) -> RecorderResult<AudioDeviceInfo> {
    match selector {
        None => source.default_device(),
        Some(AudioDeviceSelector::Index(index)) => source
            .input_devices()?
            .into_iter()
            .find(|device| device.index == *index)
            .ok_or_else(|| {
                RecorderError::DeviceUnavailable(format!("audio device {} not found", index))
            }),
        Some(AudioDeviceSelector::Name(name)) => source.find_device_by_name(name)?.ok_or_else(|| {
            RecorderError::DeviceUnavailable(format!("no audio device matching '{}'", name))
        }),
    }
}

/// Stamp chunks with the session clock; drop them while paused or stopping
fn audio_callback(inner: &Arc<Inner>, buffer: &Arc<BoundedBuffer<AudioChunk>>) -> ChunkCallback {
    let running = inner.running.clone();
    let clock = inner.clock.clone();
    let buffer = buffer.clone();
    Box::new(move |chunk: AudioChunk| {
        if !running.load(Ordering::SeqCst) || clock.is_paused() {
            return;
        }
        let timestamp = clock.elapsed();
        buffer.put(chunk.stamped(timestamp), timestamp);
    })
}

struct VideoJob {
    frames: Arc<BoundedBuffer<Frame>>,
    region: Option<Region>,
    monitor: usize,
    fps: u32,
    duration: Option<f64>,
    done: Arc<AtomicBool>,
}

fn spawn_threads(
    inner: &Arc<Inner>,
    config: &RecordingConfig,
    encoder: &Arc<Encoder>,
    frames: &Arc<BoundedBuffer<Frame>>,
    audio_buffer: Option<&Arc<BoundedBuffer<AudioChunk>>>,
    video_done: &Arc<AtomicBool>,
    audio_done: &Arc<AtomicBool>,
) -> RecorderResult<(JoinHandle<()>, Vec<JoinHandle<()>>)> {
    let mut drains = Vec::new();

    drains.push({
        let frames = frames.clone();
        let encoder = encoder.clone();
        let done = video_done.clone();
        thread::Builder::new()
            .name("video-drain".to_string())
            .spawn(move || {
                drain(&frames, &done, |frame: Frame| encoder.write_frame(frame.data()))
            })?
    });

    if let Some(buffer) = audio_buffer {
        let buffer = buffer.clone();
        let encoder = encoder.clone();
        let done = audio_done.clone();
        let spawned = thread::Builder::new()
            .name("audio-drain".to_string())
            .spawn(move || {
                drain(&buffer, &done, |chunk: AudioChunk| {
                    encoder.write_audio(chunk.data())
                })
            });
        match spawned {
            Ok(handle) => drains.push(handle),
            Err(e) => {
                video_done.store(true, Ordering::SeqCst);
                return Err(e.into());
            }
        }
    }

    let job = VideoJob {
        frames: frames.clone(),
        region: config.region,
        monitor: config.monitor,
        fps: config.fps,
        duration: config.duration_secs,
        done: video_done.clone(),
    };
    let capture_inner = inner.clone();
    let video = thread::Builder::new()
        .name("video-capture".to_string())
        .spawn(move || run_video_capture(capture_inner, job))?;

    Ok((video, drains))
}

/// Move buffered items into the encoder until the producer is done and the
/// buffer is empty
fn drain<T>(buffer: &BoundedBuffer<T>, done: &AtomicBool, mut write: impl FnMut(T) -> bool) {
    let mut written = 0u64;
    loop {
        match buffer.get(DRAIN_WAIT) {
            Some((item, _)) => {
                if write(item) {
                    written += 1;
                }
            }
            None if done.load(Ordering::SeqCst) && buffer.is_empty() => break,
            None => {}
        }
    }
    tracing::debug!(
        "{} drained {} items",
        thread::current().name().unwrap_or("drain"),
        written
    );
}

fn run_video_capture(inner: Arc<Inner>, job: VideoJob) {
    let interval = Duration::from_secs_f64(1.0 / job.fps as f64);
    let mut next_capture = Instant::now();
    let mut last_progress = Instant::now();
    let mut sequence = 0u64;
    let mut failures = 0u64;

    tracing::debug!("Video capture loop started ({} fps)", job.fps);

    while inner.running.load(Ordering::SeqCst) {
        if inner.clock.is_paused() {
            inner.clock.wait_while_paused(PAUSE_WAIT);
            next_capture = Instant::now();
            continue;
        }

        if let Some(limit) = job.duration {
            if inner.clock.elapsed() >= limit {
                tracing::info!("Duration of {:.2}s reached", limit);
                // Failures are kept for `last_error`
                if let Err(e) = inner.stop() {
                    tracing::error!("Automatic stop failed: {}", e);
                }
                break;
            }
        }

        let now = Instant::now();
        if now >= next_capture {
            let captured = match job.region {
                Some(region) => inner.screen.capture_region(
                    region.x,
                    region.y,
                    region.width,
                    region.height,
                    job.monitor,
                ),
                None => inner.screen.capture_full(job.monitor),
            };

            match captured {
                Ok(frame) => {
                    let timestamp = inner.clock.elapsed();
                    job.frames.put(frame.stamped(timestamp, sequence), timestamp);
                    sequence += 1;
                    inner.frames_captured.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    failures += 1;
                    if should_log_failure(failures) {
                        tracing::warn!("Frame capture failed ({} so far): {}", failures, e);
                    }
                }
            }

            next_capture += interval;
            // Fell behind: skip ahead rather than burst
            if next_capture < now {
                next_capture = now + interval;
            }
        }

        if last_progress.elapsed() >= PROGRESS_INTERVAL {
            inner.report_progress(job.duration);
            last_progress = Instant::now();
        }

        thread::sleep(LOOP_SLEEP);
    }

    job.done.store(true, Ordering::SeqCst);
    inner.screen.release_thread_handle();
    tracing::debug!("Video capture loop exited after {} frames", sequence);
}
