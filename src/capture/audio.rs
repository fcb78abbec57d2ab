//! Microphone capture
//!
//! `AudioSource` reads fixed-size s16le chunks on a dedicated thread. Chunks are
//! either handed to a callback or queued for `recv_chunk`. The native stream is
//! opened on the capture thread itself since cpal streams are not `Send`.

use crate::capture::traits::{
    AudioBackend, AudioChunk, AudioDeviceInfo, AudioFormat, AudioStream,
};
use crate::utils::error::{RecorderError, RecorderResult};
use crate::utils::logging::should_log_failure;
use crate::utils::threads::join_with_timeout;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Sample frames per chunk
pub const CHUNK_FRAMES: usize = 1024;

const STOP_TIMEOUT: Duration = Duration::from_secs(2);
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_millis(200);
const READ_RETRY: Duration = Duration::from_millis(10);

/// Receives every captured chunk on the capture thread
pub type ChunkCallback = Box<dyn FnMut(AudioChunk) + Send>;

/// Produces raw PCM chunks from an input device
pub struct AudioSource {
    backend: Arc<dyn AudioBackend>,
    format: AudioFormat,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    queue_tx: Sender<AudioChunk>,
    queue_rx: Receiver<AudioChunk>,
    captured_bytes: Arc<AtomicU64>,
    device: Mutex<Option<AudioDeviceInfo>>,
}

impl AudioSource {
    /// Audio source on the default cpal host
    pub fn new(format: AudioFormat) -> Self {
        Self::with_backend(Arc::new(CpalBackend), format)
    }

    pub fn with_backend(backend: Arc<dyn AudioBackend>, format: AudioFormat) -> Self {
        let (queue_tx, queue_rx) = unbounded();
        Self {
            backend,
            format,
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
            queue_tx,
            queue_rx,
            captured_bytes: Arc::new(AtomicU64::new(0)),
            device: Mutex::new(None),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Input devices. Fails with `NoAudioDevice` when there are none.
    pub fn input_devices(&self) -> RecorderResult<Vec<AudioDeviceInfo>> {
        let devices = self.backend.input_devices()?;
        if devices.is_empty() {
            return Err(RecorderError::NoAudioDevice);
        }
        Ok(devices)
    }

    /// Platform default input, or the first input if none is flagged
    pub fn default_device(&self) -> RecorderResult<AudioDeviceInfo> {
        let devices = self.input_devices()?;
        let default_index = self.backend.default_input_index();
        let device = default_index
            .and_then(|index| devices.iter().find(|d| d.index == index))
            .unwrap_or(&devices[0]);
        Ok(device.clone())
    }

    /// First input whose name contains `name`, ignoring case
    pub fn find_device_by_name(&self, name: &str) -> RecorderResult<Option<AudioDeviceInfo>> {
        let needle = name.to_lowercase();
        Ok(self
            .input_devices()?
            .into_iter()
            .find(|d| d.name.to_lowercase().contains(&needle)))
    }

    /// Device currently (or last) opened
    pub fn device(&self) -> Option<AudioDeviceInfo> {
        self.device.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Open the device and start the capture thread.
    ///
    /// With `on_chunk` set, chunks go to the callback; otherwise they queue up
    /// for [`AudioSource::recv_chunk`]. Calling `start` while running is a no-op.
    pub fn start(
        &self,
        device_index: Option<usize>,
        on_chunk: Option<ChunkCallback>,
    ) -> RecorderResult<AudioDeviceInfo> {
        if self.is_running() {
            if let Some(device) = self.device() {
                return Ok(device);
            }
        }

        let device = match device_index {
            Some(index) => self
                .input_devices()?
                .into_iter()
                .find(|d| d.index == index)
                .ok_or_else(|| {
                    RecorderError::DeviceUnavailable(format!("audio device {} not found", index))
                })?,
            None => self.default_device()?,
        };

        self.running.store(true, Ordering::SeqCst);
        let (ready_tx, ready_rx) = bounded::<RecorderResult<()>>(1);

        let handle = {
            let backend = self.backend.clone();
            let running = self.running.clone();
            let captured = self.captured_bytes.clone();
            let queue = self.queue_tx.clone();
            let format = self.format;
            let index = device.index;
            let mut on_chunk = on_chunk;

            std::thread::Builder::new()
                .name("audio-capture".to_string())
                .spawn(move || {
                    let mut stream = match backend.open_input(index, format) {
                        Ok(stream) => {
                            let _ = ready_tx.send(Ok(()));
                            stream
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };

                    let mut failures = 0u64;
                    while running.load(Ordering::SeqCst) {
                        match stream.read(CHUNK_FRAMES) {
                            Ok(Some(bytes)) => {
                                captured.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                                let chunk = AudioChunk::new(bytes, format, 0.0);
                                match on_chunk.as_mut() {
                                    Some(callback) => callback(chunk),
                                    None => {
                                        let _ = queue.send(chunk);
                                    }
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                failures += 1;
                                if should_log_failure(failures) {
                                    tracing::warn!(
                                        "Audio read failed ({} so far): {}",
                                        failures,
                                        e
                                    );
                                }
                                std::thread::sleep(READ_RETRY);
                            }
                        }
                    }
                    tracing::debug!("Audio capture thread exiting ({} read failures)", failures);
                })?
        };

        let opened = match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(result) => result,
            Err(_) => Err(RecorderError::DeviceUnavailable(format!(
                "timed out opening audio device '{}'",
                device.name
            ))),
        };

        if let Err(e) = opened {
            self.running.store(false, Ordering::SeqCst);
            join_with_timeout(handle, STOP_TIMEOUT, "audio-capture");
            return Err(e);
        }

        tracing::info!(
            "Audio capture started: {} ({}Hz, {}ch)",
            device.name,
            self.format.sample_rate,
            self.format.channels
        );
        *self.handle.lock() = Some(handle);
        *self.device.lock() = Some(device.clone());
        Ok(device)
    }

    /// Stop capturing. Safe to call repeatedly.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            join_with_timeout(handle, STOP_TIMEOUT, "audio-capture");
            tracing::info!(
                "Audio capture stopped ({:.2} MB)",
                self.captured_megabytes()
            );
        }
    }

    /// Next queued chunk, waiting up to `timeout`
    pub fn recv_chunk(&self, timeout: Duration) -> Option<AudioChunk> {
        self.queue_rx.recv_timeout(timeout).ok()
    }

    pub fn captured_bytes(&self) -> u64 {
        self.captured_bytes.load(Ordering::Relaxed)
    }

    pub fn captured_megabytes(&self) -> f64 {
        self.captured_bytes() as f64 / (1024.0 * 1024.0)
    }

    /// Shared handle on the byte counter, for progress reporting
    pub fn bytes_counter(&self) -> Arc<AtomicU64> {
        self.captured_bytes.clone()
    }
}

impl Drop for AudioSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Native backend on the default cpal host
pub struct CpalBackend;

impl CpalBackend {
    fn devices() -> RecorderResult<Vec<cpal::Device>> {
        let host = cpal::default_host();
        let devices = host.input_devices().map_err(|e| {
            RecorderError::DeviceUnavailable(format!("failed to enumerate inputs: {}", e))
        })?;
        Ok(devices.collect())
    }
}

impl AudioBackend for CpalBackend {
    fn input_devices(&self) -> RecorderResult<Vec<AudioDeviceInfo>> {
        let devices = Self::devices()?;
        Ok(devices
            .iter()
            .enumerate()
            .filter_map(|(index, device)| {
                let config = device.default_input_config().ok()?;
                Some(AudioDeviceInfo {
                    index,
                    name: device.name().unwrap_or_else(|_| format!("Input {}", index)),
                    channels: config.channels(),
                    default_sample_rate: config.sample_rate().0,
                })
            })
            .collect())
    }

    fn default_input_index(&self) -> Option<usize> {
        let default_name = cpal::default_host().default_input_device()?.name().ok()?;
        Self::devices()
            .ok()?
            .iter()
            .position(|d| d.name().ok().as_deref() == Some(default_name.as_str()))
    }

    fn open_input(
        &self,
        device_index: usize,
        format: AudioFormat,
    ) -> RecorderResult<Box<dyn AudioStream>> {
        let device = Self::devices()?
            .into_iter()
            .nth(device_index)
            .ok_or_else(|| {
                RecorderError::DeviceUnavailable(format!("audio device {} vanished", device_index))
            })?;
        let supported = device.default_input_config().map_err(|e| {
            RecorderError::DeviceUnavailable(format!("failed to query input config: {}", e))
        })?;

        let config = StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (tx, rx) = bounded::<Vec<i16>>(256);
        let stream = match supported.sample_format() {
            SampleFormat::I16 => build_stream::<i16>(&device, &config, tx)?,
            SampleFormat::F32 => build_stream::<f32>(&device, &config, tx)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &config, tx)?,
            other => {
                return Err(RecorderError::DeviceUnavailable(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        };
        stream.play().map_err(|e| {
            RecorderError::DeviceUnavailable(format!("failed to start input stream: {}", e))
        })?;

        Ok(Box::new(CpalStream {
            _stream: stream,
            rx,
            pending: Vec::new(),
            channels: format.channels as usize,
        }))
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    tx: Sender<Vec<i16>>,
) -> RecorderResult<cpal::Stream>
where
    T: SizedSample,
    i16: cpal::FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let samples: Vec<i16> = data.iter().map(|&s| s.to_sample::<i16>()).collect();
                if tx.try_send(samples).is_err() {
                    tracing::trace!("Audio callback backlog full, block dropped");
                }
            },
            |err| tracing::warn!("Audio stream error: {}", err),
            None,
        )
        .map_err(|e| {
            RecorderError::DeviceUnavailable(format!("failed to open input stream: {}", e))
        })
}

struct CpalStream {
    _stream: cpal::Stream,
    rx: Receiver<Vec<i16>>,
    pending: Vec<i16>,
    channels: usize,
}

impl AudioStream for CpalStream {
    fn read(&mut self, frames: usize) -> RecorderResult<Option<Vec<u8>>> {
        let needed = frames * self.channels;
        while self.pending.len() < needed {
            match self.rx.recv_timeout(READ_TIMEOUT) {
                Ok(block) => self.pending.extend_from_slice(&block),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(RecorderError::DeviceUnavailable(
                        "input stream closed".to_string(),
                    ))
                }
            }
        }

        let bytes = self
            .pending
            .drain(..needed)
            .flat_map(|sample| sample.to_le_bytes())
            .collect();
        Ok(Some(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fake_input, FakeAudio};

    fn format() -> AudioFormat {
        AudioFormat {
            sample_rate: 44_100,
            channels: 2,
        }
    }

    fn mic_source(backend: FakeAudio) -> AudioSource {
        AudioSource::with_backend(Arc::new(backend), format())
    }

    #[test]
    fn test_no_devices_reports_no_audio_device() {
        let source = AudioSource::with_backend(Arc::new(FakeAudio::new(vec![])), format());
        assert!(matches!(
            source.input_devices(),
            Err(RecorderError::NoAudioDevice)
        ));
        assert!(matches!(
            source.start(None, None),
            Err(RecorderError::NoAudioDevice)
        ));
        assert!(!source.is_running());
    }

    #[test]
    fn test_find_device_by_name_ignores_case() {
        let backend = FakeAudio::new(vec![
            fake_input(0, "Built-in Microphone"),
            fake_input(1, "USB Headset"),
        ]);
        let source = AudioSource::with_backend(Arc::new(backend), format());

        let found = source.find_device_by_name("headset").unwrap().unwrap();
        assert_eq!(found.index, 1);
        assert!(source.find_device_by_name("webcam").unwrap().is_none());
    }

    #[test]
    fn test_default_device_falls_back_to_first() {
        let backend = FakeAudio::new(vec![fake_input(0, "A"), fake_input(1, "B")]);
        let source = AudioSource::with_backend(Arc::new(backend), format());
        assert_eq!(source.default_device().unwrap().name, "A");

        let backend = FakeAudio::new(vec![fake_input(0, "A"), fake_input(1, "B")]).with_default(1);
        let source = AudioSource::with_backend(Arc::new(backend), format());
        assert_eq!(source.default_device().unwrap().name, "B");
    }

    #[test]
    fn test_queue_mode_delivers_fixed_chunks() {
        let source = mic_source(FakeAudio::new(vec![fake_input(0, "Mic")]));
        source.start(None, None).unwrap();

        let chunk = source.recv_chunk(Duration::from_secs(2)).unwrap();
        assert_eq!(chunk.len(), CHUNK_FRAMES * format().bytes_per_frame());
        source.stop();

        assert!(source.captured_bytes() >= chunk.len() as u64);
        assert!(source.captured_megabytes() > 0.0);
    }

    #[test]
    fn test_callback_mode_and_idempotent_stop() {
        let (tx, rx) = unbounded();
        let source = mic_source(FakeAudio::new(vec![fake_input(0, "Mic")]));
        source
            .start(
                Some(0),
                Some(Box::new(move |chunk: AudioChunk| {
                    let _ = tx.send(chunk.len());
                })),
            )
            .unwrap();

        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        source.stop();
        source.stop();
        assert!(!source.is_running());
        // Nothing was queued in callback mode
        assert!(source.recv_chunk(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_open_failure_surfaces() {
        let backend = FakeAudio::new(vec![fake_input(0, "Broken")]).failing_open();
        let source = AudioSource::with_backend(Arc::new(backend), format());

        let err = source.start(None, None).unwrap_err();
        assert!(matches!(err, RecorderError::DeviceUnavailable(_)));
        assert!(!source.is_running());
    }

    #[test]
    fn test_unknown_device_index() {
        let source = mic_source(FakeAudio::new(vec![fake_input(0, "Mic")]));
        assert!(matches!(
            source.start(Some(9), None),
            Err(RecorderError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn test_read_errors_do_not_end_capture() {
        let source = mic_source(FakeAudio::new(vec![fake_input(0, "Mic")]).failing_reads(2));
        source.start(None, None).unwrap();

        for _ in 0..4 {
            assert!(source.recv_chunk(Duration::from_secs(2)).is_some());
        }
        assert!(source.is_running());
        source.stop();
    }
}
