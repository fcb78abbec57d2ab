//! Screen capture
//!
//! `ScreenSource` grabs full displays or sub-regions as RGB24 frames. Native
//! capture handles are created lazily, one per calling thread, and kept in a
//! thread-local table keyed by source id.
//!
//! Monitor selection follows the usual multi-monitor convention: index 0 is the
//! virtual screen spanning every display, 1.. are the individual displays.

use crate::capture::traits::{BackendFactory, CaptureBackend, DisplayInfo, Frame};
use crate::utils::error::{RecorderError, RecorderResult};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monitor index meaning "all displays"
pub const ALL_MONITORS: usize = 0;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static HANDLES: RefCell<HashMap<u64, Box<dyn CaptureBackend>>> =
        RefCell::new(HashMap::new());
}

/// Area of the virtual desktop covered by a monitor selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorBounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Produces raw video frames from the display
pub struct ScreenSource {
    id: u64,
    factory: BackendFactory,
}

impl ScreenSource {
    /// Screen source backed by the native `xcap` backend
    pub fn new() -> Self {
        Self::with_factory(Arc::new(|| {
            XcapBackend::open().map(|backend| Box::new(backend) as Box<dyn CaptureBackend>)
        }))
    }

    /// Screen source with a custom backend factory
    pub fn with_factory(factory: BackendFactory) -> Self {
        Self {
            id: NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed),
            factory,
        }
    }

    /// Run `f` against this thread's capture handle, opening it on first use
    fn with_handle<R>(
        &self,
        f: impl FnOnce(&mut dyn CaptureBackend) -> RecorderResult<R>,
    ) -> RecorderResult<R> {
        HANDLES.with(|handles| {
            let mut handles = handles.borrow_mut();
            let handle = match handles.entry(self.id) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let backend = (self.factory)()?;
                    tracing::debug!(
                        "Opened capture handle for source {} on {:?}",
                        self.id,
                        std::thread::current().id()
                    );
                    entry.insert(backend)
                }
            };
            f(handle.as_mut())
        })
    }

    /// Drop the calling thread's capture handle, if any
    pub fn release_thread_handle(&self) {
        let _ = HANDLES.try_with(|handles| {
            if handles.borrow_mut().remove(&self.id).is_some() {
                tracing::debug!("Released capture handle for source {}", self.id);
            }
        });
    }

    /// Physical displays
    pub fn monitors(&self) -> RecorderResult<Vec<DisplayInfo>> {
        let displays = self.with_handle(|handle| handle.displays())?;
        if displays.is_empty() {
            return Err(RecorderError::DisplayUnavailable(
                "no displays reported".to_string(),
            ));
        }
        Ok(displays)
    }

    /// Selector (1-based) of the primary display, or of the first display when
    /// none is flagged primary
    pub fn primary_monitor(&self) -> RecorderResult<usize> {
        let displays = self.monitors()?;
        Ok(displays
            .iter()
            .position(|d| d.is_primary)
            .map_or(1, |index| index + 1))
    }

    /// Bounds of a monitor selector in virtual-desktop coordinates
    pub fn bounds(&self, monitor: usize) -> RecorderResult<MonitorBounds> {
        let displays = self.monitors()?;
        resolve_bounds(&displays, monitor)
    }

    /// Width and height of a monitor selector
    pub fn screen_size(&self, monitor: usize) -> RecorderResult<(u32, u32)> {
        let bounds = self.bounds(monitor)?;
        Ok((bounds.width, bounds.height))
    }

    /// Capture a whole monitor (or the whole virtual screen for index 0)
    pub fn capture_full(&self, monitor: usize) -> RecorderResult<Frame> {
        let image = self.grab_monitor(monitor)?;
        Ok(Frame::from_rgba(image))
    }

    /// Capture a region whose origin is relative to the chosen monitor
    pub fn capture_region(
        &self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        monitor: usize,
    ) -> RecorderResult<Frame> {
        let image = self.grab_monitor(monitor)?;
        check_region(x, y, width, height, image.width(), image.height())?;
        let cropped = imageops::crop_imm(&image, x, y, width, height).to_image();
        Ok(Frame::from_rgba(cropped))
    }

    fn grab_monitor(&self, monitor: usize) -> RecorderResult<RgbaImage> {
        self.with_handle(|handle| {
            let displays = handle.displays()?;
            if displays.is_empty() {
                return Err(RecorderError::DisplayUnavailable(
                    "no displays reported".to_string(),
                ));
            }

            if monitor == ALL_MONITORS {
                let bounds = resolve_bounds(&displays, ALL_MONITORS)?;
                let mut canvas = RgbaImage::new(bounds.width, bounds.height);
                for (index, display) in displays.iter().enumerate() {
                    let image = fit_to_display(handle.grab(index)?, display);
                    imageops::overlay(
                        &mut canvas,
                        &image,
                        (display.x - bounds.x) as i64,
                        (display.y - bounds.y) as i64,
                    );
                }
                return Ok(canvas);
            }

            let display = displays.get(monitor - 1).ok_or_else(|| {
                RecorderError::Configuration(format!(
                    "monitor {} does not exist ({} available)",
                    monitor,
                    displays.len()
                ))
            })?;
            let image = handle.grab(monitor - 1)?;
            Ok(fit_to_display(image, display))
        })
    }
}

impl Default for ScreenSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScreenSource {
    fn drop(&mut self) {
        self.release_thread_handle();
    }
}

/// Resolve a monitor selector against the display list
pub fn resolve_bounds(displays: &[DisplayInfo], monitor: usize) -> RecorderResult<MonitorBounds> {
    if monitor == ALL_MONITORS {
        let min_x = displays.iter().map(|d| d.x).min().unwrap_or(0);
        let min_y = displays.iter().map(|d| d.y).min().unwrap_or(0);
        let max_x = displays
            .iter()
            .map(|d| d.x + d.width as i32)
            .max()
            .unwrap_or(0);
        let max_y = displays
            .iter()
            .map(|d| d.y + d.height as i32)
            .max()
            .unwrap_or(0);
        return Ok(MonitorBounds {
            x: min_x,
            y: min_y,
            width: (max_x - min_x).max(0) as u32,
            height: (max_y - min_y).max(0) as u32,
        });
    }

    displays
        .get(monitor - 1)
        .map(|d| MonitorBounds {
            x: d.x,
            y: d.y,
            width: d.width,
            height: d.height,
        })
        .ok_or_else(|| {
            RecorderError::Configuration(format!(
                "monitor {} does not exist ({} available)",
                monitor,
                displays.len()
            ))
        })
}

/// Validate a region against the monitor it is taken from
pub fn check_region(
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    monitor_width: u32,
    monitor_height: u32,
) -> RecorderResult<()> {
    if width == 0 || height == 0 {
        return Err(RecorderError::Configuration(format!(
            "region {}x{} is empty",
            width, height
        )));
    }
    let fits_x = x.checked_add(width).is_some_and(|right| right <= monitor_width);
    let fits_y = y.checked_add(height).is_some_and(|bottom| bottom <= monitor_height);
    if !fits_x || !fits_y {
        return Err(RecorderError::Configuration(format!(
            "region {}x{}+{}+{} exceeds monitor {}x{}",
            width, height, x, y, monitor_width, monitor_height
        )));
    }
    Ok(())
}

/// Some backends hand back physical pixels on scaled displays; keep every
/// frame at the size the display reports so the session size stays fixed.
fn fit_to_display(image: RgbaImage, target: &DisplayInfo) -> RgbaImage {
    if image.dimensions() == (target.width, target.height) {
        return image;
    }
    tracing::trace!(
        "Resizing capture {:?} to {}x{}",
        image.dimensions(),
        target.width,
        target.height
    );
    imageops::resize(&image, target.width, target.height, FilterType::Triangle)
}

/// Native backend built on `xcap`
pub struct XcapBackend {
    monitors: Vec<xcap::Monitor>,
}

impl XcapBackend {
    /// Enumerate monitors. Fails with `DisplayUnavailable` on headless hosts.
    pub fn open() -> RecorderResult<Self> {
        let monitors = xcap::Monitor::all().map_err(|e| {
            RecorderError::DisplayUnavailable(format!("failed to enumerate monitors: {}", e))
        })?;
        if monitors.is_empty() {
            return Err(RecorderError::DisplayUnavailable(
                "no monitors found".to_string(),
            ));
        }
        Ok(Self { monitors })
    }
}

impl CaptureBackend for XcapBackend {
    fn displays(&mut self) -> RecorderResult<Vec<DisplayInfo>> {
        Ok(self
            .monitors
            .iter()
            .enumerate()
            .map(|(idx, monitor)| DisplayInfo {
                id: idx as u32,
                name: monitor
                    .name()
                    .unwrap_or_else(|_| format!("Monitor {}", idx + 1)),
                x: monitor.x().unwrap_or(0),
                y: monitor.y().unwrap_or(0),
                width: monitor.width().unwrap_or(1920),
                height: monitor.height().unwrap_or(1080),
                scale_factor: monitor.scale_factor().unwrap_or(1.0),
                is_primary: monitor.is_primary().unwrap_or(false),
            })
            .collect())
    }

    fn grab(&mut self, index: usize) -> RecorderResult<RgbaImage> {
        let monitor = self.monitors.get(index).ok_or_else(|| {
            RecorderError::Configuration(format!("monitor index {} out of range", index))
        })?;
        monitor
            .capture_image()
            .map_err(|e| RecorderError::Capture(format!("failed to grab monitor {}: {}", index, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fake_display, FakeScreen};
    use std::sync::atomic::AtomicUsize;

    fn two_monitor_source() -> ScreenSource {
        FakeScreen::new(vec![
            fake_display(0, 0, 0, 4, 2),
            fake_display(1, 4, 0, 2, 3),
        ])
        .into_source()
    }

    #[test]
    fn test_screen_size_per_monitor() {
        let source = two_monitor_source();
        assert_eq!(source.screen_size(1).unwrap(), (4, 2));
        assert_eq!(source.screen_size(2).unwrap(), (2, 3));
        // Virtual screen spans both
        assert_eq!(source.screen_size(ALL_MONITORS).unwrap(), (6, 3));
    }

    #[test]
    fn test_unknown_monitor_is_configuration_error() {
        let source = two_monitor_source();
        assert!(matches!(
            source.screen_size(3),
            Err(RecorderError::Configuration(_))
        ));
    }

    #[test]
    fn test_capture_full_is_rgb24() {
        let source = two_monitor_source();
        let frame = source.capture_full(1).unwrap();
        assert_eq!((frame.width(), frame.height()), (4, 2));
        assert_eq!(frame.len(), 4 * 2 * 3);
    }

    #[test]
    fn test_capture_all_monitors_composites() {
        let source = two_monitor_source();
        let frame = source.capture_full(ALL_MONITORS).unwrap();
        assert_eq!((frame.width(), frame.height()), (6, 3));

        // The fake paints each display with its id in the red channel
        let pixel = |x: usize, y: usize| frame.data()[(y * 6 + x) * 3];
        assert_eq!(pixel(0, 0), 0);
        assert_eq!(pixel(5, 2), 1);
    }

    #[test]
    fn test_capture_region_is_relative_to_monitor() {
        let source = FakeScreen::new(vec![
            fake_display(0, 0, 0, 4, 4),
            fake_display(1, 4, 0, 4, 4),
        ])
        .into_source();

        let frame = source.capture_region(1, 1, 2, 3, 2).unwrap();
        assert_eq!((frame.width(), frame.height()), (2, 3));
        // Pixels came from the second display
        assert!(frame.data().chunks(3).all(|px| px[0] == 1));
    }

    #[test]
    fn test_region_outside_monitor_rejected() {
        let source = two_monitor_source();
        assert!(matches!(
            source.capture_region(3, 0, 2, 2, 1),
            Err(RecorderError::Configuration(_))
        ));
        assert!(matches!(
            source.capture_region(0, 0, 0, 2, 1),
            Err(RecorderError::Configuration(_))
        ));
    }

    #[test]
    fn test_headless_is_recoverable() {
        let source = ScreenSource::with_factory(Arc::new(|| {
            Err(RecorderError::DisplayUnavailable("no X server".to_string()))
        }));

        let err = source.capture_full(1).unwrap_err();
        assert!(matches!(err, RecorderError::DisplayUnavailable(_)));
        assert!(err.is_recoverable());
        // Still usable for the next attempt
        assert!(source.screen_size(1).is_err());
    }

    #[test]
    fn test_one_handle_per_thread() {
        let opened = Arc::new(AtomicUsize::new(0));
        let factory: BackendFactory = {
            let opened = opened.clone();
            Arc::new(move || {
                opened.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(FakeScreen::new(vec![fake_display(0, 0, 0, 2, 2)]))
                    as Box<dyn CaptureBackend>)
            })
        };
        let source = Arc::new(ScreenSource::with_factory(factory));

        source.capture_full(1).unwrap();
        source.capture_full(1).unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 1);

        let worker = {
            let source = source.clone();
            std::thread::spawn(move || {
                source.capture_full(1).unwrap();
            })
        };
        worker.join().unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 2);

        source.release_thread_handle();
        source.capture_full(1).unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_check_region_overflow() {
        assert!(check_region(u32::MAX, 0, 2, 2, 10, 10).is_err());
        assert!(check_region(0, 0, 10, 10, 10, 10).is_ok());
    }

    #[test]
    fn test_primary_monitor_selector() {
        let source = FakeScreen::new(vec![
            fake_display(3, -4, 0, 4, 2),
            fake_display(0, 0, 0, 4, 2),
        ])
        .into_source();
        assert_eq!(source.primary_monitor().unwrap(), 2);
        assert_eq!(source.screen_size(2).unwrap(), (4, 2));

        let source = FakeScreen::new(vec![
            fake_display(5, 0, 0, 4, 2),
            fake_display(6, 4, 0, 4, 2),
        ])
        .into_source();
        assert_eq!(source.primary_monitor().unwrap(), 1);
    }
}
