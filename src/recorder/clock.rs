//! Pause-aware recording clock
//!
//! `elapsed()` excludes every paused span: it grows while recording and stays
//! frozen while paused. Capture loops block on [`Clock::wait_while_paused`]
//! instead of spinning.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic time source
pub trait TimeSource: Send + Sync {
    /// Time since an arbitrary fixed origin
    fn now(&self) -> Duration;
}

/// Wall-clock source backed by `Instant`
pub struct SystemTime {
    origin: Instant,
}

impl SystemTime {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTime {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven time source for tests and simulations
#[derive(Clone, Default)]
pub struct ManualTime {
    now: Arc<Mutex<Duration>>,
}

impl ManualTime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}

#[derive(Debug, Default)]
struct ClockState {
    start: Option<Duration>,
    paused_total: Duration,
    pause_started: Option<Duration>,
}

/// Elapsed-time authority for one recording session
pub struct Clock {
    source: Box<dyn TimeSource>,
    state: Mutex<ClockState>,
    resumed: Condvar,
}

impl Clock {
    pub fn new() -> Self {
        Self::with_source(SystemTime::new())
    }

    pub fn with_source(source: impl TimeSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            state: Mutex::new(ClockState::default()),
            resumed: Condvar::new(),
        }
    }

    /// Anchor the clock at the current instant and forget any pause history
    pub fn start(&self) {
        let mut state = self.state.lock();
        *state = ClockState {
            start: Some(self.source.now()),
            ..ClockState::default()
        };
        drop(state);
        self.resumed.notify_all();
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().start.is_some()
    }

    /// Seconds since `start()`, excluding paused time. Zero before `start()`.
    pub fn elapsed(&self) -> f64 {
        self.elapsed_duration().as_secs_f64()
    }

    pub fn elapsed_duration(&self) -> Duration {
        let state = self.state.lock();
        let Some(start) = state.start else {
            return Duration::ZERO;
        };

        // While paused, time stops at the moment the pause began
        let now = state.pause_started.unwrap_or_else(|| self.source.now());
        now.saturating_sub(start).saturating_sub(state.paused_total)
    }

    /// Freeze elapsed time. No-op if already paused or not started.
    pub fn pause(&self) {
        let mut state = self.state.lock();
        if state.start.is_none() || state.pause_started.is_some() {
            return;
        }
        state.pause_started = Some(self.source.now());
    }

    /// Fold the current pause span into the accumulator. No-op if not paused.
    pub fn resume(&self) {
        let mut state = self.state.lock();
        let Some(pause_started) = state.pause_started.take() else {
            return;
        };
        let span = self.source.now().saturating_sub(pause_started);
        state.paused_total += span;
        drop(state);
        self.resumed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().pause_started.is_some()
    }

    /// Total paused time so far, including an in-progress pause
    pub fn paused_total(&self) -> Duration {
        let state = self.state.lock();
        let current = state
            .pause_started
            .map(|p| self.source.now().saturating_sub(p))
            .unwrap_or_default();
        state.paused_total + current
    }

    /// Block while paused, for at most `timeout`. Returns `true` once running.
    pub fn wait_while_paused(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.pause_started.is_some() {
            if self.resumed.wait_until(&mut state, deadline).timed_out() {
                return state.pause_started.is_none();
            }
        }
        true
    }

    /// Wake every thread blocked in `wait_while_paused` so it can re-check
    /// its own stop flag.
    pub fn wake_all(&self) {
        self.resumed.notify_all();
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
