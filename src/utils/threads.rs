//! Bounded thread joins
//!
//! Worker threads that do not exit within their bound are detached with a
//! warning so shutdown can still finish.

use crate::utils::error::RecorderError;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Join `handle`, giving up after `timeout`.
///
/// Returns `true` if the thread finished in time. A panicked thread counts as
/// finished and is logged.
pub fn join_with_timeout<T>(handle: JoinHandle<T>, timeout: Duration, name: &str) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            let err = RecorderError::ShutdownTimeout(format!(
                "{} thread still running after {:?}, detaching",
                name, timeout
            ));
            tracing::warn!("{}", err);
            return false;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    if handle.join().is_err() {
        tracing::error!("{} thread panicked", name);
    }
    true
}
