//! Command-line front end.
//!
//! Reads one JSON `RecordingConfig` line from stdin and records. Sessions with
//! `durationSecs` stop on their own; otherwise further stdin lines control the
//! session: `pause`, `resume`, `stop`. The result is printed as JSON.

use anyhow::{bail, Context};
use screenrec::encoder::is_available;
use screenrec::recorder::{Progress, RecordingConfig, RecordingCoordinator};
use screenrec::utils::logging;
use std::io::{self, BufRead};
use std::sync::Arc;
use std::time::Duration;

/// Grace period on top of the requested duration for encoding to finish
const FINISH_GRACE: Duration = Duration::from_secs(300);

fn main() -> anyhow::Result<()> {
    logging::init();
    tracing::info!("screenrec v{}", env!("CARGO_PKG_VERSION"));

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let first = lines
        .next()
        .context("expected a JSON recording config on stdin")??;
    let config: RecordingConfig =
        serde_json::from_str(&first).context("invalid recording config")?;

    if !is_available(&config.ffmpeg_path) {
        bail!("ffmpeg not found at {}", config.ffmpeg_path.display());
    }

    let recorder = RecordingCoordinator::new();
    recorder.set_progress_callback(Some(Arc::new(|progress: Progress| {
        tracing::trace!(
            "{:.1}s recorded, {} frames, {:.2} MB audio",
            progress.elapsed,
            progress.frames_captured,
            progress.audio_megabytes
        );
    })));

    let duration = config.duration_secs;
    let session = recorder.start(config)?;
    tracing::info!("Session {} recording", session.id);

    match duration {
        Some(seconds) => {
            if !recorder.wait_until_finished(finish_timeout(seconds)) {
                tracing::warn!("Session did not finish on its own, stopping");
            }
        }
        None => {
            for line in lines {
                match line?.trim() {
                    "pause" => recorder.pause()?,
                    "resume" => recorder.resume()?,
                    "stop" => break,
                    "" => {}
                    other => tracing::warn!("Unknown command '{}'", other),
                }
            }
        }
    }

    let output = match recorder.stop()? {
        Some(output) => Some(output),
        None => recorder.last_output(),
    };
    let failure = recorder.last_error();
    recorder.cleanup();

    match (output, failure) {
        (Some(output), _) => println!("{}", serde_json::to_string(&output)?),
        (None, Some(reason)) => bail!("recording failed: {}", reason),
        (None, None) => bail!("no frames were recorded"),
    }
    Ok(())
}

/// How long to wait for a duration-bound session, saturating for huge durations
fn finish_timeout(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds)
        .ok()
        .and_then(|duration| duration.checked_add(FINISH_GRACE))
        .unwrap_or(Duration::MAX)
}
