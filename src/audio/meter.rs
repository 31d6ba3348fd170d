//! Voice-level meter.
//!
//! An independently scheduled loop over live audio frames that publishes a
//! smoothed 0-100 loudness value for UI display. It must never delay chunk
//! emission (the frame pump feeds it with `try_send`) and must be torn down
//! whenever the capture session leaves the recording state.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use super::backend::AudioFrame;

/// Exponential smoothing factor applied to successive level readings.
const SMOOTHING: f64 = 0.8;
/// Display gain applied before capping at 100.
const DISPLAY_GAIN: f64 = 1.2;

/// Handle owning the meter loop. Dropping without `shutdown` leaks the
/// task until its input channel closes; sessions call `shutdown` on every
/// exit path.
pub struct MeterHandle {
    task: JoinHandle<()>,
}

impl MeterHandle {
    /// Cancel the meter loop and wait for it to finish. Consumes the
    /// handle so teardown can only happen once.
    pub async fn shutdown(self) {
        self.task.abort();
        let _ = self.task.await;
        debug!("Voice meter stopped");
    }
}

/// Voice-level meter loop.
pub struct VoiceMeter;

impl VoiceMeter {
    /// Spawn the metering task. Returns the teardown handle and a watch
    /// receiver publishing the current 0-100 level. The watch channel
    /// closes when the meter is torn down.
    pub fn spawn(mut frames: mpsc::Receiver<AudioFrame>) -> (MeterHandle, watch::Receiver<u8>) {
        let (level_tx, level_rx) = watch::channel(0u8);

        let task = tokio::spawn(async move {
            let mut smoothed = 0.0f64;
            while let Some(frame) = frames.recv().await {
                let raw = mean_magnitude(&frame.samples);
                smoothed = SMOOTHING * smoothed + (1.0 - SMOOTHING) * raw;
                let level = display_level(smoothed);
                if level_tx.send(level).is_err() {
                    break;
                }
            }
        });

        (MeterHandle { task }, level_rx)
    }
}

/// Mean absolute magnitude of a frame, normalized to 0.0..1.0.
fn mean_magnitude(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64).abs()).sum();
    (sum / samples.len() as f64) / i16::MAX as f64
}

/// Scale a normalized magnitude to the 0-100 display range with gain,
/// capped at 100.
fn display_level(magnitude: f64) -> u8 {
    let scaled = (magnitude * 100.0 * DISPLAY_GAIN).round();
    scaled.min(100.0) as u8
}
