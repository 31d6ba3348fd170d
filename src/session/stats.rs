use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::CaptureState;

/// UI-facing snapshot of one recording attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Current lifecycle state
    pub state: CaptureState,

    /// When the attempt started, if it has
    pub started_at: Option<DateTime<Utc>>,

    /// Elapsed wall-clock seconds since start
    pub elapsed_secs: f64,

    /// Number of audio chunks captured so far
    pub chunks_captured: usize,

    /// Accumulated live transcript (space-joined chunk fragments)
    pub live_transcript: String,

    /// Last-known words per minute
    pub wpm: f64,

    /// Last-known filler-word count
    pub filler_count: u32,

    /// Current voice-level reading (0-100)
    pub voice_strength: u8,

    /// True while live metrics may be stale because the last chunk
    /// upload failed; recording continues regardless
    pub metrics_degraded: bool,

    /// User-visible notice, e.g. the duration ceiling was reached
    pub notice: Option<String>,
}
