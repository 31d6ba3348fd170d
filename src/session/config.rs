use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a recording session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Cadence at which audio chunks are emitted and uploaded
    /// Default: 3 seconds
    pub chunk_duration: Duration,

    /// Ceiling after which a still-running recording is force-stopped
    /// Default: 300 seconds (5 minutes)
    pub max_duration: Duration,

    /// Sample rate for captured audio (the backend expects 16kHz)
    pub sample_rate: u32,

    /// Number of audio channels (1 = mono, 2 = stereo)
    pub channels: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_duration: Duration::from_secs(3),
            max_duration: Duration::from_secs(300), // 5 minutes
            sample_rate: 16000,
            channels: 1, // Mono
        }
    }
}
