//! Recording session management
//!
//! This module provides the `RecordingSession` abstraction that manages:
//! - Microphone capture and chunk slicing on a fixed cadence
//! - Fire-and-forget chunk uploads for live metrics (transcript, WPM,
//!   fillers), degrading gracefully when uploads fail
//! - The voice-level meter lifecycle
//! - The maximum-duration guard
//! - Finalizing the assembled take into the scoring pipeline

mod config;
mod session;
mod state;
mod stats;

pub use config::SessionConfig;
pub use session::RecordingSession;
pub use state::{CaptureState, StopReason};
pub use stats::SessionSnapshot;
