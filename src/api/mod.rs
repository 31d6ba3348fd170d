//! Homework backend API client
//!
//! The backend owns transcription, scoring, and session state; this module
//! is the typed client surface the recorder talks to:
//! - GET  /status                    - authoritative step + session id
//! - POST /start                     - create/resume a session
//! - POST /recordings/stream-chunk   - incremental metrics for one chunk
//! - POST /recordings/finalize       - submit the full take for scoring
//! - GET  /report                    - scored report

pub mod client;
pub mod types;

pub use client::{HomeworkApi, HomeworkClient};
pub use types::{
    Exercise, FinalizeRequest, FinalizeResponse, HomeworkStatus, LiveMetrics, ReportResponse,
    StartRequest, StartResponse, Step, StreamChunkRequest,
};
