use serde::{Deserialize, Serialize};

/// Authoritative homework step as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Landing,
    Recording,
    Processing,
    Report,
}

/// Exercise recommended for the current session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exercise {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Response from the status endpoint. Source of truth for cross-reload
/// session identity and step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomeworkStatus {
    pub step: Step,
    pub session_id: Option<String>,
    pub status: Option<String>,
    pub exercise: Option<Exercise>,
}

/// Request body for starting a homework session.
#[derive(Debug, Serialize, Deserialize)]
pub struct StartRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_exercise_id: Option<String>,
}

/// Response from the start endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    pub session_id: String,
    pub step: Step,
    pub exercise: Option<Exercise>,
}

/// Request body for one streamed audio chunk.
#[derive(Debug, Serialize, Deserialize)]
pub struct StreamChunkRequest {
    pub session_id: String,
    pub sequence_index: u64,
    /// Base64-encoded WAV payload
    pub audio_base64: String,
    pub duration_seconds: f64,
}

/// Incremental metrics returned for a streamed chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveMetrics {
    pub transcript_segment: String,
    pub wpm: f64,
    pub voice_strength: u32,
    pub filler_count: u32,
}

/// Request body for finalizing the full recording.
#[derive(Debug, Serialize, Deserialize)]
pub struct FinalizeRequest {
    /// Base64-encoded WAV payload
    pub audio_base64: String,
    pub duration_seconds: f64,
}

/// Response from the finalize endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeResponse {
    pub step: Step,
    pub score: f64,
    pub summary: String,
    pub coach_reminder: String,
}

/// Response from the report endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportResponse {
    pub score: f64,
    pub summary: String,
    pub coach_reminder: String,
    #[serde(default)]
    pub coach_feedback_text: Option<String>,
}
