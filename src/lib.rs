pub mod api;
pub mod audio;
pub mod config;
pub mod reconcile;
pub mod session;

pub use api::{
    Exercise, FinalizeResponse, HomeworkApi, HomeworkClient, HomeworkStatus, LiveMetrics,
    ReportResponse, StartResponse, Step,
};
pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, ChunkSlicer,
    EncodedChunk, MeterHandle, TakeAssembler, VoiceMeter,
};
pub use config::Config;
pub use reconcile::{ensure_session, reconcile, EntryRoute};
pub use session::{CaptureState, RecordingSession, SessionConfig, SessionSnapshot, StopReason};
