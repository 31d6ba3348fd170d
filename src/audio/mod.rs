pub mod backend;
pub mod capture;
pub mod chunk;
pub mod meter;

pub use backend::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame};
pub use chunk::{encode_wav, ChunkSlicer, EncodedChunk, TakeAssembler};
pub use meter::{MeterHandle, VoiceMeter};
