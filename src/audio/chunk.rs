use anyhow::{Context, Result};
use std::io::Cursor;
use std::time::Duration;
use tracing::info;

use super::backend::AudioFrame;

/// A bounded slice of recorded audio, ready for streaming upload.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    /// Raw PCM samples for this chunk (kept for final take assembly)
    pub pcm: Vec<i16>,
    /// The same samples encoded as a 16-bit WAV payload
    pub wav: Vec<u8>,
    /// Chunk duration in seconds
    pub duration_seconds: f64,
}

/// Groups incoming audio frames into fixed-duration chunks.
///
/// Frames may straddle chunk boundaries, so `push` can return more than one
/// completed chunk. The trailing partial chunk is recovered with `flush`.
pub struct ChunkSlicer {
    sample_rate: u32,
    channels: u16,
    samples_per_chunk: usize,
    buf: Vec<i16>,
}

impl ChunkSlicer {
    pub fn new(sample_rate: u32, channels: u16, chunk_duration: Duration) -> Self {
        let samples_per_chunk =
            (sample_rate as f64 * channels as f64 * chunk_duration.as_secs_f64()) as usize;
        Self {
            sample_rate,
            channels,
            samples_per_chunk: samples_per_chunk.max(1),
            buf: Vec::new(),
        }
    }

    /// Add a frame; returns every chunk completed by it.
    pub fn push(&mut self, frame: AudioFrame) -> Result<Vec<EncodedChunk>> {
        self.buf.extend_from_slice(&frame.samples);

        let mut ready = Vec::new();
        while self.buf.len() >= self.samples_per_chunk {
            let rest = self.buf.split_off(self.samples_per_chunk);
            let pcm = std::mem::replace(&mut self.buf, rest);
            ready.push(self.encode(pcm)?);
        }
        Ok(ready)
    }

    /// Drain the trailing partial chunk, if any.
    pub fn flush(&mut self) -> Result<Option<EncodedChunk>> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        let pcm = std::mem::take(&mut self.buf);
        info!("Flushing trailing partial chunk ({} samples)", pcm.len());
        Ok(Some(self.encode(pcm)?))
    }

    fn encode(&self, pcm: Vec<i16>) -> Result<EncodedChunk> {
        let duration_seconds =
            pcm.len() as f64 / (self.sample_rate as f64 * self.channels as f64);
        let wav = encode_wav(&pcm, self.sample_rate, self.channels)?;
        Ok(EncodedChunk {
            pcm,
            wav,
            duration_seconds,
        })
    }
}

/// Assembles all captured chunk PCM, in capture order, into the single WAV
/// payload submitted at finalize time.
pub struct TakeAssembler;

impl TakeAssembler {
    pub fn assemble(chunks: &[Vec<i16>], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        let mut pcm = Vec::with_capacity(total);
        for chunk in chunks {
            pcm.extend_from_slice(chunk);
        }

        info!(
            "Assembled final take: {} chunks, {} samples",
            chunks.len(),
            pcm.len()
        );

        encode_wav(&pcm, sample_rate, channels)
    }
}

/// Encode PCM samples as an in-memory 16-bit WAV file.
pub fn encode_wav(pcm: &[i16], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut bytes: Vec<u8> = Vec::new();
    {
        let cursor = Cursor::new(&mut bytes);
        let mut writer =
            hound::WavWriter::new(cursor, spec).context("failed to create WAV writer")?;
        for &sample in pcm {
            writer
                .write_sample(sample)
                .context("failed to write sample to WAV")?;
        }
        writer.finalize().context("failed to finalize WAV")?;
    }

    Ok(bytes)
}
