use super::config::SessionConfig;
use super::state::{CaptureState, StateCell, StopReason};
use super::stats::SessionSnapshot;
use crate::api::{FinalizeResponse, HomeworkApi};
use crate::audio::{AudioBackend, ChunkSlicer, EncodedChunk, MeterHandle, TakeAssembler, VoiceMeter};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A recording session: captures microphone audio, streams 3-second chunks
/// to the homework backend for live metrics, enforces the duration ceiling,
/// and finalizes the assembled take for scoring.
///
/// Chunk upload responses are applied as they arrive: metrics are
/// last-write-wins and transcript fragments append on arrival, so a
/// late-completing earlier chunk can briefly show stale numbers. There is
/// deliberately no client-side reordering buffer.
pub struct RecordingSession {
    inner: Arc<Inner>,
}

/// Latest chunk-derived metrics; overwritten on each successful upload.
#[derive(Debug, Clone, Default)]
struct LatestMetrics {
    wpm: f64,
    filler_count: u32,
}

struct Inner {
    config: SessionConfig,
    api: Arc<dyn HomeworkApi>,
    session_id: String,

    state: StateCell,
    /// Fences stale duration-guard fires and late upload responses from a
    /// superseded attempt
    attempt: Mutex<Uuid>,

    /// Monotonic chunk sequence counter, reset to 0 per attempt
    sequence: AtomicU64,
    chunks_captured: AtomicUsize,
    /// Raw PCM per chunk, in capture order; consumed at finalize time
    chunks: Mutex<Vec<Vec<i16>>>,
    /// Append-only live transcript accumulator
    transcript: Mutex<String>,
    metrics: Mutex<LatestMetrics>,
    metrics_degraded: AtomicBool,
    /// One submission per attempt, whether it succeeds or fails
    finalize_attempted: AtomicBool,

    started_at: Mutex<Option<(Instant, DateTime<Utc>)>>,
    /// Wall-clock seconds from start to stop, frozen at the stop transition
    elapsed_at_stop: Mutex<Option<f64>>,
    notice: Mutex<Option<String>>,

    level_rx: Mutex<Option<watch::Receiver<u8>>>,

    backend: Mutex<Option<Box<dyn AudioBackend>>>,
    pump_handle: Mutex<Option<JoinHandle<()>>>,
    meter: Mutex<Option<MeterHandle>>,
    guard_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RecordingSession {
    /// Create a session bound to an already-established backend session id.
    pub fn new(config: SessionConfig, api: Arc<dyn HomeworkApi>, session_id: String) -> Self {
        info!("Creating recording session: {}", session_id);
        Self {
            inner: Arc::new(Inner {
                config,
                api,
                session_id,
                state: StateCell::new(CaptureState::Idle),
                attempt: Mutex::new(Uuid::nil()),
                sequence: AtomicU64::new(0),
                chunks_captured: AtomicUsize::new(0),
                chunks: Mutex::new(Vec::new()),
                transcript: Mutex::new(String::new()),
                metrics: Mutex::new(LatestMetrics::default()),
                metrics_degraded: AtomicBool::new(false),
                finalize_attempted: AtomicBool::new(false),
                started_at: Mutex::new(None),
                elapsed_at_stop: Mutex::new(None),
                notice: Mutex::new(None),
                level_rx: Mutex::new(None),
                backend: Mutex::new(None),
                pump_handle: Mutex::new(None),
                meter: Mutex::new(None),
                guard_handle: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.inner.state.load()
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Start recording with the given capture backend.
    ///
    /// On capture failure the session reverts to idle with no other state
    /// mutated; accumulators are reset only once capture is live, before
    /// the first chunk can be emitted.
    pub async fn start(&self, mut backend: Box<dyn AudioBackend>) -> Result<()> {
        let inner = &self.inner;

        if !inner.state.transition(CaptureState::Idle, CaptureState::Recording) {
            anyhow::bail!("cannot start recording from {:?} state", inner.state.load());
        }

        info!(
            "Starting recording for session {} (backend: {})",
            inner.session_id,
            backend.name()
        );

        let frames_rx = match backend.start().await {
            Ok(rx) => rx,
            Err(e) => {
                inner.state.store(CaptureState::Idle);
                return Err(e.context("could not access microphone"));
            }
        };
        *inner.backend.lock().await = Some(backend);

        // Reset all per-attempt accumulators before the first chunk can fire.
        let attempt_id = Uuid::new_v4();
        *inner.attempt.lock().await = attempt_id;
        inner.sequence.store(0, Ordering::SeqCst);
        inner.chunks_captured.store(0, Ordering::SeqCst);
        inner.chunks.lock().await.clear();
        inner.transcript.lock().await.clear();
        *inner.metrics.lock().await = LatestMetrics::default();
        inner.metrics_degraded.store(false, Ordering::SeqCst);
        inner.finalize_attempted.store(false, Ordering::SeqCst);
        *inner.notice.lock().await = None;
        *inner.elapsed_at_stop.lock().await = None;
        *inner.started_at.lock().await = Some((Instant::now(), Utc::now()));

        // Voice meter: fed with cloned frames, published over a watch channel.
        let (meter_tx, meter_frames) = mpsc::channel(16);
        let (meter_handle, level_rx) = VoiceMeter::spawn(meter_frames);
        *inner.meter.lock().await = Some(meter_handle);
        *inner.level_rx.lock().await = Some(level_rx);

        // Frame pump: slices frames into chunks and dispatches uploads.
        let pump = tokio::spawn(Inner::run_pump(
            Arc::clone(inner),
            attempt_id,
            frames_rx,
            meter_tx,
        ));
        *inner.pump_handle.lock().await = Some(pump);

        // Duration guard: one deadline timer per attempt.
        let guard = tokio::spawn(Inner::run_guard(Arc::clone(inner), attempt_id));
        *inner.guard_handle.lock().await = Some(guard);

        info!("Recording started for session {}", inner.session_id);
        Ok(())
    }

    /// Stop recording. Idempotent: a no-op unless currently recording.
    pub async fn stop(&self, reason: StopReason) -> Result<()> {
        Inner::stop(&self.inner, reason).await
    }

    /// Assemble the captured take and submit it for scoring.
    ///
    /// Runs from the processing state, at most once per attempt. On
    /// failure the session stays in processing but the same audio cannot
    /// be resubmitted; a fresh recording is required (see
    /// [`RecordingSession::reset`]).
    pub async fn finalize(&self) -> Result<FinalizeResponse> {
        let inner = &self.inner;

        if inner.state.load() != CaptureState::Processing {
            anyhow::bail!("cannot finalize from {:?} state", inner.state.load());
        }
        if inner.finalize_attempted.swap(true, Ordering::SeqCst) {
            anyhow::bail!("this take was already submitted; start a new recording");
        }

        let elapsed = {
            let frozen = *inner.elapsed_at_stop.lock().await;
            match frozen {
                Some(secs) => secs,
                None => {
                    let started = inner.started_at.lock().await;
                    let (instant, _) = started.context("recording never started")?;
                    instant.elapsed().as_secs_f64()
                }
            }
        };

        let payload = {
            let chunks = inner.chunks.lock().await;
            TakeAssembler::assemble(&chunks, inner.config.sample_rate, inner.config.channels)?
        };

        info!(
            "Finalizing session {}: {:.1}s, {} bytes",
            inner.session_id,
            elapsed,
            payload.len()
        );

        match inner.api.finalize(&payload, elapsed).await {
            Ok(resp) => {
                inner.state.store(CaptureState::Done);
                info!("Session {} scored: {}", inner.session_id, resp.score);
                Ok(resp)
            }
            Err(e) => {
                error!("Finalize failed for session {}: {:#}", inner.session_id, e);
                Err(e.context("finalize failed; start a new recording to retry"))
            }
        }
    }

    /// Return to idle after a finalize failure or a completed attempt, so a
    /// fresh recording can start.
    pub async fn reset(&self) {
        let inner = &self.inner;
        if inner.state.transition(CaptureState::Processing, CaptureState::Idle)
            || inner.state.transition(CaptureState::Done, CaptureState::Idle)
        {
            info!("Session {} reset to idle", inner.session_id);
        }
    }

    /// Current UI-facing snapshot.
    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = &self.inner;

        let frozen = *inner.elapsed_at_stop.lock().await;
        let (started_at, elapsed_secs) = match *inner.started_at.lock().await {
            Some((instant, wall)) => {
                let elapsed = frozen.unwrap_or_else(|| instant.elapsed().as_secs_f64());
                (Some(wall), elapsed)
            }
            None => (None, 0.0),
        };

        let voice_strength = inner
            .level_rx
            .lock()
            .await
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(0);

        let metrics = inner.metrics.lock().await.clone();

        SessionSnapshot {
            state: inner.state.load(),
            started_at,
            elapsed_secs,
            chunks_captured: inner.chunks_captured.load(Ordering::SeqCst),
            live_transcript: inner.transcript.lock().await.clone(),
            wpm: metrics.wpm,
            filler_count: metrics.filler_count,
            voice_strength,
            metrics_degraded: inner.metrics_degraded.load(Ordering::SeqCst),
            notice: inner.notice.lock().await.clone(),
        }
    }

    /// Watch receiver for the live voice level, if a meter is running.
    /// The channel closes when the meter is torn down.
    pub async fn level_receiver(&self) -> Option<watch::Receiver<u8>> {
        self.inner.level_rx.lock().await.clone()
    }
}

impl Inner {
    /// Consumes capture frames until the frame channel closes (the backend
    /// closes it on stop): each frame feeds the voice meter (non-blocking)
    /// and the chunk slicer; completed chunks are dispatched for upload.
    /// Frames still queued at the stop edge are drained into the final take
    /// but emit no further uploads, and the trailing partial chunk is kept
    /// for the final take without being uploaded.
    async fn run_pump(
        inner: Arc<Inner>,
        attempt_id: Uuid,
        mut frames_rx: mpsc::Receiver<crate::audio::AudioFrame>,
        meter_tx: mpsc::Sender<crate::audio::AudioFrame>,
    ) {
        let mut slicer = ChunkSlicer::new(
            inner.config.sample_rate,
            inner.config.channels,
            inner.config.chunk_duration,
        );

        while let Some(frame) = frames_rx.recv().await {
            if inner.state.load() == CaptureState::Recording {
                // The meter must never delay chunk emission: drop on
                // backpressure.
                let _ = meter_tx.try_send(frame.clone());
            }

            match slicer.push(frame) {
                Ok(ready) => {
                    for chunk in ready {
                        if inner.state.load() == CaptureState::Recording {
                            Inner::dispatch_chunk(&inner, attempt_id, chunk).await;
                        } else {
                            // Past the stop edge: the audio belongs in the
                            // final take, but no further uploads may fire.
                            inner.chunks.lock().await.push(chunk.pcm);
                            inner.chunks_captured.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
                Err(e) => {
                    error!("Chunk encoding failed: {:#}", e);
                    let inner = Arc::clone(&inner);
                    tokio::spawn(async move {
                        if let Err(e) = Inner::stop(&inner, StopReason::Error).await {
                            error!("Forced stop after capture error failed: {:#}", e);
                        }
                    });
                    break;
                }
            }
        }

        match slicer.flush() {
            Ok(Some(tail)) => {
                inner.chunks.lock().await.push(tail.pcm);
                inner.chunks_captured.fetch_add(1, Ordering::SeqCst);
            }
            Ok(None) => {}
            Err(e) => error!("Failed to flush trailing chunk: {:#}", e),
        }
    }

    /// Assign the next sequence number and fire off the upload.
    ///
    /// The sequence number and the accumulator append happen synchronously
    /// in emission order; only the network call runs concurrently, so two
    /// in-flight uploads can never race on sequence assignment.
    async fn dispatch_chunk(inner: &Arc<Inner>, attempt_id: Uuid, chunk: EncodedChunk) {
        let seq = inner.sequence.fetch_add(1, Ordering::SeqCst);
        inner.chunks.lock().await.push(chunk.pcm);
        inner.chunks_captured.fetch_add(1, Ordering::SeqCst);

        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let result = inner
                .api
                .stream_chunk(&inner.session_id, seq, &chunk.wav, chunk.duration_seconds)
                .await;

            // Drop responses from a superseded attempt.
            if *inner.attempt.lock().await != attempt_id {
                return;
            }

            match result {
                Ok(metrics) => {
                    {
                        let mut transcript = inner.transcript.lock().await;
                        if !transcript.is_empty() {
                            transcript.push(' ');
                        }
                        transcript.push_str(&metrics.transcript_segment);
                        let trimmed = transcript.trim().to_string();
                        *transcript = trimmed;
                    }
                    {
                        let mut latest = inner.metrics.lock().await;
                        latest.wpm = metrics.wpm;
                        latest.filler_count = metrics.filler_count;
                    }
                    inner.metrics_degraded.store(false, Ordering::SeqCst);
                }
                Err(e) => {
                    // Recoverable: degrade live metrics only, never retry,
                    // never interrupt recording.
                    warn!("Chunk {} upload failed: {:#}", seq, e);
                    inner.metrics_degraded.store(true, Ordering::SeqCst);
                }
            }
        });
    }

    /// Deadline timer armed at recording start. Fires only if this attempt
    /// is still the current one and still recording.
    async fn run_guard(inner: Arc<Inner>, attempt_id: Uuid) {
        tokio::time::sleep(inner.config.max_duration).await;

        if *inner.attempt.lock().await != attempt_id {
            return;
        }
        if inner.state.load() != CaptureState::Recording {
            return;
        }

        warn!(
            "Session {} reached the {}s ceiling; forcing stop",
            inner.session_id,
            inner.config.max_duration.as_secs()
        );

        // Drop our own handle first so stop() doesn't abort this task
        // mid-teardown.
        inner.guard_handle.lock().await.take();

        if let Err(e) = Inner::stop(&inner, StopReason::MaxDuration).await {
            error!("Forced stop at duration ceiling failed: {:#}", e);
        }
    }

    /// The single cancellation point: halts chunk emission, cancels the
    /// duration guard, releases the microphone and the meter. Every exit
    /// path funnels through here, and the CAS guarantees the teardown runs
    /// at most once per attempt.
    async fn stop(inner: &Arc<Inner>, reason: StopReason) -> Result<()> {
        if !inner
            .state
            .transition(CaptureState::Recording, CaptureState::Processing)
        {
            info!("Stop ignored; session {} not recording", inner.session_id);
            return Ok(());
        }

        info!("Stopping session {} ({:?})", inner.session_id, reason);

        // Duration is wall-clock start to stop, independent of how many
        // chunks made it through.
        if let Some((instant, _)) = *inner.started_at.lock().await {
            *inner.elapsed_at_stop.lock().await = Some(instant.elapsed().as_secs_f64());
        }

        if let Some(guard) = inner.guard_handle.lock().await.take() {
            guard.abort();
        }

        // Stopping the backend closes the frame channel, which lets the
        // pump drain, flush the trailing chunk, and exit.
        if let Some(mut backend) = inner.backend.lock().await.take() {
            if let Err(e) = backend.stop().await {
                error!("Failed to stop capture backend: {:#}", e);
            }
        }

        if let Some(pump) = inner.pump_handle.lock().await.take() {
            if let Err(e) = pump.await {
                error!("Frame pump panicked: {}", e);
            }
        }

        if let Some(meter) = inner.meter.lock().await.take() {
            meter.shutdown().await;
        }
        inner.level_rx.lock().await.take();

        if reason == StopReason::MaxDuration {
            *inner.notice.lock().await = Some(format!(
                "Maximum duration ({} min) reached. Your recording has been submitted.",
                inner.config.max_duration.as_secs() / 60
            ));
        }

        info!("Session {} stopped", inner.session_id);
        Ok(())
    }
}
