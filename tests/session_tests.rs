// Integration tests for the recording session state machine
//
// These drive a RecordingSession against a scripted audio backend and a
// mock homework API, covering sequence numbering, metric degradation,
// duration handling, the ceiling guard, and resource teardown.

use anyhow::Result;
use homework_recorder::api::{
    FinalizeResponse, HomeworkApi, HomeworkStatus, LiveMetrics, ReportResponse, StartResponse,
    Step,
};
use homework_recorder::audio::{AudioBackend, AudioFrame};
use homework_recorder::{CaptureState, RecordingSession, SessionConfig, StopReason};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

// ============================================================================
// Mock homework API
// ============================================================================

#[derive(Default)]
struct MockApi {
    /// Sequence index of every stream-chunk call, in arrival order
    sequences: Mutex<Vec<u64>>,
    /// Fail every chunk upload
    fail_all_chunks: AtomicBool,
    /// Fail chunk uploads with even sequence numbers
    fail_even_chunks: AtomicBool,
    /// Fail the next finalize call, then recover
    fail_next_finalize: AtomicBool,
    finalize_calls: AtomicUsize,
    finalize_durations: Mutex<Vec<f64>>,
    /// Byte length of every finalize payload
    finalize_bytes: Mutex<Vec<usize>>,
}

impl MockApi {
    fn sequences(&self) -> Vec<u64> {
        self.sequences.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl HomeworkApi for MockApi {
    async fn status(&self) -> Result<HomeworkStatus> {
        Ok(HomeworkStatus {
            step: Step::Recording,
            session_id: Some("sess-test".to_string()),
            status: None,
            exercise: None,
        })
    }

    async fn start(&self, _exercise: Option<&str>) -> Result<StartResponse> {
        Ok(StartResponse {
            session_id: "sess-test".to_string(),
            step: Step::Recording,
            exercise: None,
        })
    }

    async fn stream_chunk(
        &self,
        _session_id: &str,
        sequence_index: u64,
        audio_wav: &[u8],
        _duration_seconds: f64,
    ) -> Result<LiveMetrics> {
        assert!(!audio_wav.is_empty(), "chunk payload should not be empty");
        self.sequences.lock().unwrap().push(sequence_index);

        if self.fail_all_chunks.load(Ordering::SeqCst) {
            anyhow::bail!("metrics service unavailable");
        }
        if self.fail_even_chunks.load(Ordering::SeqCst) && sequence_index % 2 == 0 {
            anyhow::bail!("metrics service unavailable");
        }

        // Deterministic per-sequence metrics so tests can assert last-wins.
        let (segment, wpm) = match sequence_index {
            0 => ("alpha", 80.0),
            1 => ("bravo", 95.0),
            n => ("more", 90.0 + n as f64),
        };

        Ok(LiveMetrics {
            transcript_segment: segment.to_string(),
            wpm,
            voice_strength: 0,
            filler_count: sequence_index as u32,
        })
    }

    async fn finalize(
        &self,
        audio_wav: &[u8],
        duration_seconds: f64,
    ) -> Result<FinalizeResponse> {
        assert!(!audio_wav.is_empty(), "final payload should not be empty");
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
        self.finalize_durations.lock().unwrap().push(duration_seconds);
        self.finalize_bytes.lock().unwrap().push(audio_wav.len());

        if self.fail_next_finalize.swap(false, Ordering::SeqCst) {
            anyhow::bail!("scoring service unavailable");
        }

        Ok(FinalizeResponse {
            step: Step::Report,
            score: 72.0,
            summary: "solid pacing".to_string(),
            coach_reminder: "practice daily".to_string(),
        })
    }

    async fn report(&self) -> Result<ReportResponse> {
        Ok(ReportResponse {
            score: 72.0,
            summary: "solid pacing".to_string(),
            coach_reminder: "practice daily".to_string(),
            coach_feedback_text: None,
        })
    }
}

// ============================================================================
// Scripted audio backend
// ============================================================================

const SAMPLE_RATE: u32 = 16000;
const SAMPLES_PER_FRAME: usize = 1600; // 100ms at 16kHz

/// Emits synthetic frames on a fixed pace until exhausted or stopped.
struct ScriptedBackend {
    frames: usize,
    frame_interval: Duration,
    fail_start: bool,
    capturing: Arc<AtomicBool>,
    stop_calls: Arc<AtomicUsize>,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl ScriptedBackend {
    fn new(frames: usize, frame_interval: Duration) -> Self {
        Self {
            frames,
            frame_interval,
            fail_start: false,
            capturing: Arc::new(AtomicBool::new(false)),
            stop_calls: Arc::new(AtomicUsize::new(0)),
            stop_tx: None,
        }
    }

    fn endless(frame_interval: Duration) -> Self {
        Self::new(usize::MAX, frame_interval)
    }

    fn stop_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.stop_calls)
    }
}

#[async_trait::async_trait]
impl AudioBackend for ScriptedBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.fail_start {
            anyhow::bail!("no microphone available on this device");
        }

        let (tx, rx) = mpsc::channel(64);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let frames = self.frames;
        let interval = self.frame_interval;

        tokio::spawn(async move {
            for i in 0..frames {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let frame = AudioFrame {
                    samples: vec![(i % 100) as i16; SAMPLES_PER_FRAME],
                    sample_rate: SAMPLE_RATE,
                    channels: 1,
                    timestamp_ms: (i * 100) as u64,
                };
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
            // Dropping tx closes the frame channel.
        });

        self.capturing.store(true, Ordering::SeqCst);
        self.stop_tx = Some(stop_tx);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        self.capturing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Delivers all its frames into the channel up front, then holds the
/// channel open until stopped.
struct BurstBackend {
    frames: usize,
    tx: Option<mpsc::Sender<AudioFrame>>,
    capturing: Arc<AtomicBool>,
}

impl BurstBackend {
    fn new(frames: usize) -> Self {
        Self {
            frames,
            tx: None,
            capturing: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for BurstBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        let (tx, rx) = mpsc::channel(self.frames.max(1));
        for i in 0..self.frames {
            tx.try_send(AudioFrame {
                samples: vec![(i % 100) as i16; SAMPLES_PER_FRAME],
                sample_rate: SAMPLE_RATE,
                channels: 1,
                timestamp_ms: (i * 100) as u64,
            })
            .map_err(|_| anyhow::anyhow!("frame channel full"))?;
        }
        self.tx = Some(tx);
        self.capturing.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        // Dropping the sender closes the frame channel.
        self.tx.take();
        self.capturing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "burst"
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn test_config() -> SessionConfig {
    SessionConfig {
        // 300ms chunks: 3 scripted frames each
        chunk_duration: Duration::from_millis(300),
        max_duration: Duration::from_secs(60),
        sample_rate: SAMPLE_RATE,
        channels: 1,
    }
}

fn new_session(api: &Arc<MockApi>, config: SessionConfig) -> RecordingSession {
    let api: Arc<dyn HomeworkApi> = Arc::clone(api) as Arc<dyn HomeworkApi>;
    RecordingSession::new(config, api, "sess-test".to_string())
}

/// Poll until `cond` holds or the timeout elapses.
async fn wait_for<F>(mut cond: F, timeout: Duration, what: &str)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn sequence_numbers_are_gapless_in_emission_order() -> Result<()> {
    let api = Arc::new(MockApi::default());
    let session = new_session(&api, test_config());

    // 9 frames at 3 frames per chunk = exactly 3 chunks
    let backend = ScriptedBackend::new(9, Duration::from_millis(1));
    session.start(Box::new(backend)).await?;

    let api2 = Arc::clone(&api);
    wait_for(|| api2.sequences().len() == 3, Duration::from_secs(2), "3 chunk uploads").await;

    session.stop(StopReason::Manual).await?;

    // The arrival vector is unsorted: uploads must land in emission order.
    assert_eq!(api.sequences(), vec![0, 1, 2]);

    Ok(())
}

#[tokio::test]
async fn sequence_numbers_stay_gapless_when_uploads_fail() -> Result<()> {
    let api = Arc::new(MockApi::default());
    api.fail_even_chunks.store(true, Ordering::SeqCst);
    let session = new_session(&api, test_config());

    let backend = ScriptedBackend::new(12, Duration::from_millis(1));
    session.start(Box::new(backend)).await?;

    let api2 = Arc::clone(&api);
    wait_for(|| api2.sequences().len() == 4, Duration::from_secs(2), "4 chunk uploads").await;

    session.stop(StopReason::Manual).await?;

    assert_eq!(
        api.sequences(),
        vec![0, 1, 2, 3],
        "failures must not skip, reuse, or reorder numbers"
    );

    Ok(())
}

#[tokio::test]
async fn all_failed_uploads_degrade_metrics_but_recording_continues() -> Result<()> {
    let api = Arc::new(MockApi::default());
    api.fail_all_chunks.store(true, Ordering::SeqCst);
    let session = new_session(&api, test_config());

    let backend = ScriptedBackend::new(6, Duration::from_millis(1));
    session.start(Box::new(backend)).await?;

    let api2 = Arc::clone(&api);
    wait_for(|| api2.sequences().len() == 2, Duration::from_secs(2), "2 chunk uploads").await;
    // Give the failing upload tasks time to record their outcome.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snap = session.snapshot().await;
    assert!(snap.metrics_degraded, "degraded flag should be set after failures");
    assert!(snap.live_transcript.is_empty(), "no fragments should accumulate");
    assert_eq!(snap.wpm, 0.0);

    session.stop(StopReason::Manual).await?;
    assert_eq!(session.state(), CaptureState::Processing);

    let report = session.finalize().await?;
    assert_eq!(report.score, 72.0);
    assert_eq!(session.state(), CaptureState::Done);

    Ok(())
}

#[tokio::test]
async fn later_chunk_metrics_overwrite_earlier_ones() -> Result<()> {
    let api = Arc::new(MockApi::default());
    let session = new_session(&api, test_config());

    // Paced emission so chunk 0's response lands before chunk 1 is cut.
    let backend = ScriptedBackend::new(6, Duration::from_millis(10));
    session.start(Box::new(backend)).await?;

    let api2 = Arc::clone(&api);
    wait_for(|| api2.sequences().len() == 2, Duration::from_secs(2), "2 chunk uploads").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snap = session.snapshot().await;
    assert_eq!(snap.wpm, 95.0, "last chunk's wpm wins");
    assert_eq!(snap.live_transcript, "alpha bravo");
    assert!(!snap.metrics_degraded);

    session.stop(StopReason::Manual).await?;
    let report = session.finalize().await?;
    assert_eq!(report.score, 72.0);

    Ok(())
}

#[tokio::test]
async fn finalize_reports_wall_clock_duration() -> Result<()> {
    let api = Arc::new(MockApi::default());
    // Chunk duration far above the recording length: only the trailing
    // partial chunk exists, so duration cannot come from chunk sums.
    let config = SessionConfig {
        chunk_duration: Duration::from_secs(10),
        ..test_config()
    };
    let session = new_session(&api, config);

    let backend = ScriptedBackend::endless(Duration::from_millis(5));
    let started = Instant::now();
    session.start(Box::new(backend)).await?;

    tokio::time::sleep(Duration::from_millis(250)).await;
    session.stop(StopReason::Manual).await?;
    let elapsed = started.elapsed().as_secs_f64();

    session.finalize().await?;

    let durations = api.finalize_durations.lock().unwrap().clone();
    assert_eq!(durations.len(), 1);
    let reported = durations[0];
    assert!(reported >= 0.2, "reported {:.3}s", reported);
    assert!(reported <= elapsed + 0.1, "reported {:.3}s vs elapsed {:.3}s", reported, elapsed);

    Ok(())
}

#[tokio::test]
async fn duration_ceiling_forces_stop_and_single_finalize() -> Result<()> {
    let api = Arc::new(MockApi::default());
    let config = SessionConfig {
        chunk_duration: Duration::from_millis(100),
        max_duration: Duration::from_millis(150),
        sample_rate: SAMPLE_RATE,
        channels: 1,
    };
    let session = new_session(&api, config);

    let backend = ScriptedBackend::endless(Duration::from_millis(5));
    let stop_calls = backend.stop_calls();
    session.start(Box::new(backend)).await?;

    // The guard must force the stop without any manual intervention.
    let s = &session;
    wait_for(
        || s.state() == CaptureState::Processing,
        Duration::from_secs(2),
        "ceiling-forced stop",
    )
    .await;

    let snap = session.snapshot().await;
    let notice = snap.notice.expect("ceiling notice should be set");
    assert!(notice.contains("Maximum duration"), "got notice: {}", notice);

    // A later manual stop is a no-op and must not double-release anything.
    session.stop(StopReason::Manual).await?;
    assert_eq!(stop_calls.load(Ordering::SeqCst), 1);

    session.finalize().await?;
    assert_eq!(api.finalize_calls.load(Ordering::SeqCst), 1);

    let durations = api.finalize_durations.lock().unwrap().clone();
    assert!(durations[0] >= 0.15, "duration {:.3}s should cover the ceiling", durations[0]);
    assert!(durations[0] < 2.0, "duration {:.3}s looks unbounded", durations[0]);

    Ok(())
}

#[tokio::test]
async fn stop_releases_capture_and_meter_exactly_once() -> Result<()> {
    let api = Arc::new(MockApi::default());
    let session = new_session(&api, test_config());

    let backend = ScriptedBackend::endless(Duration::from_millis(5));
    let stop_calls = backend.stop_calls();
    session.start(Box::new(backend)).await?;

    let level_rx = session
        .level_receiver()
        .await
        .expect("meter should be running while recording");

    session.stop(StopReason::Manual).await?;
    session.stop(StopReason::Manual).await?; // idempotent

    assert_eq!(stop_calls.load(Ordering::SeqCst), 1, "backend released exactly once");

    // The meter's watch channel closes when the meter is torn down.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(level_rx.has_changed().is_err(), "meter channel should be closed");
    assert!(session.level_receiver().await.is_none());

    Ok(())
}

#[tokio::test]
async fn no_chunks_are_uploaded_after_stop() -> Result<()> {
    let api = Arc::new(MockApi::default());
    let session = new_session(&api, test_config());

    let backend = ScriptedBackend::endless(Duration::from_millis(1));
    session.start(Box::new(backend)).await?;

    let api2 = Arc::clone(&api);
    wait_for(|| !api2.sequences().is_empty(), Duration::from_secs(2), "first upload").await;

    session.stop(StopReason::Manual).await?;

    // Let uploads dispatched before the stop settle, then verify no new
    // chunks appear.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let uploads_at_stop = api.sequences().len();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(api.sequences().len(), uploads_at_stop);

    Ok(())
}

#[tokio::test]
async fn frames_queued_at_stop_still_reach_the_final_take() -> Result<()> {
    let api = Arc::new(MockApi::default());
    let session = new_session(&api, test_config());

    // 10 frames (1 s of audio) sit in the channel when stop arrives.
    let backend = BurstBackend::new(10);
    session.start(Box::new(backend)).await?;
    session.stop(StopReason::Manual).await?;

    session.finalize().await?;

    // Every captured sample must make the payload: 16-bit PCM plus the
    // 44-byte WAV header.
    let bytes = api.finalize_bytes.lock().unwrap().clone();
    assert_eq!(bytes, vec![44 + 2 * 10 * SAMPLES_PER_FRAME]);

    Ok(())
}

#[tokio::test]
async fn failed_finalize_cannot_resubmit_the_same_take() -> Result<()> {
    let api = Arc::new(MockApi::default());
    let session = new_session(&api, test_config());

    let backend = ScriptedBackend::new(6, Duration::from_millis(1));
    session.start(Box::new(backend)).await?;

    let api2 = Arc::clone(&api);
    wait_for(|| api2.sequences().len() == 2, Duration::from_secs(2), "2 chunk uploads").await;
    session.stop(StopReason::Manual).await?;

    api.fail_next_finalize.store(true, Ordering::SeqCst);
    assert!(session.finalize().await.is_err());
    assert_eq!(session.state(), CaptureState::Processing);

    // The same take must not be submittable a second time.
    assert!(session.finalize().await.is_err());
    assert_eq!(api.finalize_calls.load(Ordering::SeqCst), 1);

    // Only a reset plus a fresh recording reaches the backend again.
    session.reset().await;
    let backend = ScriptedBackend::new(3, Duration::from_millis(1));
    session.start(Box::new(backend)).await?;
    session.stop(StopReason::Manual).await?;

    let report = session.finalize().await?;
    assert_eq!(report.score, 72.0);
    assert_eq!(api.finalize_calls.load(Ordering::SeqCst), 2);

    Ok(())
}

#[tokio::test]
async fn stop_when_idle_is_a_noop() -> Result<()> {
    let api = Arc::new(MockApi::default());
    let session = new_session(&api, test_config());

    session.stop(StopReason::Manual).await?;
    assert_eq!(session.state(), CaptureState::Idle);

    assert!(session.finalize().await.is_err(), "nothing to finalize from idle");

    Ok(())
}

#[tokio::test]
async fn failed_capture_start_leaves_session_idle() -> Result<()> {
    let api = Arc::new(MockApi::default());
    let session = new_session(&api, test_config());

    let mut backend = ScriptedBackend::new(0, Duration::from_millis(1));
    backend.fail_start = true;

    let err = session.start(Box::new(backend)).await;
    assert!(err.is_err());
    assert_eq!(session.state(), CaptureState::Idle);

    let snap = session.snapshot().await;
    assert_eq!(snap.chunks_captured, 0);
    assert!(snap.live_transcript.is_empty());

    // A fresh start with a working backend must succeed afterwards.
    let backend = ScriptedBackend::new(3, Duration::from_millis(1));
    session.start(Box::new(backend)).await?;
    session.stop(StopReason::Manual).await?;

    Ok(())
}

#[tokio::test]
async fn reset_after_done_allows_a_fresh_attempt() -> Result<()> {
    let api = Arc::new(MockApi::default());
    let session = new_session(&api, test_config());

    let backend = ScriptedBackend::new(6, Duration::from_millis(1));
    session.start(Box::new(backend)).await?;

    let api2 = Arc::clone(&api);
    wait_for(|| api2.sequences().len() == 2, Duration::from_secs(2), "2 chunk uploads").await;

    session.stop(StopReason::Manual).await?;
    session.finalize().await?;
    assert_eq!(session.state(), CaptureState::Done);

    session.reset().await;
    assert_eq!(session.state(), CaptureState::Idle);

    // Accumulators reset on the next start: sequences begin at 0 again.
    let backend = ScriptedBackend::new(3, Duration::from_millis(1));
    session.start(Box::new(backend)).await?;

    let api3 = Arc::clone(&api);
    wait_for(|| api3.sequences().len() == 3, Duration::from_secs(2), "third upload").await;

    let sequences = api.sequences();
    assert_eq!(sequences[2], 0, "new attempt restarts numbering at 0");

    session.stop(StopReason::Manual).await?;
    Ok(())
}
