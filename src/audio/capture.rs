//! Microphone capture via cpal.
//!
//! The cpal stream is not `Send`, so it lives on a dedicated thread. The
//! thread converts device samples to mono i16 at the target rate and
//! forwards frames over an mpsc channel until told to stop.

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};

/// Microphone capture backend using the system default input device.
pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    capturing: Arc<AtomicBool>,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl MicrophoneBackend {
    /// Probe the default input device. Fails if the platform has no
    /// microphone available, before any session state is touched.
    pub fn new(config: AudioBackendConfig) -> Result<Self> {
        let host = cpal::default_host();
        host.default_input_device()
            .ok_or_else(|| anyhow!("no microphone available on this device"))?;

        Ok(Self {
            config,
            capturing: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            thread: None,
        })
    }
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing.load(Ordering::SeqCst) {
            anyhow::bail!("microphone capture already running");
        }

        let (frame_tx, frame_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel();

        let config = self.config.clone();
        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || run_capture_thread(config, frame_tx, ready_tx, stop_rx))
            .context("failed to spawn capture thread")?;

        // The thread reports stream setup success/failure before we return.
        let ready = tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .context("capture setup task panicked")?;

        match ready {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e.context("failed to open microphone stream"));
            }
            Err(_) => {
                let _ = thread.join();
                anyhow::bail!("capture thread exited before stream setup");
            }
        }

        self.capturing.store(true, Ordering::SeqCst);
        self.stop_tx = Some(stop_tx);
        self.thread = Some(thread);

        info!("Microphone capture started");
        Ok(frame_rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(thread) = self.thread.take() {
            tokio::task::spawn_blocking(move || {
                if thread.join().is_err() {
                    error!("Capture thread panicked");
                }
            })
            .await
            .context("capture teardown task panicked")?;
        }

        self.capturing.store(false, Ordering::SeqCst);
        info!("Microphone capture stopped");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "microphone"
    }
}

/// Runs on the dedicated capture thread: owns the cpal stream and parks
/// until the stop signal arrives. Dropping the stream releases the device.
fn run_capture_thread(
    config: AudioBackendConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
    ready_tx: std::sync::mpsc::Sender<Result<()>>,
    stop_rx: std::sync::mpsc::Receiver<()>,
) {
    let setup = || -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("no microphone available on this device"))?;

        let supported = device
            .default_input_config()
            .context("failed to query default input config")?;

        let device_rate = supported.sample_rate().0;
        let device_channels = supported.channels();
        let stream_config: cpal::StreamConfig = supported.into();

        let target_rate = config.target_sample_rate;
        let mut samples_sent: u64 = 0;
        let mut decimator = Decimator::new(device_rate, target_rate);

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let samples = decimator.process(mix_to_mono(data, device_channels));
                    let timestamp_ms = samples_sent * 1000 / target_rate as u64;
                    samples_sent += samples.len() as u64;

                    let frame = AudioFrame {
                        samples,
                        sample_rate: target_rate,
                        channels: 1,
                        timestamp_ms,
                    };
                    // Never block the audio callback; drop the frame if the
                    // session can't keep up.
                    let _ = frame_tx.try_send(frame);
                },
                |err| {
                    warn!("Microphone stream error: {}", err);
                },
                None,
            )
            .context("failed to build input stream")?;

        stream.play().context("failed to start input stream")?;
        Ok(stream)
    };

    match setup() {
        Ok(stream) => {
            let _ = ready_tx.send(Ok(()));
            // Park until stop is signalled (or the backend is dropped).
            let _ = stop_rx.recv();
            drop(stream);
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
        }
    }
}

/// Average interleaved device f32 channels into mono i16.
fn mix_to_mono(data: &[f32], device_channels: u16) -> Vec<i16> {
    let channels = device_channels.max(1) as usize;
    data.chunks_exact(channels)
        .map(|frame| {
            let sum: f32 = frame.iter().sum();
            let avg = sum / channels as f32;
            (avg.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
        })
        .collect()
}

/// Decimates mono samples from the device rate to the target rate.
///
/// The pick position advances by the exact rate ratio and the fractional
/// remainder carries across callbacks, so non-integer ratios (a 44.1 kHz
/// device down to 16 kHz) hold the output rate on target instead of
/// producing mislabeled 22.05 kHz audio. Decimation without filtering is
/// what the scoring backend tolerates for speech.
struct Decimator {
    step: f64,
    phase: f64,
}

impl Decimator {
    fn new(device_rate: u32, target_rate: u32) -> Self {
        let step = if target_rate > 0 && device_rate > target_rate {
            device_rate as f64 / target_rate as f64
        } else {
            1.0
        };
        Self { step, phase: 0.0 }
    }

    fn process(&mut self, mono: Vec<i16>) -> Vec<i16> {
        if self.step <= 1.0 {
            return mono;
        }
        let mut out = Vec::with_capacity((mono.len() as f64 / self.step) as usize + 1);
        while (self.phase as usize) < mono.len() {
            out.push(mono[self.phase as usize]);
            self.phase += self.step;
        }
        self.phase -= mono.len() as f64;
        out
    }
}
