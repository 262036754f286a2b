//! Microphone capture thread and the outbound frame gate.
//!
//! ## Stages
//!
//! ```text
//! cpal callback ──push──► ring ──drain──► RateConverter ──► Framer ──► FrameSender
//!   (device rate, mono)          (capture thread, 5 ms idle sleep)   (16 kHz, 4096)
//! ```
//!
//! The gate runs on the session task: every frame is metered, and only
//! unmuted frames are encoded for the channel.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::{
    audio::{resample::RateConverter, AudioCapture, CaptureSpec, FrameSender, InputStream},
    buffering::{create_audio_ring, frame::AudioFrame, frame::Framer, AudioConsumer, Consumer},
    codec::{encode_samples, TransportPayload},
    error::{RehearseError, Result},
};

/// Samples drained from the ring per iteration (20 ms at 48 kHz).
const DRAIN_CHUNK: usize = 960;

/// Sleep when the ring is empty.
const SLEEP_EMPTY: Duration = Duration::from_millis(5);

/// Everything the drain loop needs.
pub struct CaptureLoop {
    pub consumer: AudioConsumer,
    pub running: Arc<AtomicBool>,
    pub frames: FrameSender,
    /// Rate the device actually delivers.
    pub device_rate: u32,
    pub target_rate: u32,
    pub frame_samples: usize,
}

/// Drain the ring into fixed frames until `running` clears or the receiver
/// goes away. Returns the number of frames delivered.
pub fn run_capture_loop(mut ctx: CaptureLoop) -> usize {
    let mut resampler = match RateConverter::new(ctx.device_rate, ctx.target_rate, DRAIN_CHUNK) {
        Ok(r) => r,
        Err(e) => {
            error!("failed to create capture resampler: {e}");
            return 0;
        }
    };
    if !resampler.is_passthrough() {
        info!(
            from = ctx.device_rate,
            to = ctx.target_rate,
            "capture resampling enabled"
        );
    }

    let mut framer = Framer::new(ctx.frame_samples, ctx.target_rate);
    let mut raw = vec![0f32; DRAIN_CHUNK];
    let mut delivered = 0usize;

    'drain: while ctx.running.load(Ordering::Relaxed) {
        let n = ctx.consumer.pop_slice(&mut raw);
        if n == 0 {
            thread::sleep(SLEEP_EMPTY);
            continue;
        }

        let resampled = resampler.process(&raw[..n]);
        for frame in framer.push(&resampled) {
            if ctx.frames.send(frame).is_err() {
                debug!("frame receiver dropped, stopping capture loop");
                break 'drain;
            }
            delivered += 1;
        }
    }

    debug!(delivered, pending = framer.pending_len(), "capture loop stopped");
    delivered
}

/// An [`InputStream`] backed by a cpal stream living on its own thread.
pub struct CaptureThread {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureThread {
    /// Open the device on a dedicated thread and start the drain loop.
    /// Returns once the device is open (or failed to open).
    ///
    /// # Errors
    /// `RehearseError::CaptureUnavailable` if the device could not be opened.
    pub fn spawn(spec: CaptureSpec, frames: FrameSender) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let (opened_tx, opened_rx) = std::sync::mpsc::channel::<Result<u32>>();

        let thread_running = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("rehearse-capture".into())
            .spawn(move || {
                let (producer, consumer) = create_audio_ring();
                let capture = match AudioCapture::open_with_preference(
                    producer,
                    Arc::clone(&thread_running),
                    spec.preferred_device.as_deref(),
                ) {
                    Ok(capture) => capture,
                    Err(e) => {
                        thread_running.store(false, Ordering::Release);
                        let _ = opened_tx.send(Err(e));
                        return;
                    }
                };
                let _ = opened_tx.send(Ok(capture.sample_rate));

                run_capture_loop(CaptureLoop {
                    consumer,
                    running: Arc::clone(&thread_running),
                    frames,
                    device_rate: capture.sample_rate,
                    target_rate: spec.sample_rate,
                    frame_samples: spec.frame_samples,
                });

                capture.stop();
                // Dropping the stream on this thread releases the device.
                drop(capture);
                thread_running.store(false, Ordering::Release);
            })?;

        let mut this = Self {
            running,
            handle: Some(handle),
        };
        match opened_rx.recv() {
            Ok(Ok(device_rate)) => {
                info!(device_rate, "microphone acquired");
                Ok(this)
            }
            Ok(Err(e)) => {
                this.stop();
                Err(e)
            }
            Err(_) => {
                this.stop();
                Err(RehearseError::CaptureUnavailable(
                    "capture thread exited before opening the device".into(),
                ))
            }
        }
    }
}

impl InputStream for CaptureThread {
    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("capture thread panicked");
            }
            info!("microphone released");
        }
    }

    fn is_active(&self) -> bool {
        self.handle.is_some() && self.running.load(Ordering::Acquire)
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Result of passing one frame through the [`CaptureGate`].
#[derive(Debug, Clone)]
pub struct GatedFrame {
    pub rms: f32,
    /// `None` while muted.
    pub payload: Option<TransportPayload>,
}

/// Meters every frame and encodes the unmuted ones.
///
/// Muting suppresses transmission only; metering keeps running so the
/// volume indicator stays live.
#[derive(Debug, Clone)]
pub struct CaptureGate {
    muted: Arc<AtomicBool>,
}

impl CaptureGate {
    pub fn new(muted: Arc<AtomicBool>) -> Self {
        Self { muted }
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    pub fn process(&self, frame: &AudioFrame) -> GatedFrame {
        let rms = frame.rms();
        let payload = if self.is_muted() {
            None
        } else {
            Some(encode_samples(&frame.samples, frame.sample_rate))
        };
        GatedFrame { rms, payload }
    }
}
