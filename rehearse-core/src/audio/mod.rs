//! Audio I/O seams and the cpal backend.
//!
//! # Design constraints
//!
//! The cpal callbacks run on OS audio threads at elevated priority. They
//! **must not** allocate in steady state, block on a contended lock, or
//! perform I/O. The input callback only down-mixes and pushes into an SPSC
//! ring. The output callback mixes already-scheduled voices and streams the
//! mix through a preallocated resampler; it takes the mixer with `try_lock`
//! and emits silence while the scheduler holds it.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). Each stream is therefore created, run and dropped on its own
//! dedicated OS thread; the handles returned here only carry flags and join
//! handles, which keeps them `Send` and makes release synchronous.

pub mod capture;
pub mod device;
pub mod output;
pub mod playback;
pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::mpsc;
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

use crate::{
    buffering::{frame::AudioFrame, AudioProducer},
    error::{RehearseError, Result},
};
#[cfg(feature = "audio-cpal")]
use crate::buffering::Producer;

/// Where finished capture frames are delivered.
pub type FrameSender = mpsc::UnboundedSender<AudioFrame>;

/// What the session asks of the microphone.
#[derive(Debug, Clone)]
pub struct CaptureSpec {
    /// Rate frames are delivered at (Hz).
    pub sample_rate: u32,
    /// Samples per delivered frame.
    pub frame_samples: usize,
    /// Device name to prefer over the system default.
    pub preferred_device: Option<String>,
}

/// An acquired microphone track.
pub trait InputStream: Send {
    /// Stop the track and release the device. Must be idempotent and must
    /// not return before the device is released.
    fn stop(&mut self);

    fn is_active(&self) -> bool;
}

/// Identifies one scheduled buffer inside an [`OutputContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub u64);

/// An output audio context: a running clock plus sample-accurate scheduling.
pub trait OutputContext: Send {
    /// Seconds of audio rendered since the context opened.
    fn current_time(&self) -> f64;

    /// Schedule `samples` (mono, at `sample_rate`) to start at `start_at`
    /// seconds on this context's clock.
    fn start(&mut self, samples: &[f32], sample_rate: u32, start_at: f64) -> Result<VoiceId>;

    /// Stop a scheduled voice immediately. Unknown or finished ids are ignored.
    fn stop(&mut self, voice: VoiceId);

    /// Release the device. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Factory for the two device-side resources a session owns.
pub trait AudioBackend: Send + Sync + 'static {
    /// Acquire the microphone and start delivering frames.
    ///
    /// # Errors
    /// `RehearseError::CaptureUnavailable` when no device can be opened.
    fn open_input(&self, spec: &CaptureSpec, frames: FrameSender) -> Result<Box<dyn InputStream>>;

    /// Open an output context able to play `sample_rate` audio.
    ///
    /// # Errors
    /// `RehearseError::OutputUnavailable` when no device can be opened.
    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn OutputContext>>;
}

/// System audio through cpal.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn open_input(&self, spec: &CaptureSpec, frames: FrameSender) -> Result<Box<dyn InputStream>> {
        Ok(Box::new(capture::CaptureThread::spawn(spec.clone(), frames)?))
    }

    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn OutputContext>> {
        Ok(Box::new(output::CpalOutput::open(sample_rate)?))
    }
}

/// Handle to an active cpal input stream.
///
/// **Not `Send`**: `cpal::Stream` is bound to its creation thread on Windows/macOS.
/// Create and drop this type on the same OS thread.
pub struct AudioCapture {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Shared flag; set to `false` to signal the callback to no-op.
    running: Arc<AtomicBool>,
    /// Actual capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
}

impl AudioCapture {
    /// Open an input device by preferred name, otherwise fall back to the
    /// default input device and then the first available device.
    ///
    /// # Errors
    /// `RehearseError::CaptureUnavailable` for every device or stream failure.
    #[cfg(feature = "audio-cpal")]
    pub fn open_with_preference(
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        let host = cpal::default_host();

        let preferred = preferred_device_name.and_then(|wanted| {
            let found = host
                .input_devices()
                .map_err(|e| warn!("failed to list input devices: {e}"))
                .ok()
                .and_then(|mut devices| {
                    devices.find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                });
            if found.is_none() {
                warn!(wanted, "preferred input device not found, falling back");
            }
            found
        });

        let device = match preferred.or_else(|| host.default_input_device()) {
            Some(device) => device,
            None => {
                let mut devices = host
                    .input_devices()
                    .map_err(|e| RehearseError::CaptureUnavailable(e.to_string()))?;
                warn!("no default input device, falling back to first available input");
                devices.next().ok_or_else(|| {
                    RehearseError::CaptureUnavailable("no input device found".into())
                })?
            }
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| RehearseError::CaptureUnavailable(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(sample_rate, channels, "input config selected");

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_mono_input::<f32>(&device, &config, producer, &running),
            SampleFormat::I16 => build_mono_input::<i16>(&device, &config, producer, &running),
            SampleFormat::U16 => build_mono_input::<u16>(&device, &config, producer, &running),
            SampleFormat::U8 => build_mono_input::<u8>(&device, &config, producer, &running),
            fmt => {
                return Err(RehearseError::CaptureUnavailable(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| RehearseError::CaptureUnavailable(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    /// Stop: signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Build an input stream that down-mixes interleaved frames of any sample
/// type to mono f32 and pushes them into the ring.
#[cfg(feature = "audio-cpal")]
fn build_mono_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: AudioProducer,
    running: &Arc<AtomicBool>,
) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    let running = Arc::clone(running);
    // Grows to the callback's block size once, then reused.
    let mut mono: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _info| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                let frames = data.len() / channels;
                mono.resize(frames, 0.0);
                for (out, frame) in mono.iter_mut().zip(data.chunks_exact(channels)) {
                    let sum: f32 = frame.iter().map(|s| s.to_sample::<f32>()).sum();
                    *out = sum / channels as f32;
                }
                let written = producer.push_slice(&mono);
                if written < mono.len() {
                    warn!("ring buffer full: dropped {} frames", mono.len() - written);
                }
            },
            |err| error!("audio input stream error: {err}"),
            None,
        )
        .map_err(|e| RehearseError::CaptureUnavailable(e.to_string()))
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open_with_preference(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(RehearseError::CaptureUnavailable(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
