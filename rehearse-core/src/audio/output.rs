//! Output context backed by a cpal stream and a small voice mixer.
//!
//! Voices are mixed at the mix rate (the rate replies arrive at), and the
//! mixed signal is converted to the device rate as one continuous stream:
//!
//! ```text
//! Schedule::add ──► Mixer (mix-rate frames) ──► Renderer ──RateConverter──► device
//! ```
//!
//! The clock counts mix-rate frames pulled out of the mixer, so
//! `current_time()` is `clock / mix_rate`. A voice scheduled at `t` begins
//! at mix frame `round(t * mix_rate)`; a voice that starts within one frame
//! of where the previous one ended is placed exactly at that end.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    audio::{
        resample::{convert_block, RateConverter},
        OutputContext, VoiceId,
    },
    error::{RehearseError, Result},
};

struct Voice {
    id: VoiceId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Active voices, rendered by the device callback.
#[derive(Default)]
pub(crate) struct Mixer {
    voices: Vec<Voice>,
}

impl Mixer {
    fn add(&mut self, id: VoiceId, start_frame: u64, samples: Vec<f32>) {
        self.voices.push(Voice {
            id,
            start_frame,
            samples,
        });
    }

    fn remove(&mut self, id: VoiceId) -> bool {
        let before = self.voices.len();
        self.voices.retain(|v| v.id != id);
        self.voices.len() != before
    }

    fn clear(&mut self) {
        self.voices.clear();
    }

    fn len(&self) -> usize {
        self.voices.len()
    }

    /// Mix every voice overlapping `[block_start, block_start + out.len())`
    /// into `out` (zeroed first), then retire voices that ended.
    fn render(&mut self, block_start: u64, out: &mut [f32]) {
        out.fill(0.0);
        let block_end = block_start + out.len() as u64;

        for voice in &self.voices {
            let from = voice.start_frame.max(block_start);
            let to = voice.end_frame().min(block_end);
            if from >= to {
                continue;
            }
            let src = (from - voice.start_frame) as usize;
            let dst = (from - block_start) as usize;
            let len = (to - from) as usize;
            for (o, s) in out[dst..dst + len]
                .iter_mut()
                .zip(&voice.samples[src..src + len])
            {
                *o += *s;
            }
        }

        self.voices.retain(|v| v.end_frame() > block_end);
    }
}

/// Scheduler side of the mixer: turns context times into mix frames.
pub(crate) struct Schedule {
    mixer: Arc<Mutex<Mixer>>,
    clock: Arc<AtomicU64>,
    mix_rate: u32,
    next_voice: u64,
    /// End frame of the most recently added voice.
    tail: Option<u64>,
}

impl Schedule {
    pub(crate) fn new(mix_rate: u32) -> Self {
        Self {
            mixer: Arc::new(Mutex::new(Mixer::default())),
            clock: Arc::new(AtomicU64::new(0)),
            mix_rate: mix_rate.max(1),
            next_voice: 0,
            tail: None,
        }
    }

    fn current_time(&self) -> f64 {
        self.clock.load(Ordering::Acquire) as f64 / f64::from(self.mix_rate)
    }

    pub(crate) fn add(&mut self, samples: &[f32], sample_rate: u32, start_at: f64) -> Result<VoiceId> {
        let samples = if sample_rate == self.mix_rate {
            samples.to_vec()
        } else {
            convert_block(samples, sample_rate, self.mix_rate)?
        };

        let mut start_frame = (start_at.max(0.0) * f64::from(self.mix_rate)).round() as u64;
        if let Some(tail) = self.tail {
            if start_frame.abs_diff(tail) <= 1 {
                start_frame = tail;
            }
        }
        let end_frame = start_frame + samples.len() as u64;

        let id = VoiceId(self.next_voice);
        self.next_voice += 1;
        self.mixer.lock().add(id, start_frame, samples);
        self.tail = Some(end_frame);
        Ok(id)
    }

    fn stop(&mut self, voice: VoiceId) -> bool {
        self.mixer.lock().remove(voice)
    }

    fn clear(&mut self) {
        self.mixer.lock().clear();
        self.tail = None;
    }

    #[cfg(test)]
    fn renderer(&self, device_rate: u32) -> Result<Renderer> {
        Renderer::new(
            Arc::clone(&self.mixer),
            Arc::clone(&self.clock),
            self.mix_rate,
            device_rate,
        )
    }
}

/// Callback side: pulls the mix in fixed steps and streams it through one
/// rate converter, so voice boundaries never reach the resampler.
pub(crate) struct Renderer {
    mixer: Arc<Mutex<Mixer>>,
    clock: Arc<AtomicU64>,
    converter: RateConverter,
    mixed: Vec<f32>,
    converted: Vec<f32>,
    read: usize,
}

impl Renderer {
    fn new(
        mixer: Arc<Mutex<Mixer>>,
        clock: Arc<AtomicU64>,
        mix_rate: u32,
        device_rate: u32,
    ) -> Result<Self> {
        // 20 ms of mix per step.
        let step = (mix_rate / 50).max(1) as usize;
        let converter = RateConverter::new(mix_rate, device_rate, step)?;
        let converted = Vec::with_capacity(converter.max_output_per_chunk());
        Ok(Self {
            mixer,
            clock,
            converter,
            mixed: vec![0.0; step],
            converted,
            read: 0,
        })
    }

    /// Fill `out` with device-rate samples. Emits silence for whatever is
    /// left if the scheduler holds the mixer.
    pub(crate) fn fill(&mut self, out: &mut [f32]) {
        let mut written = 0;
        while written < out.len() {
            if self.read == self.converted.len() {
                self.converted.clear();
                self.read = 0;
                if !self.pull() {
                    out[written..].fill(0.0);
                    return;
                }
                continue;
            }
            let n = (self.converted.len() - self.read).min(out.len() - written);
            out[written..written + n].copy_from_slice(&self.converted[self.read..self.read + n]);
            self.read += n;
            written += n;
        }
    }

    fn pull(&mut self) -> bool {
        let Some(mut mixer) = self.mixer.try_lock() else {
            return false;
        };
        let start = self.clock.load(Ordering::Acquire);
        mixer.render(start, &mut self.mixed);
        drop(mixer);
        self.clock
            .store(start + self.mixed.len() as u64, Ordering::Release);
        self.converter.process_into(&self.mixed, &mut self.converted);
        true
    }
}

/// cpal-backed [`OutputContext`].
pub struct CpalOutput {
    schedule: Schedule,
    device_rate: u32,
    shutdown: Option<crossbeam_channel::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    /// Open the default output device for audio mixed at `sample_rate`.
    /// The device runs at that rate when it supports it; otherwise the mix
    /// is resampled on the way out.
    ///
    /// # Errors
    /// `RehearseError::OutputUnavailable` when no device or stream can be opened.
    #[cfg(feature = "audio-cpal")]
    pub fn open(sample_rate: u32) -> Result<Self> {
        let schedule = Schedule::new(sample_rate);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let (opened_tx, opened_rx) = std::sync::mpsc::channel::<Result<u32>>();

        let mixer = Arc::clone(&schedule.mixer);
        let clock = Arc::clone(&schedule.clock);
        let thread = std::thread::Builder::new()
            .name("rehearse-playback".into())
            .spawn(move || {
                let stream = match cpal_stream::open(sample_rate, mixer, clock) {
                    Ok((stream, device_rate)) => {
                        let _ = opened_tx.send(Ok(device_rate));
                        stream
                    }
                    Err(e) => {
                        let _ = opened_tx.send(Err(e));
                        return;
                    }
                };
                // Park until close() signals or drops the sender.
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("output stream dropped");
            })?;

        let mut this = Self {
            schedule,
            device_rate: sample_rate,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        };
        match opened_rx.recv() {
            Ok(Ok(device_rate)) => {
                this.device_rate = device_rate;
                info!(device_rate, mix_rate = sample_rate, "output context opened");
                Ok(this)
            }
            Ok(Err(e)) => {
                this.close();
                Err(e)
            }
            Err(_) => {
                this.close();
                Err(RehearseError::OutputUnavailable(
                    "playback thread exited before opening the device".into(),
                ))
            }
        }
    }

    /// Stub when the `audio-cpal` feature is disabled.
    #[cfg(not(feature = "audio-cpal"))]
    pub fn open(_sample_rate: u32) -> Result<Self> {
        Err(RehearseError::OutputUnavailable(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    pub fn active_voices(&self) -> usize {
        self.schedule.mixer.lock().len()
    }
}

impl OutputContext for CpalOutput {
    fn current_time(&self) -> f64 {
        self.schedule.current_time()
    }

    fn start(&mut self, samples: &[f32], sample_rate: u32, start_at: f64) -> Result<VoiceId> {
        if self.is_closed() {
            return Err(RehearseError::OutputUnavailable("output context closed".into()));
        }
        self.schedule.add(samples, sample_rate, start_at)
    }

    fn stop(&mut self, voice: VoiceId) {
        if self.schedule.stop(voice) {
            debug!(voice = voice.0, "voice stopped");
        }
    }

    fn close(&mut self) {
        self.schedule.clear();
        // Dropping the sender wakes the playback thread.
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("playback thread panicked");
            }
            info!("output context closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.thread.is_none()
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(feature = "audio-cpal")]
mod cpal_stream {
    use super::{Mixer, Renderer};

    use std::sync::{atomic::AtomicU64, Arc};

    use cpal::{
        traits::{DeviceTrait, HostTrait, StreamTrait},
        FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
    };
    use parking_lot::Mutex;
    use tracing::{error, info};

    use crate::error::{RehearseError, Result};

    fn unavailable(e: impl std::fmt::Display) -> RehearseError {
        RehearseError::OutputUnavailable(e.to_string())
    }

    /// Open and start the default output stream. Returns the stream and the
    /// rate it runs at.
    pub(super) fn open(
        mix_rate: u32,
        mixer: Arc<Mutex<Mixer>>,
        clock: Arc<AtomicU64>,
    ) -> Result<(Stream, u32)> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| unavailable("no output device found"))?;
        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening output device"
        );

        let exact = device
            .supported_output_configs()
            .map_err(unavailable)?
            .filter(|range| range.sample_format() == SampleFormat::F32)
            .find(|range| {
                range.min_sample_rate().0 <= mix_rate && mix_rate <= range.max_sample_rate().0
            })
            .map(|range| range.with_sample_rate(cpal::SampleRate(mix_rate)));

        let supported = match exact {
            Some(config) => config,
            None => device.default_output_config().map_err(unavailable)?,
        };
        let rate = supported.sample_rate().0;
        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: cpal::SampleRate(rate),
            buffer_size: cpal::BufferSize::Default,
        };
        info!(sample_rate = rate, channels = config.channels, "output config selected");

        let renderer = Renderer::new(mixer, clock, mix_rate, rate)?;
        let stream = match supported.sample_format() {
            SampleFormat::F32 => build::<f32>(&device, &config, renderer),
            SampleFormat::I16 => build::<i16>(&device, &config, renderer),
            SampleFormat::U16 => build::<u16>(&device, &config, renderer),
            fmt => return Err(unavailable(format!("unsupported sample format: {fmt:?}"))),
        }?;
        stream.play().map_err(unavailable)?;
        Ok((stream, rate))
    }

    fn build<T>(device: &cpal::Device, config: &StreamConfig, mut renderer: Renderer) -> Result<Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let channels = config.channels.max(1) as usize;
        let mut mono: Vec<f32> = Vec::new();

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _info| {
                    mono.resize(data.len() / channels, 0.0);
                    renderer.fill(&mut mono);
                    for (frame, &sample) in data.chunks_exact_mut(channels).zip(&mono) {
                        frame.fill(T::from_sample(sample.clamp(-1.0, 1.0)));
                    }
                },
                |err| error!("audio output stream error: {err}"),
                None,
            )
            .map_err(unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_places_voice_at_its_start_frame() {
        let mut mixer = Mixer::default();
        mixer.add(VoiceId(0), 6, vec![1.0; 4]);

        let mut block = [0f32; 8];
        mixer.render(0, &mut block);
        assert_eq!(block, [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0]);
        assert_eq!(mixer.len(), 1, "voice still has two frames left");

        mixer.render(8, &mut block);
        assert_eq!(block, [1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(mixer.len(), 0);
    }

    #[test]
    fn overlapping_voices_are_summed() {
        let mut mixer = Mixer::default();
        mixer.add(VoiceId(0), 0, vec![0.25; 4]);
        mixer.add(VoiceId(1), 2, vec![0.5; 4]);

        let mut block = [0f32; 4];
        mixer.render(0, &mut block);
        assert_eq!(block, [0.25, 0.25, 0.75, 0.75]);
    }

    #[test]
    fn removed_voice_is_silent() {
        let mut mixer = Mixer::default();
        mixer.add(VoiceId(7), 0, vec![1.0; 16]);
        assert!(mixer.remove(VoiceId(7)));
        assert!(!mixer.remove(VoiceId(7)));

        let mut block = [9f32; 4];
        mixer.render(0, &mut block);
        assert_eq!(block, [0.0; 4]);
    }

    #[test]
    fn adjacent_start_snaps_onto_previous_end() {
        let mut schedule = Schedule::new(24_000);
        schedule.add(&[0.5; 100], 24_000, 0.0).unwrap();
        // Rounds to frame 99, one short of the tail.
        schedule.add(&[0.5; 100], 24_000, 99.4 / 24_000.0).unwrap();

        let mixer = schedule.mixer.lock();
        assert_eq!(mixer.voices[1].start_frame, 100);
    }

    /// Schedule `count` constant chunks back to back the way the playback
    /// pipeline does, render them through the device-rate stream, and
    /// return the device samples.
    fn render_back_to_back(device_rate: u32, chunk_len: usize, count: usize) -> Vec<f32> {
        let mut schedule = Schedule::new(24_000);
        let mut renderer = schedule.renderer(device_rate).unwrap();
        let mut cursor = 0.0f64;
        for _ in 0..count {
            let start = cursor.max(schedule.current_time());
            schedule.add(&vec![0.5; chunk_len], 24_000, start).unwrap();
            cursor = start + chunk_len as f64 / 24_000.0;
        }

        let total_device = chunk_len * count * device_rate as usize / 24_000;
        let mut out = Vec::new();
        let mut block = [0f32; 512];
        while out.len() < total_device + 4_096 {
            renderer.fill(&mut block);
            out.extend_from_slice(&block);
        }
        out
    }

    /// The interpolator rings for a few frames at the stream's own start
    /// and end; every frame between those edges must sit at the chunk level.
    fn assert_continuous(out: &[f32], expected_len: usize) {
        const EDGE: usize = 16;
        let audible = |s: &f32| s.abs() > 1e-3;
        let first = out.iter().position(audible).expect("signal present");
        let last = out.iter().rposition(audible).expect("signal present");

        let span = last - first + 1;
        assert!(
            span.abs_diff(expected_len) <= 8,
            "span {span} expected about {expected_len}"
        );

        let off: Vec<usize> = (first + EDGE..=last - EDGE)
            .filter(|&i| (out[i] - 0.5).abs() >= 1e-4)
            .collect();
        assert!(off.is_empty(), "off-level frames inside the stream at {off:?}");
    }

    #[test]
    fn consecutive_chunks_render_without_gaps_at_44k1() {
        let out = render_back_to_back(44_100, 2_401, 10);
        assert_continuous(&out, 24_010 * 44_100 / 24_000);
    }

    #[test]
    fn consecutive_chunks_render_without_gaps_at_48k() {
        let out = render_back_to_back(48_000, 2_400, 10);
        assert_continuous(&out, 48_000);
    }

    #[test]
    fn matching_device_rate_renders_the_mix_verbatim() {
        let out = render_back_to_back(24_000, 1_000, 3);
        assert!(out[..3_000].iter().all(|&s| s == 0.5));
        assert!(out[3_000..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn contended_mixer_yields_silence_without_advancing_the_clock() {
        let schedule = Schedule::new(24_000);
        let mut renderer = schedule.renderer(24_000).unwrap();
        let guard = schedule.mixer.lock();

        let mut block = [1f32; 64];
        renderer.fill(&mut block);
        assert_eq!(block, [0.0; 64]);
        assert_eq!(schedule.current_time(), 0.0);
        drop(guard);
    }
}
