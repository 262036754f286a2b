//! Fixed-size capture frames.

/// Samples per capture block (mono).
pub const FRAME_SAMPLES: usize = 4096;

/// A fixed-length block of mono PCM samples at a known sample rate.
///
/// Produced once per filled block on the capture thread, consumed by the
/// session task (metering + encoding) and then dropped.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Returns the duration of this frame in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Root-mean-square level, used for the volume meter.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum_sq / self.samples.len() as f32).sqrt()
    }
}

/// Slices an arbitrary-length sample stream into `frame_len` blocks.
///
/// Remainders are carried over to the next `push`.
#[derive(Debug)]
pub struct Framer {
    frame_len: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl Framer {
    pub fn new(frame_len: usize, sample_rate: u32) -> Self {
        let frame_len = frame_len.max(1);
        Self {
            frame_len,
            sample_rate,
            pending: Vec::with_capacity(frame_len),
        }
    }

    /// Append samples; returns every block completed by this call, in order.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        let mut rest = samples;
        while !rest.is_empty() {
            let need = self.frame_len - self.pending.len();
            let take = need.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == self.frame_len {
                let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_len));
                frames.push(AudioFrame::new(full, self.sample_rate));
            }
        }
        frames
    }

    /// Samples waiting for the next block.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
