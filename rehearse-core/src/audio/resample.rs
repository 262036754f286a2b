//! Sample-rate conversion between device rates and the channel's fixed rates.
//!
//! Capture streams from the device rate down to 16 kHz through a
//! [`RateConverter`] living on the capture thread. Playback mixes replies at
//! 24 kHz and streams the mix to the device rate through another one inside
//! the output callback. [`convert_block`] only handles a reply that declares
//! some other rate.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{debug, error};

use crate::error::{RehearseError, Result};

/// Input frames per rubato call when converting whole playback buffers.
const BLOCK_CHUNK: usize = 1024;

/// Streaming mono converter with a fixed input chunk.
///
/// Input that does not fill a chunk waits for the next call. Equal rates
/// skip rubato entirely.
pub struct RateConverter {
    resampler: Option<FastFixedIn<f32>>,
    chunk: usize,
    pending: Vec<f32>,
    scratch: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// `RehearseError::Other` if rubato rejects the ratio or chunk size.
    pub fn new(from_rate: u32, to_rate: u32, chunk: usize) -> Result<Self> {
        let chunk = chunk.max(1);
        if from_rate == to_rate {
            return Ok(Self {
                resampler: None,
                chunk,
                pending: Vec::new(),
                scratch: Vec::new(),
            });
        }

        let resampler = FastFixedIn::<f32>::new(
            f64::from(to_rate) / f64::from(from_rate),
            1.0,
            PolynomialDegree::Cubic,
            chunk,
            1,
        )
        .map_err(|e| RehearseError::Other(anyhow::anyhow!("resampler init: {e}")))?;
        let scratch = vec![vec![0f32; resampler.output_frames_max()]];
        debug!(from_rate, to_rate, chunk, "rate converter ready");

        Ok(Self {
            resampler: Some(resampler),
            chunk,
            pending: Vec::with_capacity(chunk * 2),
            scratch,
        })
    }

    /// Feed samples and collect whatever full chunks produce.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let mut out = Vec::new();
        self.process_into(samples, &mut out);
        out
    }

    /// Like [`process`](Self::process), appending to `out`. Does not
    /// allocate once `out` has room for a chunk's output.
    pub fn process_into(&mut self, samples: &[f32], out: &mut Vec<f32>) {
        let Some(resampler) = self.resampler.as_mut() else {
            out.extend_from_slice(samples);
            return;
        };
        self.pending.extend_from_slice(samples);

        let mut offset = 0;
        while self.pending.len() - offset >= self.chunk {
            let input = &self.pending[offset..offset + self.chunk];
            match resampler.process_into_buffer(&[input], &mut self.scratch, None) {
                Ok((_, produced)) => out.extend_from_slice(&self.scratch[0][..produced]),
                Err(e) => error!("resample chunk failed: {e}"),
            }
            offset += self.chunk;
        }
        self.pending.drain(..offset);
    }

    /// Upper bound on samples one input chunk produces.
    pub fn max_output_per_chunk(&self) -> usize {
        self.resampler
            .as_ref()
            .map_or(self.chunk, |r| r.output_frames_max())
    }

    pub fn output_delay(&self) -> usize {
        self.resampler.as_ref().map_or(0, |r| r.output_delay())
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// Convert one complete buffer between rates, compensating for the
/// interpolator delay so the output is time-aligned with the input and has
/// `len * to / from` samples.
pub fn convert_block(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut rc = RateConverter::new(from_rate, to_rate, BLOCK_CHUNK)?;
    let expected = (samples.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;
    let delay = rc.output_delay();

    let mut out = rc.process(samples);
    let silence = vec![0f32; BLOCK_CHUNK];
    while out.len() < expected + delay {
        let tail = rc.process(&silence);
        if tail.is_empty() {
            break;
        }
        out.extend_from_slice(&tail);
    }

    out.drain(..delay.min(out.len()));
    out.truncate(expected);
    Ok(out)
}
