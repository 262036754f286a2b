//! Gapless scheduling of inbound audio chunks.
//!
//! ```text
//! start    = max(cursor, output.current_time())
//! cursor'  = start + duration
//! ```
//!
//! Chunks therefore play back-to-back in arrival order; a chunk arriving
//! after the queue drained starts immediately instead of in the past. An
//! interrupt stops every live buffer and rewinds the cursor to zero, so the
//! next chunk is scheduled at "now".

use tracing::{debug, info, warn};

use crate::{
    audio::{OutputContext, VoiceId},
    codec::{decode_samples, TransportPayload},
    error::Result,
};

/// A buffer handed to the output context and not yet known to be finished.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub voice: VoiceId,
    /// Context time the buffer starts (seconds).
    pub start: f64,
    pub duration: f64,
}

impl ScheduledBuffer {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Owns the output context plus the scheduling cursor and live-buffer set.
pub struct PlaybackPipeline {
    output: Option<Box<dyn OutputContext>>,
    /// Rate assumed for payloads that do not declare one.
    default_rate: u32,
    cursor: f64,
    live: Vec<ScheduledBuffer>,
}

impl PlaybackPipeline {
    pub fn new(output: Box<dyn OutputContext>, default_rate: u32) -> Self {
        Self {
            output: Some(output),
            default_rate,
            cursor: 0.0,
            live: Vec::new(),
        }
    }

    /// Decode an inbound payload and schedule it.
    ///
    /// Returns `Ok(None)` when there is nothing to play (empty payload or the
    /// output is already closed).
    ///
    /// # Errors
    /// `RehearseError::Decode` for malformed audio; the cursor is untouched.
    pub fn enqueue(&mut self, payload: &TransportPayload) -> Result<Option<ScheduledBuffer>> {
        let samples = decode_samples(&payload.data)?;
        let rate = payload.sample_rate().unwrap_or(self.default_rate);
        self.schedule(&samples, rate)
    }

    /// Schedule already-decoded samples at the cursor.
    pub fn schedule(&mut self, samples: &[f32], sample_rate: u32) -> Result<Option<ScheduledBuffer>> {
        if samples.is_empty() || sample_rate == 0 {
            return Ok(None);
        }
        self.reap_finished();
        let Some(output) = self.output.as_mut() else {
            debug!("output closed, dropping inbound audio");
            return Ok(None);
        };

        let now = output.current_time();
        let start = self.cursor.max(now);
        let duration = samples.len() as f64 / sample_rate as f64;
        let voice = output.start(samples, sample_rate, start)?;

        self.cursor = start + duration;
        let buffer = ScheduledBuffer {
            voice,
            start,
            duration,
        };
        self.live.push(buffer);
        Ok(Some(buffer))
    }

    /// Forget buffers whose end time has passed. Returns how many were dropped.
    pub fn reap_finished(&mut self) -> usize {
        let Some(output) = self.output.as_ref() else {
            return 0;
        };
        let now = output.current_time();
        let before = self.live.len();
        self.live.retain(|b| b.end() > now);
        before - self.live.len()
    }

    /// Barge-in: stop every live buffer and rewind the cursor.
    /// Returns the number of buffers stopped; ones that already finished
    /// are dropped without a stop.
    pub fn interrupt(&mut self) -> usize {
        self.reap_finished();
        let stopped = self.live.len();
        if let Some(output) = self.output.as_mut() {
            for buffer in self.live.drain(..) {
                output.stop(buffer.voice);
            }
        } else {
            self.live.clear();
        }
        self.cursor = 0.0;
        if stopped > 0 {
            info!(stopped, "playback interrupted");
        }
        stopped
    }

    /// Stop everything and close the output context. Idempotent.
    pub fn shutdown(&mut self) {
        self.interrupt();
        if let Some(mut output) = self.output.take() {
            output.close();
            if !output.is_closed() {
                warn!("output context reported open after close");
            }
        }
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn live(&self) -> &[ScheduledBuffer] {
        &self.live
    }

    pub fn is_closed(&self) -> bool {
        self.output.is_none()
    }
}

impl Drop for PlaybackPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
