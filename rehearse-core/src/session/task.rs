//! The per-session dispatch task.
//!
//! ## Per iteration
//!
//! ```text
//! select! {
//!   inbound event  → transcript delta | schedule audio | interrupt | close
//!   captured frame → meter → (muted? count : encode + send)
//! }
//! ```
//!
//! Events and frames are each handled one at a time, in arrival order. The
//! task never retries a closed channel.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    audio::capture::CaptureGate,
    buffering::frame::AudioFrame,
    channel::{ChannelEvent, ChannelSender},
    codec::TransportPayload,
    error::RehearseError,
    events::{AudioActivityEvent, SessionState, TranscriptEvent},
    session::SessionShared,
    transcript::Role,
};

#[derive(Debug, Default)]
pub struct SessionDiagnostics {
    pub frames_captured: AtomicUsize,
    pub frames_sent: AtomicUsize,
    pub frames_muted: AtomicUsize,
    pub frames_dropped: AtomicUsize,
    pub audio_chunks: AtomicUsize,
    pub buffers_scheduled: AtomicUsize,
    pub decode_failures: AtomicUsize,
    pub interruptions: AtomicUsize,
    pub transcript_fragments: AtomicUsize,
}

impl SessionDiagnostics {
    pub fn reset(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn counters(&self) -> [&AtomicUsize; 9] {
        [
            &self.frames_captured,
            &self.frames_sent,
            &self.frames_muted,
            &self.frames_dropped,
            &self.audio_chunks,
            &self.buffers_scheduled,
            &self.decode_failures,
            &self.interruptions,
            &self.transcript_fragments,
        ]
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_muted: self.frames_muted.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            audio_chunks: self.audio_chunks.load(Ordering::Relaxed),
            buffers_scheduled: self.buffers_scheduled.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            transcript_fragments: self.transcript_fragments.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub frames_captured: usize,
    pub frames_sent: usize,
    pub frames_muted: usize,
    pub frames_dropped: usize,
    pub audio_chunks: usize,
    pub buffers_scheduled: usize,
    pub decode_failures: usize,
    pub interruptions: usize,
    pub transcript_fragments: usize,
}

pub(crate) struct SessionTask {
    pub shared: Arc<SessionShared>,
    pub frames: mpsc::UnboundedReceiver<AudioFrame>,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
    pub sender: ChannelSender,
    pub gate: CaptureGate,
}

#[derive(PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub(crate) async fn run(mut task: SessionTask) {
    debug!("session task started");
    let mut frames_open = true;

    loop {
        tokio::select! {
            event = task.events.recv() => {
                let flow = match event {
                    Some(event) => task.handle_event(event),
                    None => {
                        task.shared.finish_remote("event stream ended");
                        Flow::Stop
                    }
                };
                if flow == Flow::Stop {
                    break;
                }
            }
            frame = task.frames.recv(), if frames_open => match frame {
                Some(frame) => task.handle_frame(frame),
                None => {
                    warn!("capture stream ended; continuing without microphone");
                    frames_open = false;
                }
            },
        }
    }
    debug!("session task finished");
}

impl SessionTask {
    fn handle_frame(&self, frame: AudioFrame) {
        let diag = &self.shared.diagnostics;
        diag.frames_captured.fetch_add(1, Ordering::Relaxed);

        let gated = self.gate.process(&frame);
        let _ = self.shared.activity_tx.send(AudioActivityEvent {
            seq: self.shared.next_seq(),
            rms: gated.rms,
            muted: gated.payload.is_none(),
        });

        let Some(payload) = gated.payload else {
            diag.frames_muted.fetch_add(1, Ordering::Relaxed);
            return;
        };

        // Sending under the state lock orders every frame before the close
        // that end() queues after leaving `Connected`.
        let state = self.shared.state.lock();
        if *state == SessionState::Connected && self.sender.send_frame(payload) {
            diag.frames_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            diag.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn handle_event(&self, event: ChannelEvent) -> Flow {
        match event {
            ChannelEvent::RespondentText(text) => self.append_text(Role::Respondent, &text),
            ChannelEvent::CallerText(text) => self.append_text(Role::Caller, &text),
            ChannelEvent::Audio(payload) => self.play(&payload),
            ChannelEvent::Interrupted => {
                self.shared
                    .diagnostics
                    .interruptions
                    .fetch_add(1, Ordering::Relaxed);
                if let Some(playback) = self.shared.resources.lock().playback.as_mut() {
                    playback.interrupt();
                }
            }
            ChannelEvent::Closed { reason } => {
                info!(reason = reason.as_deref().unwrap_or(""), "channel closed by remote");
                self.shared.finish_remote("remote close");
                return Flow::Stop;
            }
            ChannelEvent::Error(message) => {
                warn!(error = %message, "channel error");
                self.shared.finish_remote("channel error");
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn append_text(&self, role: Role, fragment: &str) {
        let merged = {
            let mut transcript = self.shared.transcript.lock();
            transcript
                .append_delta(role, fragment)
                .map(|idx| (idx, transcript.turns()[idx].text.clone()))
        };
        let Some((turn_index, text)) = merged else {
            return;
        };
        self.shared
            .diagnostics
            .transcript_fragments
            .fetch_add(1, Ordering::Relaxed);
        let _ = self.shared.transcript_tx.send(TranscriptEvent {
            seq: self.shared.next_seq(),
            turn_index,
            role,
            text,
        });
    }

    fn play(&self, payload: &TransportPayload) {
        let diag = &self.shared.diagnostics;
        diag.audio_chunks.fetch_add(1, Ordering::Relaxed);

        let mut resources = self.shared.resources.lock();
        let Some(playback) = resources.playback.as_mut() else {
            return;
        };
        match playback.enqueue(payload) {
            Ok(Some(buffer)) => {
                diag.buffers_scheduled.fetch_add(1, Ordering::Relaxed);
                debug!(start = buffer.start, duration = buffer.duration, "audio scheduled");
            }
            Ok(None) => {}
            Err(RehearseError::Decode(reason)) => {
                diag.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(%reason, "dropping malformed audio chunk");
            }
            Err(e) => warn!(error = %e, "failed to schedule audio chunk"),
        }
    }
}
