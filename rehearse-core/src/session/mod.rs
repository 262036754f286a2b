//! `SessionController`: one live interview from connect to teardown.
//!
//! ## Lifecycle
//!
//! ```text
//! SessionController::new()
//!     └─► start(brief)   mic + output acquired, channel opened, status = Connecting → Connected
//!         ├─► set_muted / toggle_mute      (state unchanged)
//!         └─► end()      mic stopped, channel closed, playback stopped, status = Closed
//!                        returns the sealed transcript once
//! ```
//!
//! A remote close or channel error also moves the session to `Closed` and
//! releases every resource; there is no reconnect. `start()` may be called
//! again from `Closed`.
//!
//! ## Locking
//!
//! `state` is always taken before `resources`. Outbound frames are sent
//! while holding `state`, so nothing is transmitted after `end()` leaves
//! `Connected`.

pub mod resources;
pub(crate) mod task;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    audio::{capture::CaptureGate, playback::PlaybackPipeline, AudioBackend, CaptureSpec},
    buffering::frame::FRAME_SAMPLES,
    channel::{ChannelLink, ChannelSender, Connector},
    codec::{CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE},
    error::{RehearseError, Result},
    events::{AudioActivityEvent, SessionState, SessionStatusEvent, TranscriptEvent},
    setup::{InterviewBrief, SessionSetup, DEFAULT_LIVE_MODEL, DEFAULT_VOICE},
    transcript::{TranscriptAccumulator, TranscriptTurn},
};

pub use resources::SessionResources;
pub use task::{DiagnosticsSnapshot, SessionDiagnostics};

/// Broadcast capacity per event stream.
const BROADCAST_CAP: usize = 256;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Outbound audio rate (Hz). Default: 16000.
    pub capture_sample_rate: u32,
    /// Rate assumed for inbound audio without a declared rate. Default: 24000.
    pub playback_sample_rate: u32,
    /// Samples per outbound frame. Default: 4096.
    pub frame_samples: usize,
    pub preferred_input_device: Option<String>,
    pub model: String,
    pub voice: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            frame_samples: FRAME_SAMPLES,
            preferred_input_device: None,
            model: DEFAULT_LIVE_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
        }
    }
}

/// State shared between the controller and its dispatch task.
pub(crate) struct SessionShared {
    pub(crate) state: Mutex<SessionState>,
    pub(crate) muted: Arc<AtomicBool>,
    pub(crate) transcript: Mutex<TranscriptAccumulator>,
    pub(crate) resources: Mutex<SessionResources>,
    pub(crate) status_tx: broadcast::Sender<SessionStatusEvent>,
    pub(crate) transcript_tx: broadcast::Sender<TranscriptEvent>,
    pub(crate) activity_tx: broadcast::Sender<AudioActivityEvent>,
    pub(crate) diagnostics: SessionDiagnostics,
    seq: AtomicU64,
}

impl SessionShared {
    fn new() -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (transcript_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (activity_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            state: Mutex::new(SessionState::Disconnected),
            muted: Arc::new(AtomicBool::new(false)),
            transcript: Mutex::new(TranscriptAccumulator::new()),
            resources: Mutex::new(SessionResources::default()),
            status_tx,
            transcript_tx,
            activity_tx,
            diagnostics: SessionDiagnostics::default(),
            seq: AtomicU64::new(0),
        }
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn emit_status(&self, status: SessionState, detail: Option<String>) {
        let _ = self.status_tx.send(SessionStatusEvent { status, detail });
    }

    /// Put a freshly acquired resource in place. If the session stopped
    /// connecting meanwhile, everything is released and `Aborted` returned.
    fn adopt(&self, install: impl FnOnce(&mut SessionResources)) -> Result<()> {
        let state = self.state.lock();
        let mut resources = self.resources.lock();
        install(&mut resources);
        if *state != SessionState::Connecting {
            resources.release();
            return Err(RehearseError::Aborted);
        }
        Ok(())
    }

    /// Adopt the channel and enter `Connected` atomically.
    fn connect(&self, sender: ChannelSender) -> Result<()> {
        {
            let mut state = self.state.lock();
            let mut resources = self.resources.lock();
            resources.channel = Some(sender);
            if *state != SessionState::Connecting {
                resources.release();
                return Err(RehearseError::Aborted);
            }
            *state = SessionState::Connected;
        }
        self.emit_status(SessionState::Connected, None);
        Ok(())
    }

    /// A step of `start()` failed: release what was acquired and close.
    fn abandon(&self, err: RehearseError) -> RehearseError {
        let mut state = self.state.lock();
        self.resources.lock().release();
        if *state != SessionState::Connecting {
            debug!(error = %err, "connect failed after the session was ended");
            return RehearseError::Aborted;
        }
        *state = SessionState::Closed;
        drop(state);

        warn!(error = %err, "session failed to connect");
        self.emit_status(SessionState::Closed, Some(err.to_string()));
        err
    }

    /// The remote side closed or failed. No-op unless still `Connected`.
    pub(crate) fn finish_remote(&self, cause: &str) {
        {
            let mut state = self.state.lock();
            if *state != SessionState::Connected {
                return;
            }
            *state = SessionState::Closed;
            self.resources.lock().release();
        }
        info!(cause, "session closed");
        self.emit_status(SessionState::Closed, None);
    }
}

/// The top-level session handle.
///
/// `SessionController` is `Send + Sync`; wrap it in an `Arc` to share
/// between the UI layer and event-forwarding tasks.
pub struct SessionController {
    config: SessionConfig,
    audio: Arc<dyn AudioBackend>,
    connector: Arc<dyn Connector>,
    shared: Arc<SessionShared>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Held for the whole of `start()`.
    starting: tokio::sync::Mutex<()>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        audio: Arc<dyn AudioBackend>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            config,
            audio,
            connector,
            shared: Arc::new(SessionShared::new()),
            task: Mutex::new(None),
            starting: tokio::sync::Mutex::new(()),
        }
    }

    /// Acquire the microphone and output, open the channel, and begin
    /// streaming. Must be called within a Tokio runtime.
    ///
    /// Frames captured before the channel opens are discarded.
    ///
    /// # Errors
    /// - `RehearseError::SessionActive` if connecting or connected already.
    /// - `RehearseError::CaptureUnavailable` / `OutputUnavailable` / `ChannelOpen`
    ///   when acquisition fails; the session is then `Closed` with nothing held.
    /// - `RehearseError::Aborted` if `end()` was called while connecting.
    pub async fn start(&self, brief: &InterviewBrief) -> Result<()> {
        let _starting = self
            .starting
            .try_lock()
            .map_err(|_| RehearseError::SessionActive)?;
        {
            let mut state = self.shared.state.lock();
            if state.is_active() {
                return Err(RehearseError::SessionActive);
            }
            *state = SessionState::Connecting;
        }
        if let Some(stale) = self.task.lock().take() {
            stale.abort();
        }
        self.shared.transcript.lock().reset();
        self.shared.diagnostics.reset();
        self.shared.muted.store(false, Ordering::Release);
        self.shared.emit_status(SessionState::Connecting, None);
        info!(language = %brief.language, "session connecting");

        // ── Microphone ───────────────────────────────────────────────────
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
        let input = self
            .audio
            .open_input(&self.capture_spec(), frame_tx)
            .map_err(|e| self.shared.abandon(e))?;
        self.shared.adopt(|r| r.input = Some(input))?;

        // ── Output context ───────────────────────────────────────────────
        let output = self
            .audio
            .open_output(self.config.playback_sample_rate)
            .map_err(|e| self.shared.abandon(e))?;
        let playback = PlaybackPipeline::new(output, self.config.playback_sample_rate);
        self.shared.adopt(|r| r.playback = Some(playback))?;

        // ── Channel ──────────────────────────────────────────────────────
        let setup = SessionSetup::for_interview(brief, &self.config.model, &self.config.voice);
        let ChannelLink { sender, events } = self
            .connector
            .open(&setup)
            .await
            .map_err(|e| self.shared.abandon(e))?;
        self.shared.connect(sender.clone())?;

        let mut discarded = 0usize;
        while frame_rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!(discarded, "dropped frames captured before the channel opened");
        }

        let handle = tokio::spawn(task::run(task::SessionTask {
            shared: Arc::clone(&self.shared),
            frames: frame_rx,
            events,
            sender,
            gate: CaptureGate::new(Arc::clone(&self.shared.muted)),
        }));

        let mut slot = self.task.lock();
        if *self.shared.state.lock() != SessionState::Connected {
            handle.abort();
            return Err(RehearseError::Aborted);
        }
        *slot = Some(handle);
        info!("session connected");
        Ok(())
    }

    /// Tear the session down. Idempotent and safe in every state.
    ///
    /// Returns the sealed transcript the first time it is called after a
    /// `start()`, and `None` afterwards (or if no session ever started).
    pub fn end(&self) -> Option<Vec<TranscriptTurn>> {
        let previous = {
            let mut state = self.shared.state.lock();
            let previous = *state;
            if previous == SessionState::Disconnected {
                return None;
            }
            *state = SessionState::Closed;
            previous
        };

        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        let released = self.shared.resources.lock().release();
        if previous != SessionState::Closed {
            self.shared.emit_status(SessionState::Closed, None);
        }

        let sealed = self.shared.transcript.lock().seal();
        if let Some(turns) = &sealed {
            let snap = self.shared.diagnostics.snapshot();
            info!(
                turns = turns.len(),
                released,
                frames_sent = snap.frames_sent,
                frames_muted = snap.frames_muted,
                buffers_scheduled = snap.buffers_scheduled,
                interruptions = snap.interruptions,
                "session ended"
            );
        }
        sealed
    }

    /// Suppress or resume outbound audio. Metering continues while muted.
    pub fn set_muted(&self, muted: bool) {
        let was = self.shared.muted.swap(muted, Ordering::AcqRel);
        if was != muted {
            info!(muted, "microphone mute changed");
        }
    }

    /// Flip mute and return the new value.
    pub fn toggle_mute(&self) -> bool {
        let muted = !self.shared.muted.fetch_xor(true, Ordering::AcqRel);
        info!(muted, "microphone mute changed");
        muted
    }

    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    /// Snapshot of the full turn sequence so far.
    pub fn transcript(&self) -> Vec<TranscriptTurn> {
        self.shared.transcript.lock().turns().to_vec()
    }

    /// The most recent turn, for subtitle display.
    pub fn latest_turn(&self) -> Option<TranscriptTurn> {
        self.shared.transcript.lock().latest().cloned()
    }

    /// `true` while a microphone track is held.
    pub fn holds_microphone(&self) -> bool {
        self.shared.resources.lock().holds_input()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.shared.status_tx.subscribe()
    }

    pub fn subscribe_transcript(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.shared.transcript_tx.subscribe()
    }

    pub fn subscribe_activity(&self) -> broadcast::Receiver<AudioActivityEvent> {
        self.shared.activity_tx.subscribe()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.shared.diagnostics.snapshot()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn capture_spec(&self) -> CaptureSpec {
        CaptureSpec {
            sample_rate: self.config.capture_sample_rate,
            frame_samples: self.config.frame_samples,
            preferred_device: self.config.preferred_input_device.clone(),
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.shared.resources.lock().release();
    }
}
