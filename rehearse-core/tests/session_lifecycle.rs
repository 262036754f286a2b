use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use rehearse_core::audio::{
    AudioBackend, CaptureSpec, FrameSender, InputStream, OutputContext, VoiceId,
};
use rehearse_core::buffering::frame::AudioFrame;
use rehearse_core::channel::{ChannelEvent, ChannelLink, Connector, Outbound, RemoteEnd};
use rehearse_core::codec::{encode_samples, TransportPayload};
use rehearse_core::{
    InterviewBrief, Language, RehearseError, Result, Role, SessionConfig, SessionController,
    SessionSetup, SessionState, TranscriptTurn,
};

// ── Fakes ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct OutputLog {
    now: f64,
    started: Vec<f64>,
    stopped: Vec<VoiceId>,
    closed: bool,
}

#[derive(Default)]
struct FakeAudio {
    frames: Arc<Mutex<Option<FrameSender>>>,
    input_active: Arc<AtomicBool>,
    inputs_opened: AtomicUsize,
    output: Arc<Mutex<OutputLog>>,
    fail_input: AtomicBool,
}

impl FakeAudio {
    fn push_frame(&self, level: f32) -> bool {
        match self.frames.lock().as_ref() {
            Some(tx) => tx.send(AudioFrame::new(vec![level; 256], 16_000)).is_ok(),
            None => false,
        }
    }

    fn mic_active(&self) -> bool {
        self.input_active.load(Ordering::SeqCst)
    }
}

struct FakeInput {
    frames: Arc<Mutex<Option<FrameSender>>>,
    active: Arc<AtomicBool>,
}

impl InputStream for FakeInput {
    fn stop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        self.frames.lock().take();
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

struct FakeOutput(Arc<Mutex<OutputLog>>);

impl OutputContext for FakeOutput {
    fn current_time(&self) -> f64 {
        self.0.lock().now
    }

    fn start(&mut self, _samples: &[f32], _rate: u32, start_at: f64) -> Result<VoiceId> {
        let mut log = self.0.lock();
        log.started.push(start_at);
        Ok(VoiceId(log.started.len() as u64 - 1))
    }

    fn stop(&mut self, voice: VoiceId) {
        self.0.lock().stopped.push(voice);
    }

    fn close(&mut self) {
        self.0.lock().closed = true;
    }

    fn is_closed(&self) -> bool {
        self.0.lock().closed
    }
}

impl AudioBackend for FakeAudio {
    fn open_input(&self, _spec: &CaptureSpec, frames: FrameSender) -> Result<Box<dyn InputStream>> {
        if self.fail_input.load(Ordering::SeqCst) {
            return Err(RehearseError::CaptureUnavailable("permission denied".into()));
        }
        self.inputs_opened.fetch_add(1, Ordering::SeqCst);
        *self.frames.lock() = Some(frames);
        self.input_active.store(true, Ordering::SeqCst);
        Ok(Box::new(FakeInput {
            frames: Arc::clone(&self.frames),
            active: Arc::clone(&self.input_active),
        }))
    }

    fn open_output(&self, _sample_rate: u32) -> Result<Box<dyn OutputContext>> {
        *self.output.lock() = OutputLog::default();
        Ok(Box::new(FakeOutput(Arc::clone(&self.output))))
    }
}

#[derive(Default)]
struct FakeConnector {
    remote: Mutex<Option<RemoteEnd>>,
    setups: Mutex<Vec<SessionSetup>>,
    fail: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeConnector {
    fn take_remote(&self) -> RemoteEnd {
        self.remote.lock().take().expect("channel was opened")
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, setup: &SessionSetup) -> Result<ChannelLink> {
        self.setups.lock().push(setup.clone());
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(RehearseError::ChannelOpen("handshake rejected".into()));
        }
        let (link, remote) = ChannelLink::pair();
        *self.remote.lock() = Some(remote);
        Ok(link)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

struct Harness {
    controller: Arc<SessionController>,
    audio: Arc<FakeAudio>,
    connector: Arc<FakeConnector>,
}

fn harness() -> Harness {
    let audio = Arc::new(FakeAudio::default());
    let connector = Arc::new(FakeConnector::default());
    let controller = Arc::new(SessionController::new(
        SessionConfig::default(),
        Arc::clone(&audio) as Arc<dyn AudioBackend>,
        Arc::clone(&connector) as Arc<dyn Connector>,
    ));
    Harness {
        controller,
        audio,
        connector,
    }
}

fn brief() -> InterviewBrief {
    InterviewBrief {
        candidate_context: "Backend engineer, 6 years of Rust".into(),
        job_context: "Staff engineer, payments platform".into(),
        language: Language::Fr,
    }
}

async fn eventually(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}

async fn next_outbound(remote: &mut RemoteEnd) -> Outbound {
    tokio::time::timeout(Duration::from_secs(1), remote.outbound.recv())
        .await
        .expect("outbound within 1s")
        .expect("outbound queue open")
}

fn pcm_chunk(samples: usize) -> TransportPayload {
    encode_samples(&vec![0.1; samples], 24_000)
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn start_opens_channel_with_interview_setup() {
    let h = harness();
    let mut status = h.controller.subscribe_status();

    h.controller.start(&brief()).await.expect("start");
    assert_eq!(h.controller.state(), SessionState::Connected);
    assert!(h.audio.mic_active());

    assert_eq!(status.recv().await.unwrap().status, SessionState::Connecting);
    assert_eq!(status.recv().await.unwrap().status, SessionState::Connected);

    let setups = h.connector.setups.lock();
    assert_eq!(setups.len(), 1);
    assert_eq!(setups[0].language, Language::Fr);
    assert_eq!(setups[0].voice, "Kore");
    assert!(setups[0].transcribe);
    assert!(setups[0].instruction.contains("Backend engineer, 6 years of Rust"));
    assert!(setups[0].instruction.contains("Staff engineer, payments platform"));
}

#[tokio::test]
async fn captured_frames_are_encoded_and_sent() {
    let h = harness();
    h.controller.start(&brief()).await.expect("start");
    let mut remote = h.connector.take_remote();

    assert!(h.audio.push_frame(0.25));
    match next_outbound(&mut remote).await {
        Outbound::Frame(payload) => {
            assert_eq!(payload.mime_type, "audio/pcm;rate=16000");
            assert!(!payload.data.is_empty());
        }
        other => panic!("expected a frame, got {other:?}"),
    }
}

#[tokio::test]
async fn muting_suppresses_sending_but_keeps_metering_and_state() {
    let h = harness();
    let mut activity = h.controller.subscribe_activity();
    h.controller.start(&brief()).await.expect("start");
    let mut remote = h.connector.take_remote();

    h.controller.set_muted(true);
    assert!(h.controller.is_muted());
    h.audio.push_frame(0.5);

    let event = activity.recv().await.expect("activity event");
    assert!(event.muted);
    assert!((event.rms - 0.5).abs() < 1e-4);
    assert_eq!(h.controller.state(), SessionState::Connected);
    assert!(remote.outbound.try_recv().is_err(), "muted frame must not be sent");

    assert!(!h.controller.toggle_mute());
    h.audio.push_frame(0.5);
    assert!(matches!(next_outbound(&mut remote).await, Outbound::Frame(_)));

    let diag = h.controller.diagnostics();
    assert_eq!(diag.frames_muted, 1);
    assert_eq!(diag.frames_sent, 1);
}

#[tokio::test]
async fn inbound_text_deltas_build_turns() {
    let h = harness();
    let mut transcript = h.controller.subscribe_transcript();
    h.controller.start(&brief()).await.expect("start");
    let remote = h.connector.take_remote();

    remote.emit(ChannelEvent::RespondentText("Bonjour, ".into()));
    remote.emit(ChannelEvent::RespondentText("présentez-vous.".into()));
    remote.emit(ChannelEvent::CallerText("Je suis".into()));
    remote.emit(ChannelEvent::CallerText(" ingénieur.".into()));

    let mut last = None;
    for _ in 0..4 {
        last = Some(transcript.recv().await.expect("transcript event"));
    }
    let last = last.unwrap();
    assert_eq!(last.turn_index, 1);
    assert_eq!(last.role, Role::Caller);
    assert_eq!(last.text, "Je suis ingénieur.");

    assert_eq!(
        h.controller.transcript(),
        vec![
            TranscriptTurn::new(Role::Respondent, "Bonjour, présentez-vous."),
            TranscriptTurn::new(Role::Caller, "Je suis ingénieur."),
        ]
    );
}

#[tokio::test]
async fn inbound_audio_is_scheduled_back_to_back_and_interrupt_stops_it() {
    let h = harness();
    h.controller.start(&brief()).await.expect("start");
    let remote = h.connector.take_remote();
    h.audio.output.lock().now = 1.0;

    remote.emit(ChannelEvent::Audio(pcm_chunk(12_000)));
    remote.emit(ChannelEvent::Audio(pcm_chunk(6_000)));
    eventually("two buffers scheduled", || h.audio.output.lock().started.len() == 2).await;
    {
        let log = h.audio.output.lock();
        assert!((log.started[0] - 1.0).abs() < 1e-9);
        assert!((log.started[1] - 1.5).abs() < 1e-9);
    }

    remote.emit(ChannelEvent::Interrupted);
    eventually("both buffers stopped", || h.audio.output.lock().stopped.len() == 2).await;

    remote.emit(ChannelEvent::Audio(pcm_chunk(2_400)));
    eventually("post-interrupt buffer", || h.audio.output.lock().started.len() == 3).await;
    assert!((h.audio.output.lock().started[2] - 1.0).abs() < 1e-9);
    assert_eq!(h.controller.diagnostics().interruptions, 1);
}

#[tokio::test]
async fn malformed_audio_is_dropped_without_ending_the_session() {
    let h = harness();
    h.controller.start(&brief()).await.expect("start");
    let remote = h.connector.take_remote();

    remote.emit(ChannelEvent::Audio(TransportPayload::new(
        "AAEC".into(),
        "audio/pcm;rate=24000".into(),
    )));
    remote.emit(ChannelEvent::Audio(pcm_chunk(240)));

    eventually("valid chunk scheduled", || h.audio.output.lock().started.len() == 1).await;
    assert_eq!(h.controller.diagnostics().decode_failures, 1);
    assert_eq!(h.controller.state(), SessionState::Connected);
}

#[tokio::test]
async fn end_releases_everything_and_seals_once() {
    let h = harness();
    h.controller.start(&brief()).await.expect("start");
    let mut remote = h.connector.take_remote();
    remote.emit(ChannelEvent::RespondentText("Tell me about yourself.".into()));
    remote.emit(ChannelEvent::Audio(pcm_chunk(12_000)));
    remote.emit(ChannelEvent::Audio(pcm_chunk(12_000)));
    eventually("turn recorded", || !h.controller.transcript().is_empty()).await;
    eventually("reply queued", || h.audio.output.lock().started.len() == 2).await;

    let turns = h.controller.end().expect("first end yields the transcript");
    assert_eq!(turns.len(), 1);
    assert_eq!(h.controller.state(), SessionState::Closed);
    assert!(!h.audio.mic_active());
    assert!(!h.controller.holds_microphone());
    {
        let log = h.audio.output.lock();
        assert!(log.closed);
        let mut stopped = log.stopped.clone();
        stopped.sort();
        assert_eq!(stopped, vec![VoiceId(0), VoiceId(1)], "queued reply left playing");
    }
    assert_eq!(next_outbound(&mut remote).await, Outbound::Close);

    // Frames after teardown go nowhere.
    assert!(!h.audio.push_frame(0.3));
    assert!(h.controller.end().is_none());
    assert_eq!(h.controller.state(), SessionState::Closed);
}

#[tokio::test]
async fn end_before_start_is_a_no_op() {
    let h = harness();
    assert!(h.controller.end().is_none());
    assert_eq!(h.controller.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn remote_close_tears_down_without_retry() {
    let h = harness();
    let mut status = h.controller.subscribe_status();
    h.controller.start(&brief()).await.expect("start");
    let remote = h.connector.take_remote();

    remote.emit(ChannelEvent::CallerText("hello".into()));
    remote.emit(ChannelEvent::Closed { reason: None });

    eventually("session closed", || h.controller.state() == SessionState::Closed).await;
    assert!(!h.audio.mic_active());
    assert!(h.audio.output.lock().closed);
    assert_eq!(h.connector.setups.lock().len(), 1, "no reconnect attempt");

    let mut seen = Vec::new();
    while let Ok(event) = status.try_recv() {
        seen.push(event.status);
    }
    assert_eq!(
        seen,
        vec![SessionState::Connecting, SessionState::Connected, SessionState::Closed]
    );

    let turns = h.controller.end().expect("transcript still available");
    assert_eq!(turns, vec![TranscriptTurn::new(Role::Caller, "hello")]);
}

#[tokio::test]
async fn channel_error_is_treated_like_close() {
    let h = harness();
    h.controller.start(&brief()).await.expect("start");
    let remote = h.connector.take_remote();

    remote.emit(ChannelEvent::Error("socket reset".into()));
    eventually("session closed", || h.controller.state() == SessionState::Closed).await;
    assert!(!h.audio.mic_active());
}

#[tokio::test]
async fn channel_open_failure_releases_devices_and_allows_retry() {
    let h = harness();
    h.connector.fail.store(true, Ordering::SeqCst);

    let err = h.controller.start(&brief()).await.unwrap_err();
    assert!(matches!(err, RehearseError::ChannelOpen(_)));
    assert_eq!(h.controller.state(), SessionState::Closed);
    assert!(!h.audio.mic_active());
    assert!(h.audio.output.lock().closed);

    h.connector.fail.store(false, Ordering::SeqCst);
    h.controller.start(&brief()).await.expect("retry from closed");
    assert_eq!(h.controller.state(), SessionState::Connected);
    assert_eq!(h.audio.inputs_opened.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn capture_failure_never_opens_the_channel() {
    let h = harness();
    h.audio.fail_input.store(true, Ordering::SeqCst);

    let err = h.controller.start(&brief()).await.unwrap_err();
    assert!(matches!(err, RehearseError::CaptureUnavailable(_)));
    assert_eq!(h.controller.state(), SessionState::Closed);
    assert!(h.connector.setups.lock().is_empty());
}

#[tokio::test]
async fn second_start_while_connected_is_rejected() {
    let h = harness();
    h.controller.start(&brief()).await.expect("start");
    let err = h.controller.start(&brief()).await.unwrap_err();
    assert!(matches!(err, RehearseError::SessionActive));
    assert_eq!(h.audio.inputs_opened.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn end_while_connecting_aborts_start_and_releases_the_mic() {
    let h = harness();
    let gate = Arc::new(Notify::new());
    *h.connector.gate.lock() = Some(Arc::clone(&gate));

    let controller = Arc::clone(&h.controller);
    let starting = tokio::spawn(async move { controller.start(&brief()).await });

    eventually("mic acquired while connecting", || {
        h.controller.state() == SessionState::Connecting && h.controller.holds_microphone()
    })
    .await;

    h.controller.end();
    assert!(!h.audio.mic_active(), "mic released immediately");
    assert_eq!(h.controller.state(), SessionState::Closed);

    gate.notify_one();
    let result = starting.await.expect("start task");
    assert!(matches!(result, Err(RehearseError::Aborted)));
    assert_eq!(h.controller.state(), SessionState::Closed);

    // The late channel was closed rather than adopted.
    let mut remote = h.connector.take_remote();
    assert_eq!(next_outbound(&mut remote).await, Outbound::Close);
}

#[tokio::test]
async fn frames_captured_before_open_are_discarded() {
    let h = harness();
    let gate = Arc::new(Notify::new());
    *h.connector.gate.lock() = Some(Arc::clone(&gate));

    let controller = Arc::clone(&h.controller);
    let starting = tokio::spawn(async move { controller.start(&brief()).await });
    eventually("mic acquired", || h.controller.holds_microphone()).await;

    assert!(h.audio.push_frame(0.9));
    assert!(h.audio.push_frame(0.9));
    gate.notify_one();
    starting.await.expect("start task").expect("start");

    let mut remote = h.connector.take_remote();
    h.audio.push_frame(0.1);
    assert!(matches!(next_outbound(&mut remote).await, Outbound::Frame(_)));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(remote.outbound.try_recv().is_err());
    assert_eq!(h.controller.diagnostics().frames_sent, 1);
}
