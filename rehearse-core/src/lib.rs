//! # rehearse-core
//!
//! Realtime voice-interview session engine.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → SPSC RingBuffer → capture thread (resample, 4096-sample frames)
//!                                                    │
//!                                    session task: meter ─► mute gate ─► PCM16/base64
//!                                                    │                        │
//!                                  broadcast::Sender<AudioActivityEvent>      ▼
//!                                                                     ChannelSender ──► remote agent
//!
//! remote agent ──► ChannelEvent queue ──► session task
//!                                           ├─ text deltas  → TranscriptAccumulator → TranscriptEvent
//!                                           ├─ audio chunks → PlaybackPipeline (gapless cursor) → speaker
//!                                           └─ interrupted  → stop every live buffer, rewind cursor
//! ```
//!
//! Device callbacks never allocate in steady state or block. Everything else
//! runs on the session's Tokio task, one event at a time.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod channel;
pub mod codec;
pub mod error;
pub mod events;
pub mod feedback;
pub mod session;
pub mod setup;
pub mod transcript;

// Convenience re-exports for downstream crates
pub use audio::{AudioBackend, CpalBackend, InputStream, OutputContext};
pub use channel::{ChannelEvent, ChannelLink, Connector};
pub use error::{RehearseError, Result};
pub use events::{AudioActivityEvent, SessionState, SessionStatusEvent, TranscriptEvent};
pub use feedback::{hand_off, FeedbackGenerator, FeedbackReport, Handoff, QaFeedback};
pub use session::{SessionConfig, SessionController};
pub use setup::{InterviewBrief, Language, SessionSetup};
pub use transcript::{Role, TranscriptTurn};

#[cfg(feature = "gemini")]
pub use channel::gemini::GeminiConnector;
