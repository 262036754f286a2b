//! Events broadcast by a running session.
//!
//! | Event | Meaning |
//! |-------|---------|
//! | `SessionStatusEvent` | lifecycle transition |
//! | `TranscriptEvent` | a turn grew by one fragment |
//! | `AudioActivityEvent` | one captured frame was metered |
//!
//! All types serialize camelCase so a UI layer can forward them unchanged.

use serde::{Deserialize, Serialize};

use crate::transcript::Role;

// ---------------------------------------------------------------------------
// Session status
// ---------------------------------------------------------------------------

/// Lifecycle state of a session.
///
/// ```text
/// disconnected ──start──► connecting ──channel open──► connected
///                             │                            │
///                             └──failure / end──► closed ◄─┘ remote close / error / end
/// closed ──start──► connecting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

impl SessionState {
    /// `true` while the session holds (or is acquiring) devices.
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionState,
    /// Human-readable detail, e.g. why connecting failed.
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

/// Emitted each time a fragment is merged into the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEvent {
    pub seq: u64,
    /// Index of the turn that received the fragment.
    pub turn_index: usize,
    pub role: Role,
    /// Full text of that turn so far.
    pub text: String,
}

// ---------------------------------------------------------------------------
// Audio activity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioActivityEvent {
    pub seq: u64,
    /// Root-mean-square level of the frame in [0.0, 1.0].
    pub rms: f32,
    /// Whether the frame was withheld from the channel.
    pub muted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        let event = SessionStatusEvent {
            status: SessionState::Connecting,
            detail: None,
        };
        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "connecting");
        assert!(json["detail"].is_null());

        assert!(serde_json::from_str::<SessionState>(r#""Closed""#).is_err());
    }

    #[test]
    fn transcript_event_uses_camel_case() {
        let event = TranscriptEvent {
            seq: 4,
            turn_index: 2,
            role: Role::Caller,
            text: "I shipped it".into(),
        };
        let json = serde_json::to_value(&event).expect("serialize transcript event");
        assert_eq!(json["turnIndex"], 2);
        assert_eq!(json["role"], "caller");
    }

    #[test]
    fn activity_event_round_trips() {
        let event = AudioActivityEvent {
            seq: 9,
            rms: 0.25,
            muted: true,
        };
        let json = serde_json::to_string(&event).expect("serialize activity event");
        let back: AudioActivityEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.seq, 9);
        assert!(back.muted);
    }

    #[test]
    fn only_connecting_and_connected_are_active() {
        assert!(SessionState::Connecting.is_active());
        assert!(SessionState::Connected.is_active());
        assert!(!SessionState::Closed.is_active());
        assert!(!SessionState::Disconnected.is_active());
    }
}
