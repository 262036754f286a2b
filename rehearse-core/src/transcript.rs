//! Transcript accumulation from incremental text deltas.
//!
//! The remote service streams many small transcription fragments per
//! utterance, independently for the candidate (caller) and the interviewer
//! (respondent). Consecutive fragments from the same role extend one turn;
//! a role switch opens a new turn.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Who spoke a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The local user (candidate), as transcribed by the remote service.
    Caller,
    /// The remote agent (interviewer).
    Respondent,
}

/// One continuous utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptTurn {
    pub role: Role,
    pub text: String,
}

impl TranscriptTurn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// Ordered, append-only turn sequence for one session.
#[derive(Debug, Default, Clone)]
pub struct TranscriptAccumulator {
    turns: Vec<TranscriptTurn>,
    sealed: bool,
}

impl TranscriptAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a fragment into the transcript. Returns the index of the turn
    /// that received it, or `None` when the fragment was ignored (empty, or
    /// the transcript is sealed).
    pub fn append_delta(&mut self, role: Role, fragment: &str) -> Option<usize> {
        if self.sealed {
            debug!(?role, "transcript sealed, dropping fragment");
            return None;
        }
        if fragment.is_empty() {
            return None;
        }

        match self.turns.last_mut() {
            Some(last) if last.role == role => last.text.push_str(fragment),
            _ => self.turns.push(TranscriptTurn::new(role, fragment)),
        }
        Some(self.turns.len() - 1)
    }

    pub fn turns(&self) -> &[TranscriptTurn] {
        &self.turns
    }

    /// Most recent turn, for subtitle-style display.
    pub fn latest(&self) -> Option<&TranscriptTurn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Freeze the transcript and hand out the final turn list.
    ///
    /// Returns `None` if it was already sealed.
    pub fn seal(&mut self) -> Option<Vec<TranscriptTurn>> {
        if self.sealed {
            return None;
        }
        self.sealed = true;
        Some(self.turns.clone())
    }

    /// Clear for a fresh session.
    pub fn reset(&mut self) {
        self.turns.clear();
        self.sealed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_fragments_coalesce_into_one_turn() {
        let mut acc = TranscriptAccumulator::new();
        let fragments = ["Hel", "lo, ", "thanks for ", "joining."];
        for f in fragments {
            acc.append_delta(Role::Respondent, f);
        }
        assert_eq!(acc.len(), 1);
        assert_eq!(
            acc.latest(),
            Some(&TranscriptTurn::new(Role::Respondent, fragments.concat()))
        );
    }

    #[test]
    fn role_switch_opens_exactly_one_turn() {
        let mut acc = TranscriptAccumulator::new();
        acc.append_delta(Role::Respondent, "Why this role?");
        acc.append_delta(Role::Respondent, " Take your time.");
        let before = acc.len();

        let idx = acc.append_delta(Role::Caller, "Because");
        assert_eq!(idx, Some(before));
        assert_eq!(acc.len(), before + 1);
        assert_eq!(acc.latest().unwrap().text, "Because");
        assert_eq!(acc.latest().unwrap().role, Role::Caller);
    }

    #[test]
    fn interview_exchange_yields_two_turns() {
        let mut acc = TranscriptAccumulator::new();
        acc.append_delta(Role::Caller, "Tell me about yourself");
        acc.append_delta(Role::Respondent, "I led a team of");
        acc.append_delta(Role::Respondent, " five engineers.");

        assert_eq!(
            acc.turns(),
            &[
                TranscriptTurn::new(Role::Caller, "Tell me about yourself"),
                TranscriptTurn::new(Role::Respondent, "I led a team of five engineers."),
            ]
        );
    }

    #[test]
    fn empty_fragments_are_ignored() {
        let mut acc = TranscriptAccumulator::new();
        assert_eq!(acc.append_delta(Role::Caller, ""), None);
        assert!(acc.is_empty());
    }

    #[test]
    fn sealing_freezes_the_transcript_once() {
        let mut acc = TranscriptAccumulator::new();
        acc.append_delta(Role::Caller, "hi");
        let turns = acc.seal().expect("first seal yields turns");
        assert_eq!(turns.len(), 1);

        assert_eq!(acc.append_delta(Role::Caller, "late"), None);
        assert_eq!(acc.turns(), turns.as_slice());
        assert!(acc.seal().is_none());

        acc.reset();
        assert!(!acc.is_sealed());
        assert_eq!(acc.append_delta(Role::Caller, "again"), Some(0));
    }

    #[test]
    fn role_serializes_lowercase() {
        let turn = TranscriptTurn::new(Role::Respondent, "ok");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["role"], "respondent");
        assert_eq!(json["text"], "ok");
    }
}
