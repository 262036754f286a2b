//! Handing a finished transcript to a feedback generator.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{error::Result, setup::Language, transcript::TranscriptTurn};

/// Structured critique of one interview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackReport {
    /// 0 to 100.
    pub overall_score: f64,
    pub tone_analysis: String,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub qa_feedback: Vec<QaFeedback>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QaFeedback {
    pub question: String,
    pub user_answer: String,
    pub critique: String,
    pub improved_version: String,
}

/// Produces a report from a transcript, written in `language`.
pub trait FeedbackGenerator {
    /// # Errors
    /// `RehearseError::Feedback` when the report cannot be produced.
    fn generate(&self, turns: &[TranscriptTurn], language: Language) -> Result<FeedbackReport>;
}

/// Outcome of [`hand_off`].
#[derive(Debug, Clone, PartialEq)]
pub enum Handoff {
    Report(FeedbackReport),
    /// Nothing was said; return to the previous screen without a report.
    SkipToResults,
}

/// Pass the transcript to `generator` unless it is empty.
pub fn hand_off(
    generator: &dyn FeedbackGenerator,
    turns: &[TranscriptTurn],
    language: Language,
) -> Result<Handoff> {
    if turns.is_empty() {
        info!("empty transcript, skipping feedback");
        return Ok(Handoff::SkipToResults);
    }
    info!(turns = turns.len(), %language, "requesting interview feedback");
    generator.generate(turns, language).map(Handoff::Report)
}

/// Plain-text rendering of a transcript, one `role: text` line per turn.
pub fn render_transcript(turns: &[TranscriptTurn]) -> String {
    turns
        .iter()
        .map(|turn| {
            let speaker = match turn.role {
                crate::transcript::Role::Caller => "candidate",
                crate::transcript::Role::Respondent => "interviewer",
            };
            format!("{speaker}: {}", turn.text.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}
