//! What a session is opened with: language, interviewer instruction, voice.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Native-audio model used for live interviews.
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

pub const DEFAULT_VOICE: &str = "Kore";

/// Languages an interview can be held and reported in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Fr,
    Zh,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::En, Language::Fr, Language::Zh];

    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Fr => "fr",
            Language::Zh => "zh",
        }
    }

    /// Name used when asking the interviewer to speak this language.
    pub fn spoken_name(self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Fr => "French",
            Language::Zh => "Mandarin Chinese",
        }
    }

    /// Name used when asking for a written report in this language.
    pub fn written_name(self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Fr => "French",
            Language::Zh => "Chinese (Simplified)",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported language '{0}' (expected en, fr or zh)")]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Language::ALL
            .into_iter()
            .find(|lang| {
                lowered == lang.code() || lowered == lang.spoken_name().to_ascii_lowercase()
            })
            .or(match lowered.as_str() {
                "english" => Some(Language::En),
                "french" | "français" | "francais" => Some(Language::Fr),
                "chinese" | "mandarin" | "中文" => Some(Language::Zh),
                _ => None,
            })
            .ok_or_else(|| UnknownLanguage(s.to_string()))
    }
}

/// Caller-supplied context for one interview.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewBrief {
    /// Summary of the candidate, typically the CV analysis.
    pub candidate_context: String,
    /// The job description being rehearsed for.
    pub job_context: String,
    pub language: Language,
}

/// Fixed configuration sent when the channel opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetup {
    pub model: String,
    pub language: Language,
    /// Role-establishing instruction for the remote agent.
    pub instruction: String,
    /// Prebuilt voice identity.
    pub voice: String,
    /// Ask for incremental text of both the caller and the respondent.
    pub transcribe: bool,
}

impl SessionSetup {
    pub fn for_interview(brief: &InterviewBrief, model: &str, voice: &str) -> Self {
        Self {
            model: model.to_string(),
            language: brief.language,
            instruction: interviewer_instruction(brief),
            voice: voice.to_string(),
            transcribe: true,
        }
    }
}

/// Compose the interviewer's role instruction from the brief.
pub fn interviewer_instruction(brief: &InterviewBrief) -> String {
    let language = brief.language.spoken_name();
    let candidate = non_empty_or(&brief.candidate_context, "(no candidate summary provided)");
    let job = non_empty_or(&brief.job_context, "(no job description provided)");

    format!(
        "You are a seasoned hiring interviewer running a live mock interview.\n\
         Speak only {language} for the whole conversation.\n\
         \n\
         About the candidate:\n{candidate}\n\
         \n\
         The position:\n{job}\n\
         \n\
         How to run the interview:\n\
         - Open with a short introduction of yourself in {language}.\n\
         - Avoid a fixed script; vary the order and kind of questions.\n\
         - Alternate between behavioural questions about past experience, \
         skill questions grounded in the candidate's background, and hypothetical scenarios.\n\
         - When an answer is vague, press for a concrete example before moving on.\n\
         - Keep each spoken reply brief and conversational."
    )
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback
    } else {
        trimmed
    }
}
