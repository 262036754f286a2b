//! Coaching calls against the `generateContent` REST endpoint: CV analysis,
//! job discovery and post-interview feedback.
//!
//! All requests are blocking; run them off the async runtime.

use std::path::Path;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rehearse_core::{
    feedback::render_transcript, FeedbackGenerator, FeedbackReport, Language, RehearseError,
    TranscriptTurn,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::extract::{extract_structured, ExtractError};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, thiserror::Error)]
pub enum CoachError {
    #[error("no API key configured (set GEMINI_API_KEY or apiKey in settings)")]
    MissingApiKey,
    #[error("failed to read {path}: {source}")]
    Document {
        path: String,
        source: std::io::Error,
    },
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("service returned no text")]
    EmptyResponse,
    #[error("malformed structured response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Extract(#[from] ExtractError),
}

// ── Results ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreItem {
    pub category: String,
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Improvement {
    pub category: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadableVersion {
    pub title: String,
    pub content: String,
    pub design_tips: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtsVersion {
    pub title: String,
    pub content: String,
    pub keywords_included: Vec<String>,
}

/// CV-versus-job-description analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub detected_language: String,
    pub score: f64,
    pub score_breakdown: Vec<ScoreItem>,
    pub candidate_analysis: String,
    pub suggested_profile_summary: String,
    pub improvements: Vec<Improvement>,
    #[serde(rename = "beautifulVersion")]
    pub readable_version: ReadableVersion,
    pub ats_version: AtsVersion,
    pub interview_prep_points: Vec<String>,
}

impl AnalysisResult {
    /// Condensed candidate context for an interview brief.
    pub fn candidate_context(&self) -> String {
        let mut out = format!(
            "{}\n\nProfile summary: {}",
            self.candidate_analysis.trim(),
            self.suggested_profile_summary.trim()
        );
        if !self.interview_prep_points.is_empty() {
            out.push_str("\n\nTopics to probe:");
            for point in &self.interview_prep_points {
                out.push_str("\n- ");
                out.push_str(point.trim());
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CareerPath {
    pub title: String,
    pub description: String,
    pub match_reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOpportunity {
    pub title: String,
    pub company: String,
    pub location: String,
    pub snippet: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    pub suggested_paths: Vec<CareerPath>,
    pub found_jobs: Vec<JobOpportunity>,
    #[serde(default)]
    pub market_insights: String,
}

/// Optional filters for job discovery. Blank fields mean "no preference".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPreferences {
    pub location: String,
    pub role: String,
    pub keywords: String,
    pub industry: String,
    pub experience_level: String,
    pub company_size: String,
}

impl SearchPreferences {
    fn render(&self) -> String {
        let field = |value: &str, fallback: &'static str| {
            let value = value.trim();
            if value.is_empty() {
                fallback.to_string()
            } else {
                value.to_string()
            }
        };
        format!(
            "Location: {}\nTarget role: {}\nKeywords: {}\nIndustry: {}\nSeniority: {}\nCompany size: {}",
            field(&self.location, "anywhere / remote"),
            field(&self.role, "infer from the CV"),
            field(&self.keywords, "none"),
            field(&self.industry, "any"),
            field(&self.experience_level, "infer from the CV"),
            field(&self.company_size, "any"),
        )
    }
}

// ── Client ────────────────────────────────────────────────────────────────

pub struct CoachClient {
    http: reqwest::blocking::Client,
    api_key: String,
    model: String,
    base: String,
}

impl std::fmt::Debug for CoachClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoachClient")
            .field("model", &self.model)
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

impl CoachClient {
    pub fn new(api_key: Option<&str>, model: &str, timeout: Duration) -> Result<Self, CoachError> {
        let api_key = api_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(CoachError::MissingApiKey)?;
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base: DEFAULT_API_BASE.to_string(),
        })
    }

    /// Score a CV against a job description.
    pub fn analyze_cv(&self, cv: &Path, job_description: &str) -> Result<AnalysisResult, CoachError> {
        let document = inline_document(cv)?;
        let body = json!({
            "contents": [{ "parts": [document, { "text": analysis_prompt(job_description) }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": analysis_schema(),
            },
        });
        let text = self.generate_text(&body)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Suggest career paths and look up live listings for a CV.
    pub fn discover_jobs(
        &self,
        cv: &Path,
        prefs: &SearchPreferences,
        language: Language,
    ) -> Result<DiscoveryResult, CoachError> {
        let document = inline_document(cv)?;
        // Search grounding rules out a response schema; the JSON is recovered from prose.
        let body = json!({
            "contents": [{ "parts": [document, { "text": discovery_prompt(prefs, language) }] }],
            "tools": [{ "google_search": {} }],
        });
        let text = self.generate_text(&body)?;
        let result = extract_structured(&text, |r: &DiscoveryResult| {
            !r.suggested_paths.is_empty() || !r.found_jobs.is_empty()
        })?;
        info!(
            paths = result.suggested_paths.len(),
            jobs = result.found_jobs.len(),
            "discovery complete"
        );
        Ok(result)
    }

    pub fn interview_feedback(
        &self,
        turns: &[TranscriptTurn],
        language: Language,
    ) -> Result<FeedbackReport, CoachError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": feedback_prompt(turns, language) }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": feedback_schema(),
            },
        });
        let text = self.generate_text(&body)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn generate_text(&self, body: &Value) -> Result<String, CoachError> {
        let url = format!("{}/models/{}:generateContent", self.base, self.model);
        debug!(model = %self.model, "sending generateContent request");
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            warn!(status = %status, "generateContent returned non-success status");
            return Err(CoachError::Status {
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }
        let payload: Value = response.json()?;
        response_text(&payload).ok_or(CoachError::EmptyResponse)
    }
}

impl FeedbackGenerator for CoachClient {
    fn generate(
        &self,
        turns: &[TranscriptTurn],
        language: Language,
    ) -> rehearse_core::Result<FeedbackReport> {
        self.interview_feedback(turns, language)
            .map_err(|e| RehearseError::Feedback(e.to_string()))
    }
}

/// Concatenated text parts of the first candidate.
fn response_text(payload: &Value) -> Option<String> {
    let parts = payload
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    (!text.trim().is_empty()).then_some(text)
}

fn inline_document(path: &Path) -> Result<Value, CoachError> {
    let bytes = std::fs::read(path).map_err(|source| CoachError::Document {
        path: path.display().to_string(),
        source,
    })?;
    Ok(json!({
        "inlineData": { "mimeType": mime_for(path), "data": BASE64.encode(bytes) }
    }))
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("txt") | Some("md") => "text/plain",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

// ── Prompts ───────────────────────────────────────────────────────────────

fn analysis_prompt(job_description: &str) -> String {
    format!(
        "Act as a senior recruiter who knows how applicant tracking systems parse resumes \
         in several languages. Compare the attached CV with this job description:\n\n\
         \"{jd}\"\n\n\
         First work out which language the CV is written in. Write every generated field \
         in that language.\n\
         Bullet style: in French, open bullets with an infinitive verb and never with \"je\"; \
         in English, open with a strong action verb, past tense for past roles and present \
         tense for the current one.\n\n\
         Return:\n\
         - score: a strict 0-100 fit score;\n\
         - scoreBreakdown: four categories, each with a 0-100 score and a reason of about six words;\n\
         - candidateAnalysis: at most two sentences on overall fit;\n\
         - suggestedProfileSummary: a 3-4 line header paragraph tailored to the role;\n\
         - improvements: four concise, high-impact changes;\n\
         - beautifulVersion: a rewrite for human readers, with design tips;\n\
         - atsVersion: a plain, keyword-dense rewrite, listing the keywords used;\n\
         - interviewPrepPoints: what the candidate should be ready to discuss.",
        jd = job_description.trim()
    )
}

fn discovery_prompt(prefs: &SearchPreferences, language: Language) -> String {
    format!(
        "You are a career strategist with live web search.\n\n\
         1. Read the attached CV and identify core skills, seniority and strengths.\n\
         2. Propose four career paths: a direct next step, a pivot using transferable skills, \
            a stretch role, and an emerging niche.\n\
         3. Search for real, currently open listings matching these preferences:\n{prefs}\n\
            Use company career pages and major job boards. Never invent a listing; every job \
            must carry the URL where it was found. Aim for 8 to 12 results.\n\
         4. Reply with a single JSON object and nothing else:\n\
         {{\"suggestedPaths\": [{{\"title\", \"description\", \"matchReason\"}}], \
         \"foundJobs\": [{{\"title\", \"company\", \"location\", \"snippet\", \"url\"}}], \
         \"marketInsights\": \"2-3 sentence summary of the market for this profile\"}}\n\n\
         Write titles, descriptions, match reasons and market insights in {lang}.",
        prefs = prefs.render(),
        lang = language.written_name()
    )
}

fn feedback_prompt(turns: &[TranscriptTurn], language: Language) -> String {
    format!(
        "You coach candidates after mock interviews. Below is the transcript of a practice \
         interview between an AI interviewer and a candidate.\n\n\
         Write the report in {lang}.\n\n\
         TRANSCRIPT:\n{transcript}\n\n\
         Judge how relevant the answers were, how clear and well-pitched the tone was, and \
         whether the candidate backed claims with concrete examples.\n\
         Return overallScore (0-100), toneAnalysis (a few adjectives), three strengths, three \
         improvements, and qaFeedback for the two or three most important exchanges: \
         question, userAnswer (summarised), critique, and improvedVersion written in the \
         first person.",
        lang = language.written_name(),
        transcript = render_transcript(turns)
    )
}

// ── Schemas ───────────────────────────────────────────────────────────────

fn string_list() -> Value {
    json!({ "type": "ARRAY", "items": { "type": "STRING" } })
}

fn object_of(fields: &[(&str, Value)], required: &[&str]) -> Value {
    let properties: serde_json::Map<String, Value> = fields
        .iter()
        .map(|(name, schema)| ((*name).to_string(), schema.clone()))
        .collect();
    json!({ "type": "OBJECT", "properties": properties, "required": required })
}

fn analysis_schema() -> Value {
    let string = || json!({ "type": "STRING" });
    let number = || json!({ "type": "NUMBER" });
    object_of(
        &[
            ("detectedLanguage", string()),
            ("score", number()),
            (
                "scoreBreakdown",
                json!({ "type": "ARRAY", "items": object_of(
                    &[("category", string()), ("score", number()), ("reason", string())],
                    &["category", "score", "reason"],
                )}),
            ),
            ("candidateAnalysis", string()),
            ("suggestedProfileSummary", string()),
            (
                "improvements",
                json!({ "type": "ARRAY", "items": object_of(
                    &[("category", string()), ("suggestion", string())],
                    &["category", "suggestion"],
                )}),
            ),
            (
                "beautifulVersion",
                object_of(
                    &[("title", string()), ("content", string()), ("designTips", string_list())],
                    &["title", "content", "designTips"],
                ),
            ),
            (
                "atsVersion",
                object_of(
                    &[
                        ("title", string()),
                        ("content", string()),
                        ("keywordsIncluded", string_list()),
                    ],
                    &["title", "content", "keywordsIncluded"],
                ),
            ),
            ("interviewPrepPoints", string_list()),
        ],
        &[
            "detectedLanguage",
            "score",
            "scoreBreakdown",
            "candidateAnalysis",
            "suggestedProfileSummary",
            "improvements",
            "beautifulVersion",
            "atsVersion",
            "interviewPrepPoints",
        ],
    )
}

fn feedback_schema() -> Value {
    let string = || json!({ "type": "STRING" });
    object_of(
        &[
            ("overallScore", json!({ "type": "NUMBER" })),
            ("toneAnalysis", string()),
            ("strengths", string_list()),
            ("improvements", string_list()),
            (
                "qaFeedback",
                json!({ "type": "ARRAY", "items": object_of(
                    &[
                        ("question", string()),
                        ("userAnswer", string()),
                        ("critique", string()),
                        ("improvedVersion", string()),
                    ],
                    &["question", "userAnswer", "critique", "improvedVersion"],
                )}),
            ),
        ],
        &["overallScore", "toneAnalysis", "strengths", "improvements", "qaFeedback"],
    )
}
