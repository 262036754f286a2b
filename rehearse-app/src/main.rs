//! Rehearse command-line entry point.
//!
//! Coaching commands are blocking HTTP calls made from the main thread. The
//! live interview runs on a Tokio runtime built for that command only; the
//! feedback request is issued after the runtime has returned.

mod cli;
mod coach;
mod extract;
mod interview;
mod settings;
mod storage;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rehearse_core::{
    audio::device::{list_devices, DeviceDirection},
    hand_off, CpalBackend, FeedbackReport, GeminiConnector, Handoff, InterviewBrief, Language,
};
use serde::Serialize;
use tracing::{info, warn};

use cli::{Cli, Commands, DiscoverArgs, HistoryAction, InterviewArgs, JobSource};
use coach::{AnalysisResult, CoachClient, DiscoveryResult, SearchPreferences};
use settings::{default_settings_path, load_settings, save_settings, AppSettings};
use storage::{InterviewRecordInput, InterviewStore};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rehearse=info")),
        )
        .init();

    let cli = Cli::parse();
    let settings_path = cli.settings.clone().unwrap_or_else(default_settings_path);
    let stored = load_settings(&settings_path);
    let mut settings = stored.clone();
    settings.apply_env_overrides();
    let language = cli.language.unwrap_or(settings.language);
    info!(
        settings = %settings_path.display(),
        %language,
        history = settings.history_enabled,
        "rehearse starting"
    );

    match cli.command {
        Commands::Devices => cmd_devices(cli.json),
        Commands::Discover(args) => cmd_discover(&settings, &args, language, cli.json),
        Commands::Analyze { cv, job } => {
            let job = read_job(&job)?;
            let analysis = coach_client(&settings)?.analyze_cv(&cv, &job)?;
            print_analysis(&analysis, cli.json)
        }
        Commands::Interview(args) => cmd_interview(&settings, args, language, cli.json),
        Commands::Settings { write } => {
            if write {
                save_settings(&settings_path, &stored)
                    .with_context(|| format!("failed to write {}", settings_path.display()))?;
                eprintln!("Wrote {}", settings_path.display());
            }
            let mut shown = settings.clone();
            shown.api_key = shown.api_key.map(|_| "<set>".into());
            print_json(&shown)
        }
        Commands::History { action } => cmd_history(&settings, action, cli.json),
    }
}

fn coach_client(settings: &AppSettings) -> Result<CoachClient> {
    Ok(CoachClient::new(
        settings.api_key.as_deref(),
        &settings.coach_model,
        Duration::from_secs(settings.request_timeout_secs),
    )?)
}

fn open_store(settings: &AppSettings) -> Result<InterviewStore> {
    let store = InterviewStore::new(InterviewStore::default_db_path())
        .context("failed to open interview history")?;
    match store.prune_history(settings.retention_days) {
        Ok(0) => {}
        Ok(pruned) => info!(pruned, "expired interviews removed"),
        Err(e) => warn!(error = %e, "history pruning failed"),
    }
    Ok(store)
}

fn read_job(source: &JobSource) -> Result<String> {
    let text = match (&source.job, &source.job_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read job description {}", path.display()))?,
        (None, None) => bail!("a job description is required (--job or --job-file)"),
    };
    if text.trim().is_empty() {
        bail!("the job description is empty");
    }
    Ok(text)
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ── devices ───────────────────────────────────────────────────────────────

fn cmd_devices(json: bool) -> Result<()> {
    let devices = list_devices();
    if json {
        return print_json(&devices);
    }
    if devices.is_empty() {
        println!("No audio devices found.");
        return Ok(());
    }
    for device in &devices {
        let kind = match device.direction {
            DeviceDirection::Input => "in ",
            DeviceDirection::Output => "out",
        };
        let mut tags = Vec::new();
        if device.is_default {
            tags.push("default");
        }
        if device.is_recommended {
            tags.push("recommended");
        }
        if device.is_loopback_like {
            tags.push("loopback?");
        }
        let tags = if tags.is_empty() {
            String::new()
        } else {
            format!("  [{}]", tags.join(", "))
        };
        println!("{kind}  {}{tags}", device.name);
    }
    Ok(())
}

// ── discover / analyze ────────────────────────────────────────────────────

fn cmd_discover(
    settings: &AppSettings,
    args: &DiscoverArgs,
    language: Language,
    json: bool,
) -> Result<()> {
    let prefs = SearchPreferences {
        location: args.location.clone().unwrap_or_default(),
        role: args.role.clone().unwrap_or_default(),
        keywords: args.keywords.clone().unwrap_or_default(),
        industry: args.industry.clone().unwrap_or_default(),
        experience_level: args.experience.clone().unwrap_or_default(),
        company_size: args.company_size.clone().unwrap_or_default(),
    };
    eprintln!("Searching for opportunities, this can take a minute...");
    let result = coach_client(settings)?.discover_jobs(&args.cv, &prefs, language)?;
    if json {
        return print_json(&result);
    }
    print_discovery(&result);
    Ok(())
}

fn print_discovery(result: &DiscoveryResult) {
    if !result.market_insights.trim().is_empty() {
        println!("{}\n", result.market_insights.trim());
    }
    println!("Career paths:");
    for path in &result.suggested_paths {
        println!("  * {}: {}", path.title, path.description);
        println!("    why: {}", path.match_reason);
    }
    println!("\nOpen positions:");
    for job in &result.found_jobs {
        println!("  * {} at {} ({})", job.title, job.company, job.location);
        println!("    {}", job.url);
    }
}

fn print_analysis(analysis: &AnalysisResult, json: bool) -> Result<()> {
    if json {
        return print_json(analysis);
    }
    println!("Match score: {:.0}/100 (CV language: {})", analysis.score, analysis.detected_language);
    for item in &analysis.score_breakdown {
        println!("  {:<24} {:>3.0}  {}", item.category, item.score, item.reason);
    }
    println!("\n{}", analysis.candidate_analysis.trim());
    println!("\nSuggested summary:\n{}", analysis.suggested_profile_summary.trim());
    println!("\nImprovements:");
    for imp in &analysis.improvements {
        println!("  * [{}] {}", imp.category, imp.suggestion);
    }
    println!("\nPrepare to discuss:");
    for point in &analysis.interview_prep_points {
        println!("  * {point}");
    }
    Ok(())
}

// ── interview ─────────────────────────────────────────────────────────────

fn cmd_interview(
    settings: &AppSettings,
    args: InterviewArgs,
    language: Language,
    json: bool,
) -> Result<()> {
    let Some(api_key) = settings.api_key.clone() else {
        bail!("no API key configured (set GEMINI_API_KEY or apiKey in settings)");
    };
    let job_context = read_job(&args.job)?;
    let candidate_context = match (&args.cv, &args.candidate) {
        (Some(cv), _) => {
            eprintln!("Analysing your CV to brief the interviewer...");
            coach_client(settings)?
                .analyze_cv(cv, &job_context)?
                .candidate_context()
        }
        (None, Some(text)) => text.clone(),
        (None, None) => String::new(),
    };
    let brief = InterviewBrief {
        candidate_context,
        job_context,
        language,
    };
    let label = args
        .label
        .clone()
        .unwrap_or_else(|| job_label(&brief.job_context));

    let mut config = settings.session_config();
    if let Some(device) = args.device {
        config.preferred_input_device = Some(device);
    }
    if let Some(voice) = args.voice.as_deref() {
        config.voice = settings::normalize_voice(voice);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("rehearse-rt")
        .build()
        .context("failed to start async runtime")?;
    let turns = runtime.block_on(interview::run_interview(
        config,
        Arc::new(CpalBackend),
        Arc::new(GeminiConnector::new(api_key)),
        brief,
    ))?;
    drop(runtime);

    println!("\n\n{}", interview::format_transcript(&turns));

    let report = if args.no_feedback {
        None
    } else {
        request_feedback(settings, &turns, language)
    };

    if settings.history_enabled && !turns.is_empty() {
        let id = open_store(settings)?.insert_interview(InterviewRecordInput {
            language,
            job_label: label,
            turns,
            report: report.clone(),
        })?;
        eprintln!("Saved as {id}");
    }

    match report {
        Some(report) if json => print_json(&report),
        Some(report) => {
            print_report(&report);
            Ok(())
        }
        None => Ok(()),
    }
}

fn request_feedback(
    settings: &AppSettings,
    turns: &[rehearse_core::TranscriptTurn],
    language: Language,
) -> Option<FeedbackReport> {
    let coach = match coach_client(settings) {
        Ok(coach) => coach,
        Err(e) => {
            warn!(error = %e, "feedback unavailable");
            return None;
        }
    };
    eprintln!("Preparing your feedback...");
    match hand_off(&coach, turns, language) {
        Ok(Handoff::Report(report)) => Some(report),
        Ok(Handoff::SkipToResults) => {
            eprintln!("Nothing was said, so there is no feedback to give.");
            None
        }
        Err(e) => {
            eprintln!("Feedback failed: {e}");
            None
        }
    }
}

/// First non-empty line of the job description, shortened.
fn job_label(job_context: &str) -> String {
    let line = job_context
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    let mut label: String = line.chars().take(80).collect();
    if line.chars().count() > 80 {
        label.push('…');
    }
    label
}

fn print_report(report: &FeedbackReport) {
    println!("\nOverall score: {:.0}/100", report.overall_score);
    println!("Tone: {}", report.tone_analysis);
    println!("\nStrengths:");
    for s in &report.strengths {
        println!("  + {s}");
    }
    println!("\nTo improve:");
    for s in &report.improvements {
        println!("  - {s}");
    }
    for qa in &report.qa_feedback {
        println!("\nQ: {}", qa.question);
        println!("  Your answer: {}", qa.user_answer);
        println!("  Critique: {}", qa.critique);
        println!("  Try: {}", qa.improved_version);
    }
}

// ── history ───────────────────────────────────────────────────────────────

fn cmd_history(settings: &AppSettings, action: Option<HistoryAction>, json: bool) -> Result<()> {
    let store = open_store(settings)?;
    match action.unwrap_or(HistoryAction::List {
        page: 1,
        page_size: 20,
        query: None,
    }) {
        HistoryAction::List {
            page,
            page_size,
            query,
        } => {
            let page = store.get_history(page, page_size, query.as_deref())?;
            if json {
                return print_json(&page);
            }
            if page.items.is_empty() {
                println!("No interviews stored.");
            }
            for item in &page.items {
                let score = item
                    .overall_score
                    .map(|s| format!("{s:>3.0}"))
                    .unwrap_or_else(|| "  -".into());
                println!(
                    "{}  {}  {}  {score}  {} turns  {}",
                    item.id, item.created_at, item.language, item.turn_count, item.job_label
                );
            }
            if page.total > page.items.len() {
                println!("(page {} of {} interviews)", page.page, page.total);
            }
        }
        HistoryAction::Show { id } => {
            let Some(record) = store.get_interview(&id)? else {
                bail!("no interview with id {id}");
            };
            if json {
                return print_json(&record);
            }
            println!("{}  {}  {}", record.summary.created_at, record.summary.language, record.summary.job_label);
            println!("\n{}", interview::format_transcript(&record.turns));
            if let Some(report) = &record.report {
                print_report(report);
            }
        }
        HistoryAction::Delete { ids, older_than } => {
            if ids.is_empty() && older_than.is_none() {
                bail!("give interview ids or --older-than DAYS");
            }
            let deleted = store.delete_history(&ids, older_than)?;
            println!("Deleted {deleted} interview(s).");
        }
    }
    Ok(())
}
