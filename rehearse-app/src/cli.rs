//! Command-line interface for rehearse.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use rehearse_core::Language;

/// Rehearse job interviews with a live voice interviewer
#[derive(Parser, Debug)]
#[command(name = "rehearse", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the settings file
    #[arg(long, global = true, value_name = "PATH")]
    pub settings: Option<PathBuf>,

    /// Interview and report language (en, fr, zh)
    #[arg(long, short = 'l', global = true, value_name = "LANG")]
    pub language: Option<Language>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List audio devices, best interview microphone first
    Devices,

    /// Suggest career paths and find live job listings for a CV
    Discover(DiscoverArgs),

    /// Score a CV against a job description
    Analyze {
        /// CV document (PDF or text)
        #[arg(long, value_name = "PATH")]
        cv: PathBuf,
        #[command(flatten)]
        job: JobSource,
    },

    /// Run a live voice interview
    Interview(InterviewArgs),

    /// Show effective settings, or write the settings file
    Settings {
        /// Create or normalize the settings file on disk
        #[arg(long)]
        write: bool,
    },

    /// Browse past interviews
    History {
        #[command(subcommand)]
        action: Option<HistoryAction>,
    },
}

#[derive(Args, Debug)]
pub struct DiscoverArgs {
    /// CV document (PDF or text)
    #[arg(long, value_name = "PATH")]
    pub cv: PathBuf,
    #[arg(long)]
    pub location: Option<String>,
    #[arg(long)]
    pub role: Option<String>,
    #[arg(long)]
    pub keywords: Option<String>,
    #[arg(long)]
    pub industry: Option<String>,
    #[arg(long, value_name = "LEVEL")]
    pub experience: Option<String>,
    #[arg(long, value_name = "SIZE")]
    pub company_size: Option<String>,
}

/// Job description given inline or from a file.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct JobSource {
    /// Job description text
    #[arg(long, value_name = "TEXT")]
    pub job: Option<String>,
    /// File containing the job description
    #[arg(long, value_name = "PATH")]
    pub job_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct InterviewArgs {
    /// Analyse this CV first and brief the interviewer with the result
    #[arg(long, value_name = "PATH", conflicts_with = "candidate")]
    pub cv: Option<PathBuf>,
    /// Free-text candidate summary
    #[arg(long, value_name = "TEXT")]
    pub candidate: Option<String>,
    #[command(flatten)]
    pub job: JobSource,
    /// Short label stored with the interview (defaults to the first line of the job description)
    #[arg(long, value_name = "LABEL")]
    pub label: Option<String>,
    /// Input device name, as listed by `rehearse devices`
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<String>,
    /// Interviewer voice
    #[arg(long)]
    pub voice: Option<String>,
    /// Skip the feedback report
    #[arg(long)]
    pub no_feedback: bool,
}

#[derive(Subcommand, Debug)]
pub enum HistoryAction {
    /// List stored interviews
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 20)]
        page_size: usize,
        /// Filter by job label
        #[arg(long, short = 'q')]
        query: Option<String>,
    },
    /// Show one interview with its transcript and report
    Show { id: String },
    /// Delete interviews by id, or everything older than N days
    Delete {
        ids: Vec<String>,
        #[arg(long, value_name = "DAYS")]
        older_than: Option<usize>,
    },
}
