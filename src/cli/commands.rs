//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: serve scheduled work until Ctrl-C
//! - generate: dispatch one generation request
//! - reviewer / teacher / reviews: store maintenance

use clap::{Parser, Subcommand};
use revgen::domain::{PolicyKind, ReviewerId, TeacherId};
use std::path::PathBuf;
use std::time::Duration;

/// revgen - scheduled synthetic review generation
#[derive(Parser, Debug)]
#[command(name = "revgen")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log to stderr instead of the log file
    #[arg(long, global = true)]
    pub log_stderr: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load the host, restore recurring jobs and serve until Ctrl-C
    Run {
        /// Reviewers to start as continuous workers
        #[arg(short, long = "start", value_delimiter = ',')]
        start: Vec<ReviewerId>,
    },

    /// Dispatch one generation request; recurring dispatches serve until Ctrl-C
    Generate {
        /// Reviewer to generate for
        reviewer_id: ReviewerId,

        /// Policy kind (immediate, delayed, recurring); defaults to the reviewer's
        #[arg(short, long)]
        kind: Option<PolicyKind>,

        /// Delay for delayed generation (90s, 5m, 1h30m, or plain seconds)
        #[arg(short, long, value_parser = parse_delay)]
        delay: Option<Duration>,

        /// Cron expression for recurring generation
        #[arg(long)]
        cron: Option<String>,
    },

    /// Reviewer maintenance
    Reviewer {
        #[command(subcommand)]
        command: ReviewerCommands,
    },

    /// Teacher maintenance
    Teacher {
        #[command(subcommand)]
        command: TeacherCommands,
    },

    /// List generated reviews, newest first
    Reviews {
        /// Only reviews for this teacher
        #[arg(short, long)]
        teacher: Option<TeacherId>,
    },
}

/// Reviewer subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ReviewerCommands {
    /// Add a reviewer
    Add {
        /// Display name
        name: String,

        /// Grade range for every category, as MIN-MAX
        #[arg(short, long, default_value = "50-90", value_parser = parse_range)]
        range: (u8, u8),

        /// Policy kind
        #[arg(short, long, default_value = "immediate")]
        kind: PolicyKind,

        /// Delay for a delayed policy
        #[arg(short, long, value_parser = parse_delay)]
        delay: Option<Duration>,

        /// Cron expression for a recurring policy
        #[arg(long)]
        cron: Option<String>,

        /// Teachers to assign
        #[arg(short, long, value_delimiter = ',')]
        teachers: Vec<TeacherId>,
    },

    /// List reviewers
    List,

    /// Remove a reviewer
    Remove { id: ReviewerId },

    /// Assign teachers to a reviewer
    Assign {
        id: ReviewerId,
        #[arg(required = true, value_delimiter = ',')]
        teachers: Vec<TeacherId>,
    },

    /// Unassign teachers from a reviewer
    Unassign {
        id: ReviewerId,
        #[arg(required = true, value_delimiter = ',')]
        teachers: Vec<TeacherId>,
    },
}

/// Teacher subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum TeacherCommands {
    /// Add a teacher
    Add { first_name: String, last_name: String },

    /// List teachers
    List,
}

/// Parse a delay such as `90s`, `5m`, `1h30m`, `1d` or plain seconds
pub fn parse_delay(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty delay".to_string());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = 0u64;
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 3_600,
            'd' => 86_400,
            _ => return Err(format!("unknown unit '{}' in '{}'", c, s)),
        };
        let value: u64 = digits
            .parse()
            .map_err(|_| format!("missing number before '{}' in '{}'", c, s))?;
        total = total.saturating_add(value.saturating_mul(unit));
        digits.clear();
    }
    if !digits.is_empty() {
        return Err(format!("trailing number without unit in '{}'", s));
    }
    Ok(Duration::from_secs(total))
}

/// Parse `MIN-MAX`
fn parse_range(s: &str) -> Result<(u8, u8), String> {
    let (min, max) = s
        .split_once('-')
        .ok_or_else(|| format!("expected MIN-MAX, got '{}'", s))?;
    let min = min.trim().parse::<u8>().map_err(|e| e.to_string())?;
    let max = max.trim().parse::<u8>().map_err(|e| e.to_string())?;
    Ok((min, max))
}
