use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod cli;

use cli::Cli;
use cli::commands::{Commands, ReviewerCommands, TeacherCommands};
use revgen::GeneratorHost;
use revgen::GeneratorError;
use revgen::config::Config;
use revgen::domain::{
    ExecutionPolicy, GenerateReviewRequest, GradeRange, GradeRanges, PolicyKind, Reviewer, ReviewerId,
    TeacherId,
};
use revgen::store::{ReviewStore, SqliteReviewStore};

fn setup_logging(to_stderr: bool, level: &str) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));

    if to_stderr {
        builder.target(env_logger::Target::Stderr).init();
        return Ok(());
    }

    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("revgen")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("revgen.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn open_store(config: &Config) -> Result<Arc<SqliteReviewStore>> {
    let path = &config.storage.database;
    let store = SqliteReviewStore::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(Arc::new(store))
}

async fn load_host(config: &Config, store: Arc<SqliteReviewStore>) -> Result<Arc<GeneratorHost>> {
    let jobs = config.jobs.build()?;
    let host = GeneratorHost::load(store, jobs, config.host_config())
        .await
        .context("Failed to load generator host")?;
    Ok(host)
}

/// Build a policy from CLI arguments, requiring the parameter the kind needs
fn policy_from_args(kind: PolicyKind, delay: Option<Duration>, cron: Option<String>) -> Result<ExecutionPolicy> {
    let policy = match kind {
        PolicyKind::Immediate => ExecutionPolicy::Immediate,
        PolicyKind::Delayed => ExecutionPolicy::Delayed(delay.ok_or(GeneratorError::MissingParameter {
            policy: kind,
            parameter: "delay",
        })?),
        PolicyKind::Recurring => ExecutionPolicy::Recurring(cron.ok_or(GeneratorError::MissingParameter {
            policy: kind,
            parameter: "cron",
        })?),
    };
    Ok(policy)
}

async fn find_reviewer(store: &dyn ReviewStore, id: ReviewerId) -> Result<Reviewer> {
    let reviewers = store.list_reviewers_with_teachers().await?;
    reviewers
        .into_iter()
        .find(|r| r.id == id)
        .ok_or_else(|| GeneratorError::ReviewerNotFound(id).into())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Run { start } => handle_run_command(start, config).await,
        Commands::Generate {
            reviewer_id,
            kind,
            delay,
            cron,
        } => handle_generate_command(*reviewer_id, *kind, *delay, cron.clone(), config).await,
        Commands::Reviewer { command } => handle_reviewer_command(command, config).await,
        Commands::Teacher { command } => handle_teacher_command(command, config).await,
        Commands::Reviews { teacher } => handle_reviews_command(*teacher, config).await,
    }
}

async fn wait_for_ctrl_c(host: &GeneratorHost) -> Result<()> {
    println!("{}", "Serving scheduled work, press Ctrl-C to stop".dimmed());
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    println!("{}", "Shutting down...".yellow());
    host.shutdown().await;
    Ok(())
}

async fn handle_run_command(start: &[ReviewerId], config: &Config) -> Result<()> {
    info!("Running host, starting reviewers: {:?}", start);
    let store = open_store(config)?;
    let host = load_host(config, store).await?;

    let restored = host.restore_recurring_jobs().await?;
    println!("{} {} recurring job(s)", "Restored".green(), restored);

    for id in start {
        if host.start_reviewer(*id).await {
            println!("{} reviewer {}", "Started".green(), id);
        } else {
            println!(
                "{} reviewer {} (unknown, already running, or no teachers)",
                "Not started:".red(),
                id
            );
        }
    }

    wait_for_ctrl_c(&host).await
}

async fn handle_generate_command(
    reviewer_id: ReviewerId,
    kind: Option<PolicyKind>,
    delay: Option<Duration>,
    cron: Option<String>,
    config: &Config,
) -> Result<()> {
    let store = open_store(config)?;
    let reviewer = find_reviewer(&*store, reviewer_id).await?;

    let mut request = GenerateReviewRequest::from_policy(reviewer_id, &reviewer.policy);
    if let Some(kind) = kind {
        request.kind = kind;
    }
    if delay.is_some() {
        request.delay = delay;
    }
    if cron.is_some() {
        request.cron = cron;
    }
    config.access.authorize(request.kind)?;

    info!("Dispatching {:?}", request);
    let host = load_host(config, store).await?;
    let mut completed = host.completed_jobs();
    host.generate_review(&request).await?;
    println!("{} {} generation for reviewer {}", "Dispatched".green(), request.kind, reviewer_id);

    if request.kind == PolicyKind::Recurring {
        return wait_for_ctrl_c(&host).await;
    }

    // One-shot dispatch: exit once its job has run
    tokio::select! {
        changed = completed.changed() => {
            changed.context("Generator host closed before the job ran")?;
            println!("{} generation for reviewer {}", "Completed".green(), reviewer_id);
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            println!("{}", "Interrupted before the job ran".yellow());
        }
    }
    host.shutdown().await;
    Ok(())
}

async fn handle_reviewer_command(command: &ReviewerCommands, config: &Config) -> Result<()> {
    info!("Handling reviewer command: {:?}", command);
    let store = open_store(config)?;

    match command {
        ReviewerCommands::Add {
            name,
            range,
            kind,
            delay,
            cron,
            teachers,
        } => {
            config.access.authorize(*kind)?;
            let policy = policy_from_args(*kind, *delay, cron.clone())?;
            let grades = GradeRanges::uniform(GradeRange::new(range.0, range.1)?);
            let reviewer = Reviewer::new(0, name.as_str(), grades, policy).with_teachers(teachers.iter().copied());
            reviewer.validate()?;
            let id = store.insert_reviewer(&reviewer).await?;
            println!("{} reviewer {} ({})", "Added".green(), id, name);
        }
        ReviewerCommands::List => {
            let reviewers = store.list_reviewers_with_teachers().await?;
            if reviewers.is_empty() {
                println!("{}", "No reviewers".dimmed());
            }
            for r in reviewers {
                let teachers: Vec<String> = r.teachers.iter().map(|t| t.to_string()).collect();
                println!(
                    "{:>4}  {:<20} {:<10} tq {}-{} ss {}-{} comm {}-{}  teachers [{}]",
                    r.id.to_string().cyan(),
                    r.name,
                    r.policy.kind().as_str(),
                    r.grades.teaching_quality.min,
                    r.grades.teaching_quality.max,
                    r.grades.student_support.min,
                    r.grades.student_support.max,
                    r.grades.communication.min,
                    r.grades.communication.max,
                    teachers.join(",")
                );
            }
        }
        ReviewerCommands::Remove { id } => {
            let reviewer = find_reviewer(&*store, *id).await?;
            config.access.authorize(reviewer.policy.kind())?;
            store.delete_reviewer(*id).await?;
            store.delete_recurring_job(&id.to_string()).await?;
            println!("{} reviewer {}", "Removed".red(), id);
        }
        ReviewerCommands::Assign { id, teachers } => {
            let reviewer = find_reviewer(&*store, *id).await?;
            config.access.authorize(reviewer.policy.kind())?;
            ensure_teachers_exist(&*store, teachers).await?;
            store.assign_teachers(*id, teachers).await?;
            println!("{} {:?} to reviewer {}", "Assigned".green(), teachers, id);
        }
        ReviewerCommands::Unassign { id, teachers } => {
            let reviewer = find_reviewer(&*store, *id).await?;
            config.access.authorize(reviewer.policy.kind())?;
            store.unassign_teachers(*id, teachers).await?;
            println!("{} {:?} from reviewer {}", "Unassigned".yellow(), teachers, id);
        }
    }
    Ok(())
}

async fn ensure_teachers_exist(store: &dyn ReviewStore, teachers: &[TeacherId]) -> Result<()> {
    for teacher in teachers {
        if !store.teacher_exists(*teacher).await? {
            eyre::bail!("Teacher not found: {}", teacher);
        }
    }
    Ok(())
}

async fn handle_teacher_command(command: &TeacherCommands, config: &Config) -> Result<()> {
    info!("Handling teacher command: {:?}", command);
    let store = open_store(config)?;

    match command {
        TeacherCommands::Add { first_name, last_name } => {
            let id = store.insert_teacher(first_name, last_name).await?;
            println!("{} teacher {} ({} {})", "Added".green(), id, first_name, last_name);
        }
        TeacherCommands::List => {
            let teachers = store.list_teachers().await?;
            if teachers.is_empty() {
                println!("{}", "No teachers".dimmed());
            }
            for t in teachers {
                println!("{:>4}  {}", t.id.to_string().cyan(), t.full_name());
            }
        }
    }
    Ok(())
}

async fn handle_reviews_command(teacher: Option<TeacherId>, config: &Config) -> Result<()> {
    info!("Listing reviews, teacher filter: {:?}", teacher);
    let store = open_store(config)?;
    let reviews = store.list_reviews(teacher).await?;
    if reviews.is_empty() {
        println!("{}", "No reviews".dimmed());
    }
    for r in reviews {
        println!(
            "{}  teacher {:<4} reviewer {:<4} tq {:>3} ss {:>3} comm {:>3}  overall {}",
            r.review_time.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            r.teacher_id,
            r.reviewer_id,
            r.teaching_quality,
            r.student_support,
            r.communication,
            format!("{:.0}", r.overall).bold()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    // Setup logging
    let level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    setup_logging(cli.log_stderr, &level).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
