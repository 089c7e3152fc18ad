//! reqflow CLI: run, resume, and inspect requirement decomposition runs.

use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Local};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

use reqflow::config::{ModelRates, RunConfig};
use reqflow::engine::{Engine, RunOutcome};
use reqflow::llm::RuleBasedClient;
use reqflow::parser::TextParser;
use reqflow::review::{AutoPolicy, ConsoleGate, ReviewGate};
use reqflow::store::Database;
use reqflow_sdk::{log_info, log_run_stats, log_stage_start, log_warning};
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "reqflow",
    about = "Decompose system requirements into subsystem requirements with quality gating",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a decomposition run
    Run(RunArgs),
    /// Resume an interrupted run from its latest checkpoint
    Resume(ResumeArgs),
    /// List past runs with cost and quality
    History(HistoryArgs),
    /// Aggregate trend statistics over past runs
    Stats(StatsArgs),
    /// Delete runs older than a cutoff
    Cleanup(CleanupArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// System-level requirements document (.txt or .md)
    #[arg(long)]
    spec: PathBuf,

    /// Target subsystem name
    #[arg(long)]
    subsystem: String,

    /// Overall score required to pass validation
    #[arg(long, default_value_t = 0.80)]
    quality_threshold: f64,

    /// Refinement ceiling before escalating to a human
    #[arg(long, default_value_t = 3)]
    max_iterations: u32,

    /// Cost above this marks a warning in the run history
    #[arg(long, default_value_t = 1.00)]
    warn_budget: f64,

    /// Cost at or above this aborts the run
    #[arg(long, default_value_t = 5.00)]
    max_budget: f64,

    /// Insert a human review between Analyze and Decompose
    #[arg(long)]
    pre_review: bool,

    /// Replace the interactive review gate with a fixed policy
    #[arg(long, value_enum)]
    non_interactive: Option<AutoDecision>,

    /// Model price/energy table (YAML); defaults are built in
    #[arg(long)]
    rates: Option<PathBuf>,

    /// Directory for the final reports
    #[arg(long, default_value = "OUTPUT")]
    output: PathBuf,

    /// Database path (default: ~/.reqflow/history.db)
    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(clap::Args)]
struct ResumeArgs {
    /// Run id from a previous invocation
    run_id: Uuid,

    #[arg(long, value_enum)]
    non_interactive: Option<AutoDecision>,

    #[arg(long)]
    rates: Option<PathBuf>,

    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(clap::Args)]
struct HistoryArgs {
    #[arg(long, default_value_t = 20)]
    limit: usize,

    #[arg(long, default_value_t = 0)]
    offset: usize,

    /// Restrict to one subsystem
    #[arg(long)]
    subsystem: Option<String>,

    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(clap::Args)]
struct StatsArgs {
    /// Restrict to one subsystem
    #[arg(long)]
    subsystem: Option<String>,

    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(clap::Args)]
struct CleanupArgs {
    /// Delete runs older than this many days
    #[arg(long, default_value_t = 90)]
    days: i64,

    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AutoDecision {
    Approve,
    Abort,
}

fn default_db_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
    Ok(home.join(".reqflow").join("history.db"))
}

fn open_db(path: Option<PathBuf>) -> Result<Database> {
    let path = match path {
        Some(path) => path,
        None => default_db_path()?,
    };
    let db = Database::new(path)?;
    db.initialize_schema()?;
    Ok(db)
}

fn load_rates(path: Option<&PathBuf>) -> Result<ModelRates> {
    match path {
        Some(path) => ModelRates::from_yaml_file(path),
        None => Ok(ModelRates::default()),
    }
}

fn build_gate(non_interactive: Option<AutoDecision>) -> Arc<dyn ReviewGate> {
    match non_interactive {
        Some(AutoDecision::Approve) => Arc::new(AutoPolicy::approve()),
        Some(AutoDecision::Abort) => Arc::new(AutoPolicy::abort()),
        None => Arc::new(ConsoleGate),
    }
}

fn print_outcome(outcome: &RunOutcome) -> Result<()> {
    let record = &outcome.record;

    println!();
    log_info!(
        "Run {}: {} extracted, {} decomposed, {} refinement iteration(s)",
        record.run_id,
        record.extracted_requirements.len(),
        record.decomposed_requirements.len(),
        record.iteration_count
    );
    if let Some(metrics) = &record.quality_metrics {
        log_info!(
            "Quality: overall {:.2} (completeness {:.2}, clarity {:.2}, testability {:.2}, traceability {:.2})",
            metrics.overall,
            metrics.completeness,
            metrics.clarity,
            metrics.testability,
            metrics.traceability
        );
    }
    let duration: f64 = record.timing_breakdown.values().sum();
    log_run_stats!(duration, record.total_cost, record.total_energy_wh);

    if outcome.aborted() {
        log_warning!("run did not complete; see the abort report for details");
        return Err(anyhow!("run {} aborted", record.run_id));
    }
    Ok(())
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let config = RunConfig {
        spec_path: args.spec,
        target_subsystem: args.subsystem,
        quality_threshold: args.quality_threshold,
        max_iterations: args.max_iterations,
        warning_budget: args.warn_budget,
        max_budget: args.max_budget,
        pre_review: args.pre_review,
        output_dir: args.output,
        ..RunConfig::default()
    };
    let rates = load_rates(args.rates.as_ref())?;
    let store = open_db(args.db)?;
    let gate = build_gate(args.non_interactive);

    log_stage_start!(
        "run",
        format!(
            "Decomposing {} for subsystem '{}'",
            config.spec_path.display(),
            config.target_subsystem
        )
    );

    let mut engine = Engine::new(
        config,
        rates,
        store,
        Arc::new(RuleBasedClient),
        Arc::new(TextParser),
        gate,
    )?;
    let outcome = engine.run().await?;
    print_outcome(&outcome)
}

async fn cmd_resume(args: ResumeArgs) -> Result<()> {
    let rates = load_rates(args.rates.as_ref())?;
    let store = open_db(args.db)?;
    let gate = build_gate(args.non_interactive);

    log_info!("Resuming run {}", args.run_id);

    // The checkpoint carries the run's own configuration.
    let mut engine = Engine::new(
        RunConfig::default(),
        rates,
        store,
        Arc::new(RuleBasedClient),
        Arc::new(TextParser),
        gate,
    )?;
    let outcome = engine.resume(args.run_id).await?;
    print_outcome(&outcome)
}

fn cmd_history(args: HistoryArgs) -> Result<()> {
    let db = open_db(args.db)?;
    let runs = db.list_runs(args.limit, args.offset, args.subsystem.as_deref())?;
    if runs.is_empty() {
        log_info!("no runs recorded");
        return Ok(());
    }

    println!(
        "{:<38} {:<20} {:<16} {:>8} {:>8} {:>6} {:>6}",
        "run", "time", "subsystem", "cost", "overall", "pass", "iters"
    );
    for run in runs {
        println!(
            "{:<38} {:<20} {:<16} {:>8.4} {:>8.2} {:>6} {:>6}",
            run.run_id,
            run.timestamp.format("%Y-%m-%d %H:%M:%S"),
            run.subsystem,
            run.total_cost,
            run.overall,
            if run.validation_passed { "yes" } else { "no" },
            run.iteration_count,
        );
    }
    Ok(())
}

fn cmd_stats(args: StatsArgs) -> Result<()> {
    let db = open_db(args.db)?;
    match args.subsystem.as_deref() {
        Some(subsystem) => match db.subsystem_stats(subsystem)? {
            Some(stats) => {
                log_info!("{}: {} run(s)", subsystem, stats.runs);
                println!("  average cost:    ${:.4}", stats.avg_cost);
                println!("  average overall: {:.2}", stats.avg_overall);
                println!("  pass rate:       {:.0}%", stats.pass_rate * 100.0);
                println!("  avg iterations:  {:.1}", stats.avg_iterations);
            }
            None => log_info!("no runs recorded for '{}'", subsystem),
        },
        None => {
            match db.average_cost(None)? {
                Some(avg) => println!("average cost: ${:.4}", avg),
                None => log_info!("no runs recorded"),
            }
            if let Some(rate) = db.pass_rate(None)? {
                println!("pass rate:    {:.0}%", rate * 100.0);
            }
        }
    }
    Ok(())
}

fn cmd_cleanup(args: CleanupArgs) -> Result<()> {
    let db = open_db(args.db)?;
    let cutoff = Local::now() - Duration::days(args.days);
    let deleted = db
        .delete_runs_before(cutoff)
        .context("failed to delete old runs")?;
    log_info!("deleted {} run(s) older than {} days", deleted, args.days);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => cmd_run(args).await,
        Command::Resume(args) => cmd_resume(args).await,
        Command::History(args) => cmd_history(args),
        Command::Stats(args) => cmd_stats(args),
        Command::Cleanup(args) => cmd_cleanup(args),
    }
}
