use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use perfnp::combin::combine_jobs;
use perfnp::config::Config;
use perfnp::display::{self, HistoryEntry};
use perfnp::errors::PerfnpError;
use perfnp::ledger::Ledger;
use perfnp::scheduler::execute_all_runs;

#[derive(Parser)]
#[command(
    name = "perfnp",
    version,
    about = "Run a parameterised benchmark and report robust runtime statistics"
)]
struct Cli {
    /// Log every spawned job to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every job of an experiment and print the CSV log and a summary
    Run(RunArgs),
    /// Print the expanded job list without running anything
    Jobs {
        /// Experiment config (JSON, or TOML with a .toml extension)
        config: PathBuf,
    },
    /// List the runs recorded in a ledger
    History {
        #[arg(long)]
        database: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Experiment config (JSON, or TOML with a .toml extension)
    config: PathBuf,

    /// Ledger database; overrides "database" from the config
    #[arg(long)]
    database: Option<PathBuf>,

    /// Skip jobs finished by the most recent run and continue it
    #[arg(long)]
    resume: bool,

    /// Write the CSV job log here; overrides "logging.job.csv"
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "perfnp=debug" } else { "perfnp=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn default_ledger_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("perfnp").join("ledger.sqlite"))
}

fn open_ledger(path: &Path) -> Result<Ledger> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            anyhow::anyhow!("Failed to create ledger directory {}: {}", parent.display(), e)
        })?;
    }
    Ok(Ledger::open(path)?)
}

/// Where the CSV job log goes. With `--json` and no file, stdout is kept
/// for the JSON summary and the log is dropped.
fn open_job_log(path: Option<&Path>, append: bool, json: bool) -> Result<Option<Box<dyn Write>>> {
    let Some(path) = path else {
        if json {
            return Ok(None);
        }
        let mut out: Box<dyn Write> = Box::new(io::stdout());
        writeln!(out, "{}", display::csv_header())?;
        return Ok(Some(out));
    };

    let file = if append {
        OpenOptions::new().create(true).append(true).open(path)
    } else {
        File::create(path)
    }
    .map_err(|e| anyhow::anyhow!("Failed to open job log {}: {}", path.display(), e))?;

    let needs_header = file.metadata().map(|m| m.len() == 0).unwrap_or(true);
    let mut out: Box<dyn Write> = Box::new(file);
    if needs_header {
        writeln!(out, "{}", display::csv_header())?;
    }
    Ok(Some(out))
}

fn run_experiment(args: RunArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    let timeout = config.timeout;

    let database = args
        .database
        .or_else(|| config.database.clone())
        .or_else(|| if args.resume { default_ledger_path() } else { None });

    if args.resume && database.is_none() {
        anyhow::bail!("--resume needs a ledger; pass --database <PATH>");
    }

    let mut ledger = database.as_deref().map(open_ledger).transpose()?;
    let mut jobs = combine_jobs(&config);

    let run_id = match ledger.as_ref() {
        None => None,
        Some(ledger) => {
            let previous = if args.resume {
                ledger.latest_run_with_jobs()?
            } else {
                None
            };
            let run_id = match previous {
                Some(run_id) => {
                    jobs = ledger.filter_pending(jobs)?;
                    info!(run_id, pending = jobs.len(), "resuming run");
                    run_id
                }
                None => ledger.start_run()?,
            };

            let binary = fs::read(&config.command).unwrap_or_else(|err| {
                debug!(command = %config.command, %err, "binary not stored with the run");
                Vec::new()
            });
            ledger.save_image(run_id, &config.source, &binary)?;
            Some(run_id)
        }
    };

    let csv_path = args.csv.as_deref().or(config.job_csv.as_deref());
    let mut job_log = open_job_log(csv_path, args.resume, args.json)?;

    let dataset = execute_all_runs(&jobs, timeout, |job, timeout, result| {
        if let Some(out) = job_log.as_mut() {
            writeln!(out, "{}", display::csv_line(job, result))
                .and_then(|_| out.flush())
                .map_err(|source| PerfnpError::JobLogError { source })?;
        }
        if let (Some(ledger), Some(run_id)) = (ledger.as_mut(), run_id) {
            ledger.record_job(run_id, job, timeout, result)?;
        }
        Ok(())
    })?;

    let dataset = match (ledger.as_ref(), run_id) {
        (Some(ledger), Some(run_id)) => ledger.dataset_for_run(run_id, timeout)?,
        _ => dataset,
    };

    let summary = dataset.summary();
    if summary.successful_runs < summary.runs {
        warn!(
            failed = summary.runs - summary.successful_runs,
            "some jobs failed or timed out"
        );
    }

    if args.json {
        println!("{}", display::format_summary_json(&summary, run_id));
    } else {
        if job_log.is_some() && csv_path.is_none() {
            println!();
        }
        print!("{}", display::format_summary(&summary));
    }

    Ok(())
}

fn list_jobs(config: &Path) -> Result<()> {
    let config = Config::load(config)?;
    print!("{}", display::format_jobs(&combine_jobs(&config)));
    Ok(())
}

fn show_history(database: Option<PathBuf>, json: bool) -> Result<()> {
    let path = database
        .or_else(default_ledger_path)
        .context("No ledger location; pass --database <PATH>")?;
    if !path.exists() {
        anyhow::bail!("No ledger found at {}", path.display());
    }

    let ledger = Ledger::open(&path)?;
    let mut entries = Vec::new();
    for run in ledger.runs()? {
        let summary = ledger
            .dataset_for_run(run.run_id, run.timeout.unwrap_or(0))?
            .summary();
        entries.push(HistoryEntry { run, summary });
    }

    if json {
        println!("{}", display::format_history_json(&entries));
    } else {
        let now = chrono::Local::now().naive_local();
        print!("{}", display::format_history(&entries, now));
    }
    Ok(())
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Run(args) => run_experiment(args),
        Command::Jobs { config } => list_jobs(&config),
        Command::History { database, json } => show_history(database, json),
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{}", err);
        process::exit(1);
    }
}
