use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use statsweep::orchestrator;
use statsweep::pool::{PoolConfig, WorkPool};
use statsweep::scanner::{ScannerConfig, StatsScanner};

#[derive(Parser, Debug)]
#[command(name = "statsweep")]
#[command(about = "Concurrent scanner and extractor for simulator stats dumps")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Discover variables across a batch of stats dumps
    Scan {
        /// Root directory to search recursively
        root: PathBuf,

        /// Filename pattern for stats dumps
        #[arg(long, default_value = "stats.txt")]
        pattern: String,

        /// Cap on number of files scanned (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        limit: usize,

        /// Known configuration-variable name (repeatable)
        #[arg(long = "config-var")]
        config_vars: Vec<String>,

        /// Write the variable list here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,

        /// Concurrent workers (default: 2x cores)
        #[arg(long)]
        jobs: Option<usize>,
    },
    /// Extract selected variables into one consolidated CSV dataset
    Parse {
        /// Root directory to search recursively
        root: PathBuf,

        /// Variable to extract, literal or pattern (repeatable)
        #[arg(long = "var", required = true)]
        vars: Vec<String>,

        /// Filename pattern for stats dumps
        #[arg(long, default_value = "stats.txt")]
        pattern: String,

        /// Known configuration-variable name (repeatable)
        #[arg(long = "config-var")]
        config_vars: Vec<String>,

        /// Concurrent workers (default: 2x cores)
        #[arg(long)]
        jobs: Option<usize>,

        /// Per-task timeout in seconds
        #[arg(long, default_value_t = 60)]
        task_timeout: u64,

        /// Dataset output path
        #[arg(long, default_value = "results.csv")]
        out: PathBuf,

        /// Failure report path (default: <out>.failures.json)
        #[arg(long)]
        failures: Option<PathBuf>,
    },
}

fn build_pool(jobs: Option<usize>, task_timeout: Option<u64>) -> WorkPool {
    let mut config = PoolConfig::default();
    if let Some(jobs) = jobs {
        config.size = jobs.max(1);
    }
    if let Some(seconds) = task_timeout {
        config.task_timeout = Duration::from_secs(seconds);
    }
    WorkPool::new(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Structured logs go to stderr so scan output on stdout stays clean
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            root,
            pattern,
            limit,
            config_vars,
            out,
            jobs,
        } => {
            info!("Starting scan of {}", root.display());
            let pool = build_pool(jobs, None);
            let scanner = Arc::new(StatsScanner::new(ScannerConfig::with_config_names(
                config_vars,
            ))?);

            let report =
                orchestrator::scan_directory(&pool, scanner, &root, &pattern, limit).await?;

            let records: Vec<_> = report.catalog.descriptors().collect();
            let json = serde_json::to_string_pretty(&records)?;
            match out {
                Some(path) => {
                    tokio::fs::write(&path, json).await?;
                    println!("Wrote {} variables to {}", records.len(), path.display());
                }
                None => println!("{json}"),
            }

            if !report.failures.is_empty() {
                eprintln!("Scan completed with {} file failures:", report.failures.len());
                for failure in &report.failures {
                    eprintln!("  {}: {}", failure.file_path, failure.error_message);
                }
            }
        }
        Commands::Parse {
            root,
            vars,
            pattern,
            config_vars,
            jobs,
            task_timeout,
            out,
            failures,
        } => {
            info!("Starting parse of {} ({} variables)", root.display(), vars.len());
            let pool = build_pool(jobs, Some(task_timeout));
            let scanner = Arc::new(StatsScanner::new(ScannerConfig::with_config_names(
                config_vars,
            ))?);

            let (outcome, _catalog) =
                orchestrator::parse_directory(&pool, scanner, &root, &pattern, &vars).await?;

            let failure_path = failures
                .unwrap_or_else(|| out.with_extension("failures.json"));
            orchestrator::write_failure_report(&failure_path, &outcome.failures).await?;

            match outcome.dataset {
                Some(dataset) => {
                    dataset.write_csv(&out).await?;
                    println!(
                        "Parse complete: {} rows x {} columns written to {}",
                        dataset.row_count(),
                        dataset.column_count(),
                        out.display()
                    );
                    if !outcome.failures.is_empty() {
                        println!(
                            "{} tasks failed; see {}",
                            outcome.failures.len(),
                            failure_path.display()
                        );
                    }
                }
                None => {
                    anyhow::bail!(
                        "no tasks succeeded ({} failures); see {}",
                        outcome.failures.len(),
                        failure_path.display()
                    );
                }
            }
        }
    }

    Ok(())
}
