//! Command-line interface for claimcheck.
//!
//! Runs the verification worker, submits and inspects evidence, and shows
//! the state of the verification queue.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{self, ResolvedConfig};
use crate::core::{run_worker, score_evidence, Services, Verdict, WorkerOverrides};
use crate::domain::Evidence;
use crate::queue::{JobQueue, JobState};

pub mod evidence;

/// claimcheck - asynchronous evidence verification
#[derive(Parser, Debug)]
#[command(name = "claimcheck")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Consume the verification queue until Ctrl-C
    Worker {
        /// Number of concurrent consumers
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Simulated verification latency in milliseconds
        #[arg(long)]
        latency_ms: Option<u64>,

        /// Metrics endpoint bind address
        #[arg(long, env = "CLAIMCHECK_METRICS_ADDR")]
        metrics_addr: Option<String>,
    },

    /// Submit and inspect evidence
    Evidence {
        #[command(subcommand)]
        command: evidence::EvidenceCommands,
    },

    /// Inspect the verification queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },

    /// Score text without storing it
    Score {
        /// Evidence source
        #[arg(short, long)]
        source: String,

        /// Evidence excerpt
        #[arg(short, long)]
        excerpt: String,
    },

    /// Insert demo evidence and queue it
    Seed,

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// Show job counts and recent history
    Status {
        /// Number of history entries to show per state
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Worker {
                concurrency,
                latency_ms,
                metrics_addr,
            } => {
                let overrides = WorkerOverrides {
                    concurrency,
                    latency: latency_ms.map(Duration::from_millis),
                    metrics_addr,
                };
                run_worker(config::config()?, overrides).await
            }
            Commands::Evidence { command } => evidence::execute(command).await,
            Commands::Queue {
                command: QueueCommands::Status { limit },
            } => show_queue(limit).await,
            Commands::Score { source, excerpt } => {
                show_score(&source, &excerpt);
                Ok(())
            }
            Commands::Seed => seed().await,
            Commands::Config => show_config(),
        }
    }
}

/// Open the configured store and queue
pub(crate) async fn connect() -> Result<Services> {
    let config = config::config()?;
    Services::connect(config).await
}

/// Print one evidence record
pub(crate) fn print_evidence(evidence: &Evidence) {
    println!("Evidence: {}", evidence.id);
    println!("Claim: {}", evidence.claim_id);
    println!("Source: {}", evidence.source);
    println!("Excerpt: {}", evidence.excerpt);
    if let Some(ref path) = evidence.file_path {
        println!("File: {}", path);
    }
    println!("Status: {}", evidence.status);
    match evidence.score {
        Some(score) => println!("Score: {}", score),
        None => println!("Score: -"),
    }
    if let Some(ref reason) = evidence.reason {
        println!("Reason: {}", reason);
    }
    println!("Updated: {}", evidence.updated_at);
}

/// Show queue counts and recent history
async fn show_queue(limit: usize) -> Result<()> {
    let services = connect().await?;
    let queue = services.queue.clone();

    let stats = queue.stats().await?;
    println!("Queue: {}", queue.name());
    println!(
        "waiting: {}  active: {}  completed: {}  failed: {}",
        stats.waiting, stats.active, stats.completed, stats.failed
    );

    for state in [JobState::Active, JobState::Failed, JobState::Completed] {
        let jobs = queue.jobs(state, limit).await?;
        if jobs.is_empty() {
            continue;
        }

        println!("\n{}:", state.as_str());
        println!("{:<8} {:<10} {:<9} {}", "JOB", "EVIDENCE", "ATTEMPTS", "ERROR");
        println!("{}", "-".repeat(60));
        for job in jobs {
            println!(
                "{:<8} {:<10} {:<9} {}",
                job.id,
                job.payload.get("evidenceId").map(|v| v.to_string()).unwrap_or_default(),
                job.attempts,
                job.error.unwrap_or_default()
            );
        }
    }

    drop(queue);
    services.close().await
}

/// Print the score and verdict for ad-hoc text
fn show_score(source: &str, excerpt: &str) {
    let score = score_evidence(source, excerpt);
    let verdict = Verdict::from_score(score);
    println!("Score: {}", score);
    println!("Status: {}", verdict.status);
    println!("Reason: {}", verdict.reason);
}

/// Demo evidence, queued like any other submission
const SEED_EVIDENCE: &[(i64, &str, &str)] = &[
    (1, "Livro / Sistemas", "SPOF aumenta risco; redundância reduz falhas."),
    (2, "Economia / Hayek", "O sistema de preços coordena conhecimento disperso."),
];

async fn seed() -> Result<()> {
    let services = connect().await?;
    let producer = services.producer();

    for (claim_id, source, excerpt) in SEED_EVIDENCE {
        let submission = producer
            .submit_text(*claim_id, source, excerpt)
            .await
            .with_context(|| format!("Failed to seed evidence from '{}'", source))?;
        println!(
            "Seeded evidence {} (claim {}, job {})",
            submission.evidence.id, claim_id, submission.job_id
        );
    }

    drop(producer);
    services.close().await
}

fn show_config() -> Result<()> {
    let config: &ResolvedConfig = config::config()?;

    println!("Home: {}", config.home.display());
    println!("Database: {}", config.database.display());
    match config.config_file {
        Some(ref path) => println!("Config file: {}", path.display()),
        None => println!("Config file: (none, using defaults)"),
    }
    println!("\nQueue:");
    println!("  name: {}", config.queue.name);
    println!("  max_attempts: {}", config.queue.retry.max_attempts);
    println!(
        "  backoff: {}ms x{} (max {}ms)",
        config.queue.retry.initial_delay_ms,
        config.queue.retry.backoff_multiplier,
        config.queue.retry.max_delay_ms
    );
    println!(
        "  history: {} completed, {} failed",
        config.queue.keep_completed, config.queue.keep_failed
    );
    println!("  job_timeout: {}s", config.queue.job_timeout_seconds);
    println!("  lease: {}ms", config.queue.lease().as_millis());
    println!("\nWorker:");
    println!("  concurrency: {}", config.worker.concurrency);
    println!("  simulated_latency: {}ms", config.worker.simulated_latency_ms);
    println!("  metrics_addr: {}", config.worker.metrics_addr);

    Ok(())
}
