use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "batch-analysis-runner")]
#[command(about = "Drive a queue of remote media analysis jobs with stall supervision")]
#[command(version)]
pub struct Cli {
    /// JSON file containing an array of file descriptors to enqueue
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Enqueue local files matching a glob pattern (repeatable)
    #[arg(short, long)]
    pub glob: Vec<String>,

    /// JSON config file (CLI flags override its values)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Base URL of the analysis service
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Re-analyze files even if they already have results
    #[arg(short, long)]
    pub force_reanalysis: bool,

    /// Reconciliation poll interval in seconds (30-600)
    #[arg(long)]
    pub reconcile_interval: Option<u64>,

    /// Disable reconciliation against the status endpoint
    #[arg(long)]
    pub no_reconcile: bool,

    /// Disable watchdog restarts and overrun skips
    #[arg(long)]
    pub no_auto_restart: bool,

    /// Delay between jobs in milliseconds
    #[arg(long)]
    pub inter_job_delay_ms: Option<u64>,

    /// Seconds between status lines while a batch runs (0 disables)
    #[arg(long, default_value = "15")]
    pub status_every: u64,

    /// Build the queue and print it without contacting the service
    #[arg(long)]
    pub dry_run: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Validate that there is something to enqueue
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.input.is_none() && self.glob.is_empty() {
            anyhow::bail!("at least one of --input or --glob is required");
        }
        Ok(())
    }
}
