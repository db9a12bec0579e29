use crate::cli::Cli;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Lower bound for the reconciliation poll interval
pub const MIN_RECONCILE_INTERVAL_SECS: u64 = 30;
/// Upper bound for the reconciliation poll interval
pub const MAX_RECONCILE_INTERVAL_SECS: u64 = 600;

/// Options forwarded untouched with every analyze request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Service-specific options
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Stall detection and restart policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// How often the watchdog checks for progress
    pub check_interval_secs: u64,
    /// Time without any job outcome before a check escalates
    pub max_stall_secs: u64,
    /// Time a single job may stay current before it is skipped
    pub max_file_processing_secs: u64,
    /// Escalations needed before a restart
    pub escalation_threshold: u32,
    /// Allow the watchdog to restart runs and skip overrunning jobs
    pub auto_restart: bool,
    /// Watchdog restarts allowed per operator-started session
    pub max_auto_restarts: u32,
    /// Grace period for the old loop to exit during a restart
    pub restart_delay_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 30,
            max_stall_secs: 300,
            max_file_processing_secs: 600,
            escalation_threshold: 2,
            auto_restart: true,
            max_auto_restarts: 3,
            restart_delay_ms: 2000,
        }
    }
}

impl WatchdogConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn max_stall(&self) -> Duration {
        Duration::from_secs(self.max_stall_secs)
    }

    pub fn max_file_processing(&self) -> Duration {
        Duration::from_secs(self.max_file_processing_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

/// Polling of the external status endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Failed polls tolerated before polling is disabled for the run
    pub max_attempts: u32,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 120,
            max_attempts: 3,
        }
    }
}

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the analysis service
    pub endpoint: String,
    /// Timeout for a single HTTP request
    pub request_timeout_secs: u64,
    /// Pause between consecutive jobs
    pub inter_job_delay_ms: u64,
    pub analysis: AnalysisConfig,
    pub watchdog: WatchdogConfig,
    pub reconciliation: ReconciliationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/api".to_string(),
            request_timeout_secs: 900,
            inter_job_delay_ms: 1000,
            analysis: AnalysisConfig::default(),
            watchdog: WatchdogConfig::default(),
            reconciliation: ReconciliationConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Build the effective config: file (or defaults) with CLI overrides
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let base = match cli.config {
            Some(ref path) => Self::load(path)?,
            None => Self::default(),
        };
        let config = base.merge_with_cli(cli);
        config.validate()?;
        Ok(config)
    }

    /// Merge CLI args over loaded config
    /// CLI args win if explicitly provided
    pub fn merge_with_cli(mut self, cli: &Cli) -> Self {
        if let Some(ref endpoint) = cli.endpoint {
            self.endpoint = endpoint.clone();
        }
        if let Some(secs) = cli.reconcile_interval {
            self.reconciliation.interval_secs = secs;
        }
        if cli.no_reconcile {
            self.reconciliation.enabled = false;
        }
        if cli.no_auto_restart {
            self.watchdog.auto_restart = false;
        }
        if let Some(delay) = cli.inter_job_delay_ms {
            self.inter_job_delay_ms = delay;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.watchdog.check_interval_secs == 0 {
            anyhow::bail!("watchdog.check_interval_secs must be at least 1");
        }
        if self.watchdog.escalation_threshold == 0 {
            anyhow::bail!("watchdog.escalation_threshold must be at least 1");
        }
        if !reconcile_interval_in_range(self.reconciliation.interval_secs) {
            anyhow::bail!(
                "reconciliation.interval_secs must be within {}..={} (got {})",
                MIN_RECONCILE_INTERVAL_SECS,
                MAX_RECONCILE_INTERVAL_SECS,
                self.reconciliation.interval_secs
            );
        }
        if self.endpoint.trim().is_empty() {
            anyhow::bail!("endpoint must not be empty");
        }
        Ok(())
    }

    pub fn inter_job_delay(&self) -> Duration {
        Duration::from_millis(self.inter_job_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

pub fn reconcile_interval_in_range(secs: u64) -> bool {
    (MIN_RECONCILE_INTERVAL_SECS..=MAX_RECONCILE_INTERVAL_SECS).contains(&secs)
}
