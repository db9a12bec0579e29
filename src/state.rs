use crate::config::Config;
use crate::queue::JobQueue;
use crate::types::{AnalysisJob, JobIdentity};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Job currently handed to the analysis client
#[derive(Debug, Clone)]
pub struct CurrentJob {
    pub id: JobIdentity,
    pub file_name: String,
    pub started_at: Instant,
}

/// Coordination flags for the active (or last) run
#[derive(Debug, Default)]
pub struct RunState {
    pub running: bool,
    pub stop_requested: bool,
    /// Incremented on every run start; stale tasks compare against it
    pub run_id: u64,
    pub started_at: Option<Instant>,
    pub started_wall: Option<DateTime<Utc>>,
    pub last_progress_at: Option<Instant>,
    pub current: Option<CurrentJob>,
    pub stall_escalations: u32,
    pub success_count: usize,
    pub failure_count: usize,
}

impl RunState {
    /// Reset for a new run and return its id
    pub fn begin(&mut self, now: Instant) -> u64 {
        self.run_id += 1;
        self.running = true;
        self.stop_requested = false;
        self.started_at = Some(now);
        self.started_wall = Some(Utc::now());
        self.last_progress_at = Some(now);
        self.current = None;
        self.stall_escalations = 0;
        self.success_count = 0;
        self.failure_count = 0;
        self.run_id
    }

    /// Back to idle; counters stay readable until the next run
    pub fn end(&mut self) {
        self.running = false;
        self.stop_requested = false;
        self.current = None;
        self.stall_escalations = 0;
    }

    pub fn is_current(&self, run_id: u64) -> bool {
        self.running && self.run_id == run_id
    }

    pub fn begin_job(&mut self, job: &AnalysisJob, now: Instant) {
        self.current = Some(CurrentJob {
            id: job.id.clone(),
            file_name: job.file.name.clone(),
            started_at: now,
        });
        self.last_progress_at = Some(now);
    }

    pub fn is_current_job(&self, id: &JobIdentity) -> bool {
        self.current.as_ref().is_some_and(|job| &job.id == id)
    }

    /// Any terminal outcome counts as liveness
    pub fn record_progress(&mut self, now: Instant) {
        self.last_progress_at = Some(now);
        self.stall_escalations = 0;
    }

    pub fn since_progress(&self, now: Instant) -> Duration {
        self.last_progress_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct ReconciliationState {
    pub attempts: u32,
    pub last_poll_at: Option<Instant>,
    /// Set once the failure budget is spent; cleared on the next run
    pub gave_up: bool,
}

/// Operator-adjustable switches
#[derive(Debug, Clone)]
pub struct Settings {
    pub auto_restart: bool,
    pub reconciliation_enabled: bool,
    pub reconciliation_interval: Duration,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            auto_restart: config.watchdog.auto_restart,
            reconciliation_enabled: config.reconciliation.enabled,
            reconciliation_interval: Duration::from_secs(config.reconciliation.interval_secs),
        }
    }
}

/// Counts accumulated across restarts, reset when the operator starts a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTotals {
    pub successes: usize,
    pub failures: usize,
    pub skipped: usize,
    pub reconciled: usize,
    pub auto_restarts: u32,
}

/// Handles of the periodic tasks armed for the current run
#[derive(Debug, Default)]
pub struct Monitors {
    pub watchdog: Option<JoinHandle<()>>,
    pub poller: Option<JoinHandle<()>>,
}

impl Monitors {
    pub fn disarm_watchdog(&mut self) {
        if let Some(handle) = self.watchdog.take() {
            handle.abort();
        }
    }

    pub fn disarm_poller(&mut self) {
        if let Some(handle) = self.poller.take() {
            handle.abort();
        }
    }

    pub fn disarm_all(&mut self) {
        self.disarm_watchdog();
        self.disarm_poller();
    }

    pub fn any_armed(&self) -> bool {
        self.watchdog.is_some() || self.poller.is_some()
    }
}

/// Everything the processor, watchdog and poller mutate
#[derive(Debug)]
pub struct Shared {
    pub queue: JobQueue,
    pub run: RunState,
    pub reconcile: ReconciliationState,
    pub settings: Settings,
    pub totals: SessionTotals,
    pub monitors: Monitors,
    /// A restart is waiting for the old loop to exit
    pub restart_pending: bool,
}

impl Shared {
    pub fn new(settings: Settings) -> Self {
        Self {
            queue: JobQueue::new(),
            run: RunState::default(),
            reconcile: ReconciliationState::default(),
            settings,
            totals: SessionTotals::default(),
            monitors: Monitors::default(),
            restart_pending: false,
        }
    }

    /// Remove a queued job; if it is in flight its late result is discarded
    pub fn remove_job(&mut self, id: &JobIdentity) -> bool {
        let removed = self.queue.remove(id);
        if removed && self.run.is_current_job(id) {
            self.run.current = None;
        }
        removed
    }

    /// Move the current run's counters into the session totals
    pub fn fold_run_counters(&mut self) {
        self.totals.successes += self.run.success_count;
        self.totals.failures += self.run.failure_count;
        self.run.success_count = 0;
        self.run.failure_count = 0;
    }

    /// Drop the current job from the queue as a forced failure
    pub fn skip_current(&mut self, now: Instant) -> Option<CurrentJob> {
        let job = self.run.current.take()?;
        if self.queue.remove(&job.id) {
            self.run.failure_count += 1;
            self.totals.skipped += 1;
        }
        self.run.record_progress(now);
        Some(job)
    }

    pub fn snapshot(&self, now: Instant) -> RunSnapshot {
        let running = self.run.running;
        RunSnapshot {
            running,
            runtime_seconds: match self.run.started_at {
                Some(at) if running => now.saturating_duration_since(at).as_secs(),
                _ => 0,
            },
            seconds_since_progress: if running {
                self.run.since_progress(now).as_secs()
            } else {
                0
            },
            current_file: self.run.current.as_ref().map(|job| job.file_name.clone()),
            queue_length: self.queue.len(),
            stall_escalations: self.run.stall_escalations,
            auto_restart_enabled: self.settings.auto_restart,
            reconciliation_enabled: self.settings.reconciliation_enabled,
            reconciliation_interval_secs: self.settings.reconciliation_interval.as_secs(),
            reconciliation_gave_up: self.reconcile.gave_up,
            seconds_since_poll: self
                .reconcile
                .last_poll_at
                .map(|at| now.saturating_duration_since(at).as_secs()),
            success_count: self.run.success_count,
            failure_count: self.run.failure_count,
            totals: SessionTotals {
                successes: self.totals.successes + self.run.success_count,
                failures: self.totals.failures + self.run.failure_count,
                ..self.totals
            },
            started_at: self.run.started_wall,
        }
    }
}

/// Read-only projection of the run for a presentation layer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub running: bool,
    pub runtime_seconds: u64,
    pub seconds_since_progress: u64,
    pub current_file: Option<String>,
    pub queue_length: usize,
    pub stall_escalations: u32,
    pub auto_restart_enabled: bool,
    pub reconciliation_enabled: bool,
    pub reconciliation_interval_secs: u64,
    /// The status endpoint failed too often and polling stopped for this run
    pub reconciliation_gave_up: bool,
    pub seconds_since_poll: Option<u64>,
    /// Counters of the current run only
    pub success_count: usize,
    pub failure_count: usize,
    /// Session totals including the current run
    pub totals: SessionTotals,
    pub started_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileDescriptor;

    #[tokio::test(start_paused = true)]
    async fn test_begin_resets_run_counters() {
        let mut run = RunState::default();
        run.success_count = 4;
        run.failure_count = 1;
        run.stall_escalations = 2;

        let first = run.begin(Instant::now());
        let second = run.begin(Instant::now());
        assert_eq!(second, first + 1);
        assert_eq!(run.success_count, 0);
        assert_eq!(run.failure_count, 0);
        assert_eq!(run.stall_escalations, 0);
        assert!(run.is_current(second));
        assert!(!run.is_current(first));
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_clears_current_and_escalations() {
        let mut run = RunState::default();
        let id = run.begin(Instant::now());
        let job = AnalysisJob::new(FileDescriptor::new("a.mp4", "a.mp4"), false);
        run.begin_job(&job, Instant::now());
        run.stall_escalations = 1;
        run.success_count = 3;

        run.end();
        assert!(!run.is_current(id));
        assert!(run.current.is_none());
        assert_eq!(run.stall_escalations, 0);
        assert_eq!(run.success_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_current_counts_failure_and_progress() {
        let mut shared = Shared::new(Settings::from_config(&Config::default()));
        let id = shared
            .queue
            .enqueue(FileDescriptor::new("a.mp4", "a.mp4"), false)
            .unwrap();
        shared.run.begin(Instant::now());
        let job = shared.queue.snapshot().remove(0);
        shared.run.begin_job(&job, Instant::now());
        shared.run.stall_escalations = 1;

        tokio::time::advance(Duration::from_secs(10)).await;
        let skipped = shared.skip_current(Instant::now()).unwrap();
        assert_eq!(skipped.id, id);
        assert!(shared.queue.is_empty());
        assert_eq!(shared.run.failure_count, 1);
        assert_eq!(shared.run.stall_escalations, 0);
        assert_eq!(shared.run.since_progress(Instant::now()), Duration::ZERO);
        assert!(shared.skip_current(Instant::now()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_totals_include_current_run() {
        let mut shared = Shared::new(Settings::from_config(&Config::default()));
        shared.run.begin(Instant::now());
        shared.run.success_count = 2;
        shared.fold_run_counters();
        shared.run.begin(Instant::now());
        shared.run.success_count = 1;
        shared.run.failure_count = 1;

        tokio::time::advance(Duration::from_secs(42)).await;
        let snapshot = shared.snapshot(Instant::now());
        assert!(snapshot.running);
        assert_eq!(snapshot.runtime_seconds, 42);
        assert_eq!(snapshot.success_count, 1);
        assert_eq!(snapshot.totals.successes, 3);
        assert_eq!(snapshot.totals.failures, 1);
        assert!(!snapshot.reconciliation_gave_up);
        assert_eq!(snapshot.seconds_since_poll, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_reports_reconciliation_health() {
        let mut shared = Shared::new(Settings::from_config(&Config::default()));
        shared.run.begin(Instant::now());
        shared.reconcile.last_poll_at = Some(Instant::now());
        shared.reconcile.gave_up = true;

        tokio::time::advance(Duration::from_secs(15)).await;
        let snapshot = shared.snapshot(Instant::now());
        assert!(snapshot.reconciliation_gave_up);
        assert_eq!(snapshot.seconds_since_poll, Some(15));
    }
}
