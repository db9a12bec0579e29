use crate::config::{reconcile_interval_in_range, Config};
use crate::config::{MAX_RECONCILE_INTERVAL_SECS, MIN_RECONCILE_INTERVAL_SECS};
use crate::observer::{BatchObserver, BatchSummary, EndReason, JobOutcomeEvent, JobResolution};
use crate::queue::AlreadyQueued;
use crate::remote::{AnalysisClient, StatusOracle};
use crate::state::{ReconciliationState, RunSnapshot, SessionTotals, Settings, Shared};
use crate::types::{AnalysisJob, FileDescriptor, JobIdentity};
use crate::{processor, reconcile, watchdog};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info};

/// Rejections from controller operations; none of them change state
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("queue is empty, nothing to analyze")]
    NoWork,
    #[error("a batch is already running")]
    AlreadyRunning,
    #[error("no batch is running")]
    NotRunning,
    #[error("no job is currently being analyzed")]
    NothingInFlight,
    #[error("reconciliation interval {requested}s is outside {min}..={max}s")]
    IntervalOutOfRange { requested: u64, min: u64, max: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LaunchOrigin {
    Operator,
    Restart,
}

pub(crate) struct Inner<C, O> {
    pub(crate) client: C,
    pub(crate) oracle: O,
    pub(crate) config: Config,
    pub(crate) observer: Arc<dyn BatchObserver>,
    pub(crate) shared: Mutex<Shared>,
    /// Signalled on stop requests and whenever a run ends
    pub(crate) stop_notify: Notify,
    /// True while a run is active or a restart is pending
    pub(crate) busy_tx: watch::Sender<bool>,
}

/// Operator-facing handle over the queue and run state. Clones share one
/// state; the lock is never held across a remote call or a sleep.
pub struct BatchController<C, O> {
    pub(crate) inner: Arc<Inner<C, O>>,
}

impl<C, O> Clone for BatchController<C, O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: AnalysisClient, O: StatusOracle> BatchController<C, O> {
    pub fn new(client: C, oracle: O, config: Config, observer: Arc<dyn BatchObserver>) -> Self {
        let settings = Settings::from_config(&config);
        let (busy_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                client,
                oracle,
                config,
                observer,
                shared: Mutex::new(Shared::new(settings)),
                stop_notify: Notify::new(),
                busy_tx,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Queue a file; duplicates are reported and leave the queue unchanged
    pub async fn enqueue(
        &self,
        file: FileDescriptor,
        force_reanalysis: bool,
    ) -> Result<JobIdentity, AlreadyQueued> {
        let mut shared = self.inner.shared.lock().await;
        match shared.queue.enqueue(file, force_reanalysis) {
            Ok(id) => {
                debug!(job = %id, queued = shared.queue.len(), "Enqueued");
                Ok(id)
            }
            Err(e) => {
                info!(job = %e.0, "Already queued, skipping");
                Err(e)
            }
        }
    }

    pub async fn remove(&self, id: &JobIdentity) -> bool {
        let mut shared = self.inner.shared.lock().await;
        shared.remove_job(id)
    }

    /// Drop every pending job. A running batch skips what is left of its
    /// snapshot and ends as drained.
    pub async fn clear_queue(&self) -> usize {
        let mut shared = self.inner.shared.lock().await;
        shared.run.current = None;
        let removed = shared.queue.clear();
        info!(removed = removed, "Cleared queue");
        removed
    }

    pub async fn queued_jobs(&self) -> Vec<AnalysisJob> {
        self.inner.shared.lock().await.queue.snapshot()
    }

    /// Start processing the current queue; returns the new run id
    pub async fn start_batch(&self) -> Result<u64, BatchError> {
        let mut shared = self.inner.shared.lock().await;
        if shared.run.running || shared.restart_pending {
            return Err(BatchError::AlreadyRunning);
        }
        if shared.queue.is_empty() {
            return Err(BatchError::NoWork);
        }
        Ok(self.launch_locked(&mut shared, LaunchOrigin::Operator))
    }

    /// Begin a run over a snapshot of the queue and arm its monitors
    pub(crate) fn launch_locked(&self, shared: &mut Shared, origin: LaunchOrigin) -> u64 {
        match origin {
            LaunchOrigin::Operator => shared.totals = SessionTotals::default(),
            LaunchOrigin::Restart => shared.fold_run_counters(),
        }
        let run_id = shared.run.begin(Instant::now());
        shared.reconcile = ReconciliationState::default();

        let jobs = shared.queue.snapshot();
        info!(run = run_id, jobs = jobs.len(), origin = ?origin, "Starting batch");

        self.arm_watchdog_locked(shared, run_id);
        if shared.settings.reconciliation_enabled {
            self.arm_poller_locked(shared, run_id);
        }
        self.inner.busy_tx.send_replace(true);

        tokio::spawn(processor::run_batch(self.clone(), run_id, jobs));
        run_id
    }

    fn arm_watchdog_locked(&self, shared: &mut Shared, run_id: u64) {
        shared.monitors.disarm_watchdog();
        shared.monitors.watchdog = Some(tokio::spawn(watchdog::run(self.clone(), run_id)));
    }

    fn arm_poller_locked(&self, shared: &mut Shared, run_id: u64) {
        shared.monitors.disarm_poller();
        shared.monitors.poller = Some(tokio::spawn(reconcile::run(self.clone(), run_id)));
    }

    /// Ask the processor to stop at its next cancellation point
    pub async fn request_stop(&self) -> Result<(), BatchError> {
        let mut shared = self.inner.shared.lock().await;
        if !shared.run.running && !shared.restart_pending {
            return Err(BatchError::NotRunning);
        }
        shared.restart_pending = false;
        if shared.run.running {
            shared.run.stop_requested = true;
        } else {
            self.inner.busy_tx.send_replace(false);
        }
        shared.monitors.disarm_all();
        self.inner.stop_notify.notify_waiters();
        info!(run = shared.run.run_id, "Stop requested");
        Ok(())
    }

    /// Abandon the job currently being analyzed, counting it as a failure
    pub async fn skip_current(&self) -> Result<JobIdentity, BatchError> {
        let mut shared = self.inner.shared.lock().await;
        if !shared.run.running {
            return Err(BatchError::NotRunning);
        }
        let run_id = shared.run.run_id;
        let job = shared
            .skip_current(Instant::now())
            .ok_or(BatchError::NothingInFlight)?;
        drop(shared);

        info!(run = run_id, file = %job.file_name, "Skipped current job");
        self.inner.observer.on_job_outcome(&JobOutcomeEvent {
            run_id,
            id: job.id.clone(),
            file_name: job.file_name,
            resolution: JobResolution::Skipped,
        });
        Ok(job.id)
    }

    pub async fn set_auto_restart(&self, enabled: bool) {
        let mut shared = self.inner.shared.lock().await;
        shared.settings.auto_restart = enabled;
        info!(enabled = enabled, "Auto-restart toggled");
    }

    pub async fn set_reconciliation_enabled(&self, enabled: bool) {
        let mut shared = self.inner.shared.lock().await;
        shared.settings.reconciliation_enabled = enabled;
        if enabled {
            if shared.run.running && !shared.run.stop_requested {
                shared.reconcile = ReconciliationState::default();
                let run_id = shared.run.run_id;
                self.arm_poller_locked(&mut shared, run_id);
            }
        } else {
            shared.monitors.disarm_poller();
        }
        info!(enabled = enabled, "Reconciliation toggled");
    }

    /// Change the poll interval; out-of-range values keep the old one
    pub async fn set_reconciliation_interval(&self, secs: u64) -> Result<(), BatchError> {
        if !reconcile_interval_in_range(secs) {
            return Err(BatchError::IntervalOutOfRange {
                requested: secs,
                min: MIN_RECONCILE_INTERVAL_SECS,
                max: MAX_RECONCILE_INTERVAL_SECS,
            });
        }
        let mut shared = self.inner.shared.lock().await;
        shared.settings.reconciliation_interval = Duration::from_secs(secs);
        info!(interval_secs = secs, "Reconciliation interval updated");
        Ok(())
    }

    pub async fn run_snapshot(&self) -> RunSnapshot {
        self.inner.shared.lock().await.snapshot(Instant::now())
    }

    /// Resolve once no run is active and no restart is pending
    pub async fn wait_until_idle(&self) {
        let mut rx = self.inner.busy_tx.subscribe();
        let _ = rx.wait_for(|busy| !*busy).await;
    }

    /// End `run_id` if it is still the active run
    pub(crate) async fn finish_run(&self, run_id: u64, reason: EndReason) -> Option<BatchSummary> {
        let mut shared = self.inner.shared.lock().await;
        if !shared.run.is_current(run_id) {
            return None;
        }
        let summary = self.end_run_locked(&mut shared, reason);
        drop(shared);
        self.announce_end(&summary);
        Some(summary)
    }

    /// Tear down the active run. The caller must hold the lock and call
    /// [`Self::announce_end`] once it is released.
    pub(crate) fn end_run_locked(&self, shared: &mut Shared, reason: EndReason) -> BatchSummary {
        shared.monitors.disarm_all();
        let summary = BatchSummary {
            run_id: shared.run.run_id,
            reason,
            success_count: shared.run.success_count,
            failure_count: shared.run.failure_count,
            remaining: shared.queue.len(),
        };
        shared.run.end();
        self.inner.busy_tx.send_replace(shared.restart_pending);
        self.inner.stop_notify.notify_waiters();
        summary
    }

    pub(crate) fn announce_end(&self, summary: &BatchSummary) {
        self.inner.observer.on_batch_end(summary);
    }
}
