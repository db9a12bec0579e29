use crate::controller::BatchController;
use crate::observer::{EndReason, JobOutcomeEvent, JobResolution};
use crate::remote::{AnalysisClient, StatusOracle};
use crate::types::JobIdentity;
use anyhow::anyhow;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Periodic poll for run `run_id`; the interval is re-read before each sleep.
///
/// Files analyzed outside this runner are dropped from the queue. They count
/// as liveness but not as successes or failures. Failed polls are tolerated up
/// to `max_attempts` per run, then the poller disables itself.
pub(crate) async fn run<C: AnalysisClient, O: StatusOracle>(
    ctl: BatchController<C, O>,
    run_id: u64,
) {
    loop {
        let interval = {
            let shared = ctl.inner.shared.lock().await;
            if !shared.run.is_current(run_id) {
                return;
            }
            shared.settings.reconciliation_interval
        };
        tokio::time::sleep(interval).await;

        if !poll_once(&ctl, run_id).await {
            debug!(run = run_id, "Reconciliation poller disarmed");
            return;
        }
    }
}

/// One reconciliation tick. Returns false when the poller should stop.
pub(crate) async fn poll_once<C: AnalysisClient, O: StatusOracle>(
    ctl: &BatchController<C, O>,
    run_id: u64,
) -> bool {
    let inner = &ctl.inner;
    let files = {
        let mut shared = inner.shared.lock().await;
        if !shared.run.is_current(run_id) || shared.run.stop_requested {
            return false;
        }
        shared.reconcile.last_poll_at = Some(Instant::now());
        // Emptied by a clear or skip, not by reconciliation
        if shared.queue.is_empty() {
            let summary = ctl.end_run_locked(&mut shared, EndReason::Drained);
            drop(shared);
            ctl.announce_end(&summary);
            return false;
        }
        shared.queue.files()
    };

    let response = match inner.oracle.query_analyzed(&files).await {
        Ok(response) if response.success => Ok(response),
        Ok(_) => Err(anyhow!("status endpoint reported failure")),
        Err(e) => Err(e),
    };

    let mut shared = inner.shared.lock().await;
    if !shared.run.is_current(run_id) || shared.run.stop_requested {
        return false;
    }

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            shared.reconcile.attempts += 1;
            let max = inner.config.reconciliation.max_attempts;
            warn!(
                run = run_id,
                attempt = shared.reconcile.attempts,
                max = max,
                error = %format!("{:#}", e),
                "Reconciliation poll failed"
            );
            if shared.reconcile.attempts >= max {
                warn!(run = run_id, "Disabling reconciliation for the rest of this run");
                shared.reconcile.gave_up = true;
                // Dropping the handle detaches this task; it returns right after
                shared.monitors.poller = None;
                return false;
            }
            return true;
        }
    };

    let now = Instant::now();
    let mut completed = Vec::new();
    for analyzed in &response.analyzed {
        let id = JobIdentity::from_path(&analyzed.file_path);
        let Some(name) = shared.queue.get(&id).map(|job| job.file.name.clone()) else {
            continue;
        };
        if shared.remove_job(&id) {
            completed.push((id, name));
        }
    }

    if !completed.is_empty() {
        shared.totals.reconciled += completed.len();
        shared.run.record_progress(now);
        info!(
            run = run_id,
            completed = completed.len(),
            remaining = shared.queue.len(),
            "Removed files analyzed elsewhere"
        );
    }

    let summary = if shared.queue.is_empty() {
        info!(run = run_id, "Queue emptied by reconciliation, ending batch");
        Some(ctl.end_run_locked(&mut shared, EndReason::Reconciled))
    } else {
        None
    };
    drop(shared);

    for (id, file_name) in completed {
        inner.observer.on_job_outcome(&JobOutcomeEvent {
            run_id,
            id,
            file_name,
            resolution: JobResolution::CompletedExternally,
        });
    }

    match summary {
        Some(summary) => {
            ctl.announce_end(&summary);
            false
        }
        None => true,
    }
}
