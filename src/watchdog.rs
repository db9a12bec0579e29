use crate::config::WatchdogConfig;
use crate::controller::BatchController;
use crate::observer::{JobOutcomeEvent, JobResolution};
use crate::remote::{AnalysisClient, StatusOracle};
use crate::restart::RestartTrigger;
use crate::state::{CurrentJob, Shared};
use tokio::time::Instant;
use tracing::{debug, error, warn};

#[derive(Debug)]
pub(crate) enum WatchdogAction {
    None,
    Restart,
    Skipped(CurrentJob),
}

/// Periodic check for run `run_id`; exits once the run is no longer active
pub(crate) async fn run<C: AnalysisClient, O: StatusOracle>(
    ctl: BatchController<C, O>,
    run_id: u64,
) {
    let policy = ctl.inner.config.watchdog.clone();
    loop {
        tokio::time::sleep(policy.check_interval()).await;

        let action = {
            let mut shared = ctl.inner.shared.lock().await;
            if !shared.run.is_current(run_id) || shared.run.stop_requested {
                debug!(run = run_id, "Watchdog disarmed");
                return;
            }
            evaluate(&mut shared, &policy, Instant::now())
        };

        match action {
            WatchdogAction::None => {}
            WatchdogAction::Restart => {
                let ctl = ctl.clone();
                tokio::spawn(async move {
                    if let Err(e) = ctl.restart_with(RestartTrigger::Watchdog).await {
                        error!(error = %e, "Watchdog restart failed");
                    }
                });
                return;
            }
            WatchdogAction::Skipped(job) => {
                ctl.inner.observer.on_job_outcome(&JobOutcomeEvent {
                    run_id,
                    id: job.id,
                    file_name: job.file_name,
                    resolution: JobResolution::Skipped,
                });
            }
        }
    }
}

/// One watchdog tick against the shared state.
///
/// A global stall escalates once per tick and restarts the run after
/// `escalation_threshold` escalations, while the restart budget lasts. Past
/// the budget it skips the current job instead. A single job current for
/// longer than `max_file_processing` is skipped on its own. Both remedies
/// need auto-restart enabled.
pub(crate) fn evaluate(shared: &mut Shared, policy: &WatchdogConfig, now: Instant) -> WatchdogAction {
    let since_progress = shared.run.since_progress(now);
    if since_progress > policy.max_stall() {
        shared.run.stall_escalations += 1;
        warn!(
            run = shared.run.run_id,
            since_progress_secs = since_progress.as_secs(),
            escalations = shared.run.stall_escalations,
            "No progress"
        );

        if shared.run.stall_escalations >= policy.escalation_threshold && shared.settings.auto_restart
        {
            if shared.totals.auto_restarts < policy.max_auto_restarts {
                shared.totals.auto_restarts += 1;
                warn!(
                    run = shared.run.run_id,
                    restart = shared.totals.auto_restarts,
                    max = policy.max_auto_restarts,
                    "Stall persisted, restarting batch"
                );
                return WatchdogAction::Restart;
            }
            if let Some(job) = shared.skip_current(now) {
                warn!(
                    run = shared.run.run_id,
                    file = %job.file_name,
                    "Restart budget exhausted, skipping current job"
                );
                return WatchdogAction::Skipped(job);
            }
        }
    }

    if shared.settings.auto_restart {
        let overrun = shared
            .run
            .current
            .as_ref()
            .map(|job| now.saturating_duration_since(job.started_at))
            .filter(|elapsed| *elapsed > policy.max_file_processing());
        if let Some(elapsed) = overrun {
            if let Some(job) = shared.skip_current(now) {
                warn!(
                    run = shared.run.run_id,
                    file = %job.file_name,
                    elapsed_secs = elapsed.as_secs(),
                    "Job exceeded processing limit, skipping"
                );
                return WatchdogAction::Skipped(job);
            }
        }
    }

    WatchdogAction::None
}
