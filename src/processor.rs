use crate::controller::BatchController;
use crate::observer::{EndReason, JobOutcomeEvent, JobResolution, ProgressEvent};
use crate::remote::{AnalysisClient, StatusOracle};
use crate::types::{AnalysisJob, JobOutcome};
use std::slice;
use tokio::time::Instant;
use tracing::debug;

/// Drain `jobs` one at a time for run `run_id`.
///
/// Stop requests are observed between jobs and during the inter-job delay,
/// never during a remote call. A job that left the live queue before its turn
/// is skipped; one that left while its call was in flight has the result
/// discarded. If the run stops being current (ended by reconciliation) the
/// loop exits without touching shared state.
pub(crate) async fn run_batch<C: AnalysisClient, O: StatusOracle>(
    ctl: BatchController<C, O>,
    run_id: u64,
    jobs: Vec<AnalysisJob>,
) {
    let inner = &ctl.inner;
    let total = jobs.len();
    let mut reason = EndReason::Drained;

    for (index, job) in jobs.into_iter().enumerate() {
        {
            let mut shared = inner.shared.lock().await;
            if !shared.run.is_current(run_id) {
                debug!(run = run_id, "Run no longer active, processor exiting");
                return;
            }
            if shared.run.stop_requested {
                reason = EndReason::Stopped;
                break;
            }
            if !shared.queue.contains(&job.id) {
                debug!(run = run_id, job = %job.id, "No longer queued, skipping");
                continue;
            }
            shared.run.begin_job(&job, Instant::now());
        }

        inner.observer.on_progress(&ProgressEvent {
            run_id,
            id: job.id.clone(),
            file_name: job.file.name.clone(),
            position: index + 1,
            total,
        });

        let outcome = match inner
            .client
            .analyze(
                slice::from_ref(&job.file),
                job.is_reanalysis,
                &inner.config.analysis,
            )
            .await
        {
            Ok(response) => response.single_outcome(),
            Err(e) => JobOutcome::Failed(format!("{:#}", e)),
        };

        let counted = {
            let mut shared = inner.shared.lock().await;
            if !shared.run.is_current(run_id) {
                debug!(run = run_id, job = %job.id, "Run no longer active, discarding result");
                return;
            }
            if shared.run.is_current_job(&job.id) && shared.queue.remove(&job.id) {
                if outcome.is_success() {
                    shared.run.success_count += 1;
                } else {
                    shared.run.failure_count += 1;
                }
                shared.run.current = None;
                shared.run.record_progress(Instant::now());
                true
            } else {
                if shared.run.is_current_job(&job.id) {
                    shared.run.current = None;
                }
                false
            }
        };

        if counted {
            inner.observer.on_job_outcome(&JobOutcomeEvent {
                run_id,
                id: job.id.clone(),
                file_name: job.file.name.clone(),
                resolution: JobResolution::Analyzed(outcome),
            });
        } else {
            debug!(run = run_id, job = %job.id, "Job left the queue while in flight, discarding result");
        }

        if index + 1 == total {
            break;
        }

        // Register before checking the flag so a stop between the two still wakes us
        let notified = inner.stop_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        {
            let shared = inner.shared.lock().await;
            if !shared.run.is_current(run_id) {
                return;
            }
            if shared.run.stop_requested {
                reason = EndReason::Stopped;
                break;
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(inner.config.inter_job_delay()) => {}
            _ = &mut notified => {}
        }
    }

    // A stop that lands during the last call still reports as a stop
    if reason == EndReason::Drained {
        let shared = inner.shared.lock().await;
        if shared.run.is_current(run_id) && shared.run.stop_requested {
            reason = EndReason::Stopped;
        }
    }
    ctl.finish_run(run_id, reason).await;
}
