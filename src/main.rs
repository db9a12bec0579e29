use anyhow::Result;
use async_channel::Receiver;
use clap::Parser;
use batch_analysis_runner::cli::Cli;
use batch_analysis_runner::config::Config;
use batch_analysis_runner::input;
use batch_analysis_runner::observer::{BatchEvent, BatchObserver, ChannelObserver, LogObserver};
use batch_analysis_runner::remote::HttpAnalysisClient;
use batch_analysis_runner::{BatchController, JobQueue};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose, rust_log.as_deref()))
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    cli.validate()?;
    let config = Config::from_cli(&cli)?;

    let files = input::collect_files(&cli)?;
    if files.is_empty() {
        anyhow::bail!("No files to analyze");
    }

    // Dry run: show what would be queued and exit
    if cli.dry_run {
        let mut queue = JobQueue::new();
        for file in files {
            if let Err(e) = queue.enqueue(file, cli.force_reanalysis) {
                warn!(job = %e.0, "Duplicate file, skipping");
            }
        }
        for job in queue.snapshot() {
            info!(
                job = %job.id,
                size = job.file.size,
                reanalysis = job.is_reanalysis,
                "Would analyze"
            );
        }
        info!(
            queued = queue.len(),
            endpoint = %config.endpoint,
            "Dry run complete - nothing was submitted"
        );
        return Ok(());
    }

    let client = HttpAnalysisClient::new(&config)?;
    let (observer, events) = ChannelObserver::new(256);
    let controller = BatchController::new(client.clone(), client, config, Arc::new(observer));

    let mut queued = 0;
    for file in files {
        if controller.enqueue(file, cli.force_reanalysis).await.is_ok() {
            queued += 1;
        }
    }

    // Presentation layer: log events as they arrive
    let live_events = events.clone();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = live_events.recv().await {
            dispatch(&LogObserver, event);
        }
    });

    // Map Ctrl+C to a cooperative stop
    let stopper = controller.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Received Ctrl+C, stopping after the current file...");
        if let Err(e) = stopper.request_stop().await {
            warn!(error = %e, "Stop request ignored");
        }
    });

    if cli.status_every > 0 {
        let status = controller.clone();
        let period = Duration::from_secs(cli.status_every);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                let snapshot = status.run_snapshot().await;
                if !snapshot.running {
                    continue;
                }
                info!(
                    runtime_secs = snapshot.runtime_seconds,
                    since_progress_secs = snapshot.seconds_since_progress,
                    current = snapshot.current_file.as_deref().unwrap_or("-"),
                    queued = snapshot.queue_length,
                    succeeded = snapshot.totals.successes,
                    failed = snapshot.totals.failures,
                    escalations = snapshot.stall_escalations,
                    reconcile_gave_up = snapshot.reconciliation_gave_up,
                    "Status"
                );
            }
        });
    }

    info!(queued = queued, "Starting batch");
    controller.start_batch().await?;
    controller.wait_until_idle().await;

    // Whatever the live task has not picked up yet is still in the channel
    event_task.abort();
    let _ = event_task.await;
    drain_events(&events, &LogObserver);

    let snapshot = controller.run_snapshot().await;
    info!(
        succeeded = snapshot.totals.successes,
        failed = snapshot.totals.failures,
        skipped = snapshot.totals.skipped,
        completed_elsewhere = snapshot.totals.reconciled,
        restarts = snapshot.totals.auto_restarts,
        remaining = snapshot.queue_length,
        "Processing complete"
    );

    Ok(())
}

/// Default level from `--verbose`; `RUST_LOG` directives replace it
fn log_filter(verbose: bool, directives: Option<&str>) -> EnvFilter {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    EnvFilter::builder()
        .with_default_directive(level.into())
        .parse_lossy(directives.unwrap_or_default())
}

fn dispatch(observer: &dyn BatchObserver, event: BatchEvent) {
    match event {
        BatchEvent::Progress(e) => observer.on_progress(&e),
        BatchEvent::JobOutcome(e) => observer.on_job_outcome(&e),
        BatchEvent::BatchEnd(s) => observer.on_batch_end(&s),
    }
}

/// Hand every buffered event to `observer`; returns how many there were
fn drain_events(events: &Receiver<BatchEvent>, observer: &dyn BatchObserver) -> usize {
    let mut drained = 0;
    while let Ok(event) = events.try_recv() {
        dispatch(observer, event);
        drained += 1;
    }
    drained
}

#[cfg(test)]
mod tests {
    use super::*;
    use batch_analysis_runner::observer::{BatchSummary, EndReason};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        ends: Mutex<Vec<EndReason>>,
    }

    impl BatchObserver for Recorder {
        fn on_batch_end(&self, summary: &BatchSummary) {
            self.ends.lock().unwrap().push(summary.reason);
        }
    }

    fn summary(reason: EndReason) -> BatchSummary {
        BatchSummary {
            run_id: 1,
            reason,
            success_count: 0,
            failure_count: 0,
            remaining: 0,
        }
    }

    #[test]
    fn test_rust_log_overrides_default_level() {
        assert_eq!(log_filter(false, Some("warn")).to_string().to_lowercase(), "warn");
        assert_eq!(log_filter(true, Some("error")).to_string().to_lowercase(), "error");
        assert_eq!(log_filter(false, None).to_string().to_lowercase(), "info");
        assert_eq!(log_filter(true, None).to_string().to_lowercase(), "debug");
    }

    #[test]
    fn test_drain_delivers_final_events() {
        let (observer, events) = ChannelObserver::new(8);
        observer.on_batch_end(&summary(EndReason::Stopped));
        observer.on_batch_end(&summary(EndReason::Drained));

        let recorder = Recorder::default();
        assert_eq!(drain_events(&events, &recorder), 2);
        assert_eq!(
            *recorder.ends.lock().unwrap(),
            vec![EndReason::Stopped, EndReason::Drained]
        );
        assert_eq!(drain_events(&events, &recorder), 0);
    }
}
