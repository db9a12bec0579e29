use crate::types::{JobIdentity, JobOutcome};
use serde::Serialize;
use tracing::{info, warn};

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Every snapshot entry was processed or skipped
    Drained,
    /// Stop was requested (by the operator or a restart)
    Stopped,
    /// Reconciliation emptied the queue
    Reconciled,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub run_id: u64,
    pub reason: EndReason,
    pub success_count: usize,
    pub failure_count: usize,
    /// Jobs still queued when the run ended
    pub remaining: usize,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub run_id: u64,
    pub id: JobIdentity,
    pub file_name: String,
    /// 1-based position in the run's snapshot
    pub position: usize,
    pub total: usize,
}

/// How a job left the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResolution {
    Analyzed(JobOutcome),
    /// Dropped by the watchdog or the operator
    Skipped,
    /// Reported as analyzed by the status endpoint
    CompletedExternally,
}

#[derive(Debug, Clone)]
pub struct JobOutcomeEvent {
    pub run_id: u64,
    pub id: JobIdentity,
    pub file_name: String,
    pub resolution: JobResolution,
}

/// Receives batch events; called without any lock held
pub trait BatchObserver: Send + Sync {
    fn on_progress(&self, _event: &ProgressEvent) {}
    fn on_job_outcome(&self, _event: &JobOutcomeEvent) {}
    fn on_batch_end(&self, _summary: &BatchSummary) {}
}

/// Observer that writes every event to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl BatchObserver for LogObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        info!(
            run = event.run_id,
            file = %event.file_name,
            position = event.position,
            total = event.total,
            "Analyzing"
        );
    }

    fn on_job_outcome(&self, event: &JobOutcomeEvent) {
        match &event.resolution {
            JobResolution::Analyzed(JobOutcome::Succeeded) => {
                info!(run = event.run_id, file = %event.file_name, "Analysis complete")
            }
            JobResolution::Analyzed(JobOutcome::Failed(error)) => {
                warn!(run = event.run_id, file = %event.file_name, error = %error, "Analysis failed")
            }
            JobResolution::Skipped => {
                warn!(run = event.run_id, file = %event.file_name, "Job skipped")
            }
            JobResolution::CompletedExternally => {
                info!(run = event.run_id, file = %event.file_name, "Already analyzed elsewhere")
            }
        }
    }

    fn on_batch_end(&self, summary: &BatchSummary) {
        info!(
            run = summary.run_id,
            reason = ?summary.reason,
            succeeded = summary.success_count,
            failed = summary.failure_count,
            remaining = summary.remaining,
            "Batch ended"
        );
    }
}

#[derive(Debug, Clone)]
pub enum BatchEvent {
    Progress(ProgressEvent),
    JobOutcome(JobOutcomeEvent),
    BatchEnd(BatchSummary),
}

/// Forwards events to an async channel for a presentation layer
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: async_channel::Sender<BatchEvent>,
}

impl ChannelObserver {
    pub fn new(capacity: usize) -> (Self, async_channel::Receiver<BatchEvent>) {
        let (tx, rx) = async_channel::bounded(capacity);
        (Self { tx }, rx)
    }

    fn forward(&self, event: BatchEvent) {
        // A slow or departed subscriber never blocks the batch
        if let Err(e) = self.tx.try_send(event) {
            if e.is_full() {
                warn!("Event channel full, dropping batch event");
            }
        }
    }
}

impl BatchObserver for ChannelObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        self.forward(BatchEvent::Progress(event.clone()));
    }

    fn on_job_outcome(&self, event: &JobOutcomeEvent) {
        self.forward(BatchEvent::JobOutcome(event.clone()));
    }

    fn on_batch_end(&self, summary: &BatchSummary) {
        self.forward(BatchEvent::BatchEnd(summary.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_observer_forwards_in_order() {
        let (observer, rx) = ChannelObserver::new(8);
        observer.on_progress(&ProgressEvent {
            run_id: 1,
            id: JobIdentity::from_path("a.mp4"),
            file_name: "a.mp4".to_string(),
            position: 1,
            total: 1,
        });
        observer.on_batch_end(&BatchSummary {
            run_id: 1,
            reason: EndReason::Drained,
            success_count: 1,
            failure_count: 0,
            remaining: 0,
        });

        assert!(matches!(rx.try_recv().unwrap(), BatchEvent::Progress(_)));
        match rx.try_recv().unwrap() {
            BatchEvent::BatchEnd(summary) => assert_eq!(summary.reason, EndReason::Drained),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_channel_observer_drops_when_full() {
        let (observer, rx) = ChannelObserver::new(1);
        let summary = BatchSummary {
            run_id: 1,
            reason: EndReason::Stopped,
            success_count: 0,
            failure_count: 0,
            remaining: 2,
        };
        observer.on_batch_end(&summary);
        observer.on_batch_end(&summary);
        assert_eq!(rx.len(), 1);

        drop(rx);
        observer.on_batch_end(&summary);
    }
}
