use crate::controller::{BatchController, BatchError, LaunchOrigin};
use crate::remote::{AnalysisClient, StatusOracle};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartTrigger {
    Manual,
    Watchdog,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartOutcome {
    /// A fresh run was started over the remaining queue
    Relaunched { run_id: u64, queued: usize },
    /// Nothing was left to process
    Idle,
    /// A stop request arrived before the relaunch
    Cancelled,
    /// Another restart was already in progress
    AlreadyPending,
}

impl<C: AnalysisClient, O: StatusOracle> BatchController<C, O> {
    /// Stop the active run and relaunch over whatever is still queued
    pub async fn restart(&self) -> Result<RestartOutcome, BatchError> {
        self.restart_with(RestartTrigger::Manual).await
    }

    pub(crate) async fn restart_with(
        &self,
        trigger: RestartTrigger,
    ) -> Result<RestartOutcome, BatchError> {
        let old_run = {
            let mut shared = self.inner.shared.lock().await;
            if shared.restart_pending {
                return Ok(RestartOutcome::AlreadyPending);
            }
            if !shared.run.running {
                return Err(BatchError::NotRunning);
            }
            shared.restart_pending = true;
            shared.run.stop_requested = true;
            shared.monitors.disarm_all();
            shared.run.run_id
        };
        self.inner.stop_notify.notify_waiters();
        info!(run = old_run, trigger = ?trigger, "Restarting batch");

        tokio::time::sleep(self.inner.config.watchdog.restart_delay()).await;

        // An in-flight call is never interrupted; the old loop exits once it returns
        let mut shared = loop {
            let ended = self.inner.stop_notify.notified();
            tokio::pin!(ended);
            ended.as_mut().enable();

            let shared = self.inner.shared.lock().await;
            if !shared.restart_pending {
                info!(run = old_run, "Restart cancelled by stop request");
                return Ok(RestartOutcome::Cancelled);
            }
            if !shared.run.running {
                break shared;
            }
            debug!(run = old_run, "Waiting for the in-flight call to return");
            drop(shared);
            ended.await;
        };

        let outcome = if shared.queue.is_empty() {
            info!("Queue empty after restart, going idle");
            RestartOutcome::Idle
        } else {
            let queued = shared.queue.len();
            let run_id = self.launch_locked(&mut shared, LaunchOrigin::Restart);
            RestartOutcome::Relaunched { run_id, queued }
        };
        shared.restart_pending = false;
        self.inner.busy_tx.send_replace(shared.run.running);
        Ok(outcome)
    }
}
