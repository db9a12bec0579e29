use crate::config::{AnalysisConfig, Config};
use crate::controller::BatchController;
use crate::observer::{BatchEvent, BatchSummary, ChannelObserver, LogObserver};
use crate::remote::{AnalysisClient, AnalyzeResponse, AnalyzedFile, StatusOracle, StatusResponse};
use crate::types::{FileDescriptor, JobIdentity};
use anyhow::{anyhow, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Controller wired to the in-memory fakes
pub type TestController = BatchController<Arc<FakeAnalysis>, Arc<FakeOracle>>;

/// Short delays so runs finish quickly in virtual time
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.inter_job_delay_ms = 100;
    config.watchdog.restart_delay_ms = 500;
    config
}

pub fn file(path: &str) -> FileDescriptor {
    let name = path.rsplit('/').next().unwrap_or(path);
    FileDescriptor::new(name, path)
}

pub fn controller(
    analysis: Arc<FakeAnalysis>,
    oracle: Arc<FakeOracle>,
    config: Config,
) -> TestController {
    BatchController::new(analysis, oracle, config, Arc::new(LogObserver))
}

pub fn controller_with_events(
    analysis: Arc<FakeAnalysis>,
    oracle: Arc<FakeOracle>,
    config: Config,
) -> (TestController, async_channel::Receiver<BatchEvent>) {
    let (observer, events) = ChannelObserver::new(1024);
    (
        BatchController::new(analysis, oracle, config, Arc::new(observer)),
        events,
    )
}

pub async fn next_batch_end(events: &async_channel::Receiver<BatchEvent>) -> BatchSummary {
    loop {
        match events.recv().await {
            Ok(BatchEvent::BatchEnd(summary)) => return summary,
            Ok(_) => continue,
            Err(e) => panic!("event channel closed: {}", e),
        }
    }
}

/// Every batch-end summary already delivered, in order
pub fn collect_batch_ends(events: &async_channel::Receiver<BatchEvent>) -> Vec<BatchSummary> {
    let mut ends = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let BatchEvent::BatchEnd(summary) = event {
            ends.push(summary);
        }
    }
    ends
}

#[derive(Debug, Clone)]
enum Behaviour {
    Succeed,
    Fail(String),
    Unreachable,
}

/// Scripted analysis service keyed by file name
#[derive(Default)]
pub struct FakeAnalysis {
    default_delay: Duration,
    delays: HashMap<String, Duration>,
    behaviours: HashMap<String, Behaviour>,
    calls: Mutex<Vec<(String, bool)>>,
    call_tx: Option<mpsc::UnboundedSender<String>>,
}

impl FakeAnalysis {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn edit(self: Arc<Self>, f: impl FnOnce(&mut Self)) -> Arc<Self> {
        let mut fake = Arc::try_unwrap(self).unwrap_or_else(|_| panic!("fake already shared"));
        f(&mut fake);
        Arc::new(fake)
    }

    pub fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        self.edit(|fake| fake.default_delay = delay)
    }

    pub fn delay_for(self: Arc<Self>, name: &str, delay: Duration) -> Arc<Self> {
        self.edit(|fake| {
            fake.delays.insert(name.to_string(), delay);
        })
    }

    pub fn failing(self: Arc<Self>, name: &str) -> Arc<Self> {
        self.edit(|fake| {
            fake.behaviours
                .insert(name.to_string(), Behaviour::Fail("unsupported codec".to_string()));
        })
    }

    pub fn unreachable(self: Arc<Self>, name: &str) -> Arc<Self> {
        self.edit(|fake| {
            fake.behaviours.insert(name.to_string(), Behaviour::Unreachable);
        })
    }

    /// Report each call's file name as it starts
    pub fn with_call_log(self: Arc<Self>) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.edit(|fake| fake.call_tx = Some(tx)), rx)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn forced(&self) -> Vec<bool> {
        self.calls.lock().unwrap().iter().map(|(_, forced)| *forced).collect()
    }
}

impl AnalysisClient for FakeAnalysis {
    async fn analyze(
        &self,
        files: &[FileDescriptor],
        force_reanalysis: bool,
        _config: &AnalysisConfig,
    ) -> Result<AnalyzeResponse> {
        let name = files[0].name.clone();
        self.calls
            .lock()
            .unwrap()
            .push((name.clone(), force_reanalysis));
        if let Some(tx) = &self.call_tx {
            let _ = tx.send(name.clone());
        }

        let delay = self.delays.get(&name).copied().unwrap_or(self.default_delay);
        let behaviour = self
            .behaviours
            .get(&name)
            .cloned()
            .unwrap_or(Behaviour::Succeed);
        tokio::time::sleep(delay).await;

        match behaviour {
            Behaviour::Succeed => Ok(AnalyzeResponse::succeeded()),
            Behaviour::Fail(error) => Ok(AnalyzeResponse::failed(error)),
            Behaviour::Unreachable => Err(anyhow!("connection refused")),
        }
    }
}

/// Status endpoint that reports whatever paths were marked analyzed
#[derive(Default)]
pub struct FakeOracle {
    analyzed: Mutex<HashSet<String>>,
    failures_left: AtomicU32,
    calls: AtomicUsize,
}

impl FakeOracle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mark_analyzed(&self, path: &str) {
        self.analyzed.lock().unwrap().insert(path.to_string());
    }

    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StatusOracle for FakeOracle {
    async fn query_analyzed(&self, files: &[FileDescriptor]) -> Result<StatusResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(anyhow!("status endpoint unreachable"));
        }

        let requested: HashSet<_> = files.iter().map(JobIdentity::for_file).collect();
        let analyzed = self
            .analyzed
            .lock()
            .unwrap()
            .iter()
            .filter(|path| requested.contains(&JobIdentity::from_path(path)))
            .map(|path| AnalyzedFile {
                file_path: path.clone(),
            })
            .collect();
        Ok(StatusResponse {
            success: true,
            analyzed,
        })
    }
}
