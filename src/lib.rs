pub mod cli;
pub mod config;
pub mod controller;
pub mod input;
pub mod observer;
pub mod processor;
pub mod queue;
pub mod reconcile;
pub mod remote;
pub mod restart;
pub mod state;
#[cfg(test)]
mod testing;
pub mod types;
pub mod watchdog;

pub use controller::{BatchController, BatchError};
pub use queue::{AlreadyQueued, JobQueue};
pub use restart::{RestartOutcome, RestartTrigger};
pub use state::RunSnapshot;
pub use types::{AnalysisJob, FileDescriptor, JobIdentity};
