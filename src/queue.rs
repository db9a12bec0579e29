use crate::types::{AnalysisJob, FileDescriptor, JobIdentity};
use std::collections::{HashSet, VecDeque};
use thiserror::Error;

/// Returned when a file is enqueued while a job for it is already pending
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("already queued: {0}")]
pub struct AlreadyQueued(pub JobIdentity);

/// FIFO of pending analysis jobs, unique by identity
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: VecDeque<AnalysisJob>,
    ids: HashSet<JobIdentity>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job for `file` unless one with the same identity is queued
    pub fn enqueue(
        &mut self,
        file: FileDescriptor,
        force_reanalysis: bool,
    ) -> Result<JobIdentity, AlreadyQueued> {
        let job = AnalysisJob::new(file, force_reanalysis);
        if !self.ids.insert(job.id.clone()) {
            return Err(AlreadyQueued(job.id));
        }
        let id = job.id.clone();
        self.jobs.push_back(job);
        Ok(id)
    }

    /// Remove a job by identity, returning whether it was present
    pub fn remove(&mut self, id: &JobIdentity) -> bool {
        if !self.ids.remove(id) {
            return false;
        }
        self.jobs.retain(|job| &job.id != id);
        true
    }

    /// Empty the queue, returning how many jobs were dropped
    pub fn clear(&mut self) -> usize {
        let count = self.jobs.len();
        self.jobs.clear();
        self.ids.clear();
        count
    }

    /// Copy of the pending jobs in FIFO order
    pub fn snapshot(&self) -> Vec<AnalysisJob> {
        self.jobs.iter().cloned().collect()
    }

    pub fn contains(&self, id: &JobIdentity) -> bool {
        self.ids.contains(id)
    }

    pub fn get(&self, id: &JobIdentity) -> Option<&AnalysisJob> {
        if !self.contains(id) {
            return None;
        }
        self.jobs.iter().find(|job| &job.id == id)
    }

    /// Descriptors of every queued file, for status queries
    pub fn files(&self) -> Vec<FileDescriptor> {
        self.jobs.iter().map(|job| job.file.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str) -> FileDescriptor {
        let name = path.rsplit('/').next().unwrap_or(path);
        FileDescriptor::new(name, path)
    }

    #[test]
    fn test_enqueue_rejects_duplicates() {
        let mut queue = JobQueue::new();
        let id = queue.enqueue(file("show/a.mp4"), false).unwrap();

        let err = queue.enqueue(file("/show//a.mp4"), true).unwrap_err();
        assert_eq!(err, AlreadyQueued(id));
        assert_eq!(queue.len(), 1);
        // First enqueue wins; the duplicate's flag is ignored
        assert!(!queue.snapshot()[0].is_reanalysis);
    }

    #[test]
    fn test_no_duplicates_across_mixed_operations() {
        let mut queue = JobQueue::new();
        let paths = ["a.mp4", "b.mp4", "a.mp4", "c.mp4", "b.mp4", "./a.mp4"];
        for path in paths {
            let _ = queue.enqueue(file(path), false);
        }
        queue.remove(&JobIdentity::from_path("b.mp4"));
        for path in paths {
            let _ = queue.enqueue(file(path), false);
        }

        let ids: Vec<_> = queue.snapshot().into_iter().map(|j| j.id).collect();
        let unique: HashSet<_> = ids.iter().cloned().collect();
        assert_eq!(ids.len(), unique.len());
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_fifo_order_and_remove() {
        let mut queue = JobQueue::new();
        for path in ["a.mp4", "b.mp4", "c.mp4"] {
            queue.enqueue(file(path), false).unwrap();
        }

        assert!(queue.remove(&JobIdentity::from_path("b.mp4")));
        assert!(!queue.remove(&JobIdentity::from_path("b.mp4")));

        let names: Vec<_> = queue.snapshot().into_iter().map(|j| j.file.name).collect();
        assert_eq!(names, vec!["a.mp4", "c.mp4"]);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut queue = JobQueue::new();
        queue.enqueue(file("a.mp4"), false).unwrap();
        let snapshot = queue.snapshot();

        queue.clear();
        assert_eq!(snapshot.len(), 1);
        assert!(queue.is_empty());
        assert!(!queue.contains(&snapshot[0].id));
    }

    #[test]
    fn test_clear_reports_count() {
        let mut queue = JobQueue::new();
        queue.enqueue(file("a.mp4"), false).unwrap();
        queue.enqueue(file("b.mp4"), false).unwrap();
        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.clear(), 0);
        // Cleared identities can be queued again
        assert!(queue.enqueue(file("a.mp4"), false).is_ok());
    }
}
