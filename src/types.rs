use serde::{Deserialize, Serialize};
use std::fmt;

/// A file on a remote store, as reported by the last scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    /// Display name of the file
    pub name: String,
    /// Logical path on the remote store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Size in bytes
    #[serde(default)]
    pub size: u64,
    /// Whether the last scan saw an existing analysis for this file
    #[serde(default)]
    pub already_analyzed: bool,
}

impl FileDescriptor {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: Some(path.into()),
            size: 0,
            already_analyzed: false,
        }
    }

    /// Path used for identity and display, falling back to the name
    pub fn logical_path(&self) -> &str {
        match self.path.as_deref() {
            Some(path) if !path.trim().is_empty() => path,
            _ => &self.name,
        }
    }
}

/// Stable key for a job, derived from the file's normalized logical path.
///
/// Separators are unified to `/`, empty and `.` segments are dropped, and
/// leading or trailing slashes are ignored, so `/media//a.mp4`,
/// `media\a.mp4` and `media/./a.mp4` all map to the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobIdentity(String);

impl JobIdentity {
    pub fn for_file(file: &FileDescriptor) -> Self {
        Self::from_path(file.logical_path())
    }

    pub fn from_path(raw: &str) -> Self {
        let normalized = raw
            .trim()
            .split(['/', '\\'])
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect::<Vec<_>>()
            .join("/");
        Self(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One file's pending analysis request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisJob {
    pub id: JobIdentity,
    pub file: FileDescriptor,
    /// Ask the remote service to re-process even if it has a result already
    pub is_reanalysis: bool,
}

impl AnalysisJob {
    pub fn new(file: FileDescriptor, force_reanalysis: bool) -> Self {
        Self {
            id: JobIdentity::for_file(&file),
            is_reanalysis: force_reanalysis || file.already_analyzed,
            file,
        }
    }
}

/// Terminal outcome of one remote analysis call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(String),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}
