use crate::cli::Cli;
use crate::types::FileDescriptor;
use anyhow::{Context, Result};
use glob::glob;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Load file descriptors from a JSON array
pub fn load_file_list(path: &Path) -> Result<Vec<FileDescriptor>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file: {}", path.display()))?;
    let files: Vec<FileDescriptor> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse input file: {}", path.display()))?;
    Ok(files)
}

/// Describe every regular file matching `pattern`
pub fn scan_glob(pattern: &str) -> Result<Vec<FileDescriptor>> {
    let mut files = Vec::new();
    for entry in glob(pattern).with_context(|| format!("Invalid glob pattern: {}", pattern))? {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable path");
                continue;
            }
        };
        let metadata = match fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to stat file");
                continue;
            }
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        files.push(FileDescriptor {
            name,
            path: Some(path.to_string_lossy().to_string()),
            size: metadata.len(),
            already_analyzed: false,
        });
    }
    Ok(files)
}

/// Gather files from `--input` and every `--glob`, in that order
pub fn collect_files(cli: &Cli) -> Result<Vec<FileDescriptor>> {
    let mut files = Vec::new();
    if let Some(ref input) = cli.input {
        let listed = load_file_list(input)?;
        info!(input = %input.display(), files = listed.len(), "Loaded input file");
        files.extend(listed);
    }
    for pattern in &cli.glob {
        let matched = scan_glob(pattern)?;
        info!(pattern = %pattern, files = matched.len(), "Matched files");
        files.extend(matched);
    }
    Ok(files)
}
