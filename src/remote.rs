use crate::config::{AnalysisConfig, Config};
use crate::types::{FileDescriptor, JobOutcome};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Submits files to the remote analysis service
pub trait AnalysisClient: Send + Sync + 'static {
    fn analyze(
        &self,
        files: &[FileDescriptor],
        force_reanalysis: bool,
        config: &AnalysisConfig,
    ) -> impl Future<Output = Result<AnalyzeResponse>> + Send;
}

/// Reports which files already have an analysis, wherever it came from
pub trait StatusOracle: Send + Sync + 'static {
    fn query_analyzed(
        &self,
        files: &[FileDescriptor],
    ) -> impl Future<Output = Result<StatusResponse>> + Send;
}

impl<T: AnalysisClient> AnalysisClient for Arc<T> {
    fn analyze(
        &self,
        files: &[FileDescriptor],
        force_reanalysis: bool,
        config: &AnalysisConfig,
    ) -> impl Future<Output = Result<AnalyzeResponse>> + Send {
        (**self).analyze(files, force_reanalysis, config)
    }
}

impl<T: StatusOracle> StatusOracle for Arc<T> {
    fn query_analyzed(
        &self,
        files: &[FileDescriptor],
    ) -> impl Future<Output = Result<StatusResponse>> + Send {
        (**self).query_analyzed(files)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest<'a> {
    pub files: &'a [FileDescriptor],
    pub force_reanalysis: bool,
    pub config: &'a AnalysisConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    #[serde(default)]
    pub results: Vec<FileResult>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalyzeResponse {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            results: vec![FileResult {
                success: true,
                error: None,
            }],
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            results: vec![FileResult {
                success: false,
                error: Some(error.into()),
            }],
        }
    }

    /// Outcome for a single-file request; the per-file result is authoritative
    pub fn single_outcome(&self) -> JobOutcome {
        match self.results.first() {
            Some(result) if result.success => JobOutcome::Succeeded,
            Some(result) => JobOutcome::Failed(
                result
                    .error
                    .clone()
                    .unwrap_or_else(|| "analysis reported failure".to_string()),
            ),
            None => JobOutcome::Failed("no result in analysis response".to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusRequest<'a> {
    pub files: &'a [FileDescriptor],
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(default)]
    pub analyzed: Vec<AnalyzedFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedFile {
    pub file_path: String,
}

/// JSON-over-HTTP client for both the analyze and status endpoints
#[derive(Debug, Clone)]
pub struct HttpAnalysisClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpAnalysisClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{}", self.endpoint, route)
    }

    async fn post<B, R>(&self, route: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: for<'de> Deserialize<'de>,
    {
        let url = self.url(route);
        debug!(url = %url, "POST");
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?
            .error_for_status()
            .with_context(|| format!("{} returned an error status", url))?;
        response
            .json::<R>()
            .await
            .with_context(|| format!("Failed to decode response from {}", url))
    }
}

impl AnalysisClient for HttpAnalysisClient {
    async fn analyze(
        &self,
        files: &[FileDescriptor],
        force_reanalysis: bool,
        config: &AnalysisConfig,
    ) -> Result<AnalyzeResponse> {
        let request = AnalyzeRequest {
            files,
            force_reanalysis,
            config,
        };
        self.post("analyze", &request).await
    }
}

impl StatusOracle for HttpAnalysisClient {
    async fn query_analyzed(&self, files: &[FileDescriptor]) -> Result<StatusResponse> {
        self.post("analysis-status", &StatusRequest { files }).await
    }
}
