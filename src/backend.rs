//! Client for the agent backend that generates the article content.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::error::{check_status, decode, transport, ApiError, ApiResult};

const SERVICE: &str = "backend";

#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Answer of `POST /api/process-post`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ProcessAck {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub post_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Answer of `POST /api/n8n-completion`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct CompletionStatus {
    #[serde(default, alias = "isCompleted", alias = "completed")]
    pub is_completed: bool,
    #[serde(default)]
    pub post_status: Option<String>,
    #[serde(default)]
    pub request_status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LogEntry {
    pub level: String,
    pub message: String,
    pub timestamp: String,
}

impl LogEntry {
    /// Only entries following the prefix convention are meant for the operator.
    pub fn is_surfaced(&self, prefix: &str) -> bool {
        prefix.is_empty() || self.message.trim_start().starts_with(prefix)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LogsResp {
    Wrapped { logs: Vec<LogEntry> },
    Bare(Vec<LogEntry>),
}

/// Sample answers served by `GET /api/random-post-data` for demo pre-filling.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SamplePostData {
    pub treatment_type: String,
    pub concept_message: String,
    pub patient_condition: String,
    pub treatment_process_message: String,
    pub treatment_result_message: String,
    pub additional_message: String,
    pub before_images_text: String,
    pub process_images_text: String,
    pub after_images_text: String,
}

#[derive(Deserialize)]
struct HealthResp {
    #[serde(default)]
    status: String,
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn process_post(&self, post_id: &str) -> ApiResult<ProcessAck>;

    async fn check_completion(
        &self,
        post_id: &str,
        workflow_id: &str,
        timestamp: DateTime<Utc>,
    ) -> ApiResult<CompletionStatus>;

    async fn get_logs(&self, post_id: &str) -> ApiResult<Vec<LogEntry>>;

    async fn random_post_data(&self) -> ApiResult<SamplePostData>;

    async fn restart(&self) -> ApiResult<()>;

    /// `true` when the backend answers its health check with "healthy".
    async fn health(&self) -> ApiResult<bool>;
}

impl BackendClient {
    pub fn new(base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("medicontent-qa/0.1")
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { http, base_url }
    }

    pub fn from_config(cfg: &Config) -> ApiResult<Self> {
        let base_url = Url::parse(&cfg.backend.base_url).map_err(|e| {
            ApiError::Invalid(format!("bad backend URL {}: {}", cfg.backend.base_url, e))
        })?;
        Ok(Self::new(base_url))
    }

    /// `path` is appended below the base URL, keeping any path prefix.
    pub fn endpoint(&self, path: &str) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Invalid(format!("cannot use {} as a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(path.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> ApiResult<reqwest::Response> {
        let res = request.send().await.map_err(transport(SERVICE))?;
        check_status(SERVICE, res).await
    }
}

#[async_trait]
impl Backend for BackendClient {
    #[instrument(skip_all, fields(post_id = %post_id))]
    async fn process_post(&self, post_id: &str) -> ApiResult<ProcessAck> {
        let url = self.endpoint("api/process-post")?;
        let res = self
            .send(self.http.post(url).json(&json!({ "post_id": post_id })))
            .await?;
        let ack: ProcessAck = res.json().await.map_err(decode(SERVICE))?;
        info!(status = ?ack.status, "backend accepted post");
        Ok(ack)
    }

    #[instrument(skip_all, fields(post_id = %post_id))]
    async fn check_completion(
        &self,
        post_id: &str,
        workflow_id: &str,
        timestamp: DateTime<Utc>,
    ) -> ApiResult<CompletionStatus> {
        let url = self.endpoint("api/n8n-completion")?;
        let body = json!({
            "post_id": post_id,
            "workflow_id": workflow_id,
            "timestamp": timestamp.to_rfc3339(),
        });
        let res = self.send(self.http.post(url).json(&body)).await?;
        let status: CompletionStatus = res.json().await.map_err(decode(SERVICE))?;
        debug!(is_completed = status.is_completed, "completion check");
        Ok(status)
    }

    #[instrument(skip_all, fields(post_id = %post_id))]
    async fn get_logs(&self, post_id: &str) -> ApiResult<Vec<LogEntry>> {
        let mut url = self.endpoint("api/get-logs")?;
        url.path_segments_mut()
            .map_err(|_| ApiError::Invalid("backend URL cannot be a base".to_string()))?
            .push(post_id);
        let res = self.send(self.http.get(url)).await?;
        let logs: LogsResp = res.json().await.map_err(decode(SERVICE))?;
        Ok(match logs {
            LogsResp::Wrapped { logs } => logs,
            LogsResp::Bare(logs) => logs,
        })
    }

    async fn random_post_data(&self) -> ApiResult<SamplePostData> {
        let url = self.endpoint("api/random-post-data")?;
        let res = self.send(self.http.get(url)).await?;
        res.json().await.map_err(decode(SERVICE))
    }

    async fn restart(&self) -> ApiResult<()> {
        let url = self.endpoint("api/restart")?;
        self.send(self.http.post(url)).await?;
        info!("backend restart requested");
        Ok(())
    }

    async fn health(&self) -> ApiResult<bool> {
        let url = self.endpoint("api/health")?;
        let res = self.send(self.http.get(url)).await?;
        let health: HealthResp = res.json().await.map_err(decode(SERVICE))?;
        Ok(health.status.eq_ignore_ascii_case("healthy"))
    }
}
