//! Trigger for the n8n batch auto-generation workflow.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::error::{check_status, transport, ApiError, ApiResult};

const SERVICE: &str = "webhook";

/// Body posted to the workflow.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AutoRequest {
    pub treatment_type: String,
    pub count: u32,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

/// Reply contract of the workflow.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WebhookReply {
    Accepted {
        #[serde(default)]
        post_ids: Vec<String>,
    },
    Progress {
        step: String,
    },
    Done {
        #[serde(default)]
        post_ids: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Reply(WebhookReply),
    /// 2xx with a body outside the contract; kept verbatim for the log.
    Unrecognized(String),
}

impl WebhookOutcome {
    /// Post ids announced by the workflow, if any.
    pub fn post_ids(&self) -> &[String] {
        match self {
            WebhookOutcome::Reply(WebhookReply::Accepted { post_ids })
            | WebhookOutcome::Reply(WebhookReply::Done { post_ids }) => post_ids,
            _ => &[],
        }
    }
}

pub fn parse_reply(body: &str) -> WebhookOutcome {
    match serde_json::from_str::<WebhookReply>(body) {
        Ok(reply) => WebhookOutcome::Reply(reply),
        Err(_) => WebhookOutcome::Unrecognized(body.trim().to_string()),
    }
}

#[async_trait]
pub trait Webhook: Send + Sync {
    async fn trigger(&self, request: &AutoRequest) -> ApiResult<WebhookOutcome>;
}

#[derive(Clone)]
pub struct WebhookClient {
    http: Client,
    url: Url,
}

impl fmt::Debug for WebhookClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookClient")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl WebhookClient {
    pub fn new(url: Url) -> Self {
        let http = Client::builder()
            .user_agent("medicontent-qa/0.1")
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { http, url }
    }

    pub fn from_config(cfg: &Config) -> ApiResult<Self> {
        let url = Url::parse(&cfg.webhook.url)
            .map_err(|e| ApiError::Invalid(format!("bad webhook URL {}: {}", cfg.webhook.url, e)))?;
        Ok(Self::new(url))
    }
}

#[async_trait]
impl Webhook for WebhookClient {
    #[instrument(skip_all, fields(treatment_type = %request.treatment_type, count = request.count))]
    async fn trigger(&self, request: &AutoRequest) -> ApiResult<WebhookOutcome> {
        let res = self
            .http
            .post(self.url.clone())
            .json(request)
            .send()
            .await
            .map_err(transport(SERVICE))?;
        let res = check_status(SERVICE, res).await?;
        let body = res.text().await.map_err(transport(SERVICE))?;
        let outcome = parse_reply(&body);
        match &outcome {
            WebhookOutcome::Reply(reply) => info!(?reply, "webhook replied"),
            WebhookOutcome::Unrecognized(raw) => warn!(body = %raw, "webhook reply outside contract"),
        }
        Ok(outcome)
    }
}
