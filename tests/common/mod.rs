#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use medicontent_qa::airtable::model::{AttachmentUpload, ListQuery, Record};
use medicontent_qa::airtable::{Datastore, Table};
use medicontent_qa::backend::{Backend, CompletionStatus, LogEntry, ProcessAck, SamplePostData};
use medicontent_qa::error::{ApiError, ApiResult};
use medicontent_qa::model::text;
use medicontent_qa::webhook::{AutoRequest, Webhook, WebhookOutcome};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Every outbound call of the fakes, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create { table: Table, fields: Map<String, Value> },
    Update { table: Table, record_id: String, fields: Map<String, Value> },
    List { table: Table, formula: Option<String> },
    Upload { record_id: String, field: String, filename: String },
    Process { post_id: String },
    Completion { post_id: String },
    Logs { post_id: String },
    Trigger { request: AutoRequest },
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// In-memory Airtable: two tables of records plus a call log.
#[derive(Clone, Default)]
pub struct RecordingDatastore {
    pub calls: CallLog,
    posts: Arc<Mutex<Vec<Record>>>,
    requests: Arc<Mutex<Vec<Record>>>,
    fail_create: Arc<Mutex<HashSet<Table>>>,
    fail_uploads: Arc<Mutex<HashSet<String>>>,
    next_id: Arc<Mutex<u32>>,
}

impl RecordingDatastore {
    pub fn sharing(calls: CallLog) -> Self {
        Self {
            calls,
            ..Default::default()
        }
    }

    pub async fn fail_create_in(&self, table: Table) {
        self.fail_create.lock().await.insert(table);
    }

    pub async fn fail_upload_of(&self, filename: &str) {
        self.fail_uploads.lock().await.insert(filename.to_string());
    }

    fn rows(&self, table: Table) -> &Arc<Mutex<Vec<Record>>> {
        match table {
            Table::Posts => &self.posts,
            Table::Requests => &self.requests,
        }
    }

    /// Insert a row as if another system had written it.
    pub async fn seed(&self, table: Table, id: &str, fields: Value) {
        self.seed_at(table, id, fields, Utc::now() + ChronoDuration::hours(1))
            .await;
    }

    pub async fn seed_at(&self, table: Table, id: &str, fields: Value, created: DateTime<Utc>) {
        self.rows(table).lock().await.push(Record {
            id: id.to_string(),
            created_time: Some(created),
            fields: fields.as_object().cloned().unwrap_or_default(),
        });
    }

    /// Overwrite fields of an existing row.
    pub async fn set_fields(&self, table: Table, id: &str, fields: Value) {
        let mut rows = self.rows(table).lock().await;
        if let Some(row) = rows.iter_mut().find(|r| r.id == id) {
            for (k, v) in fields.as_object().cloned().unwrap_or_default() {
                row.fields.insert(k, v);
            }
        }
    }

    pub async fn row(&self, table: Table, id: &str) -> Option<Record> {
        self.rows(table)
            .lock()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }
}

fn matches_formula(record: &Record, formula: &str) -> bool {
    let created_after = Regex::new(r"^IS_AFTER\(CREATED_TIME\(\), '(.+)'\)$").unwrap();
    let record_id = Regex::new(r"^RECORD_ID\(\) = '(.*)'$").unwrap();
    let field_eq = Regex::new(r"^\{(.+)\} = '(.*)'$").unwrap();

    if let Some(caps) = created_after.captures(formula) {
        let since: DateTime<Utc> = caps[1].parse().unwrap();
        return record.created_time.map_or(false, |t| t > since);
    }
    if let Some(caps) = record_id.captures(formula) {
        return record.id == caps[1];
    }
    if let Some(caps) = field_eq.captures(formula) {
        return text(&record.fields, &caps[1]) == caps[2].replace("\\'", "'");
    }
    panic!("fake datastore cannot evaluate formula {}", formula);
}

#[async_trait]
impl Datastore for RecordingDatastore {
    async fn create_record(&self, table: Table, fields: Map<String, Value>) -> ApiResult<Record> {
        self.calls.lock().await.push(Call::Create {
            table,
            fields: fields.clone(),
        });
        if self.fail_create.lock().await.contains(&table) {
            return Err(ApiError::Invalid(format!("create refused in {:?}", table)));
        }
        let mut next = self.next_id.lock().await;
        *next += 1;
        let record = Record {
            id: format!("rec{}", *next),
            created_time: Some(Utc::now()),
            fields,
        };
        self.rows(table).lock().await.push(record.clone());
        Ok(record)
    }

    async fn update_record(
        &self,
        table: Table,
        record_id: &str,
        fields: Map<String, Value>,
    ) -> ApiResult<Record> {
        self.calls.lock().await.push(Call::Update {
            table,
            record_id: record_id.to_string(),
            fields: fields.clone(),
        });
        let mut rows = self.rows(table).lock().await;
        let row = rows
            .iter_mut()
            .find(|r| r.id == record_id)
            .ok_or_else(|| ApiError::Invalid(format!("no record {}", record_id)))?;
        for (k, v) in fields {
            row.fields.insert(k, v);
        }
        Ok(row.clone())
    }

    async fn list_records(&self, table: Table, query: &ListQuery) -> ApiResult<Vec<Record>> {
        self.calls.lock().await.push(Call::List {
            table,
            formula: query.formula.clone(),
        });
        let rows = self.rows(table).lock().await;
        let mut out: Vec<Record> = rows
            .iter()
            .filter(|r| query.formula.as_deref().map_or(true, |f| matches_formula(r, f)))
            .cloned()
            .collect();
        if let Some(max) = query.max_records {
            out.truncate(max as usize);
        }
        Ok(out)
    }

    async fn upload_attachment(
        &self,
        record_id: &str,
        field: &str,
        upload: &AttachmentUpload,
    ) -> ApiResult<String> {
        self.calls.lock().await.push(Call::Upload {
            record_id: record_id.to_string(),
            field: field.to_string(),
            filename: upload.filename.clone(),
        });
        if self.fail_uploads.lock().await.contains(&upload.filename) {
            return Err(ApiError::Invalid(format!("upload of {} rejected", upload.filename)));
        }
        Ok(format!("att_{}", upload.filename))
    }
}

/// Agent backend with scripted completion answers and a fixed log tail.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    pub calls: CallLog,
    completions: Arc<Mutex<VecDeque<ApiResult<CompletionStatus>>>>,
    logs: Arc<Mutex<Vec<LogEntry>>>,
    refuse_process: Arc<Mutex<bool>>,
    healthy_after: Arc<Mutex<u32>>,
}

impl RecordingBackend {
    pub fn sharing(calls: CallLog) -> Self {
        Self {
            calls,
            ..Default::default()
        }
    }

    pub async fn script_completions(&self, answers: Vec<ApiResult<CompletionStatus>>) {
        self.completions.lock().await.extend(answers);
    }

    pub async fn set_logs(&self, logs: Vec<LogEntry>) {
        *self.logs.lock().await = logs;
    }

    pub async fn refuse_processing(&self) {
        *self.refuse_process.lock().await = true;
    }

    /// Health turns true after `n` failed probes.
    pub async fn healthy_after(&self, n: u32) {
        *self.healthy_after.lock().await = n;
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }
}

pub fn done() -> ApiResult<CompletionStatus> {
    Ok(CompletionStatus {
        is_completed: true,
        ..Default::default()
    })
}

pub fn pending() -> ApiResult<CompletionStatus> {
    Ok(CompletionStatus::default())
}

pub fn log(timestamp: &str, message: &str) -> LogEntry {
    LogEntry {
        level: "INFO".into(),
        message: message.into(),
        timestamp: timestamp.into(),
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn process_post(&self, post_id: &str) -> ApiResult<ProcessAck> {
        self.calls.lock().await.push(Call::Process {
            post_id: post_id.to_string(),
        });
        if *self.refuse_process.lock().await {
            return Err(ApiError::Invalid("backend busy".into()));
        }
        Ok(ProcessAck {
            status: Some("accepted".into()),
            post_id: Some(post_id.to_string()),
            message: None,
        })
    }

    async fn check_completion(
        &self,
        post_id: &str,
        _workflow_id: &str,
        _timestamp: DateTime<Utc>,
    ) -> ApiResult<CompletionStatus> {
        self.calls.lock().await.push(Call::Completion {
            post_id: post_id.to_string(),
        });
        self.completions
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(pending)
    }

    async fn get_logs(&self, post_id: &str) -> ApiResult<Vec<LogEntry>> {
        self.calls.lock().await.push(Call::Logs {
            post_id: post_id.to_string(),
        });
        Ok(self.logs.lock().await.clone())
    }

    async fn random_post_data(&self) -> ApiResult<SamplePostData> {
        Ok(SamplePostData {
            treatment_type: "임플란트".into(),
            ..Default::default()
        })
    }

    async fn restart(&self) -> ApiResult<()> {
        Ok(())
    }

    async fn health(&self) -> ApiResult<bool> {
        let mut remaining = self.healthy_after.lock().await;
        if *remaining == 0 {
            return Ok(true);
        }
        *remaining -= 1;
        Err(ApiError::Invalid("connection refused".into()))
    }
}

#[derive(Clone)]
pub struct RecordingWebhook {
    pub calls: CallLog,
    reply: WebhookOutcome,
}

impl RecordingWebhook {
    pub fn replying(calls: CallLog, reply: WebhookOutcome) -> Self {
        Self { calls, reply }
    }
}

#[async_trait]
impl Webhook for RecordingWebhook {
    async fn trigger(&self, request: &AutoRequest) -> ApiResult<WebhookOutcome> {
        self.calls.lock().await.push(Call::Trigger {
            request: request.clone(),
        });
        Ok(self.reply.clone())
    }
}
