//! Batch auto-generation: trigger the workflow, discover the records it
//! creates and count each one once it reaches both terminal statuses.
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::airtable::model::{formula_created_after, ListQuery, Record};
use crate::airtable::{Datastore, Table};
use crate::error::ApiError;
use crate::form::{AutoForm, FormError};
use crate::model::PostDataRequest;
use crate::poller::{fetch_record_state, PollPolicy, Tick, Ticker};
use crate::webhook::{AutoRequest, Webhook, WebhookOutcome};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Form(#[from] FormError),
    #[error("workflow trigger failed: {0}")]
    Trigger(#[source] ApiError),
}

/// Running tally of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchProgress {
    pub requested: u32,
    pub started_at: DateTime<Utc>,
    tracked: Vec<String>,
    finished: HashSet<String>,
    pub done: bool,
}

impl BatchProgress {
    pub fn new(requested: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            requested,
            started_at,
            tracked: Vec::new(),
            finished: HashSet::new(),
            done: false,
        }
    }

    /// Start tracking `post_id`. Returns false when it was already tracked.
    pub fn track(&mut self, post_id: &str) -> bool {
        if post_id.is_empty() || self.tracked.iter().any(|p| p == post_id) {
            return false;
        }
        self.tracked.push(post_id.to_string());
        true
    }

    /// Count `post_id` as finished. Only the first call for an id counts.
    pub fn mark_finished(&mut self, post_id: &str) -> bool {
        if !self.tracked.iter().any(|p| p == post_id) {
            return false;
        }
        let first = self.finished.insert(post_id.to_string());
        if self.completed() >= self.requested {
            self.done = true;
        }
        first
    }

    pub fn tracked(&self) -> &[String] {
        &self.tracked
    }

    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.tracked
            .iter()
            .filter(|p| !self.finished.contains(*p))
            .map(String::as_str)
    }

    pub fn completed(&self) -> u32 {
        u32::try_from(self.finished.len()).unwrap_or(u32::MAX)
    }

    pub fn is_finished(&self, post_id: &str) -> bool {
        self.finished.contains(post_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    Triggered(WebhookOutcome),
    Discovered(String),
    Finished {
        post_id: String,
        completed: u32,
        requested: u32,
    },
    CheckFailed(String),
    Completed,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Completed,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub status: BatchStatus,
    pub progress: BatchProgress,
    pub reply: WebhookOutcome,
}

/// Requests created after the batch started.
pub fn discovery_query(started_at: DateTime<Utc>) -> ListQuery {
    ListQuery::filtered(formula_created_after(started_at))
}

/// Newest first by Airtable creation time. Records without one go last.
pub fn newest_first(records: &mut [Record]) {
    records.sort_by(|a, b| b.created_time.cmp(&a.created_time));
}

/// Trigger the workflow and follow the batch until `form.count` records are
/// finished, the policy's ceiling passes or `cancel` fires.
#[instrument(skip_all, fields(treatment_type = %form.treatment_type, count = form.count))]
pub async fn run_batch(
    webhook: &dyn Webhook,
    datastore: &dyn Datastore,
    form: &AutoForm,
    source: &str,
    policy: PollPolicy,
    cancel: CancellationToken,
    on_event: &mut (dyn FnMut(BatchEvent) + Send),
) -> Result<BatchReport, BatchError> {
    form.validate()?;
    let started_at = Utc::now();
    let request = AutoRequest {
        treatment_type: form.treatment_type.clone(),
        count: form.count,
        timestamp: started_at,
        source: source.to_string(),
    };
    let reply = webhook.trigger(&request).await.map_err(BatchError::Trigger)?;
    on_event(BatchEvent::Triggered(reply.clone()));

    let mut progress = BatchProgress::new(form.count, started_at);
    for post_id in reply.post_ids() {
        if progress.track(post_id) {
            on_event(BatchEvent::Discovered(post_id.clone()));
        }
    }
    info!(announced = progress.tracked().len(), "batch started");

    let discovery = discovery_query(started_at);
    let mut ticker = Ticker::new(policy, cancel);
    let status = loop {
        match ticker.tick().await {
            Tick::Proceed(attempt) => debug!(attempt, "batch poll"),
            Tick::Exhausted => break BatchStatus::TimedOut,
            Tick::Cancelled => break BatchStatus::Cancelled,
        }

        match datastore.list_records(Table::Requests, &discovery).await {
            Ok(mut records) => {
                newest_first(&mut records);
                for record in &records {
                    let request = PostDataRequest::from_record(record);
                    if progress.track(&request.post_id) {
                        info!(post_id = %request.post_id, "new batch record");
                        on_event(BatchEvent::Discovered(request.post_id));
                    }
                }
            }
            Err(err) => {
                warn!(%err, "batch discovery failed");
                on_event(BatchEvent::CheckFailed(err.to_string()));
            }
        }

        let pending: Vec<String> = progress.pending().map(str::to_string).collect();
        for post_id in pending {
            match fetch_record_state(datastore, &post_id).await {
                Ok(state) if state.is_finished() => {
                    if progress.mark_finished(&post_id) {
                        info!(%post_id, completed = progress.completed(), "batch record finished");
                        on_event(BatchEvent::Finished {
                            post_id,
                            completed: progress.completed(),
                            requested: progress.requested,
                        });
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(%post_id, %err, "batch status check failed");
                    on_event(BatchEvent::CheckFailed(err.to_string()));
                }
            }
        }

        if progress.done {
            break BatchStatus::Completed;
        }
    };

    match status {
        BatchStatus::Completed => {
            info!(completed = progress.completed(), "batch complete");
            on_event(BatchEvent::Completed);
        }
        BatchStatus::TimedOut => {
            warn!(
                completed = progress.completed(),
                requested = progress.requested,
                elapsed_s = ticker.elapsed().as_secs(),
                "batch timed out"
            );
            on_event(BatchEvent::TimedOut);
        }
        BatchStatus::Cancelled => {
            info!(completed = progress.completed(), "batch cancelled");
            on_event(BatchEvent::Cancelled);
        }
    }

    Ok(BatchReport {
        status,
        progress,
        reply,
    })
}
