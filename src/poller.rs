//! Completion polling for a single post.
//!
//! Every loop here is driven by a [`Ticker`]: a fixed interval, an attempt
//! budget backed by a monotonic deadline, and a cancellation token. Checks are
//! awaited inside the loop, so a new cycle never starts while the previous
//! one is still in flight.
use chrono::Utc;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::airtable::model::{formula_eq, ListQuery};
use crate::airtable::{Datastore, Table};
use crate::backend::{Backend, CompletionStatus, LogEntry};
use crate::config::Polling;
use crate::error::ApiResult;
use crate::model::{post_fields, request_fields, Post, PostDataRequest, PostStatus, RequestStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    /// n8n completion check: every 5 s, 60 attempts.
    pub const COMPLETION: PollPolicy = PollPolicy {
        interval: Duration::from_secs(5),
        max_attempts: 60,
    };

    /// Direct datastore status check: every 3 s, 40 attempts.
    pub const RECORD_STATUS: PollPolicy = PollPolicy {
        interval: Duration::from_secs(3),
        max_attempts: 40,
    };

    /// Backend health after a restart.
    pub const HEALTH: PollPolicy = PollPolicy {
        interval: Duration::from_secs(2),
        max_attempts: 15,
    };

    /// As many attempts as fit into `ceiling` (at least one).
    pub fn within(interval: Duration, ceiling: Duration) -> Self {
        let interval_ms = interval.as_millis().max(1);
        let attempts = ceiling.as_millis().div_ceil(interval_ms).max(1);
        PollPolicy {
            interval,
            max_attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        }
    }

    pub fn completion_from(cfg: &Polling) -> Self {
        PollPolicy {
            interval: cfg.completion_interval(),
            max_attempts: cfg.completion_max_attempts,
        }
    }

    pub fn record_from(cfg: &Polling) -> Self {
        PollPolicy {
            interval: cfg.record_interval(),
            max_attempts: cfg.record_max_attempts,
        }
    }

    pub fn batch_from(cfg: &Polling) -> Self {
        Self::within(cfg.batch_interval(), cfg.batch_timeout())
    }

    /// Saturates at `Duration::MAX`.
    pub fn ceiling(&self) -> Duration {
        self.interval
            .checked_mul(self.max_attempts)
            .unwrap_or(Duration::MAX)
    }
}

/// Deadline used when a policy's ceiling does not fit into an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Run check number `n` (1-based).
    Proceed(u32),
    Exhausted,
    Cancelled,
}

/// Fixed-interval schedule with an attempt budget and a hard deadline.
#[derive(Debug)]
pub struct Ticker {
    policy: PollPolicy,
    start: Instant,
    last: Instant,
    deadline: Instant,
    attempts: u32,
    cancel: CancellationToken,
}

impl Ticker {
    pub fn new(policy: PollPolicy, cancel: CancellationToken) -> Self {
        let start = Instant::now();
        Self {
            policy,
            start,
            last: start,
            deadline: start
                .checked_add(policy.ceiling())
                .unwrap_or_else(|| start + FAR_FUTURE),
            attempts: 0,
            cancel,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.start)
    }

    /// Wait one interval after the previous tick. A check that overran the
    /// interval makes the next tick fire immediately, once.
    pub async fn tick(&mut self) -> Tick {
        if self.cancel.is_cancelled() {
            return Tick::Cancelled;
        }
        if self.attempts >= self.policy.max_attempts || Instant::now() >= self.deadline {
            return Tick::Exhausted;
        }
        let next = self.last + self.policy.interval;
        tokio::select! {
            _ = self.cancel.cancelled() => return Tick::Cancelled,
            _ = sleep_until(next) => {}
        }
        self.last = Instant::now();
        self.attempts += 1;
        Tick::Proceed(self.attempts)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Completed(T),
    TimedOut { attempts: u32 },
    Cancelled { attempts: u32 },
}

impl<T> PollOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, PollOutcome::Completed(_))
    }
}

/// Things a poll loop reports to the operator while it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Attempt { attempt: u32, max_attempts: u32 },
    Log(LogEntry),
    CheckFailed(String),
    Completed,
    TimedOut,
    Cancelled,
}

/// Poll `POST /api/n8n-completion` until it reports completion. Backend log
/// lines carrying `log_prefix` are forwarded as they appear.
pub async fn wait_for_completion(
    backend: &dyn Backend,
    post_id: &str,
    workflow_id: &str,
    log_prefix: &str,
    policy: PollPolicy,
    cancel: CancellationToken,
    on_event: &mut (dyn FnMut(PollEvent) + Send),
) -> PollOutcome<CompletionStatus> {
    let mut ticker = Ticker::new(policy, cancel);
    let mut seen_logs: HashSet<(String, String)> = HashSet::new();
    loop {
        let attempt = match ticker.tick().await {
            Tick::Proceed(n) => n,
            Tick::Exhausted => {
                warn!(post_id, attempts = ticker.attempts(), "completion polling timed out");
                on_event(PollEvent::TimedOut);
                return PollOutcome::TimedOut {
                    attempts: ticker.attempts(),
                };
            }
            Tick::Cancelled => {
                info!(post_id, "completion polling cancelled");
                on_event(PollEvent::Cancelled);
                return PollOutcome::Cancelled {
                    attempts: ticker.attempts(),
                };
            }
        };
        on_event(PollEvent::Attempt {
            attempt,
            max_attempts: policy.max_attempts,
        });

        match backend.get_logs(post_id).await {
            Ok(entries) => {
                for entry in entries {
                    if entry.is_surfaced(log_prefix)
                        && seen_logs.insert((entry.timestamp.clone(), entry.message.clone()))
                    {
                        on_event(PollEvent::Log(entry));
                    }
                }
            }
            Err(err) => debug!(%err, "log retrieval failed"),
        }

        match backend.check_completion(post_id, workflow_id, Utc::now()).await {
            Ok(status) if status.is_completed => {
                info!(post_id, attempt, "workflow completed");
                on_event(PollEvent::Completed);
                return PollOutcome::Completed(status);
            }
            Ok(_) => {}
            Err(err) => {
                warn!(post_id, attempt, %err, "completion check failed");
                on_event(PollEvent::CheckFailed(err.to_string()));
            }
        }
    }
}

/// Latest statuses of one post id, as seen in the two tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordState {
    pub request: Option<RequestStatus>,
    pub post: Option<PostStatus>,
}

impl RecordState {
    /// Finished means the request is `완료` and the post is `작업 완료`.
    pub fn is_finished(&self) -> bool {
        matches!(&self.request, Some(s) if s.is_done())
            && matches!(&self.post, Some(s) if s.is_complete())
    }
}

pub async fn fetch_record_state(datastore: &dyn Datastore, post_id: &str) -> ApiResult<RecordState> {
    let requests = datastore
        .list_records(
            Table::Requests,
            &ListQuery::filtered(formula_eq(request_fields::POST_ID, post_id)).limit(1),
        )
        .await?;
    let posts = datastore
        .list_records(
            Table::Posts,
            &ListQuery::filtered(formula_eq(post_fields::POST_ID, post_id)).limit(1),
        )
        .await?;
    Ok(RecordState {
        request: requests
            .first()
            .map(|r| PostDataRequest::from_record(r).status),
        post: posts.first().map(|r| Post::from_record(r).status),
    })
}

/// Poll both status fields of one post id directly in the datastore.
pub async fn wait_for_record(
    datastore: &dyn Datastore,
    post_id: &str,
    policy: PollPolicy,
    cancel: CancellationToken,
    on_event: &mut (dyn FnMut(PollEvent) + Send),
) -> PollOutcome<RecordState> {
    let mut ticker = Ticker::new(policy, cancel);
    loop {
        let attempt = match ticker.tick().await {
            Tick::Proceed(n) => n,
            Tick::Exhausted => {
                warn!(post_id, "record polling timed out");
                on_event(PollEvent::TimedOut);
                return PollOutcome::TimedOut {
                    attempts: ticker.attempts(),
                };
            }
            Tick::Cancelled => {
                on_event(PollEvent::Cancelled);
                return PollOutcome::Cancelled {
                    attempts: ticker.attempts(),
                };
            }
        };
        on_event(PollEvent::Attempt {
            attempt,
            max_attempts: policy.max_attempts,
        });
        match fetch_record_state(datastore, post_id).await {
            Ok(state) if state.is_finished() => {
                on_event(PollEvent::Completed);
                return PollOutcome::Completed(state);
            }
            Ok(state) => debug!(post_id, ?state, "record not finished"),
            Err(err) => {
                warn!(post_id, %err, "record status check failed");
                on_event(PollEvent::CheckFailed(err.to_string()));
            }
        }
    }
}

/// Ask the backend to restart and wait until its health check passes.
pub async fn restart_backend(
    backend: &dyn Backend,
    policy: PollPolicy,
    cancel: CancellationToken,
) -> ApiResult<PollOutcome<()>> {
    backend.restart().await?;
    let mut ticker = Ticker::new(policy, cancel);
    loop {
        match ticker.tick().await {
            Tick::Proceed(attempt) => match backend.health().await {
                Ok(true) => {
                    info!(attempt, "backend is healthy again");
                    return Ok(PollOutcome::Completed(()));
                }
                Ok(false) => debug!(attempt, "backend not healthy yet"),
                Err(err) => debug!(attempt, %err, "backend not reachable yet"),
            },
            Tick::Exhausted => {
                warn!("backend did not come back after restart");
                return Ok(PollOutcome::TimedOut {
                    attempts: ticker.attempts(),
                });
            }
            Tick::Cancelled => {
                return Ok(PollOutcome::Cancelled {
                    attempts: ticker.attempts(),
                })
            }
        }
    }
}
