use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use medicontent_qa::airtable::AirtableClient;
use medicontent_qa::backend::{Backend, BackendClient};
use medicontent_qa::batch::{self, BatchStatus};
use medicontent_qa::config::{self, Config};
use medicontent_qa::db;
use medicontent_qa::form::{AutoForm, ManualForm};
use medicontent_qa::poller::{self, PollOutcome, PollPolicy};
use medicontent_qa::qa::{self, QaDraft, QaField, RecentlySaved};
use medicontent_qa::review::{self, QaFilter, ReviewFilter, ScoreRange};
use medicontent_qa::shell::{self, Action, AppState, Tab};
use medicontent_qa::submit;
use medicontent_qa::webhook::WebhookClient;

#[derive(Debug, Parser)]
#[command(author, version, about = "QA console for generated medical marketing posts")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Submit a manual case described in a YAML form and follow it to completion
    Submit {
        form: PathBuf,
        /// Return right after the backend accepted the job
        #[arg(long)]
        no_wait: bool,
    },
    /// Trigger batch auto-generation and wait for the records
    Auto {
        #[arg(long)]
        treatment_type: String,
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Watch a post's request and post status directly in Airtable
    Watch { post_id: String },
    /// List completed posts
    Review {
        #[arg(long)]
        search: Option<String>,
        #[arg(long, value_enum, default_value_t = QaFilter::All)]
        qa: QaFilter,
        #[arg(long)]
        reviewer: Option<String>,
        /// "min" or "min-max"
        #[arg(long)]
        content_score: Option<ScoreRange>,
        #[arg(long)]
        legal_score: Option<ScoreRange>,
    },
    /// Save one QA section of a post
    Qa {
        record_id: String,
        #[arg(value_enum)]
        field: QaField,
        /// Reviewer name or review text, depending on the section
        #[arg(long)]
        text: Option<String>,
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=5))]
        score: Option<u8>,
    },
    /// Manage the local reviewer list
    Reviewers {
        #[command(subcommand)]
        action: ReviewersCommand,
    },
    /// Print the operator-facing backend log lines of a post
    Logs { post_id: String },
    /// Write a manual form pre-filled with backend sample data
    Sample {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Restart the backend and wait until it is healthy
    Restart,
}

#[derive(Debug, Subcommand)]
enum ReviewersCommand {
    List,
    Add { name: String },
}

/// Prints console lines and mirrors them into the app state.
struct Console {
    state: AppState,
}

impl Console {
    fn new(tab: Tab) -> Self {
        let mut state = AppState::default();
        state.reduce(Action::SwitchTab(tab));
        Self { state }
    }

    fn line(&mut self, line: impl Into<String>) {
        let line = line.into();
        println!("{}", line);
        self.state.reduce(Action::Log(line));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("loading {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping");
            on_ctrl_c.cancel();
        }
    });

    match args.command {
        Command::Submit { form, no_wait } => run_submit(&cfg, form, no_wait, cancel).await,
        Command::Auto {
            treatment_type,
            count,
        } => {
            run_auto(
                &cfg,
                AutoForm {
                    treatment_type,
                    count,
                },
                cancel,
            )
            .await
        }
        Command::Watch { post_id } => run_watch(&cfg, &post_id, cancel).await,
        Command::Review {
            search,
            qa,
            reviewer,
            content_score,
            legal_score,
        } => {
            let filter = ReviewFilter {
                search,
                qa,
                reviewer,
                content_score,
                legal_score,
            };
            run_review(&cfg, &filter).await
        }
        Command::Qa {
            record_id,
            field,
            text,
            score,
        } => run_qa(&cfg, &record_id, field, text, score).await,
        Command::Reviewers { action } => run_reviewers(&cfg, action).await,
        Command::Logs { post_id } => run_logs(&cfg, &post_id).await,
        Command::Sample { out } => run_sample(&cfg, out).await,
        Command::Restart => run_restart(&cfg, cancel).await,
    }
}

async fn run_submit(cfg: &Config, path: PathBuf, no_wait: bool, cancel: CancellationToken) -> Result<()> {
    let mut console = Console::new(Tab::Manual);
    let form = ManualForm::load(&path).with_context(|| format!("reading form {}", path.display()))?;
    let datastore = AirtableClient::from_config(cfg)?;
    let backend = BackendClient::from_config(cfg)?;

    console.state.reduce(Action::ProcessingStarted);
    let report = submit::submit(&datastore, &backend, &form).await?;
    console.line(format!("Post ID: {}", report.post_id));
    console.line(format!(
        "이미지 업로드: {}건 성공, {}건 실패",
        report.uploaded.len(),
        report.failed_uploads.len()
    ));
    for failed in &report.failed_uploads {
        console.line(format!("  실패 {}: {}", failed.path.display(), failed.reason));
    }
    if no_wait {
        console.state.reduce(Action::ProcessingFinished);
        return Ok(());
    }

    let outcome = poller::wait_for_completion(
        &backend,
        &report.post_id,
        &cfg.backend.workflow_id,
        &cfg.backend.log_prefix,
        PollPolicy::completion_from(&cfg.polling),
        cancel,
        &mut |event| {
            console.line(shell::poll_line(&event));
        },
    )
    .await;
    console.state.reduce(Action::ProcessingFinished);
    match outcome {
        PollOutcome::Completed(status) => {
            info!(post_id = %report.post_id, post_status = ?status.post_status, "post generated");
            Ok(())
        }
        PollOutcome::TimedOut { attempts } => {
            bail!("no completion after {} checks", attempts)
        }
        PollOutcome::Cancelled { .. } => Ok(()),
    }
}

async fn run_auto(cfg: &Config, form: AutoForm, cancel: CancellationToken) -> Result<()> {
    let mut console = Console::new(Tab::Auto);
    let datastore = AirtableClient::from_config(cfg)?;
    let webhook = WebhookClient::from_config(cfg)?;

    console.state.reduce(Action::ProcessingStarted);
    let report = batch::run_batch(
        &webhook,
        &datastore,
        &form,
        &cfg.webhook.source,
        PollPolicy::batch_from(&cfg.polling),
        cancel,
        &mut |event| {
            console.line(shell::batch_line(&event));
        },
    )
    .await?;
    console.state.reduce(Action::Progress(report.progress.clone()));
    console.state.reduce(Action::ProcessingFinished);

    console.line(format!(
        "{}/{} 완료",
        report.progress.completed(),
        report.progress.requested
    ));
    match report.status {
        BatchStatus::Completed | BatchStatus::Cancelled => Ok(()),
        BatchStatus::TimedOut => bail!("batch did not finish in time"),
    }
}

async fn run_watch(cfg: &Config, post_id: &str, cancel: CancellationToken) -> Result<()> {
    let mut console = Console::new(Tab::Manual);
    let datastore = AirtableClient::from_config(cfg)?;
    let outcome = poller::wait_for_record(
        &datastore,
        post_id,
        PollPolicy::record_from(&cfg.polling),
        cancel,
        &mut |event| {
            console.line(shell::poll_line(&event));
        },
    )
    .await;
    match outcome {
        PollOutcome::TimedOut { attempts } => bail!("{} not finished after {} checks", post_id, attempts),
        _ => Ok(()),
    }
}

async fn run_review(cfg: &Config, filter: &ReviewFilter) -> Result<()> {
    let datastore = AirtableClient::from_config(cfg)?;
    let posts = review::fetch_completed(&datastore).await?;
    let shown = filter.apply(&posts);
    println!("{} / {} posts", shown.len(), posts.len());
    for post in shown {
        let score = |s: Option<u8>| s.map_or_else(|| "-".to_string(), |s| s.to_string());
        println!(
            "{:>2}  {}  {}  {}  content={} legal={}  {}",
            review::tone(post).label(),
            post.record_id,
            post.post_id,
            if post.qa.reviewer.is_empty() { "-" } else { post.qa.reviewer.as_str() },
            score(post.qa.content_score),
            score(post.qa.legal_score),
            post.title,
        );
    }
    Ok(())
}

async fn run_qa(
    cfg: &Config,
    record_id: &str,
    field: QaField,
    text: Option<String>,
    score: Option<u8>,
) -> Result<()> {
    let mut console = Console::new(Tab::Review);
    console.state.reduce(Action::Select(Some(record_id.to_string())));
    let datastore = AirtableClient::from_config(cfg)?;
    let post = qa::fetch_post(&datastore, record_id)
        .await?
        .with_context(|| format!("no post with record id {}", record_id))?;

    let mut draft = QaDraft::from_post(&post);
    draft.apply(field, text, score);

    if field == QaField::Reviewer && !draft.reviewer.trim().is_empty() {
        let pool = db::init_pool(&cfg.database_url()).await?;
        db::run_migrations(&pool).await?;
        let reviewers = db::add_reviewer(&pool, &draft.reviewer).await?;
        console.state.reduce(Action::ReviewersLoaded(reviewers));
    }

    let saved = qa::save(&datastore, record_id, &draft, field).await?;
    let mut recent = RecentlySaved::default();
    recent.mark(field);
    for f in recent.active() {
        console.line(format!("저장됨: {} (QA Done = {})", f.label(), saved.qa.qa_done));
    }
    Ok(())
}

async fn run_reviewers(cfg: &Config, action: ReviewersCommand) -> Result<()> {
    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let reviewers = match action {
        ReviewersCommand::List => db::load_reviewers(&pool).await?,
        ReviewersCommand::Add { name } => db::add_reviewer(&pool, &name).await?,
    };
    for name in reviewers {
        println!("{}", name);
    }
    Ok(())
}

async fn run_logs(cfg: &Config, post_id: &str) -> Result<()> {
    let backend = BackendClient::from_config(cfg)?;
    for entry in backend.get_logs(post_id).await? {
        if entry.is_surfaced(&cfg.backend.log_prefix) {
            println!("{} [{}] {}", entry.timestamp, entry.level, entry.message);
        }
    }
    Ok(())
}

async fn run_sample(cfg: &Config, out: Option<PathBuf>) -> Result<()> {
    let backend = BackendClient::from_config(cfg)?;
    let sample = backend.random_post_data().await?;
    let mut form = ManualForm::default();
    form.prefill(&sample);
    let yaml = serde_yaml::to_string(&form)?;
    match out {
        Some(path) => {
            tokio::fs::write(&path, yaml)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "sample form written");
        }
        None => print!("{}", yaml),
    }
    Ok(())
}

async fn run_restart(cfg: &Config, cancel: CancellationToken) -> Result<()> {
    let backend = BackendClient::from_config(cfg)?;
    match poller::restart_backend(&backend, PollPolicy::HEALTH, cancel).await? {
        PollOutcome::Completed(()) => {
            println!("backend is healthy");
            Ok(())
        }
        PollOutcome::TimedOut { attempts } => bail!("backend not healthy after {} checks", attempts),
        PollOutcome::Cancelled { .. } => Ok(()),
    }
}
