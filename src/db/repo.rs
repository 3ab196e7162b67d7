use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::{info, instrument};

pub type Pool = SqlitePool;

/// Key under which the reviewer names are stored.
pub const REVIEWERS_KEY: &str = "qa_reviewers";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let url = prepare_sqlite_url(database_url);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .with_context(|| format!("opening {}", url))?;
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// Expand a leading `~/` in a file-backed SQLite URL and create its parent
/// directory. In-memory and non-SQLite URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{}?{}", path, q),
        None => format!("sqlite://{}", path),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn kv_get(pool: &Pool, key: &str) -> Result<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM kv_store WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

#[instrument(skip(pool, value))]
pub async fn kv_set(pool: &Pool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO kv_store (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// Reviewer names in insertion order. A missing or unreadable entry is empty.
#[instrument(skip_all)]
pub async fn load_reviewers(pool: &Pool) -> Result<Vec<String>> {
    let Some(raw) = kv_get(pool, REVIEWERS_KEY).await? else {
        return Ok(Vec::new());
    };
    Ok(serde_json::from_str(&raw).unwrap_or_default())
}

/// Add `name` to the registry. Blank and already-known names are ignored.
/// Returns the list as stored afterwards.
#[instrument(skip(pool))]
pub async fn add_reviewer(pool: &Pool, name: &str) -> Result<Vec<String>> {
    let mut reviewers = load_reviewers(pool).await?;
    let name = name.trim();
    if name.is_empty() || reviewers.iter().any(|r| r == name) {
        return Ok(reviewers);
    }
    reviewers.push(name.to_string());
    kv_set(pool, REVIEWERS_KEY, &serde_json::to_string(&reviewers)?).await?;
    info!(count = reviewers.len(), "reviewer added");
    Ok(reviewers)
}
