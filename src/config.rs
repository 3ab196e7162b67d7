//! Configuration loader and validator for the medicontent QA tool.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const BACKEND_URL_ENV: &str = "MEDICONTENT_BACKEND_URL";
pub const AIRTABLE_TOKEN_ENV: &str = "AIRTABLE_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub airtable: Airtable,
    pub backend: Backend,
    pub webhook: Webhook,
    pub polling: Polling,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Airtable credentials and table names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Airtable {
    pub token: String,
    pub base_id: String,
    pub api_base: String,
    pub content_base: String,
    pub tables: Tables,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tables {
    pub posts: String,
    pub requests: String,
}

/// Agent backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backend {
    pub base_url: String,
    pub workflow_id: String,
    pub log_prefix: String,
}

/// Batch auto-generation webhook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Webhook {
    pub url: String,
    pub source: String,
}

/// Poll intervals and attempt budgets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Polling {
    pub completion_interval_ms: u64,
    pub completion_max_attempts: u32,
    pub record_interval_ms: u64,
    pub record_max_attempts: u32,
    pub batch_interval_ms: u64,
    pub batch_timeout_seconds: u64,
}

impl Polling {
    pub fn completion_interval(&self) -> Duration {
        Duration::from_millis(self.completion_interval_ms)
    }

    pub fn record_interval(&self) -> Duration {
        Duration::from_millis(self.record_interval_ms)
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_seconds)
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Local SQLite file holding the reviewer registry.
    pub fn database_url(&self) -> String {
        format!(
            "sqlite://{}/medicontent.db?mode=rwc",
            self.app.data_dir.trim_end_matches('/')
        )
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(BACKEND_URL_ENV) {
            if !url.trim().is_empty() {
                self.backend.base_url = url;
            }
        }
        if let Ok(token) = std::env::var(AIRTABLE_TOKEN_ENV) {
            if !token.trim().is_empty() {
                self.airtable.token = token;
            }
        }
    }
}

/// Load configuration from a YAML file, apply environment overrides and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env_overrides();
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    let at = &cfg.airtable;
    if at.token.trim().is_empty() {
        return Err(ConfigError::Invalid("airtable.token must be non-empty"));
    }
    if at.base_id.trim().is_empty() {
        return Err(ConfigError::Invalid("airtable.base_id must be non-empty"));
    }
    if reqwest::Url::parse(&at.api_base).is_err() {
        return Err(ConfigError::Invalid("airtable.api_base must be a valid URL"));
    }
    if reqwest::Url::parse(&at.content_base).is_err() {
        return Err(ConfigError::Invalid(
            "airtable.content_base must be a valid URL",
        ));
    }
    if at.tables.posts.trim().is_empty() {
        return Err(ConfigError::Invalid("airtable.tables.posts must be non-empty"));
    }
    if at.tables.requests.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "airtable.tables.requests must be non-empty",
        ));
    }

    if reqwest::Url::parse(&cfg.backend.base_url).is_err() {
        return Err(ConfigError::Invalid("backend.base_url must be a valid URL"));
    }
    if cfg.backend.workflow_id.trim().is_empty() {
        return Err(ConfigError::Invalid("backend.workflow_id must be non-empty"));
    }

    if reqwest::Url::parse(&cfg.webhook.url).is_err() {
        return Err(ConfigError::Invalid("webhook.url must be a valid URL"));
    }

    let p = &cfg.polling;
    if p.completion_interval_ms == 0 || p.record_interval_ms == 0 || p.batch_interval_ms == 0 {
        return Err(ConfigError::Invalid("polling intervals must be > 0"));
    }
    if p.completion_max_attempts == 0 || p.record_max_attempts == 0 {
        return Err(ConfigError::Invalid("polling attempt budgets must be > 0"));
    }
    if p.batch_timeout_seconds == 0 {
        return Err(ConfigError::Invalid(
            "polling.batch_timeout_seconds must be > 0",
        ));
    }

    Ok(())
}

/// Returns a complete example configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

airtable:
  token: "YOUR_AIRTABLE_PERSONAL_ACCESS_TOKEN"
  base_id: "appXXXXXXXXXXXXXX"
  api_base: "https://api.airtable.com/"
  content_base: "https://content.airtable.com/"
  tables:
    posts: "Medicontent Posts"
    requests: "Post Data Requests"

backend:
  base_url: "https://medicontent-api.example.com/"
  workflow_id: "medicontent_autoblog_QA_manual"
  log_prefix: "[STEP]"

webhook:
  url: "https://n8n.example.com/webhook/medicontent-auto"
  source: "medicontent-qa"

polling:
  completion_interval_ms: 5000
  completion_max_attempts: 60
  record_interval_ms: 3000
  record_max_attempts: 40
  batch_interval_ms: 5000
  batch_timeout_seconds: 300
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn example_cfg() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = example_cfg();
        validate(&cfg).unwrap();
        assert_eq!(cfg.airtable.tables.posts, "Medicontent Posts");
        assert_eq!(cfg.polling.completion_interval(), Duration::from_secs(5));
        assert_eq!(cfg.polling.batch_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn invalid_airtable_token() {
        let mut cfg = example_cfg();
        cfg.airtable.token = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("airtable.token")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_table_names() {
        let mut cfg = example_cfg();
        cfg.airtable.tables.posts = " ".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("tables.posts")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_cfg();
        cfg.airtable.tables.requests = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_urls() {
        let mut cfg = example_cfg();
        cfg.backend.base_url = "not a url".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("backend.base_url")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_cfg();
        cfg.webhook.url = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_polling_values_rejected() {
        let mut cfg = example_cfg();
        cfg.polling.record_interval_ms = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.polling.completion_max_attempts = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg = example_cfg();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
        assert!(cfg.database_url().ends_with("/medicontent.db?mode=rwc"));
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.backend.workflow_id, "medicontent_autoblog_QA_manual");
    }
}
