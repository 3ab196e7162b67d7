//! Review list: completed posts, client-side filters and the per-row tone.
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, instrument};

use crate::airtable::model::{formula_eq, ListQuery, SortDirection};
use crate::airtable::{Datastore, Table};
use crate::error::ApiResult;
use crate::model::{post_fields, Post, PostStatus};

static SCORE_RANGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\s*(?:-\s*(\d+)\s*)?$").expect("static regex"));

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid score range {0:?}, expected \"min\" or \"min-max\"")]
pub struct ScoreRangeError(String);

/// `"4"` means score ≥ 4, `"1-3"` means 1 ≤ score ≤ 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreRange {
    pub min: u8,
    pub max: Option<u8>,
}

impl ScoreRange {
    pub fn contains(&self, score: u8) -> bool {
        score >= self.min && self.max.map_or(true, |max| score <= max)
    }
}

impl FromStr for ScoreRange {
    type Err = ScoreRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = SCORE_RANGE
            .captures(s)
            .ok_or_else(|| ScoreRangeError(s.to_string()))?;
        let bound = |i: usize| -> Result<Option<u8>, ScoreRangeError> {
            caps.get(i)
                .map(|m| m.as_str().parse::<u8>())
                .transpose()
                .map_err(|_| ScoreRangeError(s.to_string()))
        };
        let min = bound(1)?.ok_or_else(|| ScoreRangeError(s.to_string()))?;
        let max = bound(2)?;
        if matches!(max, Some(max) if max < min) {
            return Err(ScoreRangeError(s.to_string()));
        }
        Ok(ScoreRange { min, max })
    }
}

impl fmt::Display for ScoreRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "{}-{}", self.min, max),
            None => write!(f, "{}", self.min),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum QaFilter {
    #[default]
    All,
    Done,
    Pending,
}

/// All set criteria must hold. Evaluation order does not matter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewFilter {
    pub search: Option<String>,
    pub qa: QaFilter,
    pub reviewer: Option<String>,
    pub content_score: Option<ScoreRange>,
    pub legal_score: Option<ScoreRange>,
}

impl ReviewFilter {
    pub fn matches(&self, post: &Post) -> bool {
        self.matches_search(post)
            && self.matches_qa(post)
            && self.matches_reviewer(post)
            && score_matches(self.content_score, post.qa.content_score)
            && score_matches(self.legal_score, post.qa.legal_score)
    }

    pub fn apply<'a>(&self, posts: &'a [Post]) -> Vec<&'a Post> {
        posts.iter().filter(|p| self.matches(p)).collect()
    }

    fn matches_search(&self, post: &Post) -> bool {
        match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(term) => {
                let term = term.to_lowercase();
                post.post_id.to_lowercase().contains(&term)
                    || post.title.to_lowercase().contains(&term)
            }
        }
    }

    fn matches_qa(&self, post: &Post) -> bool {
        match self.qa {
            QaFilter::All => true,
            QaFilter::Done => post.qa.qa_done,
            QaFilter::Pending => !post.qa.qa_done,
        }
    }

    fn matches_reviewer(&self, post: &Post) -> bool {
        match self.reviewer.as_deref() {
            None | Some("") => true,
            Some(name) => post.qa.reviewer == name,
        }
    }
}

// A record without a score never satisfies a score filter.
fn score_matches(range: Option<ScoreRange>, score: Option<u8>) -> bool {
    match (range, score) {
        (None, _) => true,
        (Some(range), Some(score)) => range.contains(score),
        (Some(_), None) => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Neutral,
    Alarm,
    Caution,
    Good,
}

impl Tone {
    pub fn label(&self) -> &'static str {
        match self {
            Tone::Neutral => "-",
            Tone::Alarm => "!!",
            Tone::Caution => "!",
            Tone::Good => "ok",
        }
    }
}

/// First match wins: no QA yet, any score ≤ 1, any score in (1, 3], both ≥ 4.
pub fn tone(post: &Post) -> Tone {
    if !post.qa.qa_done {
        return Tone::Neutral;
    }
    let scores = [post.qa.content_score, post.qa.legal_score];
    if scores.iter().flatten().any(|s| *s <= 1) {
        return Tone::Alarm;
    }
    if scores.iter().flatten().any(|s| *s > 1 && *s <= 3) {
        return Tone::Caution;
    }
    if scores.iter().all(|s| matches!(s, Some(s) if *s >= 4)) {
        return Tone::Good;
    }
    Tone::Neutral
}

pub fn completed_query() -> ListQuery {
    ListQuery::filtered(formula_eq(post_fields::STATUS, PostStatus::Complete.as_str()))
        .sorted(post_fields::LAST_MODIFIED, SortDirection::Desc)
}

/// All posts whose status is `작업 완료`, most recently modified first.
#[instrument(skip_all)]
pub async fn fetch_completed(datastore: &dyn Datastore) -> ApiResult<Vec<Post>> {
    let records = datastore
        .list_records(Table::Posts, &completed_query())
        .await?;
    let posts: Vec<Post> = records.iter().map(Post::from_record).collect();
    info!(count = posts.len(), "fetched completed posts");
    Ok(posts)
}
