//! QA editor: four independent partial saves against a Post.
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument};

use crate::airtable::model::{formula_record_id, ListQuery};
use crate::airtable::{Datastore, Table};
use crate::error::ApiResult;
use crate::model::{post_fields, Post, QaFields};

pub const SAVED_INDICATOR: Duration = Duration::from_secs(3);

/// One save button of the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum QaField {
    Reviewer,
    Content,
    Legal,
    Etc,
}

impl QaField {
    pub const ALL: [QaField; 4] = [QaField::Reviewer, QaField::Content, QaField::Legal, QaField::Etc];

    pub fn label(&self) -> &'static str {
        match self {
            QaField::Reviewer => "reviewer",
            QaField::Content => "content",
            QaField::Legal => "legal",
            QaField::Etc => "etc",
        }
    }
}

/// Editor state for the selected post.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QaDraft {
    pub reviewer: String,
    pub content_review: String,
    pub content_score: Option<u8>,
    pub legal_review: String,
    pub legal_score: Option<u8>,
    pub etc_review: String,
}

impl QaDraft {
    pub fn from_post(post: &Post) -> Self {
        Self::from(&post.qa)
    }

    /// True when any of the four text columns is non-empty.
    pub fn has_qa(&self) -> bool {
        [
            &self.reviewer,
            &self.content_review,
            &self.legal_review,
            &self.etc_review,
        ]
        .iter()
        .any(|s| !s.is_empty())
    }

    /// Edit one section. Values left as `None` keep what the draft holds.
    pub fn apply(&mut self, field: QaField, text: Option<String>, score: Option<u8>) {
        let (text_slot, score_slot) = match field {
            QaField::Reviewer => (&mut self.reviewer, None),
            QaField::Content => (&mut self.content_review, Some(&mut self.content_score)),
            QaField::Legal => (&mut self.legal_review, Some(&mut self.legal_score)),
            QaField::Etc => (&mut self.etc_review, None),
        };
        if let Some(text) = text {
            *text_slot = text;
        }
        if let (Some(slot), Some(score)) = (score_slot, score) {
            *slot = Some(score);
        }
    }

    /// The columns written by `field`, plus `QA Done`.
    pub fn fields_for(&self, field: QaField) -> Map<String, Value> {
        use post_fields as f;
        let mut fields = Map::new();
        match field {
            QaField::Reviewer => {
                fields.insert(f::QA_REVIEWER.into(), json!(self.reviewer));
            }
            QaField::Content => {
                fields.insert(f::CONTENT_REVIEW.into(), json!(self.content_review));
                fields.insert(f::CONTENT_SCORE.into(), json!(self.content_score));
            }
            QaField::Legal => {
                fields.insert(f::LEGAL_REVIEW.into(), json!(self.legal_review));
                fields.insert(f::LEGAL_SCORE.into(), json!(self.legal_score));
            }
            QaField::Etc => {
                fields.insert(f::ETC_REVIEW.into(), json!(self.etc_review));
            }
        }
        fields.insert(f::QA_DONE.into(), json!(self.has_qa()));
        fields
    }
}

impl From<&QaFields> for QaDraft {
    fn from(qa: &QaFields) -> Self {
        Self {
            reviewer: qa.reviewer.clone(),
            content_review: qa.content_review.clone(),
            content_score: qa.content_score,
            legal_review: qa.legal_review.clone(),
            legal_score: qa.legal_score,
            etc_review: qa.etc_review.clone(),
        }
    }
}

/// Current state of one post, looked up by Airtable record id.
pub async fn fetch_post(datastore: &dyn Datastore, record_id: &str) -> ApiResult<Option<Post>> {
    let records = datastore
        .list_records(
            Table::Posts,
            &ListQuery::filtered(formula_record_id(record_id)).limit(1),
        )
        .await?;
    Ok(records.first().map(Post::from_record))
}

/// Write one section of the draft. Last write wins; no conflict check.
#[instrument(skip_all, fields(record_id = %record_id, field = field.label()))]
pub async fn save(
    datastore: &dyn Datastore,
    record_id: &str,
    draft: &QaDraft,
    field: QaField,
) -> ApiResult<Post> {
    let record = datastore
        .update_record(Table::Posts, record_id, draft.fields_for(field))
        .await?;
    info!(qa_done = draft.has_qa(), "qa saved");
    Ok(Post::from_record(&record))
}

/// Which save buttons show their "saved" mark right now.
#[derive(Debug, Default)]
pub struct RecentlySaved {
    saved_at: HashMap<QaField, Instant>,
}

impl RecentlySaved {
    pub fn mark(&mut self, field: QaField) {
        self.saved_at.insert(field, Instant::now());
    }

    pub fn is_recent(&self, field: QaField) -> bool {
        self.saved_at
            .get(&field)
            .map_or(false, |at| at.elapsed() < SAVED_INDICATOR)
    }

    /// Drop expired marks.
    pub fn prune(&mut self) {
        self.saved_at.retain(|_, at| at.elapsed() < SAVED_INDICATOR);
    }

    pub fn active(&self) -> Vec<QaField> {
        QaField::ALL
            .into_iter()
            .filter(|f| self.is_recent(*f))
            .collect()
    }
}
