use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::airtable::model::Record;

/// Airtable field names of the `Medicontent Posts` table.
pub mod post_fields {
    pub const POST_ID: &str = "Post Id";
    pub const TITLE: &str = "Title";
    pub const TYPE: &str = "Type";
    pub const STATUS: &str = "Status";
    pub const TREATMENT_TYPE: &str = "Treatment Type";
    pub const CONTENT: &str = "Content";
    pub const QA_REVIEWER: &str = "QA Reviewer";
    pub const CONTENT_REVIEW: &str = "Content Review";
    pub const CONTENT_SCORE: &str = "Content Score";
    pub const LEGAL_REVIEW: &str = "Legal Review";
    pub const LEGAL_SCORE: &str = "Legal Score";
    pub const ETC_REVIEW: &str = "Etc Review";
    pub const QA_DONE: &str = "QA Done";
    pub const LAST_MODIFIED: &str = "Last Modified";
}

/// Airtable field names of the `Post Data Requests` table.
pub mod request_fields {
    pub const POST_ID: &str = "Post ID";
    pub const CONCEPT_MESSAGE: &str = "Concept Message";
    pub const PATIENT_CONDITION: &str = "Patient Condition";
    pub const TREATMENT_PROCESS_MESSAGE: &str = "Treatment Process Message";
    pub const TREATMENT_RESULT_MESSAGE: &str = "Treatment Result Message";
    pub const ADDITIONAL_MESSAGE: &str = "Additional Message";
    pub const BEFORE_IMAGES: &str = "Before Images";
    pub const PROCESS_IMAGES: &str = "Process Images";
    pub const AFTER_IMAGES: &str = "After Images";
    pub const BEFORE_IMAGES_TEXTS: &str = "Before Images Texts";
    pub const PROCESS_IMAGES_TEXTS: &str = "Process Images Texts";
    pub const AFTER_IMAGES_TEXTS: &str = "After Images Texts";
    pub const STATUS: &str = "Status";
}

pub const POST_TYPE_CONVERSION: &str = "전환 포스팅";

pub const TREATMENT_TYPES: [&str; 5] = ["신경치료", "임플란트", "교정치료", "보철치료", "예방치료"];

/// Overall state of a Post. Values are owned by the external datastore; only
/// the two this tool compares against get their own variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PostStatus {
    InProgress,
    Complete,
    Other(String),
}

impl PostStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "리걸케어 작업 중" => PostStatus::InProgress,
            "작업 완료" => PostStatus::Complete,
            other => PostStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PostStatus::InProgress => "리걸케어 작업 중",
            PostStatus::Complete => "작업 완료",
            PostStatus::Other(raw) => raw,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, PostStatus::Complete)
    }
}

/// Processing stage of a Post Data Request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    Pending,
    Processing,
    Done,
    Failed,
    Other(String),
}

impl RequestStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "대기" => RequestStatus::Pending,
            "처리 중" => RequestStatus::Processing,
            "완료" => RequestStatus::Done,
            "오류" => RequestStatus::Failed,
            other => RequestStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RequestStatus::Pending => "대기",
            RequestStatus::Processing => "처리 중",
            RequestStatus::Done => "완료",
            RequestStatus::Failed => "오류",
            RequestStatus::Other(raw) => raw,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, RequestStatus::Done)
    }
}

/// The three image lists of a manual submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageCategory {
    Before,
    Process,
    After,
}

impl ImageCategory {
    pub const ALL: [ImageCategory; 3] = [
        ImageCategory::Before,
        ImageCategory::Process,
        ImageCategory::After,
    ];

    /// Attachment field on the Post Data Request the images are uploaded into.
    pub fn field_name(&self) -> &'static str {
        match self {
            ImageCategory::Before => request_fields::BEFORE_IMAGES,
            ImageCategory::Process => request_fields::PROCESS_IMAGES,
            ImageCategory::After => request_fields::AFTER_IMAGES,
        }
    }

    pub fn caption_field(&self) -> &'static str {
        match self {
            ImageCategory::Before => request_fields::BEFORE_IMAGES_TEXTS,
            ImageCategory::Process => request_fields::PROCESS_IMAGES_TEXTS,
            ImageCategory::After => request_fields::AFTER_IMAGES_TEXTS,
        }
    }
}

/// QA columns of a Post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaFields {
    pub reviewer: String,
    pub content_review: String,
    pub content_score: Option<u8>,
    pub legal_review: String,
    pub legal_score: Option<u8>,
    pub etc_review: String,
    pub qa_done: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub record_id: String,
    pub post_id: String,
    pub title: String,
    pub kind: String,
    pub status: PostStatus,
    pub treatment_type: String,
    pub content: String,
    pub qa: QaFields,
    pub last_modified: Option<DateTime<Utc>>,
}

impl Post {
    pub fn from_record(record: &Record) -> Self {
        use post_fields as f;
        let fields = &record.fields;
        Post {
            record_id: record.id.clone(),
            post_id: text(fields, f::POST_ID),
            title: text(fields, f::TITLE),
            kind: text(fields, f::TYPE),
            status: PostStatus::parse(&text(fields, f::STATUS)),
            treatment_type: text(fields, f::TREATMENT_TYPE),
            content: text(fields, f::CONTENT),
            qa: QaFields {
                reviewer: text(fields, f::QA_REVIEWER),
                content_review: text(fields, f::CONTENT_REVIEW),
                content_score: score(fields, f::CONTENT_SCORE),
                legal_review: text(fields, f::LEGAL_REVIEW),
                legal_score: score(fields, f::LEGAL_SCORE),
                etc_review: text(fields, f::ETC_REVIEW),
                qa_done: fields
                    .get(f::QA_DONE)
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            },
            last_modified: fields
                .get(f::LAST_MODIFIED)
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostDataRequest {
    pub record_id: String,
    pub post_id: String,
    pub status: RequestStatus,
    pub created_time: Option<DateTime<Utc>>,
}

impl PostDataRequest {
    pub fn from_record(record: &Record) -> Self {
        PostDataRequest {
            record_id: record.id.clone(),
            post_id: text(&record.fields, request_fields::POST_ID),
            status: RequestStatus::parse(&text(&record.fields, request_fields::STATUS)),
            created_time: record.created_time,
        }
    }
}

/// Read a text-ish field; numbers are rendered, missing values become "".
pub fn text(fields: &Map<String, Value>, key: &str) -> String {
    match fields.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Read a 0..=5 score. Airtable may return numbers or numeric strings.
pub fn score(fields: &Map<String, Value>, key: &str) -> Option<u8> {
    let raw = match fields.get(key)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if (0.0..=5.0).contains(&raw) {
        Some(raw.round() as u8)
    } else {
        None
    }
}
