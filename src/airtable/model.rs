use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One row as Airtable returns it: id, creation time and a loosely-typed field map.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    #[serde(rename = "createdTime", default)]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

#[derive(Deserialize, Debug)]
pub struct ListRecordsResp {
    pub records: Vec<Record>,
    #[serde(default)]
    pub offset: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct UpdateRecordsResp {
    pub records: Vec<Record>,
}

#[derive(Deserialize, Debug)]
pub struct UploadAttachmentResp {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// Parameters of a list call; translated into `filterByFormula` / `sort[n][...]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub formula: Option<String>,
    pub sort: Vec<(String, SortDirection)>,
    pub max_records: Option<u32>,
}

impl ListQuery {
    pub fn filtered(formula: impl Into<String>) -> Self {
        Self {
            formula: Some(formula.into()),
            ..Default::default()
        }
    }

    pub fn sorted(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push((field.into(), direction));
        self
    }

    pub fn limit(mut self, max_records: u32) -> Self {
        self.max_records = Some(max_records);
        self
    }

    /// Query-string pairs, `offset` excluded.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(formula) = &self.formula {
            pairs.push(("filterByFormula".to_string(), formula.clone()));
        }
        for (i, (field, direction)) in self.sort.iter().enumerate() {
            pairs.push((format!("sort[{}][field]", i), field.clone()));
            pairs.push((format!("sort[{}][direction]", i), direction.as_str().to_string()));
        }
        if let Some(max) = self.max_records {
            pairs.push(("maxRecords".to_string(), max.to_string()));
        }
        pairs
    }
}

/// A file ready to be pushed through the attachment upload endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct AttachmentUpload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for AttachmentUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentUpload")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// `{Field} = 'value'` with single quotes escaped.
pub fn formula_eq(field: &str, value: &str) -> String {
    format!("{{{}}} = '{}'", field, escape_formula(value))
}

pub fn formula_record_id(record_id: &str) -> String {
    format!("RECORD_ID() = '{}'", escape_formula(record_id))
}

/// Records created strictly after `since`.
pub fn formula_created_after(since: DateTime<Utc>) -> String {
    format!(
        "IS_AFTER(CREATED_TIME(), '{}')",
        since.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    )
}

fn escape_formula(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn list_query_pairs_include_sort_and_formula() {
        let q = ListQuery::filtered(formula_eq("Status", "작업 완료"))
            .sorted("Last Modified", SortDirection::Desc)
            .limit(50);
        let pairs = q.to_pairs();
        assert_eq!(
            pairs[0],
            ("filterByFormula".into(), "{Status} = '작업 완료'".into())
        );
        assert_eq!(pairs[1], ("sort[0][field]".into(), "Last Modified".into()));
        assert_eq!(pairs[2], ("sort[0][direction]".into(), "desc".into()));
        assert_eq!(pairs[3], ("maxRecords".into(), "50".into()));
    }

    #[test]
    fn formula_escapes_quotes() {
        assert_eq!(formula_eq("Post ID", "a'b"), "{Post ID} = 'a\\'b'");
        assert_eq!(formula_record_id("rec1"), "RECORD_ID() = 'rec1'");
    }

    #[test]
    fn created_after_uses_utc_millis() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        assert_eq!(
            formula_created_after(ts),
            "IS_AFTER(CREATED_TIME(), '2024-05-01T09:30:00.000Z')"
        );
    }

    #[test]
    fn record_deserializes_airtable_shape() {
        let rec: Record = serde_json::from_value(json!({
            "id": "recABC",
            "createdTime": "2024-05-01T09:30:00.000Z",
            "fields": { "Post ID": "QA_x" }
        }))
        .unwrap();
        assert_eq!(rec.id, "recABC");
        assert!(rec.created_time.is_some());
        assert_eq!(rec.fields["Post ID"], "QA_x");
    }
}
