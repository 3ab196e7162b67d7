use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{Client, Method, Url};
use serde_json::{json, Map, Value};
use std::fmt;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use self::model::{
    AttachmentUpload, ListQuery, ListRecordsResp, Record, UpdateRecordsResp, UploadAttachmentResp,
};
use crate::config::Config;
use crate::error::{check_status, decode, transport, ApiError, ApiResult};

pub mod model;

const SERVICE: &str = "airtable";

/// The two tables this tool reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Posts,
    Requests,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub posts: String,
    pub requests: String,
}

impl TableNames {
    pub fn name(&self, table: Table) -> &str {
        match table {
            Table::Posts => &self.posts,
            Table::Requests => &self.requests,
        }
    }
}

#[derive(Clone)]
pub struct AirtableClient {
    http: Client,
    api_base: Url,
    content_base: Url,
    token: String,
    base_id: String,
    tables: TableNames,
}

impl fmt::Debug for AirtableClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AirtableClient")
            .field("api_base", &self.api_base)
            .field("base_id", &self.base_id)
            .finish_non_exhaustive()
    }
}

/// Datastore operations used by the sequencer, pollers and QA editor.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn create_record(&self, table: Table, fields: Map<String, Value>) -> ApiResult<Record>;

    /// Partial update: only the keys present in `fields` are touched.
    async fn update_record(
        &self,
        table: Table,
        record_id: &str,
        fields: Map<String, Value>,
    ) -> ApiResult<Record>;

    async fn list_records(&self, table: Table, query: &ListQuery) -> ApiResult<Vec<Record>>;

    /// Returns the attachment id assigned by Airtable.
    async fn upload_attachment(
        &self,
        record_id: &str,
        field: &str,
        upload: &AttachmentUpload,
    ) -> ApiResult<String>;
}

impl AirtableClient {
    pub fn new(
        token: String,
        base_id: String,
        api_base: Url,
        content_base: Url,
        tables: TableNames,
    ) -> Self {
        let http = Client::builder()
            .user_agent("medicontent-qa/0.1")
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            api_base,
            content_base,
            token,
            base_id,
            tables,
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self, ApiError> {
        let parse = |raw: &str| {
            Url::parse(raw).map_err(|e| ApiError::Invalid(format!("bad Airtable URL {}: {}", raw, e)))
        };
        Ok(Self::new(
            cfg.airtable.token.clone(),
            cfg.airtable.base_id.clone(),
            parse(&cfg.airtable.api_base)?,
            parse(&cfg.airtable.content_base)?,
            TableNames {
                posts: cfg.airtable.tables.posts.clone(),
                requests: cfg.airtable.tables.requests.clone(),
            },
        ))
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// `{api_base}/v0/{base}/{table}`, each segment percent-encoded.
    pub fn table_url(&self, table: Table) -> ApiResult<Url> {
        join_segments(
            &self.api_base,
            &["v0", &self.base_id, self.tables.name(table)],
        )
    }

    pub fn upload_url(&self, record_id: &str, field: &str) -> ApiResult<Url> {
        join_segments(
            &self.content_base,
            &["v0", &self.base_id, record_id, field, "uploadAttachment"],
        )
    }

    pub fn build_request(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> ApiResult<reqwest::Request> {
        let mut builder = self
            .http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token));
        if let Some(body) = body {
            builder = builder
                .header("Content-Type", "application/json")
                .json(body);
        }
        builder
            .build()
            .map_err(|e| ApiError::Invalid(format!("failed to build Airtable request: {}", e)))
    }

    async fn execute(&self, request: reqwest::Request) -> ApiResult<reqwest::Response> {
        debug!(method=%request.method(), url=%request.url(), "sending airtable request");
        let res = self
            .http
            .execute(request)
            .await
            .map_err(transport(SERVICE))?;
        let res = check_status(SERVICE, res).await;
        if let Err(err) = &res {
            if err.is_rate_limited() {
                warn!("rate limited by Airtable");
            }
        }
        res
    }
}

#[async_trait]
impl Datastore for AirtableClient {
    #[instrument(skip_all, fields(table = ?table))]
    async fn create_record(&self, table: Table, fields: Map<String, Value>) -> ApiResult<Record> {
        let body = build_create_body(fields);
        let request = self.build_request(Method::POST, self.table_url(table)?, Some(&body))?;
        let res = self.execute(request).await?;
        let record: Record = res.json().await.map_err(decode(SERVICE))?;
        info!(record_id = %record.id, "created airtable record");
        Ok(record)
    }

    #[instrument(skip_all, fields(table = ?table, record_id = %record_id))]
    async fn update_record(
        &self,
        table: Table,
        record_id: &str,
        fields: Map<String, Value>,
    ) -> ApiResult<Record> {
        let body = build_update_body(record_id, fields);
        let request = self.build_request(Method::PATCH, self.table_url(table)?, Some(&body))?;
        let res = self.execute(request).await?;
        let payload: UpdateRecordsResp = res.json().await.map_err(decode(SERVICE))?;
        payload
            .records
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Decode {
                service: SERVICE,
                reason: "update returned no records".to_string(),
            })
    }

    #[instrument(skip_all, fields(table = ?table))]
    async fn list_records(&self, table: Table, query: &ListQuery) -> ApiResult<Vec<Record>> {
        let mut records = Vec::new();
        let mut offset: Option<String> = None;
        loop {
            let mut url = self.table_url(table)?;
            {
                let mut qp = url.query_pairs_mut();
                for (k, v) in query.to_pairs() {
                    qp.append_pair(&k, &v);
                }
                if let Some(offset) = &offset {
                    qp.append_pair("offset", offset);
                }
            }
            let request = self.build_request(Method::GET, url, None)?;
            let res = self.execute(request).await?;
            let page: ListRecordsResp = res.json().await.map_err(decode(SERVICE))?;
            records.extend(page.records);
            match page.offset {
                Some(next) if !next.is_empty() => offset = Some(next),
                _ => break,
            }
        }
        debug!(count = records.len(), "listed airtable records");
        Ok(records)
    }

    #[instrument(skip_all, fields(record_id = %record_id, field = %field, filename = %upload.filename))]
    async fn upload_attachment(
        &self,
        record_id: &str,
        field: &str,
        upload: &AttachmentUpload,
    ) -> ApiResult<String> {
        let body = build_upload_body(upload);
        let request =
            self.build_request(Method::POST, self.upload_url(record_id, field)?, Some(&body))?;
        let res = self.execute(request).await?;
        let payload: UploadAttachmentResp = res.json().await.map_err(decode(SERVICE))?;
        info!(attachment_id = %payload.id, "uploaded attachment");
        Ok(payload.id)
    }
}

pub fn build_create_body(fields: Map<String, Value>) -> Value {
    json!({ "fields": Value::Object(fields) })
}

pub fn build_update_body(record_id: &str, fields: Map<String, Value>) -> Value {
    json!({
        "records": [
            { "id": record_id, "fields": Value::Object(fields) }
        ]
    })
}

pub fn build_upload_body(upload: &AttachmentUpload) -> Value {
    json!({
        "contentType": upload.content_type,
        "file": general_purpose::STANDARD.encode(&upload.bytes),
        "filename": upload.filename,
    })
}

/// Read a file from disk into an upload payload.
pub async fn read_attachment<P: AsRef<Path>>(file_path: P) -> ApiResult<AttachmentUpload> {
    let file_path = file_path.as_ref();
    let filename = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ApiError::Invalid(format!("invalid file name: {}", file_path.display())))?
        .to_string();
    let bytes = fs::read(file_path).await?;
    Ok(AttachmentUpload {
        content_type: content_type_for(file_path).to_string(),
        filename,
        bytes,
    })
}

pub fn content_type_for(file_path: &Path) -> &'static str {
    match file_path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|s| s.to_ascii_lowercase())
    {
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "gif" => "image/gif",
        Some(ext) if ext == "webp" => "image/webp",
        Some(ext) if ext == "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}

fn join_segments(base: &Url, segments: &[&str]) -> ApiResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ApiError::Invalid(format!("cannot use {} as a base URL", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> AirtableClient {
        AirtableClient::new(
            "token".into(),
            "appBASE".into(),
            Url::parse("https://api.airtable.com/").unwrap(),
            Url::parse("https://content.airtable.com/").unwrap(),
            TableNames {
                posts: "Medicontent Posts".into(),
                requests: "Post Data Requests".into(),
            },
        )
    }

    #[test]
    fn table_url_encodes_spaces() {
        let url = client().table_url(Table::Posts).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.airtable.com/v0/appBASE/Medicontent%20Posts"
        );
    }

    #[test]
    fn upload_url_targets_content_host() {
        let url = client().upload_url("recXYZ", "Before Images").unwrap();
        assert_eq!(
            url.as_str(),
            "https://content.airtable.com/v0/appBASE/recXYZ/Before%20Images/uploadAttachment"
        );
    }

    #[test]
    fn build_request_sets_headers() {
        let c = client();
        let body = json!({ "sample": true });
        let request = c
            .build_request(Method::PATCH, c.table_url(Table::Requests).unwrap(), Some(&body))
            .unwrap();
        assert_eq!(request.method(), Method::PATCH);
        assert_eq!(request.url().path(), "/v0/appBASE/Post%20Data%20Requests");
        let headers = request.headers();
        assert_eq!(
            headers
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer token"
        );
        assert_eq!(
            headers
                .get("Content-Type")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "application/json"
        );
    }

    #[test]
    fn update_body_wraps_single_record() {
        let mut fields = Map::new();
        fields.insert("QA Done".into(), json!(true));
        let body = build_update_body("rec1", fields);
        assert_eq!(body["records"][0]["id"], "rec1");
        assert_eq!(body["records"][0]["fields"]["QA Done"], true);
        assert_eq!(body["records"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn upload_body_is_base64() {
        let upload = AttachmentUpload {
            filename: "a.png".into(),
            content_type: "image/png".into(),
            bytes: b"hello".to_vec(),
        };
        let body = build_upload_body(&upload);
        assert_eq!(body["file"], "aGVsbG8=");
        assert_eq!(body["contentType"], "image/png");
        assert_eq!(body["filename"], "a.png");
    }

    #[test]
    fn content_type_by_extension() {
        assert_eq!(content_type_for(Path::new("x.JPG")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("x.png")), "image/png");
        assert_eq!(content_type_for(Path::new("x.bin")), "application/octet-stream");
    }
}
