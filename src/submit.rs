//! Manual submission: Post, Post Data Request, image uploads, backend trigger.
use rand::Rng;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::airtable::{read_attachment, Datastore, Table};
use crate::backend::{Backend, ProcessAck};
use crate::error::ApiError;
use crate::form::{FormError, ManualForm};
use crate::model::ImageCategory;

pub const POST_ID_PREFIX: &str = "QA_";
const POST_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const POST_ID_RANDOM_LEN: usize = 12;

/// `QA_` followed by twelve alphanumeric characters. Uniqueness is not checked
/// against the datastore.
pub fn generate_post_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut id = String::with_capacity(POST_ID_PREFIX.len() + POST_ID_RANDOM_LEN);
    id.push_str(POST_ID_PREFIX);
    for _ in 0..POST_ID_RANDOM_LEN {
        let idx = rng.gen_range(0..POST_ID_ALPHABET.len());
        id.push(POST_ID_ALPHABET[idx] as char);
    }
    id
}

pub fn new_post_id() -> String {
    generate_post_id(&mut rand::thread_rng())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    pub category: ImageCategory,
    pub path: PathBuf,
    pub attachment_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedUpload {
    pub category: ImageCategory,
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionReport {
    pub post_id: String,
    pub post_record_id: String,
    pub request_record_id: String,
    pub uploaded: Vec<UploadedImage>,
    pub failed_uploads: Vec<FailedUpload>,
    pub backend: ProcessAck,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Form(#[from] FormError),
    #[error("failed to create post {post_id}: {source}")]
    CreatePost {
        post_id: String,
        #[source]
        source: ApiError,
    },
    /// The Post already exists at this point and is left behind.
    #[error("failed to create post data request for {post_id} (post record {post_record_id} kept): {source}")]
    CreateRequest {
        post_id: String,
        post_record_id: String,
        #[source]
        source: ApiError,
    },
    #[error("backend refused to start processing {post_id}: {source}")]
    Trigger {
        post_id: String,
        #[source]
        source: ApiError,
    },
}

/// Run the full manual submission with a freshly generated post id.
pub async fn submit(
    datastore: &dyn Datastore,
    backend: &dyn Backend,
    form: &ManualForm,
) -> Result<SubmissionReport, SubmitError> {
    submit_with_id(datastore, backend, form, new_post_id()).await
}

/// Record creation precedes every upload, and every upload precedes the
/// backend trigger. Upload failures are collected, not propagated.
#[instrument(skip_all, fields(post_id = %post_id))]
pub async fn submit_with_id(
    datastore: &dyn Datastore,
    backend: &dyn Backend,
    form: &ManualForm,
    post_id: String,
) -> Result<SubmissionReport, SubmitError> {
    form.validate()?;
    info!(treatment_type = %form.treatment_type, images = form.image_count(), "submitting post");

    let post = datastore
        .create_record(Table::Posts, form.post_fields(&post_id))
        .await
        .map_err(|source| {
            error!(%source, "post creation failed");
            SubmitError::CreatePost {
                post_id: post_id.clone(),
                source,
            }
        })?;

    let request = datastore
        .create_record(Table::Requests, form.request_fields(&post_id))
        .await
        .map_err(|source| {
            error!(%source, post_record_id = %post.id, "post data request creation failed");
            SubmitError::CreateRequest {
                post_id: post_id.clone(),
                post_record_id: post.id.clone(),
                source,
            }
        })?;

    let mut uploaded = Vec::new();
    let mut failed_uploads = Vec::new();
    for category in ImageCategory::ALL {
        for path in form.images(category) {
            match upload_one(datastore, &request.id, category, path).await {
                Ok(attachment_id) => {
                    info!(field = category.field_name(), %attachment_id, "image uploaded");
                    uploaded.push(UploadedImage {
                        category,
                        path: path.clone(),
                        attachment_id,
                    });
                }
                Err(err) => {
                    warn!(field = category.field_name(), path = %path.display(), %err, "image upload failed");
                    failed_uploads.push(FailedUpload {
                        category,
                        path: path.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
    }

    let ack = backend
        .process_post(&post_id)
        .await
        .map_err(|source| SubmitError::Trigger {
            post_id: post_id.clone(),
            source,
        })?;

    info!(
        uploaded = uploaded.len(),
        failed = failed_uploads.len(),
        "submission complete"
    );
    Ok(SubmissionReport {
        post_id,
        post_record_id: post.id,
        request_record_id: request.id,
        uploaded,
        failed_uploads,
        backend: ack,
    })
}

async fn upload_one(
    datastore: &dyn Datastore,
    record_id: &str,
    category: ImageCategory,
    path: &Path,
) -> Result<String, ApiError> {
    let upload = read_attachment(path).await?;
    datastore
        .upload_attachment(record_id, category.field_name(), &upload)
        .await
}
