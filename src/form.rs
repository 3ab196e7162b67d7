//! Form state for manual submissions and batch auto-generation.
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::backend::SamplePostData;
use crate::model::{
    post_fields, request_fields, ImageCategory, PostStatus, RequestStatus, POST_TYPE_CONVERSION,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("treatment type must be selected")]
    MissingTreatmentType,
    #[error("count must be at least 1")]
    InvalidCount,
    #[error("image {index} out of range for {category:?}")]
    NoSuchImage {
        category: ImageCategory,
        index: usize,
    },
}

/// Manual case description: treatment type, eight answers and three image lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ManualForm {
    pub treatment_type: String,
    pub concept_message: String,
    pub patient_condition: String,
    pub treatment_process_message: String,
    pub treatment_result_message: String,
    pub additional_message: String,
    pub before_images_text: String,
    pub process_images_text: String,
    pub after_images_text: String,
    pub before_images: Vec<PathBuf>,
    pub process_images: Vec<PathBuf>,
    pub after_images: Vec<PathBuf>,
}

impl ManualForm {
    /// Load a form from YAML. Relative image paths resolve against the file's directory.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)?;
        let mut form: ManualForm = serde_yaml::from_str(&raw)?;
        if let Some(dir) = path.parent() {
            for category in ImageCategory::ALL {
                for image in form.images_mut(category) {
                    if image.is_relative() {
                        *image = dir.join(&*image);
                    }
                }
            }
        }
        Ok(form)
    }

    pub fn validate(&self) -> Result<(), FormError> {
        if self.treatment_type.trim().is_empty() {
            return Err(FormError::MissingTreatmentType);
        }
        Ok(())
    }

    pub fn images(&self, category: ImageCategory) -> &[PathBuf] {
        match category {
            ImageCategory::Before => &self.before_images,
            ImageCategory::Process => &self.process_images,
            ImageCategory::After => &self.after_images,
        }
    }

    fn images_mut(&mut self, category: ImageCategory) -> &mut Vec<PathBuf> {
        match category {
            ImageCategory::Before => &mut self.before_images,
            ImageCategory::Process => &mut self.process_images,
            ImageCategory::After => &mut self.after_images,
        }
    }

    pub fn add_images<I>(&mut self, category: ImageCategory, paths: I)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.images_mut(category).extend(paths);
    }

    pub fn remove_image(&mut self, category: ImageCategory, index: usize) -> Result<PathBuf, FormError> {
        let images = self.images_mut(category);
        if index >= images.len() {
            return Err(FormError::NoSuchImage { category, index });
        }
        Ok(images.remove(index))
    }

    pub fn image_count(&self) -> usize {
        ImageCategory::ALL
            .iter()
            .map(|c| self.images(*c).len())
            .sum()
    }

    /// Fill the text answers from backend sample data; images are kept.
    pub fn prefill(&mut self, sample: &SamplePostData) {
        self.treatment_type = sample.treatment_type.clone();
        self.concept_message = sample.concept_message.clone();
        self.patient_condition = sample.patient_condition.clone();
        self.treatment_process_message = sample.treatment_process_message.clone();
        self.treatment_result_message = sample.treatment_result_message.clone();
        self.additional_message = sample.additional_message.clone();
        self.before_images_text = sample.before_images_text.clone();
        self.process_images_text = sample.process_images_text.clone();
        self.after_images_text = sample.after_images_text.clone();
    }

    pub fn reset(&mut self) {
        *self = ManualForm::default();
    }

    fn caption(&self, category: ImageCategory) -> &str {
        match category {
            ImageCategory::Before => &self.before_images_text,
            ImageCategory::Process => &self.process_images_text,
            ImageCategory::After => &self.after_images_text,
        }
    }

    /// Fields of the new Post: in-progress status and a placeholder title.
    pub fn post_fields(&self, post_id: &str) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert(post_fields::POST_ID.into(), json!(post_id));
        fields.insert(post_fields::TITLE.into(), json!(format!("(작성 전) {}", post_id)));
        fields.insert(post_fields::TYPE.into(), json!(POST_TYPE_CONVERSION));
        fields.insert(
            post_fields::STATUS.into(),
            json!(PostStatus::InProgress.as_str()),
        );
        fields.insert(post_fields::TREATMENT_TYPE.into(), json!(self.treatment_type));
        fields
    }

    /// Fields of the new Post Data Request. Attachment lists start empty; images
    /// are uploaded afterwards against the created record.
    pub fn request_fields(&self, post_id: &str) -> Map<String, Value> {
        use request_fields as f;
        let mut fields = Map::new();
        fields.insert(f::POST_ID.into(), json!(post_id));
        fields.insert(f::CONCEPT_MESSAGE.into(), json!(self.concept_message));
        fields.insert(f::PATIENT_CONDITION.into(), json!(self.patient_condition));
        fields.insert(
            f::TREATMENT_PROCESS_MESSAGE.into(),
            json!(self.treatment_process_message),
        );
        fields.insert(
            f::TREATMENT_RESULT_MESSAGE.into(),
            json!(self.treatment_result_message),
        );
        fields.insert(f::ADDITIONAL_MESSAGE.into(), json!(self.additional_message));
        for category in ImageCategory::ALL {
            fields.insert(category.field_name().into(), json!([]));
            fields.insert(category.caption_field().into(), json!(self.caption(category)));
        }
        fields.insert(f::STATUS.into(), json!(RequestStatus::Pending.as_str()));
        fields
    }
}

/// Parameters of one batch auto-generation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoForm {
    pub treatment_type: String,
    pub count: u32,
}

impl AutoForm {
    pub fn validate(&self) -> Result<(), FormError> {
        if self.treatment_type.trim().is_empty() {
            return Err(FormError::MissingTreatmentType);
        }
        if self.count == 0 {
            return Err(FormError::InvalidCount);
        }
        Ok(())
    }
}
