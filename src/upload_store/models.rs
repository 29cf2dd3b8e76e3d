/// Upload data models
use crate::error::{PortalError, PortalResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// What an upload is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPurpose {
    Avatar,
    PaymentProof,
    BlogImage,
    Document,
}

impl UploadPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadPurpose::Avatar => "avatar",
            UploadPurpose::PaymentProof => "payment_proof",
            UploadPurpose::BlogImage => "blog_image",
            UploadPurpose::Document => "document",
        }
    }

    pub fn from_str(s: &str) -> PortalResult<Self> {
        match s {
            "avatar" => Ok(UploadPurpose::Avatar),
            "payment_proof" => Ok(UploadPurpose::PaymentProof),
            "blog_image" => Ok(UploadPurpose::BlogImage),
            "document" => Ok(UploadPurpose::Document),
            _ => Err(PortalError::Validation(format!("Invalid upload purpose: {}", s))),
        }
    }

    /// Avatars and blog images must be pictures
    pub fn requires_image(&self) -> bool {
        matches!(self, UploadPurpose::Avatar | UploadPurpose::BlogImage)
    }
}

impl TryFrom<String> for UploadPurpose {
    type Error = PortalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        UploadPurpose::from_str(&value)
    }
}

/// Upload metadata stored in the database
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Upload {
    pub id: String,
    pub owner_id: String,
    #[serde(skip_serializing)]
    pub storage_key: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: i64,
    pub width: Option<i64>,
    pub height: Option<i64>,
    #[sqlx(try_from = "String")]
    pub purpose: UploadPurpose,
    pub created_at: DateTime<Utc>,
}

impl Upload {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// Strong validator for HTTP caching
    pub fn etag(&self) -> String {
        format!("\"{}\"", self.storage_key)
    }

    pub fn url(&self) -> String {
        format!("/api/uploads/{}", self.id)
    }
}

/// Upload response body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    #[serde(flatten)]
    pub upload: Upload,
    pub url: String,
}

impl From<Upload> for UploadResponse {
    fn from(upload: Upload) -> Self {
        let url = upload.url();
        Self { upload, url }
    }
}

/// Image dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}
