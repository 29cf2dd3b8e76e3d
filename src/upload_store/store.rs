/// Upload store
///
/// Coordinates the storage backend with upload metadata in the database
use crate::{
    admin::Role,
    db::account::Account,
    error::{PortalError, PortalResult},
    upload_store::{
        DiskUploadBackend, ImageDimensions, Upload, UploadBackend, UploadPurpose,
    },
};
use chrono::{Duration, Utc};
use image::ImageFormat;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc};
use tokio::sync::Mutex;
use uuid::Uuid;

const UPLOAD_COLUMNS: &str = "id, owner_id, storage_key, original_name, mime_type, size, \
     width, height, purpose, created_at";

/// Accepted content types
const ALLOWED_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "application/pdf",
];

/// Files younger than this are never swept; their row may not be written yet
const SWEEP_GRACE_MINUTES: i64 = 60;

/// Main upload store
#[derive(Clone)]
pub struct UploadStore {
    backend: Arc<dyn UploadBackend>,
    db: SqlitePool,
    max_size: usize,
    /// Serializes reference counting against file writes and removals
    content_lock: Arc<Mutex<()>>,
}

impl UploadStore {
    pub fn new(db: SqlitePool, backend: Arc<dyn UploadBackend>, max_size: usize) -> Self {
        Self {
            backend,
            db,
            max_size,
            content_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Store backed by a directory on local disk
    pub fn on_disk(db: SqlitePool, directory: PathBuf, max_size: usize) -> Self {
        Self::new(db, Arc::new(DiskUploadBackend::new(directory)), max_size)
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Validate and store a new upload
    pub async fn store(
        &self,
        owner_id: &str,
        original_name: &str,
        declared_mime: Option<&str>,
        data: Vec<u8>,
        purpose: UploadPurpose,
    ) -> PortalResult<Upload> {
        if data.is_empty() {
            return Err(PortalError::Upload("File is empty".to_string()));
        }
        if data.len() > self.max_size {
            return Err(PortalError::Upload(format!(
                "File is {} bytes; the limit is {} bytes",
                data.len(),
                self.max_size
            )));
        }

        let mime_type = detect_mime_type(declared_mime, original_name)?;
        if purpose.requires_image() && !mime_type.starts_with("image/") {
            return Err(PortalError::Upload(format!(
                "A {} upload must be an image",
                purpose.as_str()
            )));
        }

        let dimensions = check_content(&data, mime_type)?;
        let storage_key = content_key(&data);
        let size = data.len() as i64;

        let upload = Upload {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            storage_key,
            original_name: clean_file_name(original_name),
            mime_type: mime_type.to_string(),
            size,
            width: dimensions.map(|d| d.width as i64),
            height: dimensions.map(|d| d.height as i64),
            purpose,
            created_at: Utc::now(),
        };

        let guard = self.content_lock.lock().await;

        if !self.backend.exists(&upload.storage_key).await? {
            self.backend.put(&upload.storage_key, data).await?;
        }

        sqlx::query(
            r#"
            INSERT INTO upload (id, owner_id, storage_key, original_name, mime_type, size,
                                width, height, purpose, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&upload.id)
        .bind(&upload.owner_id)
        .bind(&upload.storage_key)
        .bind(&upload.original_name)
        .bind(&upload.mime_type)
        .bind(upload.size)
        .bind(upload.width)
        .bind(upload.height)
        .bind(upload.purpose.as_str())
        .bind(upload.created_at)
        .execute(&self.db)
        .await?;

        drop(guard);

        tracing::info!(
            upload_id = %upload.id,
            owner = %owner_id,
            mime = %upload.mime_type,
            size = upload.size,
            "Stored upload"
        );

        Ok(upload)
    }

    /// Upload metadata
    pub async fn get_metadata(&self, id: &str) -> PortalResult<Upload> {
        sqlx::query_as::<_, Upload>(&format!(
            "SELECT {} FROM upload WHERE id = ?1",
            UPLOAD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| PortalError::NotFound("Upload not found".to_string()))
    }

    /// Upload metadata and content
    pub async fn get(&self, id: &str) -> PortalResult<(Upload, Vec<u8>)> {
        let upload = self.get_metadata(id).await?;
        let data = self.backend.get(&upload.storage_key).await?.ok_or_else(|| {
            tracing::error!(upload_id = %id, key = %upload.storage_key, "Upload file missing");
            PortalError::NotFound("Upload content not found".to_string())
        })?;
        Ok((upload, data))
    }

    /// Delete an upload; owners and admins only
    pub async fn delete(&self, id: &str, actor: &Account) -> PortalResult<Upload> {
        let upload = self.get_metadata(id).await?;
        let is_admin = actor.role.can_act_as(Role::Admin);

        if upload.owner_id != actor.id && !is_admin {
            return Err(PortalError::Authorization(
                "Only the owner can delete this upload".to_string(),
            ));
        }

        if !is_admin {
            let in_review: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM registration
                 WHERE payment_proof_upload_id = ?1
                   AND payment_status IN ('pending_verification', 'paid')",
            )
            .bind(id)
            .fetch_one(&self.db)
            .await?;
            if in_review > 0 {
                return Err(PortalError::Conflict(
                    "This file is the payment proof of a registration".to_string(),
                ));
            }
        }

        let guard = self.content_lock.lock().await;

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM upload WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let remaining: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM upload WHERE storage_key = ?1")
                .bind(&upload.storage_key)
                .fetch_one(&mut *tx)
                .await?;
        tx.commit().await?;

        if remaining == 0 {
            self.backend.delete(&upload.storage_key).await?;
        }
        drop(guard);

        tracing::info!(upload_id = %id, actor = %actor.id, "Deleted upload");
        Ok(upload)
    }

    /// Remove stored files that no upload row references
    pub async fn sweep_orphans(&self) -> PortalResult<u64> {
        let cutoff = Utc::now() - Duration::minutes(SWEEP_GRACE_MINUTES);
        let mut removed = 0;

        for object in self.backend.list().await? {
            if object.modified > cutoff {
                continue;
            }
            let _guard = self.content_lock.lock().await;
            let referenced: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM upload WHERE storage_key = ?1")
                    .bind(&object.key)
                    .fetch_one(&self.db)
                    .await?;
            if referenced == 0 {
                self.backend.delete(&object.key).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }
}

/// SHA-256 of the content, hex encoded
fn content_key(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Resolve the content type from the declared type, then the file extension
fn detect_mime_type(declared: Option<&str>, file_name: &str) -> PortalResult<&'static str> {
    let declared = declared
        .map(|m| m.split(';').next().unwrap_or_default().trim().to_lowercase())
        .map(|m| if m == "image/jpg" { "image/jpeg".to_string() } else { m });

    if let Some(declared) = &declared {
        if let Some(allowed) = ALLOWED_TYPES.iter().find(|t| **t == declared.as_str()) {
            return Ok(*allowed);
        }
    }

    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    let by_extension = match extension.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "pdf" => Some("application/pdf"),
        _ => None,
    };

    by_extension.ok_or_else(|| {
        PortalError::Upload(format!(
            "Unsupported file type: {}",
            declared.unwrap_or_else(|| "unknown".to_string())
        ))
    })
}

/// Verify the bytes match the type; images must decode
fn check_content(data: &[u8], mime_type: &str) -> PortalResult<Option<ImageDimensions>> {
    let format = match mime_type {
        "image/jpeg" => ImageFormat::Jpeg,
        "image/png" => ImageFormat::Png,
        "image/gif" => ImageFormat::Gif,
        "image/webp" => ImageFormat::WebP,
        "application/pdf" => {
            if !data.starts_with(b"%PDF-") {
                return Err(PortalError::Upload("File is not a valid PDF".to_string()));
            }
            return Ok(None);
        }
        other => {
            return Err(PortalError::Upload(format!("Unsupported file type: {}", other)));
        }
    };

    let img = image::load_from_memory_with_format(data, format)
        .map_err(|e| PortalError::Upload(format!("Image could not be decoded: {}", e)))?;

    Ok(Some(ImageDimensions {
        width: img.width(),
        height: img.height(),
    }))
}

/// Keep the last path component and drop control characters
fn clean_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base.chars().filter(|c| !c.is_control()).take(255).collect();
    if cleaned.trim().is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}
