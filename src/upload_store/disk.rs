/// Disk-based upload backend
use crate::{
    error::{PortalError, PortalResult},
    upload_store::{StoredObject, UploadBackend},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tokio::fs;

/// Disk storage backend
///
/// Files are sharded by the first two characters of their key:
/// `{base}/{first2}/{key}`.
#[derive(Clone)]
pub struct DiskUploadBackend {
    base_path: PathBuf,
}

impl DiskUploadBackend {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        match key.get(0..2) {
            Some(shard) => self.base_path.join(shard).join(key),
            None => self.base_path.join("_").join(key),
        }
    }
}

/// Keys are hex digests; anything else must not reach the filesystem
fn check_key(key: &str) -> PortalResult<()> {
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(PortalError::Internal(format!("Invalid storage key: {}", key)));
    }
    Ok(())
}

#[async_trait]
impl UploadBackend for DiskUploadBackend {
    async fn put(&self, key: &str, data: Vec<u8>) -> PortalResult<()> {
        check_key(key)?;
        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                PortalError::Internal(format!("Failed to create upload directory: {}", e))
            })?;
        }

        // Write then rename so readers never see a partial file
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data)
            .await
            .map_err(|e| PortalError::Internal(format!("Failed to write upload {}: {}", key, e)))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| PortalError::Internal(format!("Failed to write upload {}: {}", key, e)))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> PortalResult<Option<Vec<u8>>> {
        check_key(key)?;
        match fs::read(self.object_path(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PortalError::Internal(format!(
                "Failed to read upload {}: {}",
                key, e
            ))),
        }
    }

    async fn delete(&self, key: &str) -> PortalResult<()> {
        check_key(key)?;
        match fs::remove_file(self.object_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PortalError::Internal(format!(
                "Failed to delete upload {}: {}",
                key, e
            ))),
        }
    }

    async fn exists(&self, key: &str) -> PortalResult<bool> {
        check_key(key)?;
        Ok(fs::try_exists(self.object_path(key)).await?)
    }

    async fn list(&self) -> PortalResult<Vec<StoredObject>> {
        let mut objects = Vec::new();

        let mut shards = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(objects),
            Err(e) => return Err(e.into()),
        };

        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut files = fs::read_dir(shard.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let Some(key) = file.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                if check_key(&key).is_err() {
                    continue;
                }
                let metadata = file.metadata().await?;
                let modified: DateTime<Utc> = metadata.modified()?.into();
                objects.push(StoredObject { key, modified });
            }
        }

        Ok(objects)
    }
}
