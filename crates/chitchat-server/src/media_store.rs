//! On-disk media store.
//!
//! Blobs live under `base_path` at their logical path
//! (`{userId}/{unixMillis}/{filename}` or `{userId}/{unixMillis}.jpg`) and are
//! referenced from messages as `gs://{bucket}/{path}`. Content type, size and
//! BLAKE3 hash are kept in SQLite.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use chitchat_shared::constants::{
    ANIMATED_CONTENT_TYPE, DEFAULT_PHOTO_CONTENT_TYPE, MEDIA_URL_SCHEME,
};
use chitchat_shared::UserId;
use chitchat_store::{Database, MediaRecord, StoreError};

use crate::error::{DownloadError, UploadError};

/// How a consumer must decode a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Still,
    Animated,
}

impl MediaKind {
    pub fn from_content_type(content_type: &str) -> Self {
        if content_type.eq_ignore_ascii_case(ANIMATED_CONTENT_TYPE) {
            Self::Animated
        } else {
            Self::Still
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredMedia {
    pub path: String,
    pub url: String,
    pub size: usize,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct MediaDownload {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub kind: MediaKind,
}

/// Storage path for a photo uploaded by `user` at `millis`.
///
/// With an original filename the blob keeps it (so animated images keep
/// their extension); otherwise it is stored as a JPEG.
pub fn media_path(user: &UserId, millis: i64, filename: Option<&str>) -> String {
    let name = filename
        .and_then(|f| f.rsplit(['/', '\\']).next())
        .filter(|f| !f.is_empty() && *f != "." && *f != "..");
    match name {
        Some(name) => format!("{user}/{millis}/{name}"),
        None => format!("{user}/{millis}.jpg"),
    }
}

/// Logical media paths are relative, `/`-separated, with no empty or
/// relative segments.
fn is_valid_media_path(path: &str) -> bool {
    !path.is_empty()
        && !path.contains('\\')
        && !path.contains('\0')
        && path
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}

async fn write_all(file: &mut fs::File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Resolve `relative` under `base`, refusing anything that would escape it.
fn ensure_within(base: &Path, relative: &str) -> Option<PathBuf> {
    let mut resolved = base.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            _ => return None,
        }
    }
    resolved.starts_with(base).then_some(resolved)
}

#[derive(Clone)]
pub struct MediaStore {
    db: Arc<Mutex<Database>>,
    base_path: PathBuf,
    bucket: String,
    max_size: usize,
}

impl MediaStore {
    pub async fn new(
        db: Database,
        base_path: PathBuf,
        bucket: impl Into<String>,
        max_size: usize,
    ) -> Result<Self, UploadError> {
        fs::create_dir_all(&base_path).await?;
        let base_path = base_path.canonicalize()?;
        let bucket = bucket.into();

        info!(path = %base_path.display(), bucket = %bucket, "Media store initialized");

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            base_path,
            bucket,
            max_size,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{MEDIA_URL_SCHEME}{}/{path}", self.bucket)
    }

    pub async fn upload(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<StoredMedia, UploadError> {
        if bytes.is_empty() {
            return Err(UploadError::Empty);
        }
        if bytes.len() > self.max_size {
            return Err(UploadError::TooLarge {
                size: bytes.len(),
                max: self.max_size,
            });
        }
        if !is_valid_media_path(path) {
            return Err(UploadError::InvalidPath(path.to_string()));
        }
        let target = ensure_within(&self.base_path, path)
            .ok_or_else(|| UploadError::InvalidPath(path.to_string()))?;

        let content_type = if content_type.trim().is_empty() {
            DEFAULT_PHOTO_CONTENT_TYPE.to_string()
        } else {
            content_type.trim().to_ascii_lowercase()
        };

        // metadata lock held until the record is in, so two uploads to one
        // path cannot both pass the existence checks
        let db = self.db.lock().await;
        if db.get_media(path)?.is_some() {
            return Err(UploadError::AlreadyExists(path.to_string()));
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(UploadError::AlreadyExists(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = write_all(&mut file, bytes).await {
            let _ = fs::remove_file(&target).await;
            return Err(e.into());
        }

        let record = MediaRecord {
            path: path.to_string(),
            content_type: content_type.clone(),
            size: bytes.len() as i64,
            blake3_hash: blake3::hash(bytes).to_hex().to_string(),
            created_at: Utc::now(),
        };
        if let Err(e) = db.put_media(&record) {
            let _ = fs::remove_file(&target).await;
            return Err(match e {
                StoreError::AlreadyExists => UploadError::AlreadyExists(path.to_string()),
                e => e.into(),
            });
        }
        drop(db);

        debug!(path, size = bytes.len(), content_type = %content_type, "Stored media");
        Ok(StoredMedia {
            path: path.to_string(),
            url: self.url_for(path),
            size: bytes.len(),
            content_type,
        })
    }

    pub async fn download(&self, url: &str) -> Result<MediaDownload, DownloadError> {
        let path = self.parse_url(url)?;

        let record = self
            .db
            .lock()
            .await
            .get_media(path)?
            .ok_or_else(|| DownloadError::NotFound(url.to_string()))?;

        let target = ensure_within(&self.base_path, path)
            .ok_or_else(|| DownloadError::InvalidUrl(url.to_string()))?;
        let bytes = match fs::read(&target).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DownloadError::NotFound(url.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        debug!(path, size = bytes.len(), "Retrieved media");
        Ok(MediaDownload {
            kind: MediaKind::from_content_type(&record.content_type),
            content_type: record.content_type,
            bytes,
        })
    }

    /// Split `gs://{bucket}/{path}` and check the bucket is ours.
    fn parse_url<'a>(&self, url: &'a str) -> Result<&'a str, DownloadError> {
        let invalid = || DownloadError::InvalidUrl(url.to_string());
        let rest = url.strip_prefix(MEDIA_URL_SCHEME).ok_or_else(invalid)?;
        let (bucket, path) = rest.split_once('/').ok_or_else(invalid)?;
        if bucket != self.bucket {
            return Err(DownloadError::ForeignBucket(bucket.to_string()));
        }
        if !is_valid_media_path(path) {
            return Err(invalid());
        }
        Ok(path)
    }
}
