//! Photo sending: placeholder message, upload, then URL attach.
//!
//! The placeholder goes first so the message shows up in every open thread
//! immediately. If a later stage fails the message stays pending; the error
//! carries its id so the caller can retry the attach alone.

use chrono::Utc;
use tracing::{debug, info, warn};

use chitchat_shared::constants::DEFAULT_PHOTO_CONTENT_TYPE;
use chitchat_shared::{ChannelId, MessageId, UserId};

use crate::error::{PhotoError, UploadError};
use crate::media_store::{media_path, MediaKind, MediaStore, StoredMedia};
use crate::message_log::MessageLog;

const MAX_PATH_ATTEMPTS: i64 = 8;

/// An image to send.
#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub filename: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SentPhoto {
    pub message_id: MessageId,
    pub media: StoredMedia,
}

#[derive(Clone)]
pub struct PhotoPipeline {
    log: MessageLog,
    media: MediaStore,
}

impl PhotoPipeline {
    pub fn new(log: MessageLog, media: MediaStore) -> Self {
        Self { log, media }
    }

    pub async fn send_photo(
        &self,
        channel: &ChannelId,
        sender: &UserId,
        sender_name: Option<&str>,
        photo: PhotoUpload,
    ) -> Result<SentPhoto, PhotoError> {
        let message_id = self
            .log
            .append_photo_placeholder(channel, sender, sender_name)
            .await
            .map_err(PhotoError::Placeholder)?;

        let content_type = photo
            .content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PHOTO_CONTENT_TYPE.to_string());

        // animated images keep their original name and extension
        let filename = match MediaKind::from_content_type(&content_type) {
            MediaKind::Animated => photo.filename.as_deref(),
            MediaKind::Still => None,
        };
        let media = match self
            .upload_unique(sender, filename, &photo.bytes, &content_type)
            .await
        {
            Ok(media) => media,
            Err(source) => {
                warn!(channel = %channel, message = %message_id, error = %source, "Photo upload failed");
                return Err(PhotoError::Upload { message_id, source });
            }
        };

        self.retry_attach(channel, &message_id, &media.url).await?;

        info!(channel = %channel, message = %message_id, url = %media.url, "Photo sent");
        Ok(SentPhoto { message_id, media })
    }

    /// Upload at the sender's path for now, moving to the next millisecond
    /// while the path is taken.
    async fn upload_unique(
        &self,
        sender: &UserId,
        filename: Option<&str>,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<StoredMedia, UploadError> {
        let millis = Utc::now().timestamp_millis();
        let mut attempt = 0;
        loop {
            let path = media_path(sender, millis + attempt, filename);
            match self.media.upload(&path, bytes, content_type).await {
                Err(UploadError::AlreadyExists(_)) if attempt + 1 < MAX_PATH_ATTEMPTS => {
                    debug!(path, "Media path taken");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Run the attach stage on its own.
    pub async fn retry_attach(
        &self,
        channel: &ChannelId,
        message_id: &MessageId,
        url: &str,
    ) -> Result<(), PhotoError> {
        self.log
            .attach_photo_url(channel, message_id, url)
            .await
            .map_err(|source| PhotoError::Attach {
                message_id: message_id.clone(),
                url: url.to_string(),
                source,
            })
    }
}
