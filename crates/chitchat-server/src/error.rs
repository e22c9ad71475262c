use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use chitchat_shared::MessageId;
use chitchat_store::StoreError;

/// Input rejected at the API boundary, before anything is written.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Channel name must not be empty")]
    InvalidName,

    #[error("Message text must not be empty")]
    EmptyText,

    #[error("Please enter a valid email address")]
    InvalidEmail,

    #[error("Password must be at least {min} characters")]
    PasswordTooShort { min: usize },

    #[error("Display name must not be empty")]
    EmptyDisplayName,

    #[error("Invalid media URL: {0}")]
    InvalidUrl(String),
}

/// A write that was not applied.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Message {0} is not a photo message")]
    NotAPhoto(MessageId),

    #[error("Message {0} already has a photo attached")]
    PhotoAlreadyAttached(MessageId),

    #[error("Unknown or closed session")]
    UnknownSession,

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// A stored record that does not have the expected shape.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record {key}: {reason}")]
    Shape { key: String, reason: String },

    #[error("record {key}: has neither text nor photoURL")]
    MissingPayload { key: String },

    #[error("record {key}: has both text and photoURL")]
    AmbiguousPayload { key: String },

    #[error("record {key}: text is blank")]
    BlankText { key: String },

    #[error("record {key}: channel name is blank")]
    BlankName { key: String },

    #[error("record {key}: invalid key")]
    InvalidKey { key: String },
}

/// Errors of the chat components (directory, log, presence).
#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Read(#[from] ReadError),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Provider rejection, surfaced verbatim.
    #[error("{0}")]
    Rejected(String),

    #[error("Missing or invalid session token")]
    InvalidToken,

    #[error("Identity storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Password hashing failed: {0}")]
    Hashing(String),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Empty upload")]
    Empty,

    #[error("Media too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Invalid media path: {0}")]
    InvalidPath(String),

    #[error("Media already exists at {0}")]
    AlreadyExists(String),

    #[error("Media storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Media metadata error: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Invalid media URL: {0}")]
    InvalidUrl(String),

    #[error("Media URL points at bucket {0}, which this server does not serve")]
    ForeignBucket(String),

    #[error("Media not found: {0}")]
    NotFound(String),

    #[error("Media storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Media metadata error: {0}")]
    Storage(#[from] StoreError),
}

/// Failure of one stage of the photo pipeline.
#[derive(Debug, Error)]
pub enum PhotoError {
    #[error("placeholder stage failed: {0}")]
    Placeholder(#[source] ChatError),

    #[error("upload stage failed for message {message_id}: {source}")]
    Upload {
        message_id: MessageId,
        #[source]
        source: UploadError,
    },

    #[error("attach stage failed for message {message_id}: {source}")]
    Attach {
        message_id: MessageId,
        url: String,
        #[source]
        source: ChatError,
    },
}

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Photo(#[from] PhotoError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl From<ValidationError> for ServerError {
    fn from(e: ValidationError) -> Self {
        Self::Chat(ChatError::Validation(e))
    }
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            ServerError::Chat(e) => chat_status(e),
            ServerError::Auth(AuthError::Validation(_)) => StatusCode::BAD_REQUEST,
            ServerError::Auth(AuthError::Rejected(_) | AuthError::InvalidToken) => {
                StatusCode::UNAUTHORIZED
            }
            ServerError::Auth(AuthError::Storage(_) | AuthError::Hashing(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ServerError::Upload(e) => ServerError::status_of_upload(e),
            ServerError::Download(
                DownloadError::InvalidUrl(_) | DownloadError::ForeignBucket(_),
            ) => StatusCode::BAD_REQUEST,
            ServerError::Download(DownloadError::NotFound(_)) => StatusCode::NOT_FOUND,
            ServerError::Download(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Photo(PhotoError::Placeholder(e)) => chat_status(e),
            ServerError::Photo(PhotoError::Upload { source, .. }) => {
                ServerError::status_of_upload(source)
            }
            ServerError::Photo(PhotoError::Attach { source, .. }) => chat_status(source),
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }

    fn status_of_upload(e: &UploadError) -> StatusCode {
        match e {
            UploadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::Empty | UploadError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            UploadError::AlreadyExists(_) => StatusCode::CONFLICT,
            UploadError::Io(_) | UploadError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn chat_status(e: &ChatError) -> StatusCode {
    match e {
        ChatError::Validation(_) => StatusCode::BAD_REQUEST,
        ChatError::Write(WriteError::NotFound(_)) => StatusCode::NOT_FOUND,
        ChatError::Write(
            WriteError::NotAPhoto(_) | WriteError::PhotoAlreadyAttached(_),
        ) => StatusCode::CONFLICT,
        ChatError::Write(
            WriteError::InvalidPath(_) | WriteError::InvalidValue(_) | WriteError::UnknownSession,
        ) => StatusCode::BAD_REQUEST,
        ChatError::Read(ReadError::InvalidPath(_)) => StatusCode::BAD_REQUEST,
        ChatError::Write(WriteError::Storage(_)) | ChatError::Read(ReadError::Storage(_)) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServerError::from(ValidationError::EmptyText).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::Chat(ChatError::Write(WriteError::PhotoAlreadyAttached(MessageId(
                "m".into()
            ))))
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServerError::Auth(AuthError::Rejected("The password is invalid.".into())).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServerError::Download(DownloadError::NotFound("x".into())).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_auth_rejection_is_verbatim() {
        let err = AuthError::Rejected("The password is invalid.".into());
        assert_eq!(err.to_string(), "The password is invalid.");
    }
}
