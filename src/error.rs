use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    InvalidInput {
        code: &'static str,
        message: String,
    },
    #[error("{message}")]
    NotFound {
        code: &'static str,
        message: String,
    },
    #[error("Processing queue is unavailable.")]
    QueueUnavailable,
    #[error("Storage failure: {0}")]
    Storage(#[source] anyhow::Error),
    #[error("Failed to rename speaker: {0}")]
    SpeakerDb(String),
}

impl ApiError {
    pub fn no_file() -> Self {
        Self::InvalidInput {
            code: "NO_FILE_PROVIDED",
            message: "No file provided.".to_string(),
        }
    }

    pub fn invalid_multipart(detail: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            code: "INVALID_MULTIPART",
            message: format!("Malformed multipart request: {detail}"),
        }
    }

    pub fn missing_fields() -> Self {
        Self::InvalidInput {
            code: "MISSING_FIELDS",
            message: "Both originalName and newName are required.".to_string(),
        }
    }

    pub fn job_not_found() -> Self {
        Self::NotFound {
            code: "JOB_NOT_FOUND",
            message: "Processing job not found.".to_string(),
        }
    }

    pub fn conversation_not_found() -> Self {
        Self::NotFound {
            code: "CONVERSATION_NOT_FOUND",
            message: "Conversation not found.".to_string(),
        }
    }

    pub fn audio_not_found() -> Self {
        Self::NotFound {
            code: "AUDIO_NOT_FOUND",
            message: "Audio file not found.".to_string(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::QueueUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage(_) | Self::SpeakerDb(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput { code, .. } | Self::NotFound { code, .. } => code,
            Self::QueueUnavailable => "QUEUE_UNAVAILABLE",
            Self::Storage(_) => "STORAGE_FAILED",
            Self::SpeakerDb(_) => "SPEAKER_DB_FAILED",
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Storage(err) = &self {
            error!("Storage failure: {err:#}");
        }

        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string()
            }
        });

        (self.status(), Json(body)).into_response()
    }
}
