use app_stash::AppStashError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use blob_store::BlobError;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use utoipa::{IntoParams, ToSchema};

/// Error body returned by every endpoint.
#[derive(Debug, ToSchema, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(skip)]
    status_code: StatusCode,
    description: String,
    code: u16,
}

impl ApiError {
    pub fn new(status_code: StatusCode, description: impl Into<String>) -> Self {
        Self {
            status_code,
            description: description.into(),
            code: status_code.as_u16(),
        }
    }

    pub fn bad_request(description: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, description)
    }

    pub fn not_found(description: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, description)
    }

    pub fn forbidden(description: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, description)
    }

    pub fn payload_too_large(description: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, description)
    }

    pub fn unprocessable(description: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, description)
    }

    pub fn internal_error(description: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, description)
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status_code.is_server_error() {
            error!(status = %self.status_code, description = %self.description, "api error");
        } else {
            warn!(status = %self.status_code, description = %self.description, "api error");
        }
        (self.status_code, Json(self)).into_response()
    }
}

impl From<BlobError> for ApiError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::NotFound { .. } => Self::not_found(err.to_string()),
            BlobError::NoSpaceLeft { .. } => {
                Self::new(StatusCode::INSUFFICIENT_STORAGE, err.to_string())
            }
            BlobError::InvalidPath { .. } => Self::bad_request(err.to_string()),
            _ => Self::internal_error(err.to_string()),
        }
    }
}

impl From<AppStashError> for ApiError {
    fn from(err: AppStashError) -> Self {
        match err {
            AppStashError::InvalidZip { .. } => Self::bad_request(err.to_string()),
            AppStashError::EntryNotFound { .. } => Self::not_found(err.to_string()),
            AppStashError::EmptyRequest => Self::unprocessable(err.to_string()),
            AppStashError::Blobstore { source } => source.into(),
            _ => Self::internal_error(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::bad_request(format!("invalid JSON body: {}", e))
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(e: axum::extract::multipart::MultipartError) -> Self {
        Self::new(e.status(), e.body_text())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        Self::internal_error(e.to_string())
    }
}

/// Body of a resource `PUT` that duplicates an existing resource.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CopySource {
    pub source_guid: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SignParams {
    /// `get` (default) or `put`.
    pub verb: Option<String>,
}
