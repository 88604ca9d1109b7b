//! Error types for blobstore operations.

/// Result type for blobstore operations.
pub type BlobResult<T> = Result<T, BlobError>;

/// Errors that can occur during blobstore operations.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// No blob (or directory) exists at the given path.
    #[error("Blob not found: {path}")]
    NotFound { path: String },

    /// The backend ran out of storage while writing.
    #[error("No space left on blobstore while writing {path}")]
    NoSpaceLeft { path: String },

    /// The key cannot be mapped to a backend location.
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// I/O error against the local filesystem.
    #[error("I/O error: {source}")]
    IoError { source: std::io::Error },

    /// Unexpected response from a remote backend.
    #[error("Network error: {source}")]
    NetworkError { source: anyhow::Error },

    /// The HTTP client failed before a response arrived.
    #[error("Request error: {source}")]
    RequestError {
        #[from]
        source: reqwest::Error,
    },

    /// Signed URL generation error.
    #[error("Signed URL generation error: {reason}")]
    PresignError { reason: String },

    /// Backend configuration is incomplete or inconsistent.
    #[error("Invalid blobstore configuration: {reason}")]
    Configuration { reason: String },

    #[error("Invalid blobstore URL: {source}")]
    InvalidUrl {
        #[from]
        source: url::ParseError,
    },

    /// Backend not supported.
    #[error("Unsupported blobstore type: {name}")]
    UnsupportedBackend { name: String },

    #[error("Blobstore error: {source}")]
    Other {
        #[from]
        source: anyhow::Error,
    },
}

impl BlobError {
    pub fn not_found(path: impl Into<String>) -> Self {
        BlobError::NotFound { path: path.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound { .. })
    }

    pub fn is_no_space_left(&self) -> bool {
        matches!(self, BlobError::NoSpaceLeft { .. })
    }

    /// Stable label used for error metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BlobError::NotFound { .. } => "not_found",
            BlobError::NoSpaceLeft { .. } => "no_space_left",
            BlobError::InvalidPath { .. } => "invalid_path",
            BlobError::IoError { .. } => "io",
            BlobError::NetworkError { .. } | BlobError::RequestError { .. } => "network",
            BlobError::PresignError { .. } => "presign",
            BlobError::Configuration { .. } | BlobError::InvalidUrl { .. } => "configuration",
            BlobError::UnsupportedBackend { .. } => "unsupported_backend",
            BlobError::Other { .. } => "other",
        }
    }
}

// io and object_store errors are classified, so these two stay hand-written.
impl From<std::io::Error> for BlobError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::StorageFull => BlobError::NoSpaceLeft {
                path: err.to_string(),
            },
            _ => BlobError::IoError { source: err },
        }
    }
}

impl From<object_store::Error> for BlobError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => BlobError::NotFound { path },
            _ => BlobError::NetworkError {
                source: anyhow::Error::from(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_full_maps_to_no_space_left() {
        let err: BlobError = std::io::Error::from(std::io::ErrorKind::StorageFull).into();
        assert!(err.is_no_space_left());

        let err: BlobError = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert!(matches!(err, BlobError::IoError { .. }));
    }

    #[test]
    fn object_store_not_found_is_preserved() {
        let err: BlobError = object_store::Error::NotFound {
            path: "ab/cd/abcdef".to_string(),
            source: "missing".into(),
        }
        .into();
        match err {
            BlobError::NotFound { path } => assert_eq!(path, "ab/cd/abcdef"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
