use blob_store::BlobError;

#[derive(Debug, thiserror::Error)]
pub enum AppStashError {
    /// The uploaded application is not a readable zip archive.
    #[error("Invalid zip file: {reason}")]
    InvalidZip { reason: String },

    /// A bundle referenced content that is not in the stash.
    #[error("{sha1} not found")]
    EntryNotFound { sha1: String },

    /// Neither fingerprints nor an application were supplied.
    #[error("The request body must not be empty")]
    EmptyRequest,

    /// Fetching an entry kept failing after every retry.
    #[error("Could not fetch {sha1} from the app stash: {source}")]
    RetriesExhausted { sha1: String, source: BlobError },

    #[error(transparent)]
    Blobstore {
        #[from]
        source: BlobError,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Zip error: {source}")]
    Zip {
        #[from]
        source: zip::result::ZipError,
    },

    #[error("Background task failed: {source}")]
    Join {
        #[from]
        source: tokio::task::JoinError,
    },
}
