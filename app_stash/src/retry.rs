use std::time::Duration;

use backon::ExponentialBuilder;
use blob_store::BlobError;
use serde::{Deserialize, Serialize};

/// Backoff applied to every bundle entry fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "RetryConfig::default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "RetryConfig::default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "RetryConfig::default_max_retries")]
    pub max_retries: usize,
}

impl RetryConfig {
    fn default_min_delay_ms() -> u64 {
        100
    }

    fn default_max_delay_ms() -> u64 {
        5_000
    }

    fn default_max_retries() -> usize {
        8
    }

    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_max_times(self.max_retries)
            .with_jitter()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: Self::default_min_delay_ms(),
            max_delay_ms: Self::default_max_delay_ms(),
            max_retries: Self::default_max_retries(),
        }
    }
}

/// Outcome of a failed fetch, deciding whether the backoff driver tries again.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Retrying cannot help, e.g. the entry does not exist.
    #[error("permanent: {0}")]
    Permanent(BlobError),
    #[error("transient: {0}")]
    Transient(BlobError),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    pub fn into_inner(self) -> BlobError {
        match self {
            FetchError::Permanent(err) | FetchError::Transient(err) => err,
        }
    }
}

impl From<BlobError> for FetchError {
    fn from(err: BlobError) -> Self {
        if err.is_not_found() {
            FetchError::Permanent(err)
        } else {
            FetchError::Transient(err)
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::Transient(err.into())
    }
}
