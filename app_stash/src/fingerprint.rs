use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Permission bits used when a manifest entry carries no usable mode.
pub const DEFAULT_MODE: u32 = 0o744;

/// Identifies a file by content hash, as exchanged with the cloud controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Fingerprint {
    pub sha1: String,
    #[serde(rename = "fn", default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Octal permission bits, e.g. `"644"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl Fingerprint {
    pub fn manifest_entry(
        sha1: impl Into<String>,
        file_name: impl Into<String>,
        mode: u32,
    ) -> Self {
        Self {
            sha1: sha1.into(),
            file_name: Some(file_name.into()),
            mode: Some(format!("{:o}", mode & 0o7777)),
            size: None,
        }
    }

    pub fn permissions(&self) -> u32 {
        parse_mode(self.mode.as_deref())
    }
}

/// Parses octal permission bits, falling back to `0744`.
pub fn parse_mode(mode: Option<&str>) -> u32 {
    mode.and_then(|m| u32::from_str_radix(m.trim(), 8).ok())
        .map(|m| m & 0o7777)
        .unwrap_or(DEFAULT_MODE)
}

/// Inclusive byte range of files worth caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeThresholds {
    pub minimum_size: u64,
    pub maximum_size: u64,
}

impl SizeThresholds {
    pub fn contains(&self, size: u64) -> bool {
        self.minimum_size <= size && size <= self.maximum_size
    }
}
