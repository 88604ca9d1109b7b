use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{BlobError, BlobResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BlobstoreType {
    #[default]
    Local,
    #[serde(alias = "aws")]
    S3,
    #[serde(alias = "google")]
    Gcp,
    Azure,
    OpenStack,
    WebDav,
    Alibaba,
}

impl fmt::Display for BlobstoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlobstoreType::Local => "local",
            BlobstoreType::S3 => "s3",
            BlobstoreType::Gcp => "gcp",
            BlobstoreType::Azure => "azure",
            BlobstoreType::OpenStack => "openstack",
            BlobstoreType::WebDav => "webdav",
            BlobstoreType::Alibaba => "alibaba",
        };
        f.write_str(name)
    }
}

/// Backend selection plus the vendor block matching `blobstore_type`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BlobstoreConfig {
    #[serde(default)]
    pub blobstore_type: BlobstoreType,
    #[serde(default)]
    pub local_config: Option<LocalConfig>,
    #[serde(default)]
    pub s3_config: Option<S3Config>,
    #[serde(default)]
    pub gcp_config: Option<GcpConfig>,
    #[serde(default)]
    pub azure_config: Option<AzureConfig>,
    #[serde(default)]
    pub openstack_config: Option<OpenStackConfig>,
    #[serde(default)]
    pub webdav_config: Option<WebDavConfig>,
    #[serde(default)]
    pub alibaba_config: Option<AlibabaConfig>,
}

impl BlobstoreConfig {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            blobstore_type: BlobstoreType::Local,
            local_config: Some(LocalConfig {
                path_prefix: path.into(),
            }),
            ..Default::default()
        }
    }

    /// Checks that the vendor block for the selected backend is present.
    pub fn validate(&self) -> BlobResult<()> {
        match self.blobstore_type {
            BlobstoreType::Local => require(&self.local_config, "local_config").map(|_| ()),
            BlobstoreType::S3 => require(&self.s3_config, "s3_config")?.validate(),
            BlobstoreType::Gcp => require(&self.gcp_config, "gcp_config").map(|_| ()),
            BlobstoreType::Azure => require(&self.azure_config, "azure_config").map(|_| ()),
            BlobstoreType::OpenStack => {
                require(&self.openstack_config, "openstack_config")?.validate()
            }
            BlobstoreType::WebDav => require(&self.webdav_config, "webdav_config").map(|_| ()),
            BlobstoreType::Alibaba => require(&self.alibaba_config, "alibaba_config").map(|_| ()),
        }
    }
}

pub(crate) fn require<'a, T>(block: &'a Option<T>, name: &str) -> BlobResult<&'a T> {
    block.as_ref().ok_or_else(|| BlobError::Configuration {
        reason: format!("{} is required for this blobstore_type", name),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    pub path_prefix: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Custom endpoint for S3-compatible stores.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub server_side_encryption: Option<String>,
    #[serde(default)]
    pub sse_kms_key_id: Option<String>,
}

impl S3Config {
    /// Normalized `x-amz-server-side-encryption` value, if any.
    pub fn encryption(&self) -> BlobResult<Option<&'static str>> {
        let Some(value) = self.server_side_encryption.as_deref() else {
            return Ok(None);
        };
        match value.trim() {
            "" => Ok(None),
            v if v.eq_ignore_ascii_case("AES256") => Ok(Some("AES256")),
            v if v.eq_ignore_ascii_case("aws:kms") => Ok(Some("aws:kms")),
            v if v.eq_ignore_ascii_case("aws:kms:dsse") => Ok(Some("aws:kms:dsse")),
            other => Err(BlobError::Configuration {
                reason: format!("unsupported s3_config.server_side_encryption '{}'", other),
            }),
        }
    }

    fn validate(&self) -> BlobResult<()> {
        if let (Some("AES256"), Some(_)) = (self.encryption()?, &self.sse_kms_key_id) {
            return Err(BlobError::Configuration {
                reason: "s3_config.sse_kms_key_id requires aws:kms encryption".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GcpConfig {
    pub bucket: String,
    #[serde(default)]
    pub json_key: Option<String>,
    #[serde(default)]
    pub service_account_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AzureConfig {
    pub account_name: String,
    pub account_key: String,
    pub container_name: String,
    #[serde(default)]
    pub environment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OpenStackConfig {
    pub container_name: String,
    pub auth_url: String,
    pub username: String,
    pub api_key: String,
    /// Keystone v3 domain. When absent, v1 auth headers are used.
    #[serde(default)]
    pub domain_name: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    pub account_key: String,
}

impl OpenStackConfig {
    fn validate(&self) -> BlobResult<()> {
        if self.account_key.is_empty() {
            return Err(BlobError::Configuration {
                reason: "openstack_config.account_key is required to sign temp URLs".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebDavConfig {
    pub directory_key: String,
    pub private_endpoint: String,
    pub public_endpoint: String,
    pub username: String,
    pub password: String,
    /// PEM file with an extra CA certificate for the WebDAV endpoint.
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AlibabaConfig {
    pub bucket_name: String,
    pub endpoint: String,
    pub access_key_id: String,
    pub access_key_secret: String,
    #[serde(default)]
    pub region: Option<String>,
}
