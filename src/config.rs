use std::{
    collections::BTreeMap,
    env,
    fmt::Debug,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use app_stash::AppStashConfig;
use blob_store::{bulk_delete::DEFAULT_DELETE_WORKERS, signer::PathSigner, BlobstoreConfig};
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use url::Url;

const LOCAL_ENV: &str = "local";
const ENV_PREFIX: &str = "BITS_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningKey {
    pub key_id: String,
    pub secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuthUser {
    pub username: String,
    pub password: String,
}

/// Backend of one resource type plus its upload limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(flatten)]
    pub blobstore: BlobstoreConfig,
    #[serde(default, with = "byte_size")]
    pub max_body_size: Option<u64>,
}

impl ResourceConfig {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            blobstore: BlobstoreConfig::local(path),
            max_body_size: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub env: String,
    pub listen_addr: String,
    pub tls: Option<TlsConfig>,
    /// Host serving the internal API.
    pub private_endpoint: String,
    /// Host serving signed URLs of the local backend.
    pub public_endpoint: String,
    pub signing_keys: Vec<SigningKey>,
    pub active_key_id: Option<String>,
    /// Legacy single signing key, used when `signing_keys` is empty.
    pub secret: Option<String>,
    /// Lifetime of signed URLs in seconds.
    pub signed_url_expiration: u64,
    pub signing_users: Vec<BasicAuthUser>,
    #[serde(with = "byte_size")]
    pub max_body_size: Option<u64>,
    pub packages: ResourceConfig,
    pub droplets: ResourceConfig,
    pub buildpacks: ResourceConfig,
    pub app_stash: ResourceConfig,
    pub app_stash_config: AppStashConfig,
    pub delete_workers: usize,
    pub telemetry: TelemetryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let storage = default_storage_root();
        ServerConfig {
            env: LOCAL_ENV.to_string(),
            listen_addr: "0.0.0.0:8000".to_string(),
            tls: None,
            private_endpoint: "http://internal.127.0.0.1.nip.io:8000".to_string(),
            public_endpoint: "http://public.127.0.0.1.nip.io:8000".to_string(),
            signing_keys: Vec::new(),
            active_key_id: None,
            // Signed URLs of a default process do not survive a restart.
            secret: Some(nanoid::nanoid!(32)),
            signed_url_expiration: 3600,
            signing_users: Vec::new(),
            max_body_size: None,
            packages: ResourceConfig::local(storage.join("packages")),
            droplets: ResourceConfig::local(storage.join("droplets")),
            buildpacks: ResourceConfig::local(storage.join("buildpacks")),
            app_stash: ResourceConfig::local(storage.join("app_stash")),
            app_stash_config: AppStashConfig::default(),
            delete_workers: DEFAULT_DELETE_WORKERS,
            telemetry: TelemetryConfig::default(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("bits_storage")
}

impl ServerConfig {
    /// Reads the YAML file at `path` (if any) and applies `BITS_*` overrides,
    /// e.g. `BITS_PACKAGES__BLOBSTORE_TYPE=s3`.
    pub fn load(path: Option<&Path>) -> Result<ServerConfig> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            let config_str = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            figment = figment.merge(Yaml::string(&config_str));
        }
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    #[cfg(test)]
    pub fn from_yaml_str(config_str: &str) -> Result<ServerConfig> {
        Self::from_figment(Figment::new().merge(Yaml::string(config_str)))
    }

    fn from_figment(figment: Figment) -> Result<ServerConfig> {
        let mut config: ServerConfig = figment.extract()?;
        config.validate()?;
        if config.telemetry.instance_id.is_none() {
            config.telemetry.instance_id = Some(format!("{}-{}", config.env, nanoid::nanoid!(8)));
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(anyhow!("invalid listen address: {}", self.listen_addr));
        }
        Url::parse(&self.public_endpoint)
            .with_context(|| format!("invalid public_endpoint: {}", self.public_endpoint))?;
        Url::parse(&self.private_endpoint)
            .with_context(|| format!("invalid private_endpoint: {}", self.private_endpoint))?;
        self.path_signer()?;
        if let (Some(min), Some(max)) = (
            self.app_stash_config.minimum_size,
            self.app_stash_config.maximum_size,
        ) {
            if min > max {
                return Err(anyhow!(
                    "app_stash_config.minimum_size ({}) exceeds maximum_size ({})",
                    min,
                    max
                ));
            }
        }
        if self.delete_workers == 0 {
            return Err(anyhow!("delete_workers must be at least 1"));
        }
        for (name, resource) in self.resources() {
            resource
                .blobstore
                .validate()
                .with_context(|| format!("invalid {} blobstore", name))?;
        }
        Ok(())
    }

    fn resources(&self) -> [(&'static str, &ResourceConfig); 4] {
        [
            ("packages", &self.packages),
            ("droplets", &self.droplets),
            ("buildpacks", &self.buildpacks),
            ("app_stash", &self.app_stash),
        ]
    }

    /// Rotating keys take precedence over the legacy `secret`.
    pub fn path_signer(&self) -> Result<PathSigner> {
        if !self.signing_keys.is_empty() {
            let active_key_id = self
                .active_key_id
                .clone()
                .ok_or_else(|| anyhow!("active_key_id is required with signing_keys"))?;
            let keys: BTreeMap<String, String> = self
                .signing_keys
                .iter()
                .map(|key| (key.key_id.clone(), key.secret.clone()))
                .collect();
            return Ok(PathSigner::new(keys, active_key_id)?);
        }
        match &self.secret {
            Some(secret) if !secret.is_empty() => Ok(PathSigner::with_secret(secret.clone())),
            _ => Err(anyhow!("either signing_keys or secret must be configured")),
        }
    }

    pub fn signed_url_expiration(&self) -> Duration {
        Duration::from_secs(self.signed_url_expiration)
    }

    /// Per-resource override, falling back to the global limit.
    pub fn max_body_size(&self, resource: &ResourceConfig) -> Option<u64> {
        resource.max_body_size.or(self.max_body_size)
    }

    pub fn structured_logging(&self) -> bool {
        self.env != LOCAL_ENV
    }

    /// Generated once at load time when not configured.
    pub fn instance_id(&self) -> String {
        self.telemetry
            .instance_id
            .clone()
            .unwrap_or_else(|| self.env.clone())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TracingExporter {
    Otlp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enable_metrics: bool,
    // OpenTelemetry collector grpc endpoint for both traces and metrics.
    // Defaults to OTEL_EXPORTER_OTLP_ENDPOINT or localhost:4317.
    pub endpoint: Option<String>,
    // Traces are not exported when unset.
    pub tracing_exporter: Option<TracingExporter>,
    #[serde(with = "duration_serde")]
    pub metrics_interval: Duration,
    // Optional path of a daily rotated log file.
    pub local_log_file: Option<PathBuf>,
    pub instance_id: Option<String>,
}

impl TelemetryConfig {
    pub fn tracing_enabled(&self) -> bool {
        self.tracing_exporter.is_some()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            endpoint: None,
            tracing_exporter: None,
            metrics_interval: Duration::from_secs(10),
            local_log_file: None,
            instance_id: None,
        }
    }
}

mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(seconds))
    }
}

/// Byte counts written either as integers or with a unit suffix (`13M`,
/// `512KB`, `1G`).
pub mod byte_size {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bytes(u64),
        Text(String),
    }

    pub fn parse(value: &str) -> Result<u64, String> {
        let value = value.trim();
        let split = value
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(value.len());
        let (digits, unit) = value.split_at(split);
        let count: u64 = digits
            .parse()
            .map_err(|_| format!("invalid byte size '{}'", value))?;
        let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
            "" | "B" => 1,
            "K" | "KB" => 1 << 10,
            "M" | "MB" => 1 << 20,
            "G" | "GB" => 1 << 30,
            "T" | "TB" => 1 << 40,
            other => return Err(format!("unknown byte unit '{}' in '{}'", other, value)),
        };
        count
            .checked_mul(multiplier)
            .ok_or_else(|| format!("byte size '{}' overflows", value))
    }

    pub fn serialize<S>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_u64(*bytes),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Bytes(bytes)) => Ok(Some(bytes)),
            Some(Raw::Text(text)) => parse(&text).map(Some).map_err(D::Error::custom),
        }
    }
}
