use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use super::path_signer::{unix_now, PathSigner};
use crate::{decorators::partitioned_path, BlobError, BlobResult};

/// Characters escaped inside a URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Percent-encodes every segment of `resource`, keeping the `/` separators.
fn encode_path(resource: &str) -> String {
    resource
        .split('/')
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignMethod {
    Get,
    Put,
}

impl SignMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignMethod::Get => "get",
            SignMethod::Put => "put",
        }
    }

    pub fn http_method(&self) -> http::Method {
        match self {
            SignMethod::Get => http::Method::GET,
            SignMethod::Put => http::Method::PUT,
        }
    }
}

impl fmt::Display for SignMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignMethod {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(SignMethod::Get),
            "put" => Ok(SignMethod::Put),
            other => Err(BlobError::PresignError {
                reason: format!("unsupported verb '{}'", other),
            }),
        }
    }
}

/// Vendor-native URL signing for a fully resolved backend key.
#[async_trait]
pub trait UrlSigner: Send + Sync {
    async fn sign_url(&self, key: &str, method: SignMethod, expires_in: Duration)
        -> BlobResult<String>;
}

/// Issues time-limited URLs for a resource identifier.
#[async_trait]
pub trait ResourceSigner: Send + Sync {
    async fn sign(
        &self,
        resource: &str,
        method: SignMethod,
        expires_in: Duration,
    ) -> BlobResult<String>;
}

/// Signs paths served by this process on its public endpoint.
pub struct LocalResourceSigner {
    path_signer: PathSigner,
    public_endpoint: String,
    route_prefix: String,
}

impl LocalResourceSigner {
    pub fn new(
        path_signer: PathSigner,
        public_endpoint: impl Into<String>,
        route_prefix: impl Into<String>,
    ) -> Self {
        Self {
            path_signer,
            public_endpoint: public_endpoint.into().trim_end_matches('/').to_string(),
            route_prefix: route_prefix.into(),
        }
    }
}

#[async_trait]
impl ResourceSigner for LocalResourceSigner {
    async fn sign(
        &self,
        resource: &str,
        method: SignMethod,
        expires_in: Duration,
    ) -> BlobResult<String> {
        // Signed as the request line will carry it.
        let path = format!("{}/{}", self.route_prefix, encode_path(resource));
        let expires = unix_now() + expires_in.as_secs();
        Ok(format!(
            "{}{}",
            self.public_endpoint,
            self.path_signer.sign(method.as_str(), &path, expires)
        ))
    }
}

/// Signs through the backend, mapping the identifier the same way the
/// decorator chain does.
pub struct BackendResourceSigner {
    url_signer: Arc<dyn UrlSigner>,
    prefix: String,
}

impl BackendResourceSigner {
    pub fn new(url_signer: Arc<dyn UrlSigner>, prefix: impl Into<String>) -> Self {
        Self {
            url_signer,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl ResourceSigner for BackendResourceSigner {
    async fn sign(
        &self,
        resource: &str,
        method: SignMethod,
        expires_in: Duration,
    ) -> BlobResult<String> {
        let key = format!("{}{}", self.prefix, partitioned_path(resource));
        self.url_signer.sign_url(&key, method, expires_in).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[tokio::test]
    async fn test_local_signer_targets_public_endpoint() {
        let path_signer = PathSigner::with_secret("s3cr3t");
        let signer =
            LocalResourceSigner::new(path_signer.clone(), "https://public.example.com/", "/packages");

        let url = signer
            .sign("guid", SignMethod::Get, Duration::from_secs(3600))
            .await
            .unwrap();

        let path_and_query = url.strip_prefix("https://public.example.com").unwrap();
        assert!(path_and_query.starts_with("/packages/guid?signature="));
        assert!(path_signer.signature_valid("get", path_and_query));
        assert!(!path_signer.signature_valid("put", path_and_query));
    }

    #[tokio::test]
    async fn test_local_signer_encodes_reserved_characters() {
        let path_signer = PathSigner::with_secret("s3cr3t");
        let signer =
            LocalResourceSigner::new(path_signer.clone(), "https://public.example.com", "/packages");

        let url = signer
            .sign("app 1/v?2#x", SignMethod::Get, Duration::from_secs(3600))
            .await
            .unwrap();

        let path_and_query = url.strip_prefix("https://public.example.com").unwrap();
        assert!(
            path_and_query.starts_with("/packages/app%201/v%3F2%23x?signature="),
            "{}",
            path_and_query
        );
        assert!(path_signer.signature_valid("get", path_and_query));
    }

    struct RecordingSigner(Mutex<Vec<String>>);

    #[async_trait]
    impl UrlSigner for RecordingSigner {
        async fn sign_url(
            &self,
            key: &str,
            method: SignMethod,
            _expires_in: Duration,
        ) -> BlobResult<String> {
            self.0.lock().unwrap().push(key.to_string());
            Ok(format!("https://bucket.example.com/{}?verb={}", key, method))
        }
    }

    #[tokio::test]
    async fn test_backend_signer_uses_partitioned_key() {
        let recorder = Arc::new(RecordingSigner(Mutex::new(vec![])));
        let signer = BackendResourceSigner::new(recorder.clone(), "buildpack_cache/");

        let url = signer
            .sign("abcdef", SignMethod::Put, Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(
            url,
            "https://bucket.example.com/buildpack_cache/ab/cd/abcdef?verb=put"
        );
        assert_eq!(
            recorder.0.lock().unwrap().as_slice(),
            ["buildpack_cache/ab/cd/abcdef".to_string()]
        );
    }

    #[test]
    fn test_sign_method_parse() {
        assert_eq!("GET".parse::<SignMethod>().unwrap(), SignMethod::Get);
        assert_eq!("put".parse::<SignMethod>().unwrap(), SignMethod::Put);
        assert!("delete".parse::<SignMethod>().is_err());
    }
}
