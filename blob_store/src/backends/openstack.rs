//! OpenStack Swift backend.
//!
//! Authenticates with either Keystone v3 (when a domain is configured) or the
//! v1 `X-Auth-User`/`X-Auth-Key` handshake, caches the token and storage URL,
//! and re-authenticates once when Swift answers 401. Redirects use Swift
//! TempURLs signed with the account key.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use sha1::Sha1;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use super::BackendOptions;
use crate::{
    bulk_delete,
    config::OpenStackConfig,
    signer::unix_now,
    BlobContent,
    BlobError,
    BlobResult,
    Blobstore,
    ByteStream,
    NoRedirectBlobstore,
    SignMethod,
    UrlSigner,
};

type HmacSha1 = Hmac<Sha1>;

const LIST_PAGE_SIZE: usize = 10_000;

#[derive(Debug, Clone)]
struct Session {
    token: String,
    storage_url: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Token,
}

#[derive(Deserialize)]
struct Token {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    endpoints: Vec<Endpoint>,
}

#[derive(Deserialize)]
struct Endpoint {
    interface: String,
    url: String,
    #[serde(default)]
    region: Option<String>,
}

#[derive(Deserialize)]
struct ListedObject {
    name: String,
}

/// Signature of a Swift TempURL: hex HMAC-SHA1 over
/// `METHOD\nexpires\npath`.
pub fn temp_url_signature(key: &str, method: &str, expires: u64, path: &str) -> String {
    let mut mac =
        HmacSha1::new_from_slice(key.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(format!("{}\n{}\n{}", method, expires, path).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Public `object-store` endpoint of the Keystone catalog, restricted to
/// `region` when one is configured.
fn public_object_store_url(
    catalog: Vec<CatalogEntry>,
    region: Option<&str>,
) -> BlobResult<String> {
    catalog
        .into_iter()
        .filter(|entry| entry.service_type == "object-store")
        .flat_map(|entry| entry.endpoints)
        .find(|endpoint| {
            endpoint.interface == "public"
                && (region.is_none() || endpoint.region.as_deref() == region)
        })
        .map(|endpoint| endpoint.url)
        .ok_or_else(|| BlobError::Configuration {
            reason: "no public object-store endpoint in the Keystone catalog".to_string(),
        })
}

fn check_status(response: Response, key: &str) -> BlobResult<Response> {
    match response.status() {
        StatusCode::NOT_FOUND => Err(BlobError::not_found(key)),
        StatusCode::PAYLOAD_TOO_LARGE | StatusCode::INSUFFICIENT_STORAGE => {
            Err(BlobError::NoSpaceLeft {
                path: key.to_string(),
            })
        }
        status if status.is_success() => Ok(response),
        status => Err(BlobError::NetworkError {
            source: anyhow::anyhow!("unexpected status {} from Swift for {}", status, key),
        }),
    }
}

struct SwiftClient {
    client: Client,
    config: OpenStackConfig,
    session: RwLock<Option<Session>>,
}

impl SwiftClient {
    async fn session(&self, refresh: bool) -> BlobResult<Session> {
        if !refresh {
            if let Some(session) = self.session.read().await.as_ref() {
                return Ok(session.clone());
            }
        }
        let mut guard = self.session.write().await;
        if let (false, Some(session)) = (refresh, guard.as_ref()) {
            return Ok(session.clone());
        }
        let session = if self.config.domain_name.is_some() {
            self.authenticate_v3().await?
        } else {
            self.authenticate_v1().await?
        };
        info!(storage_url = %session.storage_url, "authenticated against Swift");
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn authenticate_v1(&self) -> BlobResult<Session> {
        let response = self
            .client
            .get(&self.config.auth_url)
            .header("X-Auth-User", &self.config.username)
            .header("X-Auth-Key", &self.config.api_key)
            .send()
            .await?;
        let response = check_status(response, &self.config.auth_url)?;
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| BlobError::Configuration {
                    reason: format!("Swift v1 auth response is missing {}", name),
                })
        };
        Ok(Session {
            token: header("X-Auth-Token")?,
            storage_url: header("X-Storage-Url")?,
        })
    }

    async fn authenticate_v3(&self) -> BlobResult<Session> {
        let domain = self.config.domain_name.clone().unwrap_or_default();
        let mut body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": self.config.username,
                            "domain": { "name": domain },
                            "password": self.config.api_key,
                        }
                    }
                }
            }
        });
        if let Some(project) = &self.config.project_name {
            body["auth"]["scope"] = json!({
                "project": { "name": project, "domain": { "name": domain } }
            });
        }
        let url = format!("{}/auth/tokens", self.config.auth_url.trim_end_matches('/'));
        let response = self.client.post(&url).json(&body).send().await?;
        let response = check_status(response, &url)?;
        let token = response
            .headers()
            .get("X-Subject-Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| BlobError::Configuration {
                reason: "Keystone response is missing X-Subject-Token".to_string(),
            })?;
        let catalog: TokenResponse = response.json().await?;
        let storage_url =
            public_object_store_url(catalog.token.catalog, self.config.region.as_deref())?;
        Ok(Session { token, storage_url })
    }

    fn object_url(&self, session: &Session, key: &str) -> String {
        let container = format!(
            "{}/{}",
            session.storage_url.trim_end_matches('/'),
            self.config.container_name
        );
        match key.trim_start_matches('/') {
            "" => container,
            key => format!("{}/{}", container, key),
        }
    }

    /// Sends a request without a body, re-authenticating once on 401.
    async fn send(
        &self,
        method: Method,
        key: &str,
        headers: &[(&str, String)],
        query: &[(&str, String)],
    ) -> BlobResult<Response> {
        let mut refresh = false;
        loop {
            let session = self.session(refresh).await?;
            let mut request = self
                .client
                .request(method.clone(), self.object_url(&session, key))
                .header("X-Auth-Token", &session.token)
                .query(query);
            for (name, value) in headers {
                request = request.header(*name, value);
            }
            let response = request.send().await?;
            if response.status() == StatusCode::UNAUTHORIZED && !refresh {
                debug!("Swift token expired, re-authenticating");
                refresh = true;
                continue;
            }
            return Ok(response);
        }
    }

    async fn delete_object(&self, key: &str) -> BlobResult<()> {
        let response = self.send(Method::DELETE, key, &[], &[]).await?;
        check_status(response, key).map(|_| ())
    }

    async fn list(&self, prefix: &str) -> BlobResult<Vec<String>> {
        let mut names = Vec::new();
        let mut marker = String::new();
        loop {
            let mut query = vec![
                ("format", "json".to_string()),
                ("limit", LIST_PAGE_SIZE.to_string()),
                ("marker", marker.clone()),
            ];
            if !prefix.is_empty() {
                query.push(("prefix", prefix.to_string()));
            }
            let response = self.send(Method::GET, "", &[], &query).await?;
            let page: Vec<ListedObject> = match check_status(response, prefix) {
                Ok(response) => response.json().await?,
                Err(err) if err.is_not_found() => Vec::new(),
                Err(err) => return Err(err),
            };
            let Some(last) = page.last() else {
                return Ok(names);
            };
            marker = last.name.clone();
            let full_page = page.len() == LIST_PAGE_SIZE;
            names.extend(page.into_iter().map(|o| o.name));
            if !full_page {
                return Ok(names);
            }
        }
    }

    async fn temp_url(
        &self,
        key: &str,
        method: SignMethod,
        expires_in: Duration,
    ) -> BlobResult<String> {
        let session = self.session(false).await?;
        let object_url = self.object_url(&session, key);
        let path = Url::parse(&object_url)?.path().to_string();
        let expires = unix_now() + expires_in.as_secs();
        let verb = method.http_method();
        let signature =
            temp_url_signature(&self.config.account_key, verb.as_str(), expires, &path);
        Ok(format!(
            "{}?temp_url_sig={}&temp_url_expires={}",
            object_url, signature, expires
        ))
    }
}

pub struct OpenStackBlobstore {
    swift: Arc<SwiftClient>,
    options: BackendOptions,
}

impl OpenStackBlobstore {
    pub fn new(config: &OpenStackConfig, options: BackendOptions) -> BlobResult<Self> {
        Ok(Self {
            swift: Arc::new(SwiftClient {
                client: Client::builder().build()?,
                config: config.clone(),
                session: RwLock::new(None),
            }),
            options,
        })
    }
}

#[async_trait]
impl NoRedirectBlobstore for OpenStackBlobstore {
    async fn exists(&self, path: &str) -> BlobResult<bool> {
        let response = self.swift.send(Method::HEAD, path, &[], &[]).await?;
        match check_status(response, path) {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn get(&self, path: &str) -> BlobResult<ByteStream> {
        let response = self.swift.send(Method::GET, path, &[], &[]).await?;
        Ok(check_status(response, path)?
            .bytes_stream()
            .map_err(BlobError::from)
            .boxed())
    }

    async fn put(&self, path: &str, content: ByteStream) -> BlobResult<()> {
        // The body stream cannot be replayed, so an expired token only
        // refreshes the session for the next call.
        let session = self.swift.session(false).await?;
        let response = self
            .swift
            .client
            .put(self.swift.object_url(&session, path))
            .header("X-Auth-Token", &session.token)
            .body(reqwest::Body::wrap_stream(content))
            .send()
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.swift.session(true).await?;
        }
        check_status(response, path)?;
        debug!(path, "stored blob in Swift");
        Ok(())
    }

    async fn copy(&self, src: &str, dest: &str) -> BlobResult<()> {
        if src == dest {
            return Ok(());
        }
        let headers = [
            (
                "X-Copy-From",
                format!("/{}/{}", self.swift.config.container_name, src),
            ),
            ("Content-Length", "0".to_string()),
        ];
        let response = self.swift.send(Method::PUT, dest, &headers, &[]).await?;
        check_status(response, src).map(|_| ())
    }

    async fn delete(&self, path: &str) -> BlobResult<()> {
        self.swift.delete_object(path).await
    }

    async fn delete_dir(&self, prefix: &str) -> BlobResult<()> {
        let names = self.swift.list(prefix).await?;
        let swift = self.swift.clone();
        bulk_delete::delete_all(names, self.options.delete_workers, move |name| {
            let swift = swift.clone();
            async move { swift.delete_object(&name).await }
        })
        .await
        .into_result()
    }
}

#[async_trait]
impl Blobstore for OpenStackBlobstore {
    async fn head_or_redirect_as_get(&self, path: &str) -> BlobResult<Option<String>> {
        if !self.exists(path).await? {
            return Err(BlobError::not_found(path));
        }
        Ok(Some(
            self.swift
                .temp_url(path, SignMethod::Get, self.options.redirect_expiry)
                .await?,
        ))
    }

    async fn get_or_redirect(&self, path: &str) -> BlobResult<BlobContent> {
        if !self.exists(path).await? {
            return Err(BlobError::not_found(path));
        }
        Ok(BlobContent::Redirect(
            self.swift
                .temp_url(path, SignMethod::Get, self.options.redirect_expiry)
                .await?,
        ))
    }
}

#[async_trait]
impl UrlSigner for OpenStackBlobstore {
    async fn sign_url(
        &self,
        key: &str,
        method: SignMethod,
        expires_in: Duration,
    ) -> BlobResult<String> {
        self.swift.temp_url(key, method, expires_in).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16) -> Response {
        Response::from(
            http::Response::builder()
                .status(status)
                .body(Vec::<u8>::new())
                .unwrap(),
        )
    }

    #[test]
    fn test_temp_url_signature_matches_swift_format() {
        let path = "/v1/AUTH_account/container/object";
        assert_eq!(
            temp_url_signature("mykey", "GET", 1_440_619_048, path),
            "da720a7e11f9f2c7b0fe46039811229c1c7a9cb4"
        );
        assert_eq!(
            temp_url_signature("mykey", "PUT", 1_440_619_048, path),
            "be1b254f2edadba10d0805c2d596b581550ef00e"
        );
    }

    #[test]
    fn test_status_translation() {
        assert!(check_status(response(404), "ab/cd/abcd")
            .unwrap_err()
            .is_not_found());
        assert!(check_status(response(413), "ab/cd/abcd")
            .unwrap_err()
            .is_no_space_left());
        assert!(check_status(response(507), "ab/cd/abcd")
            .unwrap_err()
            .is_no_space_left());
        assert!(matches!(
            check_status(response(500), "ab/cd/abcd"),
            Err(BlobError::NetworkError { .. })
        ));
        assert!(check_status(response(201), "ab/cd/abcd").is_ok());
    }

    #[test]
    fn test_public_object_store_url() {
        let body = r#"{"token": {"catalog": [
            {"type": "identity", "endpoints": [{"interface": "public", "url": "https://keystone"}]},
            {"type": "object-store", "endpoints": [
                {"interface": "internal", "url": "https://swift.internal/v1/AUTH_x", "region": "RegionOne"},
                {"interface": "public", "url": "https://swift.one.example.com/v1/AUTH_x", "region": "RegionOne"},
                {"interface": "public", "url": "https://swift.two.example.com/v1/AUTH_x", "region": "RegionTwo"}
            ]}
        ]}}"#;
        let catalog = || serde_json::from_str::<TokenResponse>(body).unwrap().token.catalog;

        assert_eq!(
            public_object_store_url(catalog(), None).unwrap(),
            "https://swift.one.example.com/v1/AUTH_x"
        );
        assert_eq!(
            public_object_store_url(catalog(), Some("RegionTwo")).unwrap(),
            "https://swift.two.example.com/v1/AUTH_x"
        );
        assert!(matches!(
            public_object_store_url(catalog(), Some("RegionThree")),
            Err(BlobError::Configuration { .. })
        ));
    }
}
