//! WebDAV backend with signing delegated to the WebDAV server.

use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tracing::debug;
use url::Url;

use crate::{
    config::WebDavConfig,
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

pub struct WebDavBlobstore {
    client: Client,
    private_endpoint: String,
    public_endpoint: Url,
    directory_key: String,
    username: String,
    password: String,
    redirect_expiry: Duration,
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
            source: anyhow::anyhow!("unexpected status {} from WebDAV for {}", status, key),
        }),
    }
}

/// Moves a URL signed by the private endpoint onto the public host.
fn rewrite_to_public(signed: &str, public: &Url) -> BlobResult<String> {
    let mut url = Url::parse(signed.trim())?;
    url.set_scheme(public.scheme())
        .map_err(|_| BlobError::PresignError {
            reason: format!("cannot use scheme {}", public.scheme()),
        })?;
    url.set_host(public.host_str())?;
    url.set_port(public.port()).map_err(|_| BlobError::PresignError {
        reason: "cannot set port on signed URL".to_string(),
    })?;
    Ok(url.to_string())
}

impl WebDavBlobstore {
    pub fn new(config: &WebDavConfig, redirect_expiry: Duration) -> BlobResult<Self> {
        let mut builder = Client::builder();
        if let Some(ca_cert_path) = &config.ca_cert_path {
            let pem = std::fs::read(ca_cert_path)?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }
        Ok(Self {
            client: builder.build()?,
            private_endpoint: config.private_endpoint.trim_end_matches('/').to_string(),
            public_endpoint: Url::parse(&config.public_endpoint)?,
            directory_key: config.directory_key.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            redirect_expiry,
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/admin/{}/{}",
            self.private_endpoint,
            self.directory_key,
            key.trim_start_matches('/')
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn signed_url(
        &self,
        key: &str,
        method: SignMethod,
        expires_in: Duration,
    ) -> BlobResult<String> {
        let endpoint = match method {
            SignMethod::Get => "sign",
            SignMethod::Put => "sign_for_put",
        };
        let expires = (unix_now() + expires_in.as_secs()).to_string();
        let path = format!("/{}/{}", self.directory_key, key.trim_start_matches('/'));
        let response = self
            .request(Method::GET, &format!("{}/{}", self.private_endpoint, endpoint))
            .query(&[("path", path.as_str()), ("expires", expires.as_str())])
            .send()
            .await?;
        let signed = check_status(response, key)?.text().await?;
        rewrite_to_public(&signed, &self.public_endpoint)
    }
}

#[async_trait]
impl NoRedirectBlobstore for WebDavBlobstore {
    async fn exists(&self, path: &str) -> BlobResult<bool> {
        let response = self
            .request(Method::HEAD, &self.object_url(path))
            .send()
            .await?;
        match check_status(response, path) {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn get(&self, path: &str) -> BlobResult<ByteStream> {
        let response = self
            .request(Method::GET, &self.object_url(path))
            .send()
            .await?;
        Ok(check_status(response, path)?
            .bytes_stream()
            .map_err(BlobError::from)
            .boxed())
    }

    async fn put(&self, path: &str, content: ByteStream) -> BlobResult<()> {
        let response = self
            .request(Method::PUT, &self.object_url(path))
            .body(reqwest::Body::wrap_stream(content))
            .send()
            .await?;
        check_status(response, path)?;
        debug!(path, "stored blob on WebDAV");
        Ok(())
    }

    async fn copy(&self, src: &str, dest: &str) -> BlobResult<()> {
        if src == dest {
            return Ok(());
        }
        let copy = Method::from_bytes(b"COPY").map_err(|e| BlobError::Other {
            source: anyhow::Error::from(e),
        })?;
        let response = self
            .request(copy, &self.object_url(src))
            .header("Destination", self.object_url(dest))
            .header("Overwrite", "T")
            .send()
            .await?;
        check_status(response, src).map(|_| ())
    }

    async fn delete(&self, path: &str) -> BlobResult<()> {
        let response = self
            .request(Method::DELETE, &self.object_url(path))
            .send()
            .await?;
        check_status(response, path).map(|_| ())
    }

    async fn delete_dir(&self, prefix: &str) -> BlobResult<()> {
        let collection = format!("{}/", self.object_url(prefix).trim_end_matches('/'));
        let response = self.request(Method::DELETE, &collection).send().await?;
        match check_status(response, prefix) {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl Blobstore for WebDavBlobstore {
    async fn head_or_redirect_as_get(&self, path: &str) -> BlobResult<Option<String>> {
        if !self.exists(path).await? {
            return Err(BlobError::not_found(path));
        }
        Ok(Some(
            self.signed_url(path, SignMethod::Get, self.redirect_expiry)
                .await?,
        ))
    }

    async fn get_or_redirect(&self, path: &str) -> BlobResult<BlobContent> {
        if !self.exists(path).await? {
            return Err(BlobError::not_found(path));
        }
        Ok(BlobContent::Redirect(
            self.signed_url(path, SignMethod::Get, self.redirect_expiry)
                .await?,
        ))
    }
}

#[async_trait]
impl UrlSigner for WebDavBlobstore {
    async fn sign_url(
        &self,
        key: &str,
        method: SignMethod,
        expires_in: Duration,
    ) -> BlobResult<String> {
        self.signed_url(key, method, expires_in).await
    }
}
