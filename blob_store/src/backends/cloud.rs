//! Backends served through `object_store`: S3, Alibaba OSS (S3 protocol),
//! Google Cloud Storage, Azure Blob and an in-memory store for tests.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use object_store::{
    aws::{AmazonS3Builder, AmazonS3ConfigKey},
    azure::MicrosoftAzureBuilder,
    gcp::GoogleCloudStorageBuilder,
    memory::InMemory,
    path::Path,
    signer::Signer,
    ObjectStore,
    WriteMultipart,
};
use tracing::{debug, warn};

use super::BackendOptions;
use crate::{
    bulk_delete,
    config::{AlibabaConfig, AzureConfig, GcpConfig, S3Config},
    BlobContent,
    BlobError,
    BlobResult,
    Blobstore,
    ByteStream,
    NoRedirectBlobstore,
    SignMethod,
    UrlSigner,
};

pub struct ObjectStoreBlobstore {
    store: Arc<dyn ObjectStore>,
    signer: Option<Arc<dyn Signer>>,
    options: BackendOptions,
}

fn object_path(key: &str) -> BlobResult<Path> {
    Path::parse(key.trim_matches('/')).map_err(|e| BlobError::InvalidPath {
        path: key.to_string(),
        reason: e.to_string(),
    })
}

fn not_found_as(key: &str, err: object_store::Error) -> BlobError {
    match err {
        object_store::Error::NotFound { .. } => BlobError::not_found(key),
        other => other.into(),
    }
}

impl ObjectStoreBlobstore {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        signer: Option<Arc<dyn Signer>>,
        options: BackendOptions,
    ) -> Self {
        Self {
            store,
            signer,
            options,
        }
    }

    pub fn s3(config: &S3Config, options: BackendOptions) -> BlobResult<Self> {
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(&config.bucket);
        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }
        if let Some(access_key_id) = &config.access_key_id {
            builder = builder.with_access_key_id(access_key_id);
        }
        if let Some(secret) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(host) = &config.host {
            builder = builder.with_endpoint(host);
        }
        if let Some(encryption) = config.encryption()? {
            builder = builder.with_config(
                "aws_server_side_encryption"
                    .parse::<AmazonS3ConfigKey>()
                    .expect("valid S3 config key"),
                encryption,
            );
        }
        if let Some(kms_key_id) = &config.sse_kms_key_id {
            builder = builder.with_sse_kms_encryption(kms_key_id);
        }
        let s3 = Arc::new(builder.build()?);
        Ok(Self::new(s3.clone(), Some(s3 as Arc<dyn Signer>), options))
    }

    /// OSS speaks the S3 protocol with virtual-hosted buckets.
    pub fn alibaba(config: &AlibabaConfig, options: BackendOptions) -> BlobResult<Self> {
        let endpoint = if config.endpoint.starts_with("http") {
            config.endpoint.clone()
        } else {
            format!("https://{}", config.endpoint)
        };
        let oss = Arc::new(
            AmazonS3Builder::new()
                .with_bucket_name(&config.bucket_name)
                .with_region(config.region.as_deref().unwrap_or("oss"))
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(true)
                .with_access_key_id(&config.access_key_id)
                .with_secret_access_key(&config.access_key_secret)
                .build()?,
        );
        Ok(Self::new(oss.clone(), Some(oss as Arc<dyn Signer>), options))
    }

    pub fn gcs(config: &GcpConfig, options: BackendOptions) -> BlobResult<Self> {
        let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(&config.bucket);
        if let Some(json_key) = &config.json_key {
            builder = builder.with_service_account_key(json_key);
        }
        if let Some(path) = &config.service_account_path {
            builder = builder.with_service_account_path(path);
        }
        let gcs = Arc::new(builder.build()?);
        Ok(Self::new(gcs.clone(), Some(gcs as Arc<dyn Signer>), options))
    }

    pub fn azure(config: &AzureConfig, options: BackendOptions) -> BlobResult<Self> {
        let azure = Arc::new(
            MicrosoftAzureBuilder::new()
                .with_account(&config.account_name)
                .with_access_key(&config.account_key)
                .with_container_name(&config.container_name)
                .build()?,
        );
        Ok(Self::new(azure.clone(), Some(azure as Arc<dyn Signer>), options))
    }

    pub fn in_memory(options: BackendOptions) -> Self {
        Self::new(Arc::new(InMemory::new()), None, options)
    }

    async fn redirect_url(&self, signer: &dyn Signer, location: &Path) -> BlobResult<String> {
        let url = signer
            .signed_url(http::Method::GET, location, self.options.redirect_expiry)
            .await?;
        Ok(url.to_string())
    }
}

#[async_trait]
impl NoRedirectBlobstore for ObjectStoreBlobstore {
    async fn exists(&self, path: &str) -> BlobResult<bool> {
        match self.store.head(&object_path(path)?).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn get(&self, path: &str) -> BlobResult<ByteStream> {
        let result = self
            .store
            .get(&object_path(path)?)
            .await
            .map_err(|e| not_found_as(path, e))?;
        Ok(result.into_stream().map_err(BlobError::from).boxed())
    }

    async fn put(&self, path: &str, mut content: ByteStream) -> BlobResult<()> {
        let location = object_path(path)?;
        let upload = self.store.put_multipart(&location).await?;
        let mut writer = WriteMultipart::new(upload);

        while let Some(chunk) = content.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    if let Err(abort_err) = writer.abort().await {
                        warn!(path, error = %abort_err, "failed to abort multipart upload");
                    }
                    return Err(err);
                }
            };
            writer.wait_for_capacity(1).await?;
            writer.write(&chunk);
        }

        writer.finish().await?;
        debug!(path, "stored blob in object store");
        Ok(())
    }

    async fn copy(&self, src: &str, dest: &str) -> BlobResult<()> {
        if src == dest {
            return Ok(());
        }
        self.store
            .copy(&object_path(src)?, &object_path(dest)?)
            .await
            .map_err(|e| not_found_as(src, e))
    }

    async fn delete(&self, path: &str) -> BlobResult<()> {
        let location = object_path(path)?;
        self.store
            .head(&location)
            .await
            .map_err(|e| not_found_as(path, e))?;
        self.store
            .delete(&location)
            .await
            .map_err(|e| not_found_as(path, e))
    }

    async fn delete_dir(&self, prefix: &str) -> BlobResult<()> {
        let prefix = prefix.trim_matches('/');
        let prefix_path = if prefix.is_empty() {
            None
        } else {
            Some(object_path(prefix)?)
        };
        let names: Vec<String> = self
            .store
            .list(prefix_path.as_ref())
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await?;

        let store = self.store.clone();
        bulk_delete::delete_all(names, self.options.delete_workers, move |name| {
            let store = store.clone();
            async move {
                let location = object_path(&name)?;
                store
                    .delete(&location)
                    .await
                    .map_err(|e| not_found_as(&name, e))
            }
        })
        .await
        .into_result()
    }
}

#[async_trait]
impl Blobstore for ObjectStoreBlobstore {
    async fn head_or_redirect_as_get(&self, path: &str) -> BlobResult<Option<String>> {
        let location = object_path(path)?;
        self.store
            .head(&location)
            .await
            .map_err(|e| not_found_as(path, e))?;
        match &self.signer {
            Some(signer) => Ok(Some(self.redirect_url(signer.as_ref(), &location).await?)),
            None => Ok(None),
        }
    }

    async fn get_or_redirect(&self, path: &str) -> BlobResult<BlobContent> {
        let Some(signer) = &self.signer else {
            return Ok(BlobContent::Stream(self.get(path).await?));
        };
        let location = object_path(path)?;
        self.store
            .head(&location)
            .await
            .map_err(|e| not_found_as(path, e))?;
        Ok(BlobContent::Redirect(
            self.redirect_url(signer.as_ref(), &location).await?,
        ))
    }
}

#[async_trait]
impl UrlSigner for ObjectStoreBlobstore {
    async fn sign_url(
        &self,
        key: &str,
        method: SignMethod,
        expires_in: Duration,
    ) -> BlobResult<String> {
        let Some(signer) = &self.signer else {
            return Err(BlobError::PresignError {
                reason: "backend does not support signed URLs".to_string(),
            });
        };
        let url = signer
            .signed_url(method.http_method(), &object_path(key)?, expires_in)
            .await?;
        Ok(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{collect_stream, stream_from_bytes};

    fn store() -> ObjectStoreBlobstore {
        ObjectStoreBlobstore::in_memory(BackendOptions {
            delete_workers: 8,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_put_get_exists() {
        let store = store();
        let chunks = futures::stream::iter(vec![
            Ok(bytes::Bytes::from_static(b"hello ")),
            Ok(bytes::Bytes::from_static(b"world")),
        ])
        .boxed();

        store.put("ab/cd/abcd", chunks).await.unwrap();

        assert!(store.exists("ab/cd/abcd").await.unwrap());
        assert!(!store.exists("ab/cd/other").await.unwrap());
        let data = collect_stream(store.get("ab/cd/abcd").await.unwrap())
            .await
            .unwrap();
        assert_eq!(&data[..], b"hello world");
    }

    #[test]
    fn test_s3_backend_accepts_server_side_encryption() {
        let config = S3Config {
            bucket: "droplets".to_string(),
            region: Some("eu-west-1".to_string()),
            access_key_id: Some("AKIDEXAMPLE".to_string()),
            secret_access_key: Some("secret".to_string()),
            server_side_encryption: Some("AES256".to_string()),
            ..Default::default()
        };
        assert!(ObjectStoreBlobstore::s3(&config, BackendOptions::default()).is_ok());

        let config = S3Config {
            server_side_encryption: Some("rot13".to_string()),
            ..config
        };
        assert!(matches!(
            ObjectStoreBlobstore::s3(&config, BackendOptions::default()),
            Err(BlobError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_blob_errors() {
        let store = store();
        assert!(store.get("nope").await.err().unwrap().is_not_found());
        assert!(store.delete("nope").await.unwrap_err().is_not_found());
        assert!(store.copy("nope", "x").await.unwrap_err().is_not_found());
        assert!(store
            .head_or_redirect_as_get("nope")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_copy_and_self_copy() {
        let store = store();
        store.put("src", stream_from_bytes("data")).await.unwrap();
        store.copy("src", "dst").await.unwrap();
        store.copy("src", "src").await.unwrap();

        let data = collect_stream(store.get("dst").await.unwrap())
            .await
            .unwrap();
        assert_eq!(&data[..], b"data");
    }

    #[tokio::test]
    async fn test_without_signer_content_is_streamed() {
        let store = store();
        store.put("k", stream_from_bytes("v")).await.unwrap();

        assert_eq!(store.head_or_redirect_as_get("k").await.unwrap(), None);
        assert!(matches!(
            store.get_or_redirect("k").await.unwrap(),
            BlobContent::Stream(_)
        ));
        assert!(store
            .sign_url("k", SignMethod::Get, Duration::from_secs(60))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_delete_dir_prefix_and_everything() {
        let store = store();
        for i in 0..50 {
            store
                .put(&format!("buildpack_cache/app/{i}"), stream_from_bytes("x"))
                .await
                .unwrap();
        }
        store.put("droplet", stream_from_bytes("d")).await.unwrap();

        store.delete_dir("buildpack_cache/").await.unwrap();
        assert!(!store.exists("buildpack_cache/app/7").await.unwrap());
        assert!(store.exists("droplet").await.unwrap());

        store.delete_dir("missing/").await.unwrap();
        store.delete_dir("").await.unwrap();
        assert!(!store.exists("droplet").await.unwrap());
    }
}
