use std::sync::Arc;

use tracing::info;

use crate::{
    backends::{
        BackendOptions,
        LocalBlobstore,
        ObjectStoreBlobstore,
        OpenStackBlobstore,
        WebDavBlobstore,
    },
    config::{require, BlobstoreConfig, BlobstoreType},
    BlobResult,
    Blobstore,
    NoRedirectBlobstore,
    UrlSigner,
};

/// One backend exposed through every contract it supports.
#[derive(Clone)]
pub struct BackendHandles {
    pub blobstore: Arc<dyn Blobstore>,
    pub no_redirect: Arc<dyn NoRedirectBlobstore>,
    /// Absent for the local backend, which signs paths on this server.
    pub url_signer: Option<Arc<dyn UrlSigner>>,
}

impl BackendHandles {
    fn remote<B>(backend: B) -> Self
    where
        B: Blobstore + UrlSigner + 'static,
    {
        let backend = Arc::new(backend);
        Self {
            blobstore: backend.clone(),
            no_redirect: backend.clone(),
            url_signer: Some(backend),
        }
    }
}

pub fn create_backend(
    config: &BlobstoreConfig,
    options: BackendOptions,
) -> BlobResult<BackendHandles> {
    config.validate()?;
    info!(blobstore_type = %config.blobstore_type, "creating blobstore backend");
    let handles = match config.blobstore_type {
        BlobstoreType::Local => {
            let local = require(&config.local_config, "local_config")?;
            let backend = Arc::new(LocalBlobstore::new(&local.path_prefix)?);
            BackendHandles {
                blobstore: backend.clone(),
                no_redirect: backend,
                url_signer: None,
            }
        }
        BlobstoreType::S3 => BackendHandles::remote(ObjectStoreBlobstore::s3(
            require(&config.s3_config, "s3_config")?,
            options,
        )?),
        BlobstoreType::Alibaba => BackendHandles::remote(ObjectStoreBlobstore::alibaba(
            require(&config.alibaba_config, "alibaba_config")?,
            options,
        )?),
        BlobstoreType::Gcp => BackendHandles::remote(ObjectStoreBlobstore::gcs(
            require(&config.gcp_config, "gcp_config")?,
            options,
        )?),
        BlobstoreType::Azure => BackendHandles::remote(ObjectStoreBlobstore::azure(
            require(&config.azure_config, "azure_config")?,
            options,
        )?),
        BlobstoreType::OpenStack => BackendHandles::remote(OpenStackBlobstore::new(
            require(&config.openstack_config, "openstack_config")?,
            options,
        )?),
        BlobstoreType::WebDav => BackendHandles::remote(WebDavBlobstore::new(
            require(&config.webdav_config, "webdav_config")?,
            options.redirect_expiry,
        )?),
    };
    Ok(handles)
}
