use async_trait::async_trait;

use crate::{BlobContent, BlobResult, Blobstore, ByteStream, NoRedirectBlobstore};

/// Places every key of the wrapped store under a fixed namespace, e.g.
/// `buildpack_cache/`.
pub struct PrefixingBlobstore<B> {
    inner: B,
    prefix: String,
}

impl<B> PrefixingBlobstore<B> {
    pub fn new(inner: B, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    fn prefixed(&self, path: &str) -> String {
        format!("{}{}", self.prefix, path)
    }
}

#[async_trait]
impl<B: NoRedirectBlobstore> NoRedirectBlobstore for PrefixingBlobstore<B> {
    async fn exists(&self, path: &str) -> BlobResult<bool> {
        self.inner.exists(&self.prefixed(path)).await
    }

    async fn get(&self, path: &str) -> BlobResult<ByteStream> {
        self.inner.get(&self.prefixed(path)).await
    }

    async fn put(&self, path: &str, content: ByteStream) -> BlobResult<()> {
        self.inner.put(&self.prefixed(path), content).await
    }

    async fn copy(&self, src: &str, dest: &str) -> BlobResult<()> {
        self.inner
            .copy(&self.prefixed(src), &self.prefixed(dest))
            .await
    }

    async fn delete(&self, path: &str) -> BlobResult<()> {
        self.inner.delete(&self.prefixed(path)).await
    }

    async fn delete_dir(&self, prefix: &str) -> BlobResult<()> {
        self.inner.delete_dir(&self.prefixed(prefix)).await
    }
}

#[async_trait]
impl<B: Blobstore> Blobstore for PrefixingBlobstore<B> {
    async fn head_or_redirect_as_get(&self, path: &str) -> BlobResult<Option<String>> {
        self.inner.head_or_redirect_as_get(&self.prefixed(path)).await
    }

    async fn get_or_redirect(&self, path: &str) -> BlobResult<BlobContent> {
        self.inner.get_or_redirect(&self.prefixed(path)).await
    }
}
