//! Core blobstore contracts.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt, TryStreamExt};

use crate::BlobResult;

/// Stream of blob content chunks.
pub type ByteStream = BoxStream<'static, BlobResult<Bytes>>;

/// Outcome of a read that may be served by the backend directly.
pub enum BlobContent {
    /// Content streamed through this process.
    Stream(ByteStream),

    /// Short-lived URL the client should follow instead.
    Redirect(String),
}

impl std::fmt::Debug for BlobContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlobContent::Stream(_) => f.write_str("BlobContent::Stream"),
            BlobContent::Redirect(url) => write!(f, "BlobContent::Redirect({url})"),
        }
    }
}

/// Blobstore operations that always move bytes through the caller.
///
/// Used by the app stash, which needs the content itself rather than a
/// redirect URL.
#[async_trait]
pub trait NoRedirectBlobstore: Send + Sync {
    async fn exists(&self, path: &str) -> BlobResult<bool>;

    /// Returns `BlobError::NotFound` if nothing is stored under `path`.
    async fn get(&self, path: &str) -> BlobResult<ByteStream>;

    /// Stores the stream under `path`, replacing any existing blob.
    ///
    /// Returns `BlobError::NoSpaceLeft` when the backend is full.
    async fn put(&self, path: &str, content: ByteStream) -> BlobResult<()>;

    /// Copies `src` to `dest`. Copying a key onto itself succeeds without
    /// touching the backend.
    async fn copy(&self, src: &str, dest: &str) -> BlobResult<()>;

    async fn delete(&self, path: &str) -> BlobResult<()>;

    /// Deletes every blob under `prefix`. A missing prefix is not an error and
    /// the empty prefix clears the whole store.
    async fn delete_dir(&self, prefix: &str) -> BlobResult<()>;
}

/// Blobstore that may answer reads with a redirect to the backend.
#[async_trait]
pub trait Blobstore: NoRedirectBlobstore {
    /// `Ok(None)` means the blob exists and is served locally, `Ok(Some(url))`
    /// that the client should be redirected.
    async fn head_or_redirect_as_get(&self, path: &str) -> BlobResult<Option<String>>;

    async fn get_or_redirect(&self, path: &str) -> BlobResult<BlobContent>;
}

#[async_trait]
impl<T: NoRedirectBlobstore + ?Sized> NoRedirectBlobstore for Arc<T> {
    async fn exists(&self, path: &str) -> BlobResult<bool> {
        (**self).exists(path).await
    }

    async fn get(&self, path: &str) -> BlobResult<ByteStream> {
        (**self).get(path).await
    }

    async fn put(&self, path: &str, content: ByteStream) -> BlobResult<()> {
        (**self).put(path, content).await
    }

    async fn copy(&self, src: &str, dest: &str) -> BlobResult<()> {
        (**self).copy(src, dest).await
    }

    async fn delete(&self, path: &str) -> BlobResult<()> {
        (**self).delete(path).await
    }

    async fn delete_dir(&self, prefix: &str) -> BlobResult<()> {
        (**self).delete_dir(prefix).await
    }
}

#[async_trait]
impl<T: Blobstore + ?Sized> Blobstore for Arc<T> {
    async fn head_or_redirect_as_get(&self, path: &str) -> BlobResult<Option<String>> {
        (**self).head_or_redirect_as_get(path).await
    }

    async fn get_or_redirect(&self, path: &str) -> BlobResult<BlobContent> {
        (**self).get_or_redirect(path).await
    }
}

/// Opens a local file as a [`ByteStream`].
pub async fn stream_from_file(path: impl AsRef<Path>) -> BlobResult<ByteStream> {
    let file = tokio::fs::File::open(path.as_ref()).await?;
    Ok(tokio_util::io::ReaderStream::new(file)
        .map_err(crate::BlobError::from)
        .boxed())
}

/// Wraps in-memory bytes as a single-chunk [`ByteStream`].
pub fn stream_from_bytes(data: impl Into<Bytes>) -> ByteStream {
    futures::stream::once(futures::future::ready(Ok(data.into()))).boxed()
}

/// Drains a [`ByteStream`] into memory.
pub async fn collect_stream(mut stream: ByteStream) -> BlobResult<Bytes> {
    let mut buf = bytes::BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}
