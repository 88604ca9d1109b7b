use async_trait::async_trait;

use crate::{BlobContent, BlobResult, Blobstore, ByteStream, NoRedirectBlobstore};

/// Maps a key onto its two-level directory layout.
///
/// `abcdef` becomes `ab/cd/abcdef`. Shorter keys get shallower layouts and the
/// empty key stays empty.
pub fn partitioned_path(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let slice = |from: usize, to: usize| chars[from..to].iter().collect::<String>();
    match chars.len() {
        0 => String::new(),
        1 => format!("{}/{}", slice(0, 1), key),
        2 => format!("{}/{}", slice(0, 2), key),
        3 => format!("{}/{}/{}", slice(0, 2), slice(2, 3), key),
        _ => format!("{}/{}/{}", slice(0, 2), slice(2, 4), key),
    }
}

pub struct PartitioningBlobstore<B> {
    inner: B,
}

impl<B> PartitioningBlobstore<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<B: NoRedirectBlobstore> NoRedirectBlobstore for PartitioningBlobstore<B> {
    async fn exists(&self, path: &str) -> BlobResult<bool> {
        self.inner.exists(&partitioned_path(path)).await
    }

    async fn get(&self, path: &str) -> BlobResult<ByteStream> {
        self.inner.get(&partitioned_path(path)).await
    }

    async fn put(&self, path: &str, content: ByteStream) -> BlobResult<()> {
        self.inner.put(&partitioned_path(path), content).await
    }

    async fn copy(&self, src: &str, dest: &str) -> BlobResult<()> {
        self.inner
            .copy(&partitioned_path(src), &partitioned_path(dest))
            .await
    }

    async fn delete(&self, path: &str) -> BlobResult<()> {
        self.inner.delete(&partitioned_path(path)).await
    }

    async fn delete_dir(&self, prefix: &str) -> BlobResult<()> {
        if prefix.is_empty() {
            return self.inner.delete_dir("").await;
        }
        self.inner.delete_dir(&partitioned_path(prefix)).await
    }
}

#[async_trait]
impl<B: Blobstore> Blobstore for PartitioningBlobstore<B> {
    async fn head_or_redirect_as_get(&self, path: &str) -> BlobResult<Option<String>> {
        self.inner
            .head_or_redirect_as_get(&partitioned_path(path))
            .await
    }

    async fn get_or_redirect(&self, path: &str) -> BlobResult<BlobContent> {
        self.inner.get_or_redirect(&partitioned_path(path)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partitioned_path_lengths() {
        assert_eq!(partitioned_path(""), "");
        assert_eq!(partitioned_path("a"), "a/a");
        assert_eq!(partitioned_path("ab"), "ab/ab");
        assert_eq!(partitioned_path("abc"), "ab/c/abc");
        assert_eq!(partitioned_path("abcd"), "ab/cd/abcd");
        assert_eq!(
            partitioned_path("da39a3ee5e6b4b0d3255bfef95601890afd80709"),
            "da/39/da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }

    #[test]
    fn test_partitioned_path_is_deterministic() {
        let key = "6c5b2f1e-guid";
        assert_eq!(partitioned_path(key), partitioned_path(key));
    }
}
