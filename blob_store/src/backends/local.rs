//! Local filesystem backend.

use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::{
    stream_from_file,
    BlobContent,
    BlobError,
    BlobResult,
    Blobstore,
    ByteStream,
    NoRedirectBlobstore,
};

#[derive(Debug, Clone)]
pub struct LocalBlobstore {
    root: PathBuf,
}

fn map_io(path: &str, err: std::io::Error) -> BlobError {
    match err.kind() {
        ErrorKind::NotFound => BlobError::not_found(path),
        ErrorKind::StorageFull => BlobError::NoSpaceLeft {
            path: path.to_string(),
        },
        _ => BlobError::IoError { source: err },
    }
}

impl LocalBlobstore {
    pub fn new(root: impl AsRef<Path>) -> BlobResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> BlobResult<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(BlobError::InvalidPath {
                path: key.to_string(),
                reason: "only plain path segments are allowed".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }

    async fn is_file(path: &Path) -> BlobResult<bool> {
        match tokio::fs::metadata(path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn temp_path_for(target: &Path) -> PathBuf {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        target.with_file_name(format!(".{}.{}.tmp", name, nanoid::nanoid!()))
    }

    async fn write_stream(temp: &Path, mut content: ByteStream) -> std::io::Result<()> {
        let mut file = tokio::fs::File::create(temp).await?;
        while let Some(chunk) = content.next().await {
            let chunk = chunk.map_err(std::io::Error::other)?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await
    }

    async fn clear_dir(dir: &Path) -> BlobResult<()> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(entry.path()).await?;
            } else {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl NoRedirectBlobstore for LocalBlobstore {
    async fn exists(&self, path: &str) -> BlobResult<bool> {
        Self::is_file(&self.path_for(path)?).await
    }

    async fn get(&self, path: &str) -> BlobResult<ByteStream> {
        let file_path = self.path_for(path)?;
        if !Self::is_file(&file_path).await? {
            return Err(BlobError::not_found(path));
        }
        stream_from_file(&file_path)
            .await
            .map_err(|err| match err {
                BlobError::IoError { source } => map_io(path, source),
                other => other,
            })
    }

    async fn put(&self, path: &str, content: ByteStream) -> BlobResult<()> {
        let target = self.path_for(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io(path, e))?;
        }

        let temp = Self::temp_path_for(&target);
        if let Err(err) = Self::write_stream(&temp, content).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(map_io(path, err));
        }
        if let Err(err) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(map_io(path, err));
        }
        debug!(path, "stored blob on local filesystem");
        Ok(())
    }

    async fn copy(&self, src: &str, dest: &str) -> BlobResult<()> {
        if src == dest {
            return Ok(());
        }
        let src_path = self.path_for(src)?;
        let dest_path = self.path_for(dest)?;
        if !Self::is_file(&src_path).await? {
            return Err(BlobError::not_found(src));
        }
        if let Some(parent) = dest_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io(dest, e))?;
        }

        let temp = Self::temp_path_for(&dest_path);
        if let Err(err) = tokio::fs::copy(&src_path, &temp).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(map_io(src, err));
        }
        tokio::fs::rename(&temp, &dest_path)
            .await
            .map_err(|e| map_io(dest, e))
    }

    async fn delete(&self, path: &str) -> BlobResult<()> {
        let file_path = self.path_for(path)?;
        if !Self::is_file(&file_path).await? {
            return Err(BlobError::not_found(path));
        }
        tokio::fs::remove_file(&file_path)
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn delete_dir(&self, prefix: &str) -> BlobResult<()> {
        if prefix.trim_matches('/').is_empty() {
            return Self::clear_dir(&self.root).await;
        }
        let dir = self.path_for(prefix.trim_end_matches('/'))?;
        match tokio::fs::metadata(&dir).await {
            Ok(metadata) if metadata.is_dir() => tokio::fs::remove_dir_all(&dir)
                .await
                .map_err(|e| map_io(prefix, e)),
            Ok(_) => tokio::fs::remove_file(&dir)
                .await
                .map_err(|e| map_io(prefix, e)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl Blobstore for LocalBlobstore {
    async fn head_or_redirect_as_get(&self, path: &str) -> BlobResult<Option<String>> {
        if self.exists(path).await? {
            Ok(None)
        } else {
            Err(BlobError::not_found(path))
        }
    }

    async fn get_or_redirect(&self, path: &str) -> BlobResult<BlobContent> {
        Ok(BlobContent::Stream(self.get(path).await?))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{collect_stream, stream_from_bytes};

    fn store() -> (TempDir, LocalBlobstore) {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobstore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_then_exists_and_get() {
        let (_dir, store) = store();
        assert!(!store.exists("ab/cd/abcd").await.unwrap());

        store
            .put("ab/cd/abcd", stream_from_bytes("hello world"))
            .await
            .unwrap();

        assert!(store.exists("ab/cd/abcd").await.unwrap());
        let data = collect_stream(store.get("ab/cd/abcd").await.unwrap())
            .await
            .unwrap();
        assert_eq!(&data[..], b"hello world");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (_dir, store) = store();
        assert!(store.get("missing").await.err().unwrap().is_not_found());
        assert!(store
            .get_or_redirect("missing")
            .await
            .err()
            .unwrap()
            .is_not_found());
        assert!(store
            .head_or_redirect_as_get("missing")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_put_overwrites_and_leaves_no_temp_files() {
        let (dir, store) = store();
        store.put("blob", stream_from_bytes("one")).await.unwrap();
        store.put("blob", stream_from_bytes("two")).await.unwrap();

        let data = collect_stream(store.get("blob").await.unwrap())
            .await
            .unwrap();
        assert_eq!(&data[..], b"two");
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("blob")]);
    }

    #[tokio::test]
    async fn test_copy() {
        let (_dir, store) = store();
        store.put("src", stream_from_bytes("payload")).await.unwrap();

        store.copy("src", "nested/dest").await.unwrap();
        store.copy("src", "src").await.unwrap();

        let copied = collect_stream(store.get("nested/dest").await.unwrap())
            .await
            .unwrap();
        assert_eq!(&copied[..], b"payload");
        assert!(store.exists("src").await.unwrap());
        assert!(store.copy("nope", "x").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete() {
        let (_dir, store) = store();
        store.put("a/b", stream_from_bytes("x")).await.unwrap();
        store.delete("a/b").await.unwrap();
        assert!(!store.exists("a/b").await.unwrap());
        assert!(store.delete("a/b").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_dir() {
        let (dir, store) = store();
        store.put("cache/app/one", stream_from_bytes("1")).await.unwrap();
        store.put("cache/app/two", stream_from_bytes("2")).await.unwrap();
        store.put("other", stream_from_bytes("3")).await.unwrap();

        store.delete_dir("cache/").await.unwrap();
        store.delete_dir("does-not-exist/").await.unwrap();
        assert!(!store.exists("cache/app/one").await.unwrap());
        assert!(store.exists("other").await.unwrap());

        store.delete_dir("").await.unwrap();
        assert!(dir.path().exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_rejects_parent_traversal() {
        let (_dir, store) = store();
        let err = store.exists("../escape").await.unwrap_err();
        assert!(matches!(err, BlobError::InvalidPath { .. }));
    }
}
