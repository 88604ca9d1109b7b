//! Content-addressed cache of application files.
//!
//! Files are stored under the hex SHA-1 of their content. Clients ask which
//! fingerprints are already cached, upload only the missing files, and get a
//! complete application zip reassembled from the stash.

mod bundle;
mod error;
mod fingerprint;
mod ingest;
mod retry;

use std::sync::Arc;

use ::metrics::app_stash::Metrics;
use blob_store::NoRedirectBlobstore;
use futures::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

pub use error::AppStashError;
pub use fingerprint::{parse_mode, Fingerprint, SizeThresholds, DEFAULT_MODE};
pub use retry::{FetchError, RetryConfig};

const EXISTS_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppStashConfig {
    #[serde(default)]
    pub minimum_size: Option<u64>,
    #[serde(default)]
    pub maximum_size: Option<u64>,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl AppStashConfig {
    /// Thresholds apply as soon as either bound is configured.
    pub fn thresholds(&self) -> Option<SizeThresholds> {
        if self.minimum_size.is_none() && self.maximum_size.is_none() {
            return None;
        }
        Some(SizeThresholds {
            minimum_size: self.minimum_size.unwrap_or(0),
            maximum_size: self.maximum_size.unwrap_or(u64::MAX),
        })
    }
}

pub struct AppStash {
    store: Arc<dyn NoRedirectBlobstore>,
    thresholds: Option<SizeThresholds>,
    retry: RetryConfig,
    metrics: Metrics,
}

impl AppStash {
    /// `store` is expected to partition keys; entries are addressed by bare
    /// SHA-1.
    pub fn new(store: Arc<dyn NoRedirectBlobstore>, config: &AppStashConfig) -> Self {
        Self {
            store,
            thresholds: config.thresholds(),
            retry: config.retry,
            metrics: Metrics::new(),
        }
    }

    pub fn thresholds(&self) -> Option<SizeThresholds> {
        self.thresholds
    }

    fn within_thresholds(&self, size: u64) -> bool {
        self.thresholds.map_or(true, |t| t.contains(size))
    }

    /// Range check first so out-of-range entries never hit the backend.
    async fn check_match(&self, entry: Fingerprint) -> Result<(Fingerprint, bool), AppStashError> {
        let in_range = match self.thresholds {
            Some(thresholds) => entry.size.is_some_and(|size| thresholds.contains(size)),
            None => true,
        };
        if !in_range {
            return Ok((entry, false));
        }
        let exists = self.store.exists(&entry.sha1).await?;
        Ok((entry, exists))
    }

    /// Returns the entries that are cached and within the size thresholds,
    /// in request order.
    pub async fn matches(
        &self,
        entries: Vec<Fingerprint>,
    ) -> Result<Vec<Fingerprint>, AppStashError> {
        if entries.is_empty() {
            return Err(AppStashError::EmptyRequest);
        }
        let checked: Vec<(Fingerprint, bool)> = stream::iter(entries)
            .map(|entry| self.check_match(entry))
            .buffered(EXISTS_CONCURRENCY)
            .try_collect()
            .await?;

        let matched: Vec<Fingerprint> = checked
            .into_iter()
            .filter_map(|(entry, matched)| matched.then_some(entry))
            .collect();
        self.metrics.entries_matched.add(matched.len() as u64, &[]);
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        path::Path,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use blob_store::{
        backends::LocalBlobstore,
        decorators::decorate_no_redirect,
        BlobError,
        BlobResult,
        ByteStream,
    };
    use sha1::{Digest, Sha1};
    use tempfile::{NamedTempFile, TempDir};
    use zip::{write::SimpleFileOptions, ZipArchive, ZipWriter};

    use super::*;

    fn sha1_hex(data: &[u8]) -> String {
        hex::encode(Sha1::digest(data))
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            min_delay_ms: 1,
            max_delay_ms: 5,
            max_retries: 3,
        }
    }

    fn local_store(dir: &Path) -> Arc<dyn NoRedirectBlobstore> {
        let backend: Arc<dyn NoRedirectBlobstore> = Arc::new(LocalBlobstore::new(dir).unwrap());
        decorate_no_redirect(backend, "app_stash", None)
    }

    fn write_zip(files: &[(&str, &str, u32)], with_dir: bool) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        let mut writer = ZipWriter::new(file.reopen().unwrap());
        if with_dir {
            writer
                .add_directory("lib/", SimpleFileOptions::default())
                .unwrap();
        }
        for (name, content, mode) in files {
            writer
                .start_file(*name, SimpleFileOptions::default().unix_permissions(*mode))
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        file
    }

    fn read_zip(path: &Path) -> Vec<(String, Vec<u8>, Option<u32>)> {
        let mut archive = ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
        let mut entries = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).unwrap();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            entries.push((entry.name().to_string(), content, entry.unix_mode()));
        }
        entries.sort();
        entries
    }

    #[tokio::test]
    async fn test_ingest_stores_regular_files_by_sha1() {
        let dir = TempDir::new().unwrap();
        let stash = AppStash::new(local_store(dir.path()), &AppStashConfig::default());
        let app = write_zip(
            &[
                ("Gemfile", "source 'https://rubygems.org'", 0o644),
                ("lib/run.sh", "#!/bin/sh\nexec app", 0o755),
            ],
            true,
        );

        let manifest = stash.ingest_zip(app.path()).await.unwrap();

        let gemfile_sha = sha1_hex(b"source 'https://rubygems.org'");
        let run_sha = sha1_hex(b"#!/bin/sh\nexec app");
        assert_eq!(
            manifest,
            vec![
                Fingerprint::manifest_entry(gemfile_sha.clone(), "Gemfile", 0o644),
                Fingerprint::manifest_entry(run_sha.clone(), "lib/run.sh", 0o755),
            ]
        );
        let partitioned = dir
            .path()
            .join(&gemfile_sha[0..2])
            .join(&gemfile_sha[2..4])
            .join(&gemfile_sha);
        assert!(partitioned.exists());
        assert!(stash.store.exists(&run_sha).await.unwrap());
    }

    #[tokio::test]
    async fn test_ingest_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let stash = AppStash::new(local_store(dir.path()), &AppStashConfig::default());
        let app = write_zip(&[("a.txt", "same content", 0o644)], false);

        let first = stash.ingest_zip(app.path()).await.unwrap();
        let second = stash.ingest_zip(app.path()).await.unwrap();

        assert_eq!(first, second);
        let content = blob_store::collect_stream(stash.store.get(&first[0].sha1).await.unwrap())
            .await
            .unwrap();
        assert_eq!(&content[..], b"same content");
    }

    #[tokio::test]
    async fn test_ingest_applies_size_thresholds() {
        let dir = TempDir::new().unwrap();
        let config = AppStashConfig {
            minimum_size: Some(5),
            maximum_size: Some(10),
            ..Default::default()
        };
        let stash = AppStash::new(local_store(dir.path()), &config);
        let app = write_zip(
            &[
                ("tiny", "abc", 0o644),
                ("fits", "abcdefg", 0o644),
                ("huge", "abcdefghijklmnop", 0o644),
            ],
            false,
        );

        let manifest = stash.ingest_zip(app.path()).await.unwrap();

        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest[0].file_name.as_deref(), Some("fits"));
        assert!(!stash.store.exists(&sha1_hex(b"abc")).await.unwrap());
        assert!(!stash.store.exists(&sha1_hex(b"abcdefghijklmnop")).await.unwrap());
    }

    #[tokio::test]
    async fn test_ingest_rejects_invalid_zip() {
        let dir = TempDir::new().unwrap();
        let stash = AppStash::new(local_store(dir.path()), &AppStashConfig::default());
        let mut not_a_zip = NamedTempFile::new().unwrap();
        not_a_zip.write_all(b"definitely not a zip").unwrap();

        let err = stash.ingest_zip(not_a_zip.path()).await.unwrap_err();
        assert!(matches!(err, AppStashError::InvalidZip { .. }));
    }

    #[tokio::test]
    async fn test_matches_respects_thresholds() {
        let dir = TempDir::new().unwrap();
        let config = AppStashConfig {
            minimum_size: Some(15),
            maximum_size: Some(30),
            ..Default::default()
        };
        let stash = AppStash::new(local_store(dir.path()), &config);
        for key in ["aaaa", "bbbb"] {
            stash
                .store
                .put(key, blob_store::stream_from_bytes("x"))
                .await
                .unwrap();
        }
        let entry = |sha1: &str, size: u64| Fingerprint {
            sha1: sha1.to_string(),
            file_name: None,
            mode: None,
            size: Some(size),
        };

        let matched = stash
            .matches(vec![entry("aaaa", 20), entry("bbbb", 40), entry("cccc", 20)])
            .await
            .unwrap();

        assert_eq!(matched, vec![entry("aaaa", 20)]);
    }

    #[tokio::test]
    async fn test_matches_rejects_empty_request() {
        let dir = TempDir::new().unwrap();
        let stash = AppStash::new(local_store(dir.path()), &AppStashConfig::default());
        let err = stash.matches(vec![]).await.unwrap_err();
        assert!(matches!(err, AppStashError::EmptyRequest));
    }

    #[tokio::test]
    async fn test_ingest_then_bundle_round_trip() {
        let dir = TempDir::new().unwrap();
        let config = AppStashConfig {
            retry: fast_retry(),
            ..Default::default()
        };
        let stash = AppStash::new(local_store(dir.path()), &config);
        let app = write_zip(
            &[
                ("Procfile", "web: bundle exec rackup", 0o644),
                ("bin/start", "#!/bin/sh", 0o755),
            ],
            false,
        );
        let manifest = stash.ingest_zip(app.path()).await.unwrap();

        let bundle = stash.create_bundle(manifest, None).await.unwrap();

        let entries = read_zip(&bundle);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "Procfile");
        assert_eq!(entries[0].1, b"web: bundle exec rackup");
        assert_eq!(entries[0].2.map(|m| m & 0o777), Some(0o644));
        assert_eq!(entries[1].0, "bin/start");
        assert_eq!(entries[1].1, b"#!/bin/sh");
        assert_eq!(entries[1].2.map(|m| m & 0o777), Some(0o755));
    }

    #[tokio::test]
    async fn test_bundle_merges_application_zip() {
        let dir = TempDir::new().unwrap();
        let config = AppStashConfig {
            retry: fast_retry(),
            ..Default::default()
        };
        let stash = AppStash::new(local_store(dir.path()), &config);
        let cached = stash
            .ingest_zip(write_zip(&[("cached.txt", "from stash", 0o600)], false).path())
            .await
            .unwrap();
        let application = write_zip(&[("new.txt", "fresh upload", 0o644)], false);

        let mut resources = cached.clone();
        resources.push(Fingerprint::manifest_entry(
            sha1_hex(b"ignored"),
            "new.txt",
            0o644,
        ));
        let bundle = stash
            .create_bundle(resources, Some(application.path().to_path_buf()))
            .await
            .unwrap();

        let entries = read_zip(&bundle);
        let names: Vec<_> = entries.iter().map(|e| e.0.as_str()).collect();
        assert_eq!(names, vec!["cached.txt", "new.txt"]);
        assert_eq!(entries[1].1, b"fresh upload");
        assert!(stash.store.exists(&sha1_hex(b"fresh upload")).await.unwrap());
    }

    #[tokio::test]
    async fn test_bundle_unknown_sha1_is_not_found() {
        let dir = TempDir::new().unwrap();
        let config = AppStashConfig {
            retry: fast_retry(),
            ..Default::default()
        };
        let stash = AppStash::new(local_store(dir.path()), &config);
        let missing = "0000000000000000000000000000000000000000";

        let err = stash
            .create_bundle(
                vec![Fingerprint::manifest_entry(missing, "gone.txt", 0o644)],
                None,
            )
            .await
            .unwrap_err();

        match &err {
            AppStashError::EntryNotFound { sha1 } => assert_eq!(sha1, missing),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.to_string(), format!("{missing} not found"));
    }

    #[tokio::test]
    async fn test_bundle_fails_when_any_entry_is_missing() {
        let dir = TempDir::new().unwrap();
        let store = local_store(dir.path());
        store
            .put(&sha1_hex(b"present"), blob_store::stream_from_bytes("present"))
            .await
            .unwrap();
        let config = AppStashConfig {
            retry: fast_retry(),
            ..Default::default()
        };
        let stash = AppStash::new(store, &config);
        let missing = "ffffffffffffffffffffffffffffffffffffffff";

        let err = stash
            .create_bundle(
                vec![
                    Fingerprint::manifest_entry(sha1_hex(b"present"), "present.txt", 0o644),
                    Fingerprint::manifest_entry(missing, "gone.txt", 0o644),
                ],
                None,
            )
            .await
            .unwrap_err();

        match &err {
            AppStashError::EntryNotFound { sha1 } => assert_eq!(sha1, missing),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bundle_rejects_empty_request() {
        let dir = TempDir::new().unwrap();
        let stash = AppStash::new(local_store(dir.path()), &AppStashConfig::default());
        let err = stash.create_bundle(vec![], None).await.unwrap_err();
        assert!(matches!(err, AppStashError::EmptyRequest));
    }

    /// Fails the first `failures` reads before delegating.
    struct FlakyStore {
        inner: Arc<dyn NoRedirectBlobstore>,
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NoRedirectBlobstore for FlakyStore {
        async fn exists(&self, path: &str) -> BlobResult<bool> {
            self.inner.exists(path).await
        }

        async fn get(&self, path: &str) -> BlobResult<ByteStream> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(BlobError::NetworkError {
                    source: anyhow::anyhow!("connection reset by peer"),
                });
            }
            self.inner.get(path).await
        }

        async fn put(&self, path: &str, content: ByteStream) -> BlobResult<()> {
            self.inner.put(path, content).await
        }

        async fn copy(&self, src: &str, dest: &str) -> BlobResult<()> {
            self.inner.copy(src, dest).await
        }

        async fn delete(&self, path: &str) -> BlobResult<()> {
            self.inner.delete(path).await
        }

        async fn delete_dir(&self, prefix: &str) -> BlobResult<()> {
            self.inner.delete_dir(prefix).await
        }
    }

    #[tokio::test]
    async fn test_bundle_retries_transient_failures() {
        let dir = TempDir::new().unwrap();
        let inner = local_store(dir.path());
        inner
            .put(&sha1_hex(b"payload"), blob_store::stream_from_bytes("payload"))
            .await
            .unwrap();
        let flaky = Arc::new(FlakyStore {
            inner,
            failures: 2,
            calls: AtomicUsize::new(0),
        });
        let config = AppStashConfig {
            retry: fast_retry(),
            ..Default::default()
        };
        let stash = AppStash::new(flaky.clone(), &config);

        let bundle = stash
            .create_bundle(
                vec![Fingerprint::manifest_entry(sha1_hex(b"payload"), "p.txt", 0o644)],
                None,
            )
            .await
            .unwrap();

        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert_eq!(read_zip(&bundle)[0].1, b"payload");
    }

    #[tokio::test]
    async fn test_bundle_gives_up_after_retries() {
        let dir = TempDir::new().unwrap();
        let flaky = Arc::new(FlakyStore {
            inner: local_store(dir.path()),
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        let config = AppStashConfig {
            retry: fast_retry(),
            ..Default::default()
        };
        let stash = AppStash::new(flaky.clone(), &config);

        let err = stash
            .create_bundle(
                vec![Fingerprint::manifest_entry("abcd", "x", 0o644)],
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppStashError::RetriesExhausted { .. }));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 4);
    }
}
