use std::{
    collections::HashSet,
    fs::File,
    path::{Path, PathBuf},
    time::Duration,
};

use ::metrics::{Increment, Timer};
use backon::Retryable;
use futures::StreamExt;
use tempfile::{NamedTempFile, TempPath};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

use crate::{
    ingest::open_archive,
    retry::FetchError,
    AppStash,
    AppStashError,
    Fingerprint,
};

type BundleWriter = ZipWriter<NamedTempFile>;

fn file_options(mode: u32, size: u64) -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(mode)
        .large_file(size >= u32::MAX as u64)
}

/// Copies every entry of the application zip verbatim and returns the names
/// written.
fn copy_application(
    writer: &mut BundleWriter,
    application: &Path,
) -> Result<Vec<String>, AppStashError> {
    let mut archive = open_archive(File::open(application)?)?;
    let mut names = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        names.push(entry.name().to_string());
        writer.raw_copy_file(entry)?;
    }
    Ok(names)
}

fn append_file(
    writer: &mut BundleWriter,
    name: &str,
    mode: u32,
    content: &Path,
) -> Result<(), AppStashError> {
    let mut source = File::open(content)?;
    let size = source.metadata()?.len();
    writer.start_file(name, file_options(mode, size))?;
    std::io::copy(&mut source, writer)?;
    Ok(())
}

impl AppStash {
    /// Downloads one entry to a temp file.
    async fn fetch_to_spool(&self, sha1: &str) -> Result<TempPath, FetchError> {
        let mut content = self.store.get(sha1).await?;
        let spool = NamedTempFile::new()?.into_temp_path();
        let mut out = tokio::fs::File::create(&spool).await?;
        while let Some(chunk) = content.next().await {
            out.write_all(&chunk?).await?;
        }
        out.flush().await?;
        Ok(spool)
    }

    async fn fetch_with_retry(&self, sha1: &str) -> Result<TempPath, AppStashError> {
        let fetch = || self.fetch_to_spool(sha1);
        fetch
            .retry(self.retry.backoff())
            .when(FetchError::is_transient)
            .notify(|err: &FetchError, delay: Duration| {
                self.metrics.fetch_retries.inc(&[]);
                warn!(
                    sha1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying app stash fetch"
                );
            })
            .await
            .map_err(|err| match err {
                FetchError::Permanent(source) if source.is_not_found() => {
                    AppStashError::EntryNotFound {
                        sha1: sha1.to_string(),
                    }
                }
                FetchError::Permanent(source) => AppStashError::Blobstore { source },
                FetchError::Transient(source) => AppStashError::RetriesExhausted {
                    sha1: sha1.to_string(),
                    source,
                },
            })
    }

    /// Reassembles an application zip from stashed entries plus the files of
    /// an optional partial application zip.
    ///
    /// Files of the application zip win over manifest entries with the same
    /// name; new application files within the size thresholds are stashed.
    pub async fn create_bundle(
        &self,
        resources: Vec<Fingerprint>,
        application: Option<PathBuf>,
    ) -> Result<TempPath, AppStashError> {
        if resources.is_empty() && application.is_none() {
            return Err(AppStashError::EmptyRequest);
        }
        let _timer = Timer::start_with_labels(&self.metrics.bundle_duration, &[]);

        let mut writer = ZipWriter::new(NamedTempFile::new()?);
        let mut written = HashSet::new();

        if let Some(application) = &application {
            let source = application.clone();
            let (returned, names) = tokio::task::spawn_blocking(move || {
                let names = copy_application(&mut writer, &source);
                (writer, names)
            })
            .await?;
            writer = returned;
            written.extend(names?);
            self.ingest_zip(application).await?;
        }

        for resource in resources {
            let Some(name) = resource.file_name.clone() else {
                continue;
            };
            if !written.insert(name.clone()) {
                continue;
            }
            let spool = self.fetch_with_retry(&resource.sha1).await?;
            let mode = resource.permissions();
            writer = tokio::task::spawn_blocking(move || {
                append_file(&mut writer, &name, mode, &spool).map(|_| writer)
            })
            .await??;
        }

        let entries = written.len();
        let bundle = tokio::task::spawn_blocking(move || writer.finish()).await??;
        info!(entries, "assembled application bundle");
        Ok(bundle.into_temp_path())
    }
}
