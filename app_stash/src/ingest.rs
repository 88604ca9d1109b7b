use std::{
    collections::HashSet,
    fs::File,
    io::{Read, Write},
    path::Path,
};

use ::metrics::Increment;
use blob_store::stream_from_file;
use sha1::{Digest, Sha1};
use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, info};
use zip::ZipArchive;

use crate::{AppStash, AppStashError, Fingerprint};

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;
const DEFAULT_FILE_MODE: u32 = 0o644;

/// A regular zip entry decompressed to disk.
pub(crate) struct SpooledEntry {
    pub sha1: String,
    pub name: String,
    pub mode: u32,
    pub size: u64,
    pub file: TempPath,
}

pub(crate) fn open_archive(file: File) -> Result<ZipArchive<File>, AppStashError> {
    ZipArchive::new(file).map_err(|e| AppStashError::InvalidZip {
        reason: e.to_string(),
    })
}

/// Decompresses entry `index` while hashing it. Directories and symlinks
/// yield `None`.
pub(crate) fn spool_entry(
    archive: &mut ZipArchive<File>,
    index: usize,
) -> Result<Option<SpooledEntry>, AppStashError> {
    let mut entry = archive
        .by_index(index)
        .map_err(|e| AppStashError::InvalidZip {
            reason: e.to_string(),
        })?;
    let unix_mode = entry.unix_mode();
    let is_symlink = unix_mode.is_some_and(|m| m & S_IFMT == S_IFLNK);
    if entry.is_dir() || is_symlink {
        return Ok(None);
    }
    let name = entry.name().to_string();

    let mut spool = NamedTempFile::new()?;
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let read = entry.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
        spool.write_all(&buf[..read])?;
        size += read as u64;
    }
    spool.flush()?;

    Ok(Some(SpooledEntry {
        sha1: hex::encode(hasher.finalize()),
        name,
        mode: unix_mode.map(|m| m & 0o7777).unwrap_or(DEFAULT_FILE_MODE),
        size,
        file: spool.into_temp_path(),
    }))
}

impl AppStash {
    /// Stores every regular file of the zip at `zip_path` under its SHA-1 and
    /// returns the manifest of stored files.
    pub async fn ingest_zip(&self, zip_path: &Path) -> Result<Vec<Fingerprint>, AppStashError> {
        let path = zip_path.to_path_buf();
        let mut archive =
            tokio::task::spawn_blocking(move || open_archive(File::open(path)?)).await??;
        let total = archive.len();

        let mut uploaded = HashSet::new();
        let mut manifest = Vec::new();
        for index in 0..total {
            let (returned, spooled) = tokio::task::spawn_blocking(move || {
                let spooled = spool_entry(&mut archive, index);
                (archive, spooled)
            })
            .await?;
            archive = returned;

            let Some(entry) = spooled? else {
                continue;
            };
            if !self.within_thresholds(entry.size) {
                debug!(
                    name = %entry.name,
                    size = entry.size,
                    "skipping entry outside size thresholds"
                );
                continue;
            }
            if uploaded.insert(entry.sha1.clone()) && !self.store.exists(&entry.sha1).await? {
                self.store
                    .put(&entry.sha1, stream_from_file(&entry.file).await?)
                    .await?;
                self.metrics.entries_stored.inc(&[]);
            }
            manifest.push(Fingerprint::manifest_entry(entry.sha1, entry.name, entry.mode));
        }

        info!(entries = total, stored = manifest.len(), "ingested application zip");
        Ok(manifest)
    }
}
