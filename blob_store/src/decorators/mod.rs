//! Value-level wrappers layered over a backend driver.
//!
//! Keys flow from the outermost decorator inwards: partitioning first, then
//! the namespace prefix, then metrics, then the backend.

mod metrics;
mod partitioning;
mod prefixing;

use std::sync::Arc;

pub use self::metrics::MetricsBlobstore;
pub use partitioning::{partitioned_path, PartitioningBlobstore};
pub use prefixing::PrefixingBlobstore;

use crate::{Blobstore, NoRedirectBlobstore};

/// Builds the standard chain for a redirect-capable resource store.
pub fn decorate(
    backend: Arc<dyn Blobstore>,
    resource: &'static str,
    prefix: Option<&str>,
) -> Arc<dyn Blobstore> {
    let measured = MetricsBlobstore::new(backend, resource);
    match prefix {
        Some(prefix) if !prefix.is_empty() => Arc::new(PartitioningBlobstore::new(
            PrefixingBlobstore::new(measured, prefix),
        )),
        _ => Arc::new(PartitioningBlobstore::new(measured)),
    }
}

/// Same chain as [`decorate`] for stores that never redirect.
pub fn decorate_no_redirect(
    backend: Arc<dyn NoRedirectBlobstore>,
    resource: &'static str,
    prefix: Option<&str>,
) -> Arc<dyn NoRedirectBlobstore> {
    let measured = MetricsBlobstore::new(backend, resource);
    match prefix {
        Some(prefix) if !prefix.is_empty() => Arc::new(PartitioningBlobstore::new(
            PrefixingBlobstore::new(measured, prefix),
        )),
        _ => Arc::new(PartitioningBlobstore::new(measured)),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{backends::LocalBlobstore, collect_stream, stream_from_bytes};

    #[tokio::test]
    async fn test_keys_are_partitioned_inside_prefix() {
        let root = TempDir::new().unwrap();
        let backend = Arc::new(LocalBlobstore::new(root.path()).unwrap());
        let store = decorate(backend, "buildpack_cache", Some("buildpack_cache/"));

        store
            .put("abcdef", stream_from_bytes("cached"))
            .await
            .unwrap();

        let on_disk = root.path().join("buildpack_cache/ab/cd/abcdef");
        assert_eq!(std::fs::read(on_disk).unwrap(), b"cached");
        assert!(store.exists("abcdef").await.unwrap());
        let content = collect_stream(store.get("abcdef").await.unwrap())
            .await
            .unwrap();
        assert_eq!(&content[..], b"cached");
    }

    #[tokio::test]
    async fn test_delete_dir_empty_only_clears_namespace() {
        let root = TempDir::new().unwrap();
        let backend = Arc::new(LocalBlobstore::new(root.path()).unwrap());
        let droplets = decorate(backend.clone(), "droplets", None);
        let cache = decorate(backend, "buildpack_cache", Some("buildpack_cache/"));

        droplets
            .put("droplet-guid", stream_from_bytes("d"))
            .await
            .unwrap();
        cache.put("app/stack", stream_from_bytes("c")).await.unwrap();

        cache.delete_dir("").await.unwrap();

        assert!(!cache.exists("app/stack").await.unwrap());
        assert!(droplets.exists("droplet-guid").await.unwrap());
    }

    #[tokio::test]
    async fn test_no_redirect_chain_round_trips() {
        let root = TempDir::new().unwrap();
        let backend: Arc<dyn NoRedirectBlobstore> =
            Arc::new(LocalBlobstore::new(root.path()).unwrap());
        let store = decorate_no_redirect(backend, "app_stash", None);

        store.put("0123abcd", stream_from_bytes("x")).await.unwrap();
        store.copy("0123abcd", "4567abcd").await.unwrap();

        assert!(root.path().join("45/67/4567abcd").exists());
        store.delete("0123abcd").await.unwrap();
        assert!(!store.exists("0123abcd").await.unwrap());
    }
}
