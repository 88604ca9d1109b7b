use std::time::Duration;

use crate::bulk_delete;

pub mod cloud;
pub mod local;
pub mod openstack;
pub mod webdav;

pub use cloud::ObjectStoreBlobstore;
pub use local::LocalBlobstore;
pub use openstack::OpenStackBlobstore;
pub use webdav::WebDavBlobstore;

/// Tuning shared by all backends built from configuration.
#[derive(Debug, Clone, Copy)]
pub struct BackendOptions {
    /// Lifetime of redirect URLs handed out on reads.
    pub redirect_expiry: Duration,
    pub delete_workers: usize,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            redirect_expiry: Duration::from_secs(3600),
            delete_workers: bulk_delete::DEFAULT_DELETE_WORKERS,
        }
    }
}
