//! Blobstore abstraction for the bits server.
//!
//! Every backend implements [`NoRedirectBlobstore`] (bytes always flow through
//! the caller) and [`Blobstore`] (reads may be answered with a redirect to the
//! vendor). Backends are selected from a [`BlobstoreConfig`] by
//! [`create_backend`] and wrapped by the decorators in [`decorators`]:
//!
//! ```rust,no_run
//! use blob_store::{create_backend, decorators, BackendOptions, BlobstoreConfig};
//!
//! # fn example() -> Result<(), blob_store::BlobError> {
//! let handles = create_backend(
//!     &BlobstoreConfig::local("/var/vcap/store/droplets"),
//!     BackendOptions::default(),
//! )?;
//! let buildpack_cache = decorators::decorate(
//!     handles.blobstore,
//!     "buildpack_cache",
//!     Some("buildpack_cache/"),
//! );
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod bulk_delete;
pub mod config;
pub mod decorators;
mod error;
mod factory;
pub mod signer;
mod traits;

pub use backends::BackendOptions;
pub use config::{BlobstoreConfig, BlobstoreType};
pub use error::{BlobError, BlobResult};
pub use factory::{create_backend, BackendHandles};
pub use signer::{ResourceSigner, SignMethod, UrlSigner};
pub use traits::{
    collect_stream,
    stream_from_bytes,
    stream_from_file,
    BlobContent,
    Blobstore,
    ByteStream,
    NoRedirectBlobstore,
};
