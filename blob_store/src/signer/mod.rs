mod path_signer;
mod resource_signer;

pub use path_signer::{unix_now, PathSigner, LEGACY_KEY_ID};
pub use resource_signer::{
    BackendResourceSigner,
    LocalResourceSigner,
    ResourceSigner,
    SignMethod,
    UrlSigner,
};
