use std::{fmt, str::FromStr, sync::Arc};

use blob_store::{
    decorators,
    signer::{BackendResourceSigner, LocalResourceSigner, PathSigner},
    BackendHandles,
    Blobstore,
    ResourceSigner,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Packages,
    Droplets,
    Buildpacks,
    BuildpackCache,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Packages,
        ResourceKind::Droplets,
        ResourceKind::Buildpacks,
        ResourceKind::BuildpackCache,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ResourceKind::Packages => "packages",
            ResourceKind::Droplets => "droplets",
            ResourceKind::Buildpacks => "buildpacks",
            ResourceKind::BuildpackCache => "buildpack_cache",
        }
    }

    pub fn route_prefix(&self) -> &'static str {
        match self {
            ResourceKind::Packages => "/packages",
            ResourceKind::Droplets => "/droplets",
            ResourceKind::Buildpacks => "/buildpacks",
            ResourceKind::BuildpackCache => "/buildpack_cache/entries",
        }
    }

    /// Multipart field carrying the uploaded file.
    pub fn form_field(&self) -> &'static str {
        match self {
            ResourceKind::Packages => "package",
            ResourceKind::Droplets => "droplet",
            ResourceKind::Buildpacks => "buildpack",
            ResourceKind::BuildpackCache => "buildpack_cache",
        }
    }

    /// Namespace inside the backing store. The buildpack cache shares the
    /// droplets backend.
    pub fn key_prefix(&self) -> Option<&'static str> {
        match self {
            ResourceKind::BuildpackCache => Some("buildpack_cache/"),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| format!("unknown resource type '{}'", s))
    }
}

/// Everything the handlers need to serve one resource type.
pub struct Resource {
    pub kind: ResourceKind,
    pub store: Arc<dyn Blobstore>,
    pub signer: Arc<dyn ResourceSigner>,
    pub max_body_size: Option<u64>,
}

impl Resource {
    /// Decorates `backend` for `kind` and picks its signer: vendor presigning
    /// when the backend offers it, otherwise paths signed for the public
    /// endpoint of this server.
    pub fn new(
        kind: ResourceKind,
        backend: BackendHandles,
        max_body_size: Option<u64>,
        path_signer: &PathSigner,
        public_endpoint: &str,
    ) -> Self {
        let signer: Arc<dyn ResourceSigner> = match backend.url_signer {
            Some(url_signer) => Arc::new(BackendResourceSigner::new(
                url_signer,
                kind.key_prefix().unwrap_or_default(),
            )),
            None => Arc::new(LocalResourceSigner::new(
                path_signer.clone(),
                public_endpoint,
                kind.route_prefix(),
            )),
        };
        Self {
            kind,
            store: decorators::decorate(backend.blobstore, kind.name(), kind.key_prefix()),
            signer,
            max_body_size,
        }
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("kind", &self.kind)
            .field("max_body_size", &self.max_body_size)
            .finish()
    }
}
