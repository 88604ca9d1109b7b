use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use app_stash::AppStash;
use axum_server::{tls_rustls::RustlsConfig, Handle};
use blob_store::{create_backend, decorators, BackendHandles, BackendOptions};
use tokio::signal;
use tracing::info;
use url::Url;

use crate::{
    config::{ResourceConfig, ServerConfig},
    middleware::RequestSpan,
    resources::{Resource, ResourceKind},
    routes::{create_routes, endpoint_host, RouteState},
};

const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Service {
    pub config: ServerConfig,
    pub route_state: RouteState,
}

impl Service {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let route_state = build_route_state(&config)?;
        Ok(Self {
            config,
            route_state,
        })
    }

    pub async fn start(&self) -> Result<()> {
        let handle = Handle::new();
        let handle_sh = handle.clone();
        tokio::spawn(async move {
            shutdown_signal(handle_sh).await;
            info!("graceful shutdown signal received, shutting down server gracefully");
        });

        let addr: SocketAddr = self.config.listen_addr.parse()?;
        let routes = create_routes(self.route_state.clone());
        match &self.config.tls {
            Some(tls) => {
                let rustls = RustlsConfig::from_pem_file(&tls.cert_file, &tls.key_file)
                    .await
                    .context("loading TLS certificate")?;
                info!("server api listening on https://{}", self.config.listen_addr);
                axum_server::bind_rustls(addr, rustls)
                    .handle(handle)
                    .serve(routes.into_make_service())
                    .await?;
            }
            None => {
                info!("server api listening on http://{}", self.config.listen_addr);
                axum_server::bind(addr)
                    .handle(handle)
                    .serve(routes.into_make_service())
                    .await?;
            }
        }
        Ok(())
    }
}

fn build_route_state(config: &ServerConfig) -> Result<RouteState> {
    let options = BackendOptions {
        redirect_expiry: config.signed_url_expiration(),
        delete_workers: config.delete_workers,
    };
    let path_signer = config.path_signer()?;
    let backend = |name: &str, resource: &ResourceConfig| -> Result<BackendHandles> {
        create_backend(&resource.blobstore, options)
            .with_context(|| format!("error initializing {} blobstore", name))
    };

    // The buildpack cache lives in the droplets backend.
    let droplets = backend("droplets", &config.droplets)?;
    let mut resources = HashMap::new();
    for kind in ResourceKind::ALL {
        let (handles, resource_config) = match kind {
            ResourceKind::Packages => (backend("packages", &config.packages)?, &config.packages),
            ResourceKind::Buildpacks => {
                (backend("buildpacks", &config.buildpacks)?, &config.buildpacks)
            }
            ResourceKind::Droplets | ResourceKind::BuildpackCache => {
                (droplets.clone(), &config.droplets)
            }
        };
        let resource = Resource::new(
            kind,
            handles,
            config.max_body_size(resource_config),
            &path_signer,
            &config.public_endpoint,
        );
        resources.insert(kind, Arc::new(resource));
    }

    let stash_backend = backend("app_stash", &config.app_stash)?;
    let app_stash = AppStash::new(
        decorators::decorate_no_redirect(stash_backend.no_redirect, "app_stash", None),
        &config.app_stash_config,
    );

    let public_endpoint = Url::parse(&config.public_endpoint)
        .with_context(|| format!("invalid public_endpoint: {}", config.public_endpoint))?;

    Ok(RouteState {
        resources: Arc::new(resources),
        app_stash: Arc::new(app_stash),
        path_signer: Arc::new(path_signer),
        signing_users: Arc::new(config.signing_users.clone()),
        signed_url_expiration: config.signed_url_expiration(),
        public_host: endpoint_host(&public_endpoint),
        request_span: RequestSpan::new(&config.env, &config.instance_id()),
    })
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
        },
        _ = terminate => {
        },
    }
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE_PERIOD));
    info!("signal received, shutting down server gracefully");
}
