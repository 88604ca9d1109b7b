use std::{any::Any, collections::HashMap, sync::Arc, time::Duration};

use app_stash::{AppStash, Fingerprint};
use axum::{
    body::Body,
    extract::{multipart::Field, DefaultBodyLimit, FromRequest, Multipart, Request},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use blob_store::signer::PathSigner;
use futures::StreamExt;
use tempfile::{NamedTempFile, TempPath};
use tokio::io::AsyncWriteExt;
use tower::ServiceExt;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::error;
use url::Url;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    config::BasicAuthUser,
    http_objects::{ApiError, CopySource},
    middleware::RequestSpan,
    resources::{Resource, ResourceKind},
};

pub mod resources;
pub mod sign;
pub mod stash;

#[derive(OpenApi)]
#[openapi(
        paths(
            resources::get_resource,
            resources::head_resource,
            resources::put_resource,
            resources::delete_resource,
            resources::delete_buildpack_cache,
            stash::upload_entries,
            stash::find_matches,
            stash::create_bundle,
            sign::sign_resource,
        ),
        components(
            schemas(
                ApiError,
                CopySource,
                Fingerprint,
            )
        ),
        tags(
            (name = "bits", description = "Bits blob storage API")
        )
    )]
pub struct ApiDoc;

#[derive(Clone)]
pub struct RouteState {
    pub resources: Arc<HashMap<ResourceKind, Arc<Resource>>>,
    pub app_stash: Arc<AppStash>,
    pub path_signer: Arc<PathSigner>,
    pub signing_users: Arc<Vec<BasicAuthUser>>,
    pub signed_url_expiration: Duration,
    /// `host[:port]` of the public endpoint.
    pub public_host: String,
    pub request_span: RequestSpan,
}

/// Serves the public router to requests addressed to the public host and
/// the private router to everything else.
pub fn create_routes(route_state: RouteState) -> Router {
    let public = public_routes(&route_state);
    let private = private_routes(&route_state);
    let public_host = route_state.public_host.clone();

    Router::new()
        .fallback(move |request: Request| {
            let router = if is_public_request(&request, &public_host) {
                public.clone()
            } else {
                private.clone()
            };
            async move { router.oneshot(request).await }
        })
        .layer(CatchPanicLayer::custom(panic_response))
}

fn private_routes(route_state: &RouteState) -> Router {
    let mut router = Router::new()
        .merge(SwaggerUi::new("/docs/swagger").url("/docs/openapi.json", ApiDoc::openapi()))
        .route("/", get(index));
    for resource in route_state.resources.values() {
        router = router.merge(resources::private_routes(resource.clone()));
    }
    let router = router
        .merge(stash::routes(route_state.app_stash.clone()))
        .merge(sign::routes(route_state.clone()));
    with_common_layers(router, route_state)
}

/// Only signed reads and uploads of resources are reachable publicly.
fn public_routes(route_state: &RouteState) -> Router {
    let mut router = Router::new();
    for resource in route_state.resources.values() {
        router = router.merge(resources::public_routes(
            resource.clone(),
            route_state.path_signer.clone(),
        ));
    }
    with_common_layers(router, route_state)
}

fn with_common_layers(router: Router, route_state: &RouteState) -> Router {
    router
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(route_state.request_span.clone())
                .on_failure(()),
        )
        .layer(DefaultBodyLimit::disable())
}

async fn index() -> &'static str {
    "Bits Service"
}

/// `host[:port]` as it appears in a `Host` header for `endpoint`.
pub fn endpoint_host(endpoint: &Url) -> String {
    let host = endpoint.host_str().unwrap_or_default();
    match endpoint.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

fn is_public_request(request: &Request, public_host: &str) -> bool {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| request.uri().authority().map(|authority| authority.as_str()));
    let Some(host) = host else {
        return false;
    };
    if host.eq_ignore_ascii_case(public_host) {
        return true;
    }
    let bare = host.rsplit_once(':').map_or(host, |(name, _)| name);
    bare.eq_ignore_ascii_case(public_host)
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = detail, "request handler panicked");
    ApiError::internal_error("internal server error").into_response()
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

pub(crate) fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.to_ascii_lowercase().starts_with("multipart/form-data"))
}

pub(crate) async fn multipart(request: Request) -> Result<Multipart, ApiError> {
    Multipart::from_request(request, &())
        .await
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

pub(crate) async fn read_body(body: Body) -> Result<bytes::Bytes, ApiError> {
    axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ApiError::bad_request(format!("failed to read request body: {}", e)))
}

/// Consumes the rest of a rejected upload so the client sees the response.
pub(crate) async fn drain(body: Body) {
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        if chunk.is_err() {
            break;
        }
    }
}

pub(crate) async fn spool_field(mut field: Field<'_>) -> Result<TempPath, ApiError> {
    let spool = NamedTempFile::new()?.into_temp_path();
    let mut file = tokio::fs::File::create(&spool).await?;
    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(spool)
}

/// Writes the form file `name` to a temp file; `None` when the form has no
/// such field.
pub(crate) async fn spool_form_file(
    mut multipart: Multipart,
    name: &str,
) -> Result<Option<TempPath>, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(name) {
            return spool_field(field).await.map(Some);
        }
    }
    Ok(None)
}
