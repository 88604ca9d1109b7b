use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Router,
};
use blob_store::{signer::PathSigner, stream_from_file, BlobContent, BlobError};
use tracing::info;

use super::{drain, found, is_multipart, multipart, read_body, spool_form_file};
use crate::{
    http_objects::{ApiError, CopySource},
    middleware::verify_signature,
    resources::{Resource, ResourceKind},
};

pub fn private_routes(resource: Arc<Resource>) -> Router {
    let prefix = resource.kind.route_prefix();
    let mut router = Router::new().route(
        &format!("{}/{{*identifier}}", prefix),
        get(get_resource)
            .head(head_resource)
            .put(put_resource)
            .delete(delete_resource),
    );
    if resource.kind == ResourceKind::BuildpackCache {
        router = router.route(prefix, delete(delete_buildpack_cache));
    }
    router.with_state(resource)
}

pub fn public_routes(resource: Arc<Resource>, signer: Arc<PathSigner>) -> Router {
    Router::new()
        .route(
            &format!("{}/{{*identifier}}", resource.kind.route_prefix()),
            get(get_resource).head(head_resource).put(put_resource),
        )
        .route_layer(middleware::from_fn_with_state(signer, verify_signature))
        .with_state(resource)
}

fn content_length(headers: &HeaderMap) -> Result<u64, ApiError> {
    headers
        .get(header::CONTENT_LENGTH)
        .ok_or_else(|| ApiError::bad_request("missing Content-Length header"))?
        .to_str()
        .ok()
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| ApiError::bad_request("invalid Content-Length header"))
}

/// Download a resource
#[utoipa::path(
    get,
    path = "/{resource}/{identifier}",
    tag = "bits",
    params(
        ("resource" = String, Path, description = "packages, droplets, buildpacks or buildpack_cache/entries"),
        ("identifier" = String, Path, description = "Resource identifier"),
    ),
    responses(
        (status = 200, description = "Resource content"),
        (status = 302, description = "Redirect to the backend"),
        (status = 404, description = "Resource not found", body = ApiError),
    ),
)]
pub async fn get_resource(
    State(resource): State<Arc<Resource>>,
    Path(identifier): Path<String>,
) -> Result<Response, ApiError> {
    match resource.store.get_or_redirect(&identifier).await? {
        BlobContent::Redirect(url) => Ok(found(&url)),
        BlobContent::Stream(stream) => Ok(Body::from_stream(stream).into_response()),
    }
}

/// Check that a resource exists
#[utoipa::path(
    head,
    path = "/{resource}/{identifier}",
    tag = "bits",
    responses(
        (status = 200, description = "Resource exists"),
        (status = 302, description = "Redirect to the backend"),
        (status = 404, description = "Resource not found"),
    ),
)]
pub async fn head_resource(
    State(resource): State<Arc<Resource>>,
    Path(identifier): Path<String>,
) -> Result<Response, ApiError> {
    match resource.store.head_or_redirect_as_get(&identifier).await? {
        Some(url) => Ok(found(&url)),
        None => Ok(StatusCode::OK.into_response()),
    }
}

/// Upload a resource or copy an existing one
///
/// A multipart body carries the file in the field named after the resource
/// type (`package`, `droplet`, `buildpack`, `buildpack_cache`). A JSON body
/// `{"source_guid": ...}` duplicates an existing resource.
#[utoipa::path(
    put,
    path = "/{resource}/{identifier}",
    tag = "bits",
    request_body(content = CopySource, description = "Source of a copy, or a multipart upload"),
    responses(
        (status = 201, description = "Resource stored"),
        (status = 400, description = "Malformed request", body = ApiError),
        (status = 404, description = "Copy source not found", body = ApiError),
        (status = 413, description = "Body exceeds the size limit", body = ApiError),
        (status = 507, description = "No space left on the backend", body = ApiError),
    ),
)]
pub async fn put_resource(
    State(resource): State<Arc<Resource>>,
    Path(identifier): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let length = content_length(request.headers())?;
    if let Some(limit) = resource.max_body_size {
        if length > limit {
            drain(request.into_body()).await;
            return Err(ApiError::payload_too_large(format!(
                "body of {} bytes exceeds the limit of {} bytes",
                length, limit
            )));
        }
    }

    if is_multipart(request.headers()) {
        let field = resource.kind.form_field();
        let upload = spool_form_file(multipart(request).await?, field)
            .await?
            .ok_or_else(|| ApiError::bad_request(format!("missing form field '{}'", field)))?;
        resource
            .store
            .put(&identifier, stream_from_file(&upload).await?)
            .await?;
        info!(resource = %resource.kind, %identifier, size = length, "stored resource");
    } else {
        let source: CopySource = serde_json::from_slice(&read_body(request.into_body()).await?)?;
        resource
            .store
            .copy(&source.source_guid, &identifier)
            .await?;
        info!(
            resource = %resource.kind,
            %identifier,
            source_guid = %source.source_guid,
            "copied resource"
        );
    }
    Ok(StatusCode::CREATED.into_response())
}

/// Delete a resource
///
/// A buildpack cache identifier without a stack (`{app_guid}`) deletes every
/// entry of that app.
#[utoipa::path(
    delete,
    path = "/{resource}/{identifier}",
    tag = "bits",
    responses(
        (status = 204, description = "Resource deleted"),
        (status = 404, description = "Resource not found", body = ApiError),
    ),
)]
pub async fn delete_resource(
    State(resource): State<Arc<Resource>>,
    Path(identifier): Path<String>,
) -> Result<Response, ApiError> {
    if resource.kind == ResourceKind::BuildpackCache && !identifier.contains('/') {
        delete_dir(&resource, &identifier).await?;
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    if !resource.store.exists(&identifier).await? {
        return Err(ApiError::not_found(format!(
            "{} {} not found",
            resource.kind, identifier
        )));
    }
    resource.store.delete(&identifier).await?;
    info!(resource = %resource.kind, %identifier, "deleted resource");
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Delete every buildpack cache entry
#[utoipa::path(
    delete,
    path = "/buildpack_cache/entries",
    tag = "bits",
    responses(
        (status = 204, description = "All entries deleted"),
    ),
)]
pub async fn delete_buildpack_cache(
    State(resource): State<Arc<Resource>>,
) -> Result<Response, ApiError> {
    delete_dir(&resource, "").await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn delete_dir(resource: &Resource, prefix: &str) -> Result<(), ApiError> {
    match resource.store.delete_dir(prefix).await {
        Ok(()) => {
            info!(resource = %resource.kind, prefix, "deleted resource directory");
            Ok(())
        }
        Err(BlobError::NotFound { .. }) => Ok(()),
        Err(err) => Err(err.into()),
    }
}
