use axum::{
    extract::{Path, Query, State},
    middleware,
    routing::get,
    Router,
};
use blob_store::SignMethod;
use tracing::debug;

use super::RouteState;
use crate::{
    http_objects::{ApiError, SignParams},
    middleware::require_basic_auth,
    resources::ResourceKind,
};

pub fn routes(route_state: RouteState) -> Router {
    Router::new()
        .route("/sign/{resource_type}/{*resource}", get(sign_resource))
        .route_layer(middleware::from_fn_with_state(
            route_state.signing_users.clone(),
            require_basic_auth,
        ))
        .with_state(route_state)
}

/// Issue a time-limited URL for a resource
///
/// Buildpack cache entries may be addressed as `entries/{app_guid}/{stack}`
/// or `{app_guid}/{stack}`.
#[utoipa::path(
    get,
    path = "/sign/{resource_type}/{resource}",
    tag = "bits",
    params(
        ("resource_type" = String, Path, description = "packages, droplets, buildpacks or buildpack_cache"),
        ("resource" = String, Path, description = "Resource identifier"),
        SignParams,
    ),
    responses(
        (status = 200, description = "Signed URL", body = String),
        (status = 400, description = "Unsupported verb", body = ApiError),
        (status = 401, description = "Missing or invalid credentials", body = ApiError),
        (status = 404, description = "Unknown resource type", body = ApiError),
    ),
)]
pub async fn sign_resource(
    State(route_state): State<RouteState>,
    Path((resource_type, resource)): Path<(String, String)>,
    Query(params): Query<SignParams>,
) -> Result<String, ApiError> {
    let kind: ResourceKind = resource_type.parse().map_err(ApiError::not_found)?;
    let method: SignMethod = params
        .verb
        .as_deref()
        .unwrap_or("get")
        .parse()
        .map_err(|err: blob_store::BlobError| ApiError::bad_request(err.to_string()))?;
    let target = route_state
        .resources
        .get(&kind)
        .ok_or_else(|| ApiError::not_found(format!("resource type {} is not served", kind)))?;
    let identifier = match kind {
        ResourceKind::BuildpackCache => resource.strip_prefix("entries/").unwrap_or(&resource),
        _ => resource.as_str(),
    };

    let url = target
        .signer
        .sign(identifier, method, route_state.signed_url_expiration)
        .await?;
    debug!(resource = %kind, identifier, %method, "signed resource url");
    Ok(url)
}
