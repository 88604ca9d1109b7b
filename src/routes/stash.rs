use std::sync::Arc;

use app_stash::{AppStash, Fingerprint};
use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::header,
    response::{IntoResponse, Response},
    routing::post,
    Json,
    Router,
};
use futures::StreamExt;
use tempfile::TempPath;
use tokio_util::io::ReaderStream;

use super::{is_multipart, multipart, read_body, spool_field, spool_form_file};
use crate::http_objects::ApiError;

const APPLICATION_FIELD: &str = "application";
const RESOURCES_FIELD: &str = "resources";

pub fn routes(app_stash: Arc<AppStash>) -> Router {
    Router::new()
        .route("/app_stash/entries", post(upload_entries))
        .route("/app_stash/matches", post(find_matches))
        .route("/app_stash/bundles", post(create_bundle))
        .with_state(app_stash)
}

/// Stash the files of an application zip
///
/// Expects the zip in the multipart field `application` and returns the
/// manifest of stored files.
#[utoipa::path(
    post,
    path = "/app_stash/entries",
    tag = "bits",
    responses(
        (status = 200, description = "Manifest of stored files", body = Vec<Fingerprint>),
        (status = 400, description = "Missing field or invalid zip", body = ApiError),
    ),
)]
pub async fn upload_entries(
    State(app_stash): State<Arc<AppStash>>,
    request: Request,
) -> Result<Json<Vec<Fingerprint>>, ApiError> {
    let application = spool_form_file(multipart(request).await?, APPLICATION_FIELD)
        .await?
        .ok_or_else(|| {
            ApiError::bad_request(format!("missing form field '{}'", APPLICATION_FIELD))
        })?;
    Ok(Json(app_stash.ingest_zip(&application).await?))
}

/// List the fingerprints that are already stashed
#[utoipa::path(
    post,
    path = "/app_stash/matches",
    tag = "bits",
    request_body = Vec<Fingerprint>,
    responses(
        (status = 200, description = "Matching fingerprints", body = Vec<Fingerprint>),
        (status = 400, description = "Malformed JSON", body = ApiError),
        (status = 422, description = "Empty fingerprint list", body = ApiError),
    ),
)]
pub async fn find_matches(
    State(app_stash): State<Arc<AppStash>>,
    body: Bytes,
) -> Result<Json<Vec<Fingerprint>>, ApiError> {
    let entries: Vec<Fingerprint> = serde_json::from_slice(&body)?;
    Ok(Json(app_stash.matches(entries).await?))
}

/// Reassemble an application zip from stashed files
///
/// Accepts a JSON array of `{sha1, fn, mode}` or a multipart form with a
/// `resources` JSON field and an optional `application` zip.
#[utoipa::path(
    post,
    path = "/app_stash/bundles",
    tag = "bits",
    request_body = Vec<Fingerprint>,
    responses(
        (status = 200, description = "Application zip (application/zip)"),
        (status = 400, description = "Malformed request", body = ApiError),
        (status = 404, description = "A stashed file is missing", body = ApiError),
        (status = 422, description = "Empty or incomplete manifest", body = ApiError),
    ),
)]
pub async fn create_bundle(
    State(app_stash): State<Arc<AppStash>>,
    request: Request,
) -> Result<Response, ApiError> {
    let (resources, application) = bundle_request(request).await?;
    if let Some(entry) = resources.iter().find(|entry| entry.file_name.is_none()) {
        return Err(ApiError::unprocessable(format!(
            "resource {} has no fn",
            entry.sha1
        )));
    }

    let bundle = app_stash
        .create_bundle(resources, application.as_ref().map(|path| path.to_path_buf()))
        .await?;
    let file = tokio::fs::File::open(&bundle).await?;
    let length = file.metadata().await?.len();
    // The temp file lives until the response body is dropped.
    let body = ReaderStream::new(file).map(move |chunk| {
        let _bundle = &bundle;
        chunk
    });
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_LENGTH, length.to_string()),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

async fn bundle_request(
    request: Request,
) -> Result<(Vec<Fingerprint>, Option<TempPath>), ApiError> {
    if !is_multipart(request.headers()) {
        let resources = serde_json::from_slice(&read_body(request.into_body()).await?)?;
        return Ok((resources, None));
    }

    let mut form = multipart(request).await?;
    let mut resources = None;
    let mut application = None;
    while let Some(field) = form.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            RESOURCES_FIELD => {
                resources = Some(serde_json::from_slice::<Vec<Fingerprint>>(&field.bytes().await?)?);
            }
            APPLICATION_FIELD => application = Some(spool_field(field).await?),
            _ => {}
        }
    }
    let resources = resources.ok_or_else(|| {
        ApiError::bad_request(format!("missing form field '{}'", RESOURCES_FIELD))
    })?;
    Ok((resources, application))
}
