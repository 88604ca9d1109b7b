use std::sync::Arc;

use axum::{
    extract::{MatchedPath, Request, State},
    http::{self, header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{authorization::Basic, Authorization, HeaderMapExt};
use blob_store::{signer::PathSigner, SignMethod};
use subtle::ConstantTimeEq;
use tower_http::trace::MakeSpan;
use tracing::Span;

use crate::{config::BasicAuthUser, http_objects::ApiError};

#[derive(Clone)]
pub struct RequestSpan {
    env: String,
    instance_id: String,
}

impl RequestSpan {
    pub fn new(env: &str, instance_id: &str) -> Self {
        Self {
            env: env.to_string(),
            instance_id: instance_id.to_string(),
        }
    }
}

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, request: &http::Request<B>) -> Span {
        let matched_path = request
            .extensions()
            .get::<MatchedPath>()
            .map(|matched_path| matched_path.as_str());
        tracing::info_span!(
            "request",
            env = %self.env,
            instance_id = %self.instance_id,
            method = %request.method(),
            uri = %request.uri(),
            matched_path,
        )
    }
}

/// Rejects public requests whose `signature`/`expires` query does not
/// authorize the method on the requested path.
pub async fn verify_signature(
    State(signer): State<Arc<PathSigner>>,
    request: Request,
    next: Next,
) -> Response {
    let method = if request.method() == Method::PUT {
        SignMethod::Put
    } else {
        SignMethod::Get
    };
    let url = request
        .uri()
        .path_and_query()
        .map(|path_and_query| path_and_query.as_str())
        .unwrap_or_else(|| request.uri().path());
    if !signer.signature_valid(method.as_str(), url) {
        return ApiError::forbidden("invalid or expired signature").into_response();
    }
    next.run(request).await
}

/// Basic auth against `signing_users`; open when none are configured.
pub async fn require_basic_auth(
    State(users): State<Arc<Vec<BasicAuthUser>>>,
    request: Request,
    next: Next,
) -> Response {
    if users.is_empty() || is_authorized(request.headers(), &users) {
        return next.run(request).await;
    }
    let mut response =
        ApiError::new(StatusCode::UNAUTHORIZED, "missing or invalid credentials").into_response();
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"bits\""),
    );
    response
}

fn is_authorized(headers: &HeaderMap, users: &[BasicAuthUser]) -> bool {
    let Some(Authorization(credentials)) = headers.typed_get::<Authorization<Basic>>() else {
        return false;
    };
    users
        .iter()
        .any(|user| credentials_match(user, credentials.username(), credentials.password()))
}

fn credentials_match(user: &BasicAuthUser, username: &str, password: &str) -> bool {
    let username_ok = user.username.as_bytes().ct_eq(username.as_bytes());
    let password_ok = user.password.as_bytes().ct_eq(password.as_bytes());
    (username_ok & password_ok).into()
}
