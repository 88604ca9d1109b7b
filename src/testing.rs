use std::io::{Cursor, Write};

use anyhow::Result;
use axum::{
    body::{to_bytes, Body, Bytes},
    http::{header, Request, Response},
    Router,
};
use tempfile::TempDir;
use tower::ServiceExt;
use tracing::subscriber;
use tracing_subscriber::{layer::SubscriberExt, Layer};
use zip::{write::SimpleFileOptions, ZipWriter};

use crate::{
    config::{ResourceConfig, ServerConfig},
    routes::create_routes,
    service::Service,
};

pub const PUBLIC_HOST: &str = "public.127.0.0.1.nip.io:8000";

pub struct TestService {
    pub service: Service,
    pub router: Router,
    pub storage: TempDir,
}

impl TestService {
    pub fn new() -> Result<Self> {
        Self::with_config(|_| {})
    }

    /// Local backends for every resource, rooted in a fresh temp dir.
    pub fn with_config(customize: impl FnOnce(&mut ServerConfig)) -> Result<Self> {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
        let _ = subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_filter(env_filter)),
        );

        let storage = tempfile::tempdir()?;
        let mut cfg = ServerConfig {
            secret: Some("test-secret".to_string()),
            packages: ResourceConfig::local(storage.path().join("packages")),
            droplets: ResourceConfig::local(storage.path().join("droplets")),
            buildpacks: ResourceConfig::local(storage.path().join("buildpacks")),
            app_stash: ResourceConfig::local(storage.path().join("app_stash")),
            ..Default::default()
        };
        customize(&mut cfg);
        cfg.validate()?;

        let service = Service::new(cfg)?;
        let router = create_routes(service.route_state.clone());
        Ok(Self {
            service,
            router,
            storage,
        })
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

/// Requests without a public `Host` header reach the private router.
pub fn request(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder().method(method).uri(uri)
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Minimal `multipart/form-data` encoder.
#[derive(Default)]
pub struct MultipartBody {
    parts: Vec<u8>,
}

impl MultipartBody {
    const BOUNDARY: &'static str = "bits-test-boundary";

    pub fn file(mut self, name: &str, file_name: &str, content: &[u8]) -> Self {
        write!(
            self.parts,
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            Self::BOUNDARY,
            name,
            file_name
        )
        .unwrap();
        self.parts.extend_from_slice(content);
        self.parts.extend_from_slice(b"\r\n");
        self
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        write!(
            self.parts,
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
            Self::BOUNDARY,
            name,
            value
        )
        .unwrap();
        self
    }

    pub fn content_type() -> String {
        format!("multipart/form-data; boundary={}", Self::BOUNDARY)
    }

    pub fn finish(mut self) -> Vec<u8> {
        write!(self.parts, "--{}--\r\n", Self::BOUNDARY).unwrap();
        self.parts
    }
}

/// Request builder preset with the multipart headers for `body`.
pub fn multipart_request(method: &str, uri: &str, body: Vec<u8>) -> Request<Body> {
    request(method, uri)
        .header(header::CONTENT_TYPE, MultipartBody::content_type())
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    let body = serde_json::to_vec(&body).unwrap();
    request(method, uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

/// Zip with `(name, content, mode)` entries.
pub fn zip_bytes(files: &[(&str, &str, u32)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content, mode) in files {
        writer
            .start_file(*name, SimpleFileOptions::default().unix_permissions(*mode))
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}
