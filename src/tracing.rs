use anyhow::Result;
use opentelemetry::{global, trace::TracerProvider as _};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::trace::{SdkTracerProvider, TracerProviderBuilder};
use tracing::error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::config::ServerConfig;

pub fn get_env_filter() -> tracing_subscriber::EnvFilter {
    // RUST_LOG used to control logging level.
    tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::default()
            .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
    })
}

pub fn get_log_layer<S>(config: &ServerConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    S: tracing::Subscriber,
{
    if config.structured_logging() {
        return Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_span_list(false)
                .flatten_event(true)
                .with_current_span(true),
        );
    }

    Box::new(tracing_subscriber::fmt::layer().compact())
}

/// Handles that must outlive the server so buffered logs and spans get
/// flushed.
#[derive(Default)]
pub struct TracingGuards {
    pub tracer_provider: Option<SdkTracerProvider>,
    pub log_file_guard: Option<WorkerGuard>,
}

pub fn setup_tracing(config: &ServerConfig) -> Result<TracingGuards> {
    let mut guards = TracingGuards::default();

    let file_layer = match &config.telemetry.local_log_file {
        Some(path) => {
            let directory = path.parent().filter(|dir| !dir.as_os_str().is_empty());
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("invalid local_log_file: {}", path.display()))?;
            let appender = tracing_appender::rolling::daily(
                directory.unwrap_or_else(|| std::path::Path::new(".")),
                file_name,
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            guards.log_file_guard = Some(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(get_env_filter()),
            )
        }
        None => None,
    };

    if config.telemetry.tracing_enabled() {
        let mut span_exporter = SpanExporter::builder().with_tonic();
        if let Some(endpoint) = &config.telemetry.endpoint {
            span_exporter = span_exporter.with_endpoint(endpoint.clone());
        }
        let tracer_provider = TracerProviderBuilder::default()
            .with_batch_exporter(span_exporter.build()?)
            .build();
        global::set_tracer_provider(tracer_provider.clone());
        guards.tracer_provider = Some(tracer_provider);
    }
    let otel_layer = guards.tracer_provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer()
            .with_tracer(provider.tracer("bits-server"))
            .with_filter(get_env_filter())
    });

    let subscriber = tracing_subscriber::Registry::default()
        .with(get_log_layer(config).with_filter(get_env_filter()))
        .with(file_layer)
        .with(otel_layer);
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        error!("logger was already initiated, continuing: {:?}", e);
    }
    Ok(guards)
}
