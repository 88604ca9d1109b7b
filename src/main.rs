use std::path::PathBuf;

use ::tracing::{error, info_span};
use anyhow::Context;
use clap::Parser;
use service::Service;

mod config;
mod http_objects;
mod middleware;
mod resources;
mod routes;
mod service;
mod tracing;
use tracing::setup_tracing;

#[cfg(test)]
mod testing;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "config file", help = "Path to config file")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::ServerConfig::load(cli.config.as_deref())
        .context("error loading configuration")?;

    let guards = setup_tracing(&config).context("error setting up tracing")?;

    metrics::init_provider(
        config.telemetry.enable_metrics,
        config.telemetry.endpoint.as_ref(),
        config.telemetry.metrics_interval,
        config.telemetry.instance_id.as_ref(),
        env!("CARGO_PKG_VERSION"),
    )
    .context("error initializing metrics")?;

    let root_span = info_span!(
        "bits",
        env = config.env,
        "bits-instance" = config.instance_id()
    );
    let _guard = root_span.enter();

    let service = Service::new(config).context("error creating service")?;
    if let Err(err) = service.start().await {
        error!("error starting service: {:?}", err);
    }

    // export traces before shutdown
    if let Some(tracer_provider) = guards.tracer_provider {
        if let Err(err) = tracer_provider.force_flush() {
            error!("error flushing traces: {:?}", err);
        }
        if let Err(err) = tracer_provider.shutdown() {
            error!("error shutting down tracer provider: {:?}", err);
        }
    }
    drop(guards.log_file_guard);
    Ok(())
}
