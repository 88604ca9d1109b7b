use std::time::{Duration, Instant};

use anyhow::Result;
use opentelemetry::{
    metrics::{Counter, Histogram},
    KeyValue,
};
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::{
    metrics::{PeriodicReader, SdkMeterProvider},
    Resource,
};

pub fn low_latency_boundaries() -> Vec<f64> {
    vec![
        0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0,
        500.0, 750.0, 1000.0,
    ]
}

pub fn init_provider(
    enable_metrics: bool,
    endpoint: Option<&String>,
    interval: Duration,
    instance_id: Option<&String>,
    service_version: &str,
) -> Result<()> {
    if !enable_metrics {
        return Ok(());
    }

    let mut resource_builder = Resource::builder()
        .with_attribute(KeyValue::new("service.namespace", "bits"))
        .with_attribute(KeyValue::new("service.name", "bits-server"))
        .with_attribute(KeyValue::new(
            "service.version",
            service_version.to_string(),
        ));

    if let Some(instance_id) = instance_id {
        resource_builder = resource_builder
            .with_attribute(KeyValue::new("bits.instance.id", instance_id.to_owned()));
    }

    let mut exporter = MetricExporter::builder().with_tonic();
    if let Some(endpoint) = endpoint {
        exporter = exporter.with_endpoint(endpoint.to_owned());
    }
    let exporter = exporter.build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(interval)
        .build();

    let provider = SdkMeterProvider::builder()
        .with_resource(resource_builder.build())
        .with_reader(reader)
        .build();

    opentelemetry::global::set_meter_provider(provider);
    Ok(())
}

pub trait TimerUpdate {
    fn add(&self, duration: Duration, labels: &[KeyValue]);
}

impl TimerUpdate for Histogram<f64> {
    fn add(&self, duration: Duration, labels: &[KeyValue]) {
        self.record(duration.as_secs_f64(), labels);
    }
}

/// Records the elapsed time into `metric` when dropped.
pub struct Timer<'a, T: TimerUpdate + Sync> {
    start: Instant,
    metric: &'a T,
    labels: &'a [KeyValue],
}

impl<'a, T: TimerUpdate + Sync> Timer<'a, T> {
    pub fn start_with_labels(metric: &'a T, labels: &'a [KeyValue]) -> Self {
        Self {
            start: Instant::now(),
            metric,
            labels,
        }
    }
}

impl<T: TimerUpdate + Sync> Drop for Timer<'_, T> {
    fn drop(&mut self) {
        self.metric.add(self.start.elapsed(), self.labels);
    }
}

pub trait Increment {
    fn inc(&self, labels: &[KeyValue]);
}

impl Increment for Counter<u64> {
    fn inc(&self, labels: &[KeyValue]) {
        self.add(1, labels);
    }
}

pub mod blobstore {
    use opentelemetry::metrics::{Counter, Histogram};

    use crate::low_latency_boundaries;

    #[derive(Debug, Clone)]
    pub struct Metrics {
        pub operations: Histogram<f64>,
        pub errors: Counter<u64>,
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Metrics {
        pub fn new() -> Metrics {
            let meter = opentelemetry::global::meter("blobstore");

            let operations = meter
                .f64_histogram("bits.blobstore.operation_duration_seconds")
                .with_unit("s")
                .with_boundaries(low_latency_boundaries())
                .with_description("Duration of blobstore operations in seconds")
                .build();

            let errors = meter
                .u64_counter("bits.blobstore.errors_total")
                .with_description("Total number of failed blobstore operations")
                .build();

            Metrics { operations, errors }
        }
    }
}

pub mod app_stash {
    use opentelemetry::metrics::{Counter, Histogram};

    use crate::low_latency_boundaries;

    #[derive(Debug, Clone)]
    pub struct Metrics {
        pub entries_stored: Counter<u64>,
        pub entries_matched: Counter<u64>,
        pub fetch_retries: Counter<u64>,
        pub bundle_duration: Histogram<f64>,
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Metrics {
        pub fn new() -> Metrics {
            let meter = opentelemetry::global::meter("app-stash");

            let entries_stored = meter
                .u64_counter("bits.app_stash.entries_stored")
                .with_description("Number of zip entries written into the app stash")
                .build();
            let entries_matched = meter
                .u64_counter("bits.app_stash.entries_matched")
                .with_description("Number of fingerprints found in the app stash")
                .build();
            let fetch_retries = meter
                .u64_counter("bits.app_stash.fetch_retries")
                .with_description("Number of retried app stash entry fetches while bundling")
                .build();
            let bundle_duration = meter
                .f64_histogram("bits.app_stash.bundle_duration_seconds")
                .with_unit("s")
                .with_boundaries(low_latency_boundaries())
                .with_description("Time to assemble an app bundle in seconds")
                .build();

            Metrics {
                entries_stored,
                entries_matched,
                fetch_retries,
                bundle_duration,
            }
        }
    }
}
